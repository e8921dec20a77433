//! Custom / OpenAI-compatible adapter.
//!
//! Used for `Provider::Custom` and `Provider::Zhipu` — any upstream that
//! speaks the OpenAI chat-completions wire shape but isn't OpenAI itself
//! (self-hosted gateways, Zhipu's compatible endpoint, etc). Always requires
//! an explicit `base_url`; auth is Bearer unless the channel opts out by
//! leaving its credential empty.

use serde_json::Value;

use crate::channel::Channel;

use super::{ProviderAdapter, TokenUsage};

pub struct CustomAdapter;

impl ProviderAdapter for CustomAdapter {
    fn default_base_url(&self) -> Option<&'static str> {
        None
    }

    fn auth_headers(&self, channel: &Channel) -> Vec<(String, String)> {
        if channel.credential.is_empty() {
            Vec::new()
        } else {
            vec![("Authorization".into(), format!("Bearer {}", channel.credential))]
        }
    }

    fn build_url(&self, channel: &Channel) -> anyhow::Result<String> {
        let base = super::resolve_base_url(self, channel)?;
        Ok(format!("{base}/chat/completions"))
    }

    fn extract_token_usage(&self, body: &Value) -> TokenUsage {
        TokenUsage {
            input: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output: body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
            cached: 0,
        }
    }

    fn validate(&self, channel: &Channel) -> anyhow::Result<()> {
        anyhow::ensure!(
            channel.base_url.is_some(),
            "custom channel `{}` requires an explicit base_url",
            channel.name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;

    #[test]
    fn keyless_channel_sends_no_auth_header() {
        let c = Channel::new("c1".into(), "local-vllm".into(), Provider::Custom, String::new());
        assert!(CustomAdapter.auth_headers(&c).is_empty());
    }

    #[test]
    fn validate_requires_base_url() {
        let c = Channel::new("c1".into(), "local-vllm".into(), Provider::Custom, "key".into());
        assert!(CustomAdapter.validate(&c).is_err());
    }
}
