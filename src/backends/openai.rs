//! OpenAI adapter.
//!
//! Auth via `Authorization: Bearer …`, usage reported under
//! `prompt_tokens`/`completion_tokens`/`prompt_tokens_details.cached_tokens`.
//! Defaults to the public OpenAI API; a channel may override `base_url` to
//! point at a private deployment while keeping OpenAI's wire shape.

use serde_json::Value;

use crate::channel::Channel;

use super::{ProviderAdapter, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiAdapter;

impl ProviderAdapter for OpenAiAdapter {
    fn default_base_url(&self) -> Option<&'static str> {
        Some(DEFAULT_BASE_URL)
    }

    fn auth_headers(&self, channel: &Channel) -> Vec<(String, String)> {
        vec![("Authorization".into(), format!("Bearer {}", channel.credential))]
    }

    fn build_url(&self, channel: &Channel) -> anyhow::Result<String> {
        let base = super::resolve_base_url(self, channel)?;
        Ok(format!("{base}/chat/completions"))
    }

    fn extract_token_usage(&self, body: &Value) -> TokenUsage {
        TokenUsage {
            input: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            output: body["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
            cached: body["usage"]["prompt_tokens_details"]["cached_tokens"].as_u64().unwrap_or(0) as u32,
        }
    }

    fn validate(&self, channel: &Channel) -> anyhow::Result<()> {
        anyhow::ensure!(!channel.credential.is_empty(), "channel `{}` has no credential", channel.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;
    use serde_json::json;

    fn chan() -> Channel {
        Channel::new("c1".into(), "openai-main".into(), Provider::OpenAI, "sk-test".into())
    }

    #[test]
    fn auth_header_is_bearer_token() {
        let headers = OpenAiAdapter.auth_headers(&chan());
        assert_eq!(headers, vec![("Authorization".to_string(), "Bearer sk-test".to_string())]);
    }

    #[test]
    fn build_url_respects_custom_base_url() {
        let mut c = chan();
        c.base_url = Some("https://my-proxy.internal/v1".into());
        let url = OpenAiAdapter.build_url(&c).unwrap();
        assert_eq!(url, "https://my-proxy.internal/v1/chat/completions");
    }

    #[test]
    fn extracts_cached_tokens_from_nested_details() {
        let usage = OpenAiAdapter.extract_token_usage(&json!({
            "usage": {"prompt_tokens": 20, "completion_tokens": 8, "prompt_tokens_details": {"cached_tokens": 4}}
        }));
        assert_eq!(usage, TokenUsage { input: 20, output: 8, cached: 4 });
    }
}
