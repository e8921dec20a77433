//! Anthropic Messages API adapter.
//!
//! Auth via `x-api-key` + a pinned `anthropic-version` header, usage
//! reported under `input_tokens`/`output_tokens`/`cache_read_input_tokens`.
//! Schema translation between OpenAI-shaped and Anthropic-shaped bodies
//! lives in [`crate::transformers::anthropic`], not here — this module only
//! knows how to reach Anthropic and read its usage block.

use serde_json::Value;

use crate::channel::Channel;

use super::{ProviderAdapter, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    fn default_base_url(&self) -> Option<&'static str> {
        Some(DEFAULT_BASE_URL)
    }

    fn auth_headers(&self, channel: &Channel) -> Vec<(String, String)> {
        vec![
            ("x-api-key".into(), channel.credential.clone()),
            ("anthropic-version".into(), ANTHROPIC_VERSION.into()),
        ]
    }

    fn build_url(&self, channel: &Channel) -> anyhow::Result<String> {
        let base = super::resolve_base_url(self, channel)?;
        Ok(format!("{base}/messages"))
    }

    fn extract_token_usage(&self, body: &Value) -> TokenUsage {
        TokenUsage {
            input: body["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            output: body["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
            cached: body["usage"]["cache_read_input_tokens"].as_u64().unwrap_or(0) as u32,
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
        Channel::new("c1".into(), "anthropic-main".into(), Provider::Anthropic, "sk-ant-test".into())
    }

    #[test]
    fn auth_headers_include_api_key_and_version() {
        let headers = AnthropicAdapter.auth_headers(&chan());
        assert!(headers.contains(&("x-api-key".to_string(), "sk-ant-test".to_string())));
        assert!(headers.iter().any(|(k, v)| k == "anthropic-version" && v == ANTHROPIC_VERSION));
    }

    #[test]
    fn build_url_targets_v1_messages() {
        let url = AnthropicAdapter.build_url(&chan()).unwrap();
        assert!(url.ends_with("/messages"));
    }

    #[test]
    fn extracts_cache_read_tokens() {
        let usage = AnthropicAdapter.extract_token_usage(&json!({
            "usage": {"input_tokens": 10, "output_tokens": 5, "cache_read_input_tokens": 3}
        }));
        assert_eq!(usage, TokenUsage { input: 10, output: 5, cached: 3 });
    }
}
