//! Azure OpenAI adapter.
//!
//! Always requires a channel-supplied `base_url` (the deployment endpoint is
//! account-specific, unlike OpenAI's fixed public host); auth via `api-key`
//! rather than `Authorization: Bearer`. Usage shape matches OpenAI's.

use serde_json::Value;

use crate::channel::Channel;

use super::{ProviderAdapter, TokenUsage};

pub struct AzureAdapter;

impl ProviderAdapter for AzureAdapter {
    fn default_base_url(&self) -> Option<&'static str> {
        None
    }

    fn auth_headers(&self, channel: &Channel) -> Vec<(String, String)> {
        vec![("api-key".into(), channel.credential.clone())]
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
            "Azure channel `{}` requires an explicit base_url (deployment endpoint)",
            channel.name
        );
        anyhow::ensure!(!channel.credential.is_empty(), "channel `{}` has no credential", channel.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;

    fn chan(base_url: Option<&str>) -> Channel {
        let mut c = Channel::new("c1".into(), "azure-main".into(), Provider::Azure, "key".into());
        c.base_url = base_url.map(String::from);
        c
    }

    #[test]
    fn auth_header_uses_api_key_not_bearer() {
        let headers = AzureAdapter.auth_headers(&chan(None));
        assert_eq!(headers, vec![("api-key".to_string(), "key".to_string())]);
    }

    #[test]
    fn validate_rejects_missing_base_url() {
        assert!(AzureAdapter.validate(&chan(None)).is_err());
    }

    #[test]
    fn validate_accepts_configured_base_url() {
        assert!(AzureAdapter.validate(&chan(Some("https://my-resource.openai.azure.com"))).is_ok());
    }
}
