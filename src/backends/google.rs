//! Google Gemini adapter.
//!
//! Credential travels as a `?key=…` query parameter rather than a header;
//! usage is nested under `usageMetadata` with its own field names.

use serde_json::Value;

use crate::channel::Channel;

use super::{ProviderAdapter, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleAdapter;

impl ProviderAdapter for GoogleAdapter {
    fn default_base_url(&self) -> Option<&'static str> {
        Some(DEFAULT_BASE_URL)
    }

    fn auth_headers(&self, _channel: &Channel) -> Vec<(String, String)> {
        Vec::new()
    }

    fn build_url(&self, channel: &Channel) -> anyhow::Result<String> {
        let base = super::resolve_base_url(self, channel)?;
        Ok(format!("{base}/models/gemini-pro:generateContent?key={}", channel.credential))
    }

    fn extract_token_usage(&self, body: &Value) -> TokenUsage {
        TokenUsage {
            input: body["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0) as u32,
            output: body["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
            cached: body["usageMetadata"]["cachedContentTokenCount"].as_u64().unwrap_or(0) as u32,
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
        Channel::new("c1".into(), "gemini-main".into(), Provider::Google, "api-key-value".into())
    }

    #[test]
    fn credential_travels_as_query_param_not_header() {
        assert!(GoogleAdapter.auth_headers(&chan()).is_empty());
        assert!(GoogleAdapter.build_url(&chan()).unwrap().contains("key=api-key-value"));
    }

    #[test]
    fn extracts_usage_from_nested_usage_metadata() {
        let usage = GoogleAdapter.extract_token_usage(&json!({
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 2, "cachedContentTokenCount": 1}
        }));
        assert_eq!(usage, TokenUsage { input: 7, output: 2, cached: 1 });
    }
}
