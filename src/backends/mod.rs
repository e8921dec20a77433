//! Provider adapter trait and dispatch.
//!
//! [`ProviderAdapter`] is the per-provider contract — auth headers, URL
//! construction, token-usage extraction, and channel validation. Unlike the
//! teacher's enum-dispatch `BackendClient` (one concrete adapter per
//! provider, chosen once at construction), Routex resolves the adapter
//! fresh per dispatch from the channel's [`crate::config::Provider`], since
//! the channel set is mutable at runtime through the admin API rather than
//! fixed at process start.

mod anthropic;
mod azure;
mod custom;
mod google;
mod openai;

pub use anthropic::AnthropicAdapter;
pub use azure::AzureAdapter;
pub use custom::CustomAdapter;
pub use google::GoogleAdapter;
pub use openai::OpenAiAdapter;

use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use serde_json::Value;

use crate::channel::Channel;
use crate::config::Provider;

/// Tokens consumed by one completion, normalized across providers' differing
/// usage field names (spec.md §4.7).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u32,
    pub output: u32,
    pub cached: u32,
}

/// Per-provider protocol contract. Transformer pipelines run around these
/// calls, not inside them — an adapter only knows how to reach its own
/// upstream and parse its own usage accounting.
pub trait ProviderAdapter: Send + Sync {
    fn default_base_url(&self) -> Option<&'static str>;
    /// Headers to attach beyond `Content-Type`, given the channel's resolved
    /// credential.
    fn auth_headers(&self, channel: &Channel) -> Vec<(String, String)>;
    /// Full URL to POST the (already provider-shaped) completion body to.
    fn build_url(&self, channel: &Channel) -> anyhow::Result<String>;
    fn extract_token_usage(&self, body: &Value) -> TokenUsage;
    /// Fail fast on channel configurations this provider can't use (e.g. no
    /// base URL for a provider that requires one).
    fn validate(&self, channel: &Channel) -> anyhow::Result<()>;
}

pub fn adapter_for(provider: Provider) -> Box<dyn ProviderAdapter> {
    match provider {
        Provider::Anthropic => Box::new(AnthropicAdapter),
        Provider::OpenAI => Box::new(OpenAiAdapter),
        Provider::Azure => Box::new(AzureAdapter),
        Provider::Google => Box::new(GoogleAdapter),
        Provider::Zhipu => Box::new(CustomAdapter),
        Provider::Custom => Box::new(CustomAdapter),
    }
}

fn resolve_base_url(adapter: &dyn ProviderAdapter, channel: &Channel) -> anyhow::Result<String> {
    let base = channel
        .base_url
        .as_deref()
        .or_else(|| adapter.default_base_url())
        .with_context(|| format!("channel `{}` has no base_url and its provider has no default", channel.name))?;
    Ok(base.trim_end_matches('/').to_string())
}

/// Dispatch an already-provider-shaped completion body to `channel`'s
/// upstream and return the raw provider response body, unparsed against any
/// internal schema — the transformer pipeline's response pass does that.
pub async fn dispatch(client: &Client, channel: &Channel, body: Value, timeout: Duration) -> anyhow::Result<Value> {
    let adapter = adapter_for(channel.provider);
    adapter.validate(channel)?;
    let url = adapter.build_url(channel)?;

    let mut req = client.post(&url).json(&body).timeout(timeout);
    for (k, v) in adapter.auth_headers(channel) {
        req = req.header(k, v);
    }

    let response = req.send().await.with_context(|| format!("POST {url}"))?;
    let status = response.status();
    let text = response.text().await.context("reading upstream response body")?;

    if !status.is_success() {
        anyhow::bail!("upstream `{}` returned HTTP {status}: {text}", channel.name);
    }

    serde_json::from_str(&text).with_context(|| format!("parsing upstream response as JSON: {text}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;

    fn chan(provider: Provider, base_url: Option<&str>) -> Channel {
        let mut c = Channel::new("c1".into(), "test".into(), provider, "secret".into());
        c.base_url = base_url.map(String::from);
        c
    }

    #[test]
    fn anthropic_falls_back_to_default_base_url() {
        let c = chan(Provider::Anthropic, None);
        let adapter = adapter_for(c.provider);
        assert!(resolve_base_url(adapter.as_ref(), &c).unwrap().contains("anthropic.com"));
    }

    #[test]
    fn azure_requires_explicit_base_url() {
        let c = chan(Provider::Azure, None);
        let adapter = adapter_for(c.provider);
        assert!(adapter.validate(&c).is_err());
    }

    #[test]
    fn custom_provider_requires_explicit_base_url() {
        let c = chan(Provider::Custom, None);
        let adapter = adapter_for(c.provider);
        assert!(adapter.validate(&c).is_err());
    }

    #[test]
    fn openai_build_url_targets_chat_completions() {
        let c = chan(Provider::OpenAI, Some("https://api.openai.com/v1"));
        let adapter = adapter_for(c.provider);
        assert!(adapter.build_url(&c).unwrap().ends_with("/chat/completions"));
    }
}
