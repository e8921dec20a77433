//! Gateway configuration.
//!
//! The persistent store (channels, rules, tee destinations) is an in-memory,
//! TOML-seeded collaborator — only its CRUD semantics matter, not durability.
//! This module owns the ambient, process-level settings (ports, breaker
//! defaults, session TTL, tee cadence) plus the seed file that bootstraps
//! [`crate::store::ConfigStore`] at startup, the same role the teacher's
//! `config.toml` plays for its tier ladder.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Which wire protocol an upstream account speaks.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    Anthropic,
    OpenAI,
    Azure,
    Google,
    /// Zhipu (GLM) — OpenAI-wire-compatible; routed through the same
    /// adapter as `Custom`. This label is never used to infer further
    /// vendor-specific behavior beyond the base URL the channel supplies.
    Zhipu,
    Custom,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
            Self::Azure => "azure",
            Self::Google => "google",
            Self::Zhipu => "zhipu",
            Self::Custom => "custom",
        })
    }
}

/// Top-level process configuration — ports, logging, and the numeric
/// defaults the design leaves as configurable knobs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "defaults::client_port")]
    pub client_port: u16,
    #[serde(default = "defaults::admin_port")]
    pub admin_port: u16,

    /// Bounded in-memory request-log ring buffer capacity.
    #[serde(default = "defaults::traffic_log_capacity")]
    pub traffic_log_capacity: usize,

    #[serde(default)]
    pub log_level: Option<String>,

    /// `LOG_FORMAT` ∈ {pretty, json}.
    #[serde(default = "defaults::log_format")]
    pub log_format: String,

    /// Environment variable holding the admin-API bearer token. `None`
    /// disables admin auth (the port should then be firewalled).
    #[serde(default)]
    pub admin_token_env: Option<String>,

    /// Per-request upstream timeout, default 60s.
    #[serde(default = "defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Bounded retry budget across distinct eligible channels on upstream
    /// failure; never the same channel twice.
    #[serde(default = "defaults::max_upstream_retries")]
    pub max_upstream_retries: u32,

    /// Circuit-breaker defaults.
    #[serde(default = "defaults::breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "defaults::breaker_window_secs")]
    pub breaker_window_secs: u64,
    #[serde(default = "defaults::breaker_initial_backoff_secs")]
    pub breaker_initial_backoff_secs: u64,
    #[serde(default = "defaults::breaker_backoff_ceiling_secs")]
    pub breaker_backoff_ceiling_secs: u64,

    /// Session-affinity TTL, default 5 hours.
    #[serde(default = "defaults::session_affinity_ttl_secs")]
    pub session_affinity_ttl_secs: u64,
    /// Session-affinity LRU capacity.
    #[serde(default = "defaults::session_affinity_capacity")]
    pub session_affinity_capacity: usize,

    /// Process-wide default load-balancer strategy.
    #[serde(default)]
    pub load_balancer_strategy: crate::load_balancer::Strategy,

    /// Per-client-IP requests-per-minute cap on the client-facing port.
    /// `None` disables rate limiting entirely.
    #[serde(default)]
    pub client_rate_limit_rpm: Option<u32>,

    /// Tee scheduler cadence.
    #[serde(default = "defaults::tee_flush_interval_ms")]
    pub tee_flush_interval_ms: u64,
    #[serde(default = "defaults::tee_batch_size")]
    pub tee_batch_size: usize,
}

impl GatewayConfig {
    pub fn breaker_config(&self) -> crate::channel::BreakerConfig {
        crate::channel::BreakerConfig {
            threshold: self.breaker_threshold,
            window: std::time::Duration::from_secs(self.breaker_window_secs),
            initial_backoff: std::time::Duration::from_secs(self.breaker_initial_backoff_secs),
            backoff_ceiling: std::time::Duration::from_secs(self.breaker_backoff_ceiling_secs),
        }
    }

    pub fn session_affinity_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_affinity_ttl_secs as i64)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            client_port: defaults::client_port(),
            admin_port: defaults::admin_port(),
            traffic_log_capacity: defaults::traffic_log_capacity(),
            log_level: None,
            log_format: defaults::log_format(),
            admin_token_env: None,
            request_timeout_ms: defaults::request_timeout_ms(),
            max_upstream_retries: defaults::max_upstream_retries(),
            breaker_threshold: defaults::breaker_threshold(),
            breaker_window_secs: defaults::breaker_window_secs(),
            breaker_initial_backoff_secs: defaults::breaker_initial_backoff_secs(),
            breaker_backoff_ceiling_secs: defaults::breaker_backoff_ceiling_secs(),
            session_affinity_ttl_secs: defaults::session_affinity_ttl_secs(),
            session_affinity_capacity: defaults::session_affinity_capacity(),
            load_balancer_strategy: crate::load_balancer::Strategy::default(),
            client_rate_limit_rpm: None,
            tee_flush_interval_ms: defaults::tee_flush_interval_ms(),
            tee_batch_size: defaults::tee_batch_size(),
        }
    }
}

/// A seed channel entry read from the bootstrap TOML file. Credentials are
/// resolved from an environment variable at load time, keeping secrets out
/// of the file on disk — same discipline as the teacher's `ClientConfig`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelSeed {
    pub name: String,
    pub provider: Provider,
    #[serde(default)]
    pub base_url: Option<String>,
    pub credential_env: String,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "defaults::priority")]
    pub priority: i32,
    #[serde(default = "defaults::weight")]
    pub weight: f64,
}

impl ChannelSeed {
    pub fn resolve_credential(&self) -> anyhow::Result<String> {
        std::env::var(&self.credential_env).with_context(|| {
            format!("channel `{}`: env var `{}` not set", self.name, self.credential_env)
        })
    }
}

/// Top-level seed file: process config plus the initial channel/rule/tee
/// population. Loaded once at startup and re-polled by mtime (mirroring the
/// teacher's config watcher); operator edits made through the admin CRUD API
/// always win over a stale file on disk, since reload only adds seed entries
/// that are new by name.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SeedFile {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub channels: Vec<ChannelSeed>,
    #[serde(default)]
    pub rules: Vec<crate::smart_router::RuleSeed>,
    #[serde(default)]
    pub tee: Vec<crate::tee::TeeDestinationSeed>,
}

impl SeedFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let seed: Self = toml::from_str(&content).context("parsing config TOML")?;
        seed.validate()?;
        Ok(seed)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for c in &self.channels {
            anyhow::ensure!(seen.insert(c.name.as_str()), "duplicate channel name `{}`", c.name);
        }
        let names: std::collections::HashSet<&str> =
            self.channels.iter().map(|c| c.name.as_str()).collect();
        for r in &self.rules {
            if let crate::smart_router::RuleTargetSeed::Channel(name) = &r.target {
                anyhow::ensure!(
                    names.contains(name.as_str()),
                    "rule `{}` targets unknown channel `{}`",
                    r.name,
                    name
                );
            }
        }
        Ok(())
    }
}

mod defaults {
    pub fn client_port() -> u16 { 8080 }
    pub fn admin_port() -> u16 { 8081 }
    pub fn traffic_log_capacity() -> usize { 500 }
    pub fn log_format() -> String { "pretty".into() }
    pub fn request_timeout_ms() -> u64 { 60_000 }
    pub fn max_upstream_retries() -> u32 { 2 }
    pub fn breaker_threshold() -> u32 { 5 }
    pub fn breaker_window_secs() -> u64 { 60 }
    pub fn breaker_initial_backoff_secs() -> u64 { 30 }
    pub fn breaker_backoff_ceiling_secs() -> u64 { 8 * 60 }
    pub fn session_affinity_ttl_secs() -> u64 { 5 * 3600 }
    pub fn session_affinity_capacity() -> usize { 10_000 }
    pub fn tee_flush_interval_ms() -> u64 { 1_000 }
    pub fn tee_batch_size() -> usize { 10 }
    pub fn priority() -> i32 { 100 }
    pub fn weight() -> f64 { 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_defaults_applied_when_section_absent() {
        let seed: SeedFile = toml::from_str("").unwrap();
        assert_eq!(seed.gateway.client_port, 8080);
        assert_eq!(seed.gateway.admin_port, 8081);
        assert_eq!(seed.gateway.breaker_threshold, 5);
        assert_eq!(seed.gateway.session_affinity_ttl_secs, 5 * 3600);
    }

    #[test]
    fn parses_minimal_channel_seed() {
        let toml_str = r#"
            [[channels]]
            name = "anthropic-main"
            provider = "anthropic"
            credential_env = "ROUTEX_TEST_ANTHROPIC_KEY"
        "#;
        let seed: SeedFile = toml::from_str(toml_str).unwrap();
        assert_eq!(seed.channels.len(), 1);
        assert_eq!(seed.channels[0].priority, 100);
        assert!((seed.channels[0].weight - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn validate_rejects_duplicate_channel_names() {
        let toml_str = r#"
            [[channels]]
            name = "dup"
            provider = "openai"
            credential_env = "A"

            [[channels]]
            name = "dup"
            provider = "openai"
            credential_env = "B"
        "#;
        let seed: SeedFile = toml::from_str(toml_str).unwrap();
        assert!(seed.validate().is_err());
    }

    #[test]
    fn provider_round_trips_through_snake_case() {
        #[derive(Deserialize)]
        struct Wrap {
            p: Provider,
        }
        let w: Wrap = toml::from_str("p = \"azure\"\n").unwrap();
        assert_eq!(w.p, Provider::Azure);
        assert_eq!(w.p.to_string(), "azure");
    }

    #[test]
    fn breaker_config_maps_seconds_to_durations() {
        let mut gw = GatewayConfig::default();
        gw.breaker_window_secs = 120;
        let bc = gw.breaker_config();
        assert_eq!(bc.window, std::time::Duration::from_secs(120));
    }
}
