//! Channel — an upstream-account descriptor, and its circuit-breaker state
//! machine.
//!
//! A [`Channel`] is the unit the router, load balancer, and provider
//! adapters all select and dispatch against. Its mutable fields (counters,
//! breaker/rate-limit deadlines) are updated in place behind a per-channel
//! lock; the router and load balancer read a cloned snapshot of the whole
//! channel list per request (copy-on-write, same discipline as the
//! teacher's `RouterState::config`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Provider;

/// Number of consecutive failures that trips the breaker (spec default: 5).
pub const DEFAULT_BREAKER_THRESHOLD: u32 = 5;
/// Window within which consecutive failures must occur (spec default: 60s).
pub const DEFAULT_BREAKER_WINDOW: Duration = Duration::from_secs(60);
/// Initial backoff once the breaker trips (spec default: 30s).
pub const DEFAULT_BREAKER_INITIAL_BACKOFF: Duration = Duration::from_secs(30);
/// Backoff ceiling (spec default: 8 minutes).
pub const DEFAULT_BREAKER_BACKOFF_CEILING: Duration = Duration::from_secs(8 * 60);

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    #[default]
    Enabled,
    Disabled,
    RateLimited,
    CircuitBroken,
}

/// Breaker defaults, configurable per spec.md §9's resolved Open Question.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub threshold: u32,
    pub window: Duration,
    pub initial_backoff: Duration,
    pub backoff_ceiling: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_BREAKER_THRESHOLD,
            window: DEFAULT_BREAKER_WINDOW,
            initial_backoff: DEFAULT_BREAKER_INITIAL_BACKOFF,
            backoff_ceiling: DEFAULT_BREAKER_BACKOFF_CEILING,
        }
    }
}

/// An upstream-account descriptor (spec.md §3 "Channel").
///
/// Counters use plain `u64`s behind `&mut` access (callers hold the
/// channel's slot lock in [`crate::store::ConfigStore`]); cheap atomic
/// fields (`request_count`, `last_used_at`) are split out as [`AtomicU64`]
/// so dispatch-time bookkeeping never needs the slot lock at all.
#[derive(Debug, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub provider: Provider,
    pub base_url: Option<String>,
    pub credential: String,
    /// Supported models; empty means "any".
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub status: ChannelStatus,

    #[serde(skip, default)]
    pub request_count: AtomicU64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub consecutive_failures: u32,

    pub last_failure_at: Option<DateTime<Utc>>,
    pub circuit_breaker_until: Option<DateTime<Utc>>,
    pub rate_limited_until: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,

    /// Current backoff duration, doubled on each repeat trip (capped at the
    /// configured ceiling), reset to the initial backoff on a clean close.
    #[serde(default)]
    pub current_backoff_secs: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Per-channel transformer spec override (spec.md §3).
    #[serde(default)]
    pub transformers: Option<Vec<crate::transformers::TransformerSpec>>,
}

impl Clone for Channel {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            provider: self.provider,
            base_url: self.base_url.clone(),
            credential: self.credential.clone(),
            models: self.models.clone(),
            priority: self.priority,
            weight: self.weight,
            status: self.status,
            request_count: AtomicU64::new(self.request_count.load(Ordering::Relaxed)),
            success_count: self.success_count,
            failure_count: self.failure_count,
            consecutive_failures: self.consecutive_failures,
            last_failure_at: self.last_failure_at,
            circuit_breaker_until: self.circuit_breaker_until,
            rate_limited_until: self.rate_limited_until,
            last_used_at: self.last_used_at,
            current_backoff_secs: self.current_backoff_secs,
            created_at: self.created_at,
            updated_at: self.updated_at,
            transformers: self.transformers.clone(),
        }
    }
}

impl Channel {
    pub fn new(id: String, name: String, provider: Provider, credential: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            provider,
            base_url: None,
            credential,
            models: Vec::new(),
            priority: 100,
            weight: 1.0,
            status: ChannelStatus::Enabled,
            request_count: AtomicU64::new(0),
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            last_failure_at: None,
            circuit_breaker_until: None,
            rate_limited_until: None,
            last_used_at: None,
            current_backoff_secs: DEFAULT_BREAKER_INITIAL_BACKOFF.as_secs(),
            created_at: now,
            updated_at: now,
            transformers: None,
        }
    }

    /// Eligibility per spec.md §3/§4.4: enabled, breaker deadline passed,
    /// rate-limit deadline passed, and (if `model` given) supports it.
    pub fn is_eligible(&self, now: DateTime<Utc>, model: Option<&str>) -> bool {
        if self.status == ChannelStatus::Disabled {
            return false;
        }
        if let Some(until) = self.circuit_breaker_until {
            if now < until {
                return false;
            }
        }
        if let Some(until) = self.rate_limited_until {
            if now < until {
                return false;
            }
        }
        if let Some(model) = model {
            if !self.models.is_empty() && !self.models.iter().any(|m| m == model) {
                return false;
            }
        }
        true
    }

    /// True exactly when the breaker is presently open (used for the
    /// `CircuitOpen` fallback signal, distinct from generic ineligibility).
    pub fn is_circuit_open(&self, now: DateTime<Utc>) -> bool {
        matches!(self.circuit_breaker_until, Some(until) if now < until)
    }

    /// Record a dispatch. Cheap: only touches the atomic counter and
    /// `last_used_at`, so callers don't need the slot lock just to dispatch.
    pub fn record_dispatch(&mut self, now: DateTime<Utc>) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.last_used_at = Some(now);
    }

    /// Record a successful completion: resets the breaker and failure streak.
    pub fn record_success(&mut self, now: DateTime<Utc>, cfg: &BreakerConfig) {
        self.success_count += 1;
        self.consecutive_failures = 0;
        self.circuit_breaker_until = None;
        self.current_backoff_secs = cfg.initial_backoff.as_secs();
        self.updated_at = now;
    }

    /// Record a failed completion; trips (or re-trips, with exponential
    /// backoff) the breaker once `consecutive_failures` crosses `threshold`
    /// within `window` of the first failure in the current streak.
    pub fn record_failure(&mut self, now: DateTime<Utc>, cfg: &BreakerConfig) {
        self.failure_count += 1;

        let within_window = self
            .last_failure_at
            .map(|last| (now - last) <= chrono::Duration::from_std(cfg.window).unwrap_or_default())
            .unwrap_or(true);

        self.consecutive_failures = if within_window { self.consecutive_failures + 1 } else { 1 };
        self.last_failure_at = Some(now);
        self.updated_at = now;

        if self.consecutive_failures >= cfg.threshold {
            let was_already_open = self.is_circuit_open(now);
            let backoff = Duration::from_secs(self.current_backoff_secs.max(1));
            self.circuit_breaker_until = Some(now + chrono::Duration::from_std(backoff).unwrap_or_default());
            // Exponential backoff: only grow it on a repeat trip (half-open probe failed),
            // not on the very first trip.
            if was_already_open {
                let doubled = backoff.saturating_mul(2).min(cfg.backoff_ceiling);
                self.current_backoff_secs = doubled.as_secs();
            } else if self.current_backoff_secs < cfg.initial_backoff.as_secs() {
                self.current_backoff_secs = cfg.initial_backoff.as_secs();
            }
        }
    }

    /// Apply a `Retry-After` hint from a 429/503 response.
    pub fn record_rate_limited(&mut self, now: DateTime<Utc>, retry_after: Duration) {
        self.rate_limited_until = Some(now + chrono::Duration::from_std(retry_after).unwrap_or_default());
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chan() -> Channel {
        Channel::new("c1".into(), "test".into(), Provider::OpenAI, "key".into())
    }

    #[test]
    fn fresh_channel_is_eligible() {
        let c = chan();
        assert!(c.is_eligible(Utc::now(), None));
    }

    #[test]
    fn disabled_channel_is_never_eligible() {
        let mut c = chan();
        c.status = ChannelStatus::Disabled;
        assert!(!c.is_eligible(Utc::now(), None));
    }

    #[test]
    fn breaker_trips_after_threshold_consecutive_failures() {
        let mut c = chan();
        let cfg = BreakerConfig::default();
        let now = Utc::now();
        for _ in 0..cfg.threshold {
            c.record_failure(now, &cfg);
        }
        assert!(c.is_circuit_open(now));
        assert!(!c.is_eligible(now, None));
    }

    #[test]
    fn breaker_does_not_trip_below_threshold() {
        let mut c = chan();
        let cfg = BreakerConfig::default();
        let now = Utc::now();
        for _ in 0..cfg.threshold - 1 {
            c.record_failure(now, &cfg);
        }
        assert!(!c.is_circuit_open(now));
    }

    #[test]
    fn success_resets_consecutive_failures_and_breaker() {
        let mut c = chan();
        let cfg = BreakerConfig::default();
        let now = Utc::now();
        for _ in 0..cfg.threshold {
            c.record_failure(now, &cfg);
        }
        assert!(c.is_circuit_open(now));
        c.record_success(now, &cfg);
        assert_eq!(c.consecutive_failures, 0);
        assert!(!c.is_circuit_open(now));
    }

    #[test]
    fn channel_becomes_eligible_again_after_breaker_deadline() {
        let mut c = chan();
        let cfg = BreakerConfig::default();
        let now = Utc::now();
        for _ in 0..cfg.threshold {
            c.record_failure(now, &cfg);
        }
        let later = now + chrono::Duration::seconds(cfg.initial_backoff.as_secs() as i64 + 1);
        assert!(c.is_eligible(later, None));
    }

    #[test]
    fn repeat_trip_doubles_backoff_up_to_ceiling() {
        let mut c = chan();
        let cfg = BreakerConfig::default();
        let mut now = Utc::now();
        for _ in 0..cfg.threshold {
            c.record_failure(now, &cfg);
        }
        let first_backoff = c.current_backoff_secs;
        // Simulate the half-open probe failing again.
        now += chrono::Duration::seconds(cfg.initial_backoff.as_secs() as i64 + 1);
        c.record_failure(now, &cfg);
        assert!(c.current_backoff_secs >= first_backoff);
    }

    #[test]
    fn rate_limited_channel_ineligible_until_deadline() {
        let mut c = chan();
        let now = Utc::now();
        c.record_rate_limited(now, Duration::from_secs(30));
        assert!(!c.is_eligible(now, None));
        assert!(c.is_eligible(now + chrono::Duration::seconds(31), None));
    }

    #[test]
    fn model_filter_excludes_unsupported_models() {
        let mut c = chan();
        c.models = vec!["gpt-4o".into()];
        assert!(c.is_eligible(Utc::now(), Some("gpt-4o")));
        assert!(!c.is_eligible(Utc::now(), Some("claude-3-5-sonnet")));
    }

    #[test]
    fn empty_models_list_means_any() {
        let c = chan();
        assert!(c.is_eligible(Utc::now(), Some("anything")));
    }

    #[test]
    fn clone_preserves_atomic_counter_value() {
        let mut c = chan();
        c.record_dispatch(Utc::now());
        c.record_dispatch(Utc::now());
        let cloned = c.clone();
        assert_eq!(cloned.request_count.load(Ordering::Relaxed), 2);
    }
}
