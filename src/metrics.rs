//! Process-wide metrics registry, exported as Prometheus text.
//!
//! Counters, gauges, and bucketed histograms are native to the `prometheus`
//! crate and registered once at startup. The crate has no quantile-summary
//! type, so the one summary this gateway exposes (`chat_completion_tokens`)
//! is hand-rolled over a bounded, mutex-guarded sample window — the same
//! "no ecosystem type for this" justification as the hand-rolled LRU in
//! [`crate::session_affinity`] — and appended to the encoded text by hand in
//! the same `# HELP`/`# TYPE` shape Prometheus expects.

use std::collections::HashMap;
use std::sync::Mutex;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

const SUMMARY_WINDOW: usize = 500;
const QUANTILES: &[f64] = &[0.5, 0.9, 0.99];

pub struct Metrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    channel_breaker_open: IntGaugeVec,
    tee_queue_size: IntGaugeVec,
    circuit_fallbacks_total: IntCounterVec,
    token_summary: Mutex<Summary>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("routex_requests_total", "Completed proxied requests"),
            &["channel", "model", "status"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("routex_request_duration_seconds", "End-to-end upstream request latency")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["channel", "model"],
        )?;
        let channel_breaker_open = IntGaugeVec::new(
            Opts::new("routex_channel_breaker_open", "1 when a channel's circuit breaker is open"),
            &["channel"],
        )?;
        let tee_queue_size = IntGaugeVec::new(
            Opts::new("routex_tee_queue_size", "Pending items in the tee dispatch queue"),
            &["destination"],
        )?;
        let circuit_fallbacks_total = IntCounterVec::new(
            Opts::new("routex_circuit_fallbacks_total", "Requests rerouted because the preferred channel's breaker was open"),
            &["from_channel", "to_channel"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(channel_breaker_open.clone()))?;
        registry.register(Box::new(tee_queue_size.clone()))?;
        registry.register(Box::new(circuit_fallbacks_total.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration_seconds,
            channel_breaker_open,
            tee_queue_size,
            circuit_fallbacks_total,
            token_summary: Mutex::new(Summary::new(SUMMARY_WINDOW)),
        })
    }

    pub fn record_request(&self, channel: &str, model: &str, status: &str, duration_secs: f64, total_tokens: u32) {
        self.requests_total.with_label_values(&[channel, model, status]).inc();
        self.request_duration_seconds.with_label_values(&[channel, model]).observe(duration_secs);
        if let Ok(mut summary) = self.token_summary.lock() {
            summary.observe(total_tokens as f64);
        }
    }

    pub fn set_breaker_open(&self, channel: &str, open: bool) {
        self.channel_breaker_open.with_label_values(&[channel]).set(open as i64);
    }

    pub fn set_tee_queue_size(&self, destination: &str, size: i64) {
        self.tee_queue_size.with_label_values(&[destination]).set(size);
    }

    /// Record a request that was rerouted off its preferred channel because
    /// that channel's breaker was open when the request was dispatched.
    pub fn record_circuit_fallback(&self, from_channel: &str, to_channel: &str) {
        self.circuit_fallbacks_total.with_label_values(&[from_channel, to_channel]).inc();
    }

    /// Render the full Prometheus text exposition: native families from the
    /// registry, followed by the hand-rolled token-count summary.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        let mut text = String::from_utf8(buffer)?;

        let summary = self.token_summary.lock().map_err(|_| anyhow::anyhow!("token summary lock poisoned"))?;
        text.push_str(&summary.render("routex_chat_completion_tokens", "Total tokens per completion"));
        Ok(text)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to construct default metrics registry")
    }
}

/// Bounded-window quantile summary. Not thread-safe on its own — callers
/// hold it behind a `Mutex`.
struct Summary {
    window: Vec<f64>,
    capacity: usize,
    cursor: usize,
    count: u64,
    sum: f64,
}

impl Summary {
    fn new(capacity: usize) -> Self {
        Self { window: Vec::with_capacity(capacity), capacity, cursor: 0, count: 0, sum: 0.0 }
    }

    fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        if self.window.len() < self.capacity {
            self.window.push(value);
        } else {
            self.window[self.cursor] = value;
            self.cursor = (self.cursor + 1) % self.capacity;
        }
    }

    fn quantile(&self, q: f64) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let mut sorted = self.window.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((sorted.len() as f64 - 1.0) * q).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn render(&self, name: &str, help: &str) -> String {
        let mut out = String::new();
        out.push_str(&format!("# HELP {name} {help}\n"));
        out.push_str(&format!("# TYPE {name} summary\n"));
        for &q in QUANTILES {
            out.push_str(&format!("{name}{{quantile=\"{q}\"}} {}\n", self.quantile(q)));
        }
        out.push_str(&format!("{name}_sum {}\n", self.sum));
        out.push_str(&format!("{name}_count {}\n", self.count));
        out
    }
}

/// Tally of counts keyed by an arbitrary sorted label set — used where a
/// caller needs deterministic grouping (e.g. per-channel error counts) for
/// something other than a registered Prometheus family.
pub fn label_key(labels: &[(&str, &str)]) -> String {
    let mut sorted: Vec<&(&str, &str)> = labels.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);
    let mut map = HashMap::new();
    for (k, v) in sorted {
        map.insert(*k, *v);
    }
    let mut entries: Vec<String> = map.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
    entries.sort();
    entries.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_families() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("c1", "gpt-4o", "200", 0.5, 100);
        let text = metrics.render().unwrap();
        assert!(text.contains("routex_requests_total"));
        assert!(text.contains("routex_request_duration_seconds"));
    }

    #[test]
    fn summary_render_contains_quantiles_and_sum() {
        let mut summary = Summary::new(10);
        for v in [10.0, 20.0, 30.0] {
            summary.observe(v);
        }
        let text = summary.render("test_tokens", "help text");
        assert!(text.contains("quantile=\"0.5\""));
        assert!(text.contains("test_tokens_sum 60"));
        assert!(text.contains("test_tokens_count 3"));
    }

    #[test]
    fn summary_window_wraps_without_growing_unbounded() {
        let mut summary = Summary::new(3);
        for v in 0..10 {
            summary.observe(v as f64);
        }
        assert_eq!(summary.window.len(), 3);
        assert_eq!(summary.count, 10);
    }

    #[test]
    fn circuit_fallback_is_counted_under_its_label_pair() {
        let metrics = Metrics::new().unwrap();
        metrics.record_circuit_fallback("primary", "backup");
        let text = metrics.render().unwrap();
        assert!(text.contains("routex_circuit_fallbacks_total"));
        assert!(text.contains("from_channel=\"primary\""));
        assert!(text.contains("to_channel=\"backup\""));
    }

    #[test]
    fn label_key_is_order_independent() {
        let a = label_key(&[("b", "2"), ("a", "1")]);
        let b = label_key(&[("a", "1"), ("b", "2")]);
        assert_eq!(a, b);
    }
}
