//! Best-effort asynchronous replication of completed request/response
//! envelopes to external sinks.
//!
//! Producer-consumer queue with a single drainer task and per-destination
//! timeouts, per the tee-dispatch redesign — generalizing the teacher's
//! single-purpose `TrafficLog` ring buffer into a fan-out broadcaster with
//! its own retry/backoff instead of an ad-hoc promise chain.

pub mod sinks;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

/// Sink kind.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Http,
    Webhook,
    File,
    Custom,
}

/// Selects which completed requests a destination receives.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TeeFilter {
    #[serde(default)]
    pub sample_rate: Option<f64>,
    #[serde(default)]
    pub success_only: bool,
    #[serde(default)]
    pub failure_only: bool,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub models: Option<Vec<String>>,
    #[serde(default)]
    pub status_codes: Option<Vec<u16>>,
}

impl TeeFilter {
    /// `sample` is the externally-supplied random draw in `[0, 1)`, kept out
    /// of this pure predicate so tests can drive it deterministically.
    fn matches(&self, payload: &TeePayload, sample: f64) -> bool {
        if self.success_only && !payload.success {
            return false;
        }
        if self.failure_only && payload.success {
            return false;
        }
        if let Some(channels) = &self.channels {
            if !channels.iter().any(|c| c == &payload.channel.id) {
                return false;
            }
        }
        if let Some(models) = &self.models {
            if !models.iter().any(|m| m == &payload.request.model) {
                return false;
            }
        }
        if let Some(codes) = &self.status_codes {
            if !codes.iter().any(|c| *c == payload.response.status) {
                return false;
            }
        }
        if let Some(rate) = self.sample_rate {
            if sample >= rate {
                return false;
            }
        }
        true
    }
}

/// A configured sink.
#[derive(Debug, Clone)]
pub struct TeeDestination {
    pub id: String,
    pub name: String,
    pub kind: SinkKind,
    pub filter: TeeFilter,
    pub url: Option<String>,
    pub headers: Vec<(String, String)>,
    pub method: Option<String>,
    pub file_path: Option<String>,
    pub handler_ref: Option<String>,
    pub timeout: Duration,
    pub retries: u32,
    pub enabled: bool,
}

/// Seed-file shape for a tee destination.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TeeDestinationSeed {
    pub name: String,
    pub kind: SinkKind,
    #[serde(default)]
    pub filter: TeeFilter,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub handler_ref: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeout_ms() -> u64 { 5_000 }
fn default_retries() -> u32 { 3 }
fn default_enabled() -> bool { true }

#[derive(Debug, Clone, Serialize)]
pub struct ChannelRef {
    pub id: String,
    pub name: String,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    pub method: String,
    pub path: String,
    pub model: String,
    pub body: Value,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub body: Value,
    pub headers: Vec<(String, String)>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenUsage {
    pub input: u32,
    pub output: u32,
    pub cached: u32,
}

/// Immutable envelope enqueued for replication.
#[derive(Debug, Clone, Serialize)]
pub struct TeePayload {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub channel: ChannelRef,
    pub request: RequestEnvelope,
    pub response: ResponseEnvelope,
    pub tokens: TokenUsage,
    pub success: bool,
    pub error: Option<String>,
}

struct QueueItem {
    destination: TeeDestination,
    payload: TeePayload,
}

/// Stats surfaced as a backpressure signal (`getStats().queueSize`).
#[derive(Debug, Default)]
pub struct TeeStats {
    pub queue_size: AtomicU64,
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
}

/// Best-effort tee stream: bounded in practice by `prune`-free growth, but
/// exposes `queue_size` so callers can apply their own backpressure policy.
pub struct TeeStream {
    queue: Mutex<VecDeque<QueueItem>>,
    stats: Arc<TeeStats>,
    processing: AtomicBool,
    flush_interval: Duration,
    batch_size: usize,
    http_client: reqwest::Client,
}

impl TeeStream {
    pub fn new(flush_interval: Duration, batch_size: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            stats: Arc::new(TeeStats::default()),
            processing: AtomicBool::new(false),
            flush_interval,
            batch_size,
            http_client: reqwest::Client::new(),
        }
    }

    pub fn stats(&self) -> Arc<TeeStats> {
        self.stats.clone()
    }

    /// Enqueue one `(destination, payload)` item per destination whose
    /// filter accepts the payload. `sample` is a caller-supplied random draw
    /// per destination so tests can be deterministic.
    pub async fn tee(&self, destinations: &[TeeDestination], payload: TeePayload, sample: impl Fn() -> f64) {
        let mut queue = self.queue.lock().await;
        for dest in destinations {
            if !dest.enabled {
                continue;
            }
            if dest.filter.matches(&payload, sample()) {
                queue.push_back(QueueItem { destination: dest.clone(), payload: payload.clone() });
                self.stats.queue_size.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Spawn the background flusher loop. Returns a handle the caller should
    /// keep to avoid the task being dropped.
    pub fn spawn_flusher(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.flush_interval);
            loop {
                interval.tick().await;
                this.flush().await;
            }
        })
    }

    /// Drain up to `batch_size` items and dispatch them concurrently,
    /// waiting for all to settle. Re-entrancy-guarded by `processing`.
    pub async fn flush(&self) {
        if self.processing.swap(true, Ordering::SeqCst) {
            return;
        }
        let batch = {
            let mut queue = self.queue.lock().await;
            let n = self.batch_size.min(queue.len());
            let batch: Vec<QueueItem> = queue.drain(..n).collect();
            self.stats.queue_size.fetch_sub(batch.len() as u64, Ordering::Relaxed);
            batch
        };

        let dispatches = batch.into_iter().map(|item| {
            let client = self.http_client.clone();
            let stats = self.stats.clone();
            async move {
                let outcome = sinks::dispatch_with_retry(&client, &item.destination, &item.payload).await;
                match outcome {
                    Ok(()) => {
                        stats.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            destination = %item.destination.name,
                            error = %e,
                            "tee dispatch failed after all retries"
                        );
                    }
                }
            }
        });
        futures_util::future::join_all(dispatches).await;

        self.processing.store(false, Ordering::SeqCst);
    }

    /// Drain the whole queue regardless of `batch_size`, used by `shutdown`.
    pub async fn drain_all(&self) {
        loop {
            let remaining = self.queue.lock().await.len();
            if remaining == 0 {
                break;
            }
            self.flush().await;
        }
    }

    pub async fn shutdown(&self) {
        self.drain_all().await;
    }
}
