//! In-memory request log exposed through the admin API.
//!
//! [`RequestLog`] is a fixed-capacity ring-buffer: once full, the oldest
//! entry is evicted to make room for the newest — same discipline as the
//! teacher's `TrafficLog`, generalized to carry channel/token accounting
//! instead of tier/backend names.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

pub struct RequestLog {
    capacity: usize,
    entries: Mutex<VecDeque<RequestLogEntry>>,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, entries: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// Best-effort, non-blocking: dropped under lock contention rather than
    /// delaying the request path.
    pub fn push(&self, entry: RequestLogEntry) {
        if let Ok(mut entries) = self.entries.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    pub async fn recent(&self, limit: usize) -> Vec<RequestLogEntry> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub async fn stats(&self) -> RequestLogStats {
        let entries = self.entries.lock().await;
        let total = entries.len();
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            entries.iter().map(|e| e.latency_ms as f64).sum::<f64>() / total as f64
        };
        let error_count = entries.iter().filter(|e| !e.success).count();

        let mut channel_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut total_input_tokens = 0u64;
        let mut total_output_tokens = 0u64;
        for entry in entries.iter() {
            *channel_counts.entry(entry.channel_id.clone()).or_default() += 1;
            total_input_tokens += entry.in_tokens as u64;
            total_output_tokens += entry.out_tokens as u64;
        }

        RequestLogStats { total_requests: total, error_count, avg_latency_ms, channel_counts, total_input_tokens, total_output_tokens }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub channel_id: String,
    pub model: String,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub latency_ms: u64,
    pub in_tokens: u32,
    pub out_tokens: u32,
    pub cached_tokens: u32,
    pub success: bool,
    pub error: Option<String>,
}

impl RequestLogEntry {
    pub fn new(channel_id: String, model: String, method: String, path: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            channel_id,
            model,
            method,
            path,
            status_code: 0,
            latency_ms: 0,
            in_tokens: 0,
            out_tokens: 0,
            cached_tokens: 0,
            success: false,
            error: None,
        }
    }

    pub fn with_outcome(mut self, status_code: u16, latency_ms: u64, success: bool) -> Self {
        self.status_code = status_code;
        self.latency_ms = latency_ms;
        self.success = success;
        self
    }

    pub fn with_tokens(mut self, in_tokens: u32, out_tokens: u32, cached_tokens: u32) -> Self {
        self.in_tokens = in_tokens;
        self.out_tokens = out_tokens;
        self.cached_tokens = cached_tokens;
        self
    }

    pub fn with_error(mut self, err: &str) -> Self {
        self.error = Some(err.to_string());
        self
    }
}

#[derive(Debug, Serialize)]
pub struct RequestLogStats {
    pub total_requests: usize,
    pub error_count: usize,
    pub avg_latency_ms: f64,
    pub channel_counts: std::collections::HashMap<String, usize>,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
}
