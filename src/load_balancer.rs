//! Channel selection among a set of eligible candidates.
//!
//! Eligibility (enabled, not circuit-open, not rate-limited, model match) is
//! decided by [`crate::channel::Channel::is_eligible`] upstream of this
//! module; `load_balancer` only picks among candidates already filtered down
//! to the eligible set, the same split of responsibility as the teacher's
//! `RouterState::pick_backend` which filters on health before its round-robin
//! cursor ever runs.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::channel::Channel;

/// Selection strategy among eligible channels.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Lowest `priority` value wins; ties break on lowest `request_count`,
    /// then lowest `id` for determinism.
    #[default]
    Priority,
    /// Atomic cursor advances through the candidate list each call.
    RoundRobin,
    /// Probability proportional to `weight`. Falls back to round-robin when
    /// every candidate has weight `0`.
    Weighted,
    /// Lowest `request_count` wins; ties break on oldest `last_used_at`
    /// (channels never used sort before any that have been used).
    LeastUsed,
}

/// Lock-free cursor for the round-robin strategy, shared across calls.
#[derive(Debug, Default)]
pub struct RoundRobinCursor(AtomicUsize);

impl RoundRobinCursor {
    pub fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    fn next(&self, len: usize) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed) % len
    }
}

/// Select one channel from `candidates` (assumed already eligibility-filtered
/// and non-empty) per `strategy`.
pub fn select<'a>(
    candidates: &'a [&'a Channel],
    strategy: Strategy,
    cursor: &RoundRobinCursor,
) -> Option<&'a Channel> {
    if candidates.is_empty() {
        return None;
    }

    match strategy {
        Strategy::Priority => candidates.iter().copied().min_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| {
                    a.request_count
                        .load(Ordering::Relaxed)
                        .cmp(&b.request_count.load(Ordering::Relaxed))
                })
                .then_with(|| a.id.cmp(&b.id))
        }),
        Strategy::RoundRobin => {
            let idx = cursor.next(candidates.len());
            Some(candidates[idx])
        }
        Strategy::Weighted => select_weighted(candidates, cursor),
        Strategy::LeastUsed => candidates.iter().copied().min_by(|a, b| {
            a.request_count
                .load(Ordering::Relaxed)
                .cmp(&b.request_count.load(Ordering::Relaxed))
                .then_with(|| cmp_last_used(a.last_used_at, b.last_used_at))
                .then_with(|| a.id.cmp(&b.id))
        }),
    }
}

fn cmp_last_used(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> std::cmp::Ordering {
    match (a, b) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y),
    }
}

fn select_weighted<'a>(
    candidates: &'a [&'a Channel],
    cursor: &RoundRobinCursor,
) -> Option<&'a Channel> {
    let total: f64 = candidates.iter().map(|c| c.weight.max(0.0)).sum();
    if total <= 0.0 {
        let idx = cursor.next(candidates.len());
        return Some(candidates[idx]);
    }
    let mut roll = rand::thread_rng().gen_range(0.0..total);
    for c in candidates {
        let w = c.weight.max(0.0);
        if roll < w {
            return Some(c);
        }
        roll -= w;
    }
    candidates.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;

    fn ch(id: &str, priority: i32, weight: f64) -> Channel {
        let mut c = Channel::new(id.to_string(), id.to_string(), Provider::Anthropic, "key".into());
        c.priority = priority;
        c.weight = weight;
        c
    }

    #[test]
    fn priority_strategy_picks_lowest_priority_value() {
        let a = ch("a", 50, 1.0);
        let b = ch("b", 10, 1.0);
        let candidates = vec![&a, &b];
        let cursor = RoundRobinCursor::new();
        let picked = select(&candidates, Strategy::Priority, &cursor).unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn priority_tiebreak_uses_request_count_then_id() {
        let a = ch("a", 10, 1.0);
        let b = ch("b", 10, 1.0);
        a.request_count.store(3, Ordering::Relaxed);
        b.request_count.store(1, Ordering::Relaxed);
        let candidates = vec![&a, &b];
        let cursor = RoundRobinCursor::new();
        let picked = select(&candidates, Strategy::Priority, &cursor).unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn round_robin_cycles_through_candidates() {
        let a = ch("a", 10, 1.0);
        let b = ch("b", 10, 1.0);
        let c = ch("c", 10, 1.0);
        let candidates = vec![&a, &b, &c];
        let cursor = RoundRobinCursor::new();
        let picks: Vec<_> = (0..6)
            .map(|_| select(&candidates, Strategy::RoundRobin, &cursor).unwrap().id.clone())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn weighted_falls_back_to_round_robin_when_all_weights_zero() {
        let a = ch("a", 10, 0.0);
        let b = ch("b", 10, 0.0);
        let candidates = vec![&a, &b];
        let cursor = RoundRobinCursor::new();
        let picks: Vec<_> = (0..4)
            .map(|_| select(&candidates, Strategy::Weighted, &cursor).unwrap().id.clone())
            .collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn weighted_always_picks_the_only_nonzero_weight_channel() {
        let a = ch("a", 10, 0.0);
        let b = ch("b", 10, 5.0);
        let candidates = vec![&a, &b];
        let cursor = RoundRobinCursor::new();
        for _ in 0..20 {
            let picked = select(&candidates, Strategy::Weighted, &cursor).unwrap();
            assert_eq!(picked.id, "b");
        }
    }

    #[test]
    fn least_used_picks_lowest_request_count() {
        let a = ch("a", 10, 1.0);
        let b = ch("b", 10, 1.0);
        a.request_count.store(5, Ordering::Relaxed);
        b.request_count.store(2, Ordering::Relaxed);
        let candidates = vec![&a, &b];
        let cursor = RoundRobinCursor::new();
        let picked = select(&candidates, Strategy::LeastUsed, &cursor).unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn select_returns_none_for_empty_candidates() {
        let candidates: Vec<&Channel> = vec![];
        let cursor = RoundRobinCursor::new();
        assert!(select(&candidates, Strategy::Priority, &cursor).is_none());
    }
}
