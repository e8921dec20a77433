//! Session-affinity cache: sticks a session id to the channel it last used,
//! so multi-turn conversations land on the same upstream account while it
//! stays eligible.
//!
//! No crate in the retrieval pack carries an LRU dependency, so this is
//! hand-rolled in the same spirit as the teacher's ring-buffer `TrafficLog`:
//! a `HashMap` for O(1) lookup plus an intrusive doubly-linked recency list
//! for O(1) touch/evict, guarded by one `Mutex` (affinity lookups are cheap
//! and happen once per request, unlike the per-channel breaker state which
//! needs finer-grained locking).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

struct Entry {
    channel_id: String,
    expires_at: DateTime<Utc>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Fixed-capacity LRU keyed by session id, with a per-entry TTL.
struct Lru {
    slots: Vec<Option<Entry>>,
    index: HashMap<String, usize>,
    free: Vec<usize>,
    head: Option<usize>, // most recently used
    tail: Option<usize>, // least recently used
    capacity: usize,
}

impl Lru {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            index: HashMap::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            capacity: capacity.max(1),
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let e = self.slots[idx].as_ref().unwrap();
            (e.prev, e.next)
        };
        match prev {
            Some(p) => self.slots[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(e) = self.slots[idx].as_mut() {
            e.prev = None;
            e.next = old_head;
        }
        if let Some(h) = old_head {
            self.slots[h].as_mut().unwrap().prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.push_front(idx);
    }

    fn evict_lru(&mut self, session_ids: &mut HashMap<usize, String>) {
        if let Some(tail) = self.tail {
            self.detach(tail);
            self.slots[tail] = None;
            self.free.push(tail);
            if let Some(session_id) = session_ids.remove(&tail) {
                self.index.remove(&session_id);
            }
        }
    }
}

/// Sticky session → channel cache with a 5h default TTL (configurable).
pub struct SessionAffinity {
    ttl: Duration,
    inner: Mutex<AffinityInner>,
}

struct AffinityInner {
    lru: Lru,
    session_ids: HashMap<usize, String>,
}

impl SessionAffinity {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(AffinityInner {
                lru: Lru::new(capacity),
                session_ids: HashMap::new(),
            }),
        }
    }

    /// Look up the channel bound to `session_id`, if any and not expired.
    /// Touches recency on hit. Expired entries are evicted lazily on access.
    pub async fn get(&self, session_id: &str, now: DateTime<Utc>) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let idx = *inner.lru.index.get(session_id)?;
        let expired = inner.lru.slots[idx].as_ref().unwrap().expires_at <= now;
        if expired {
            inner.lru.detach(idx);
            inner.lru.slots[idx] = None;
            inner.lru.free.push(idx);
            inner.lru.index.remove(session_id);
            inner.session_ids.remove(&idx);
            return None;
        }
        inner.lru.touch(idx);
        Some(inner.lru.slots[idx].as_ref().unwrap().channel_id.clone())
    }

    /// Bind `session_id` to `channel_id`, refreshing the TTL. Evicts the
    /// least-recently-used entry if the cache is at capacity and this is a
    /// new key.
    pub async fn set(&self, session_id: &str, channel_id: &str, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        let expires_at = now + self.ttl;

        if let Some(&idx) = inner.lru.index.get(session_id) {
            if let Some(e) = inner.lru.slots[idx].as_mut() {
                e.channel_id = channel_id.to_string();
                e.expires_at = expires_at;
            }
            inner.lru.touch(idx);
            return;
        }

        if inner.lru.index.len() >= inner.lru.capacity {
            let AffinityInner { lru, session_ids } = &mut *inner;
            lru.evict_lru(session_ids);
        }

        let entry = Entry {
            channel_id: channel_id.to_string(),
            expires_at,
            prev: None,
            next: None,
        };
        let idx = match inner.lru.free.pop() {
            Some(i) => {
                inner.lru.slots[i] = Some(entry);
                i
            }
            None => {
                inner.lru.slots.push(Some(entry));
                inner.lru.slots.len() - 1
            }
        };
        inner.lru.index.insert(session_id.to_string(), idx);
        inner.session_ids.insert(idx, session_id.to_string());
        inner.lru.push_front(idx);
    }

    /// Remove all TTL-expired entries. Returns the count removed. Intended
    /// to be called periodically rather than relying solely on lazy removal
    /// on `get`.
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock().await;
        let expired: Vec<usize> = inner
            .lru
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().filter(|e| e.expires_at <= now).map(|_| i))
            .collect();
        for idx in &expired {
            inner.lru.detach(*idx);
            inner.lru.slots[*idx] = None;
            inner.lru.free.push(*idx);
            if let Some(session_id) = inner.session_ids.remove(idx) {
                inner.lru.index.remove(&session_id);
            }
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.lru.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(0, 0).unwrap() + Duration::seconds(secs)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let sa = SessionAffinity::new(10, Duration::hours(5));
        sa.set("s1", "chan-a", t(0)).await;
        assert_eq!(sa.get("s1", t(10)).await, Some("chan-a".to_string()));
    }

    #[tokio::test]
    async fn get_returns_none_after_ttl_expires() {
        let sa = SessionAffinity::new(10, Duration::seconds(60));
        sa.set("s1", "chan-a", t(0)).await;
        assert_eq!(sa.get("s1", t(61)).await, None);
    }

    #[tokio::test]
    async fn get_updates_recency_so_it_is_not_evicted_first() {
        let sa = SessionAffinity::new(2, Duration::hours(5));
        sa.set("s1", "chan-a", t(0)).await;
        sa.set("s2", "chan-b", t(1)).await;
        // touch s1 so s2 becomes LRU
        sa.get("s1", t(2)).await;
        sa.set("s3", "chan-c", t(3)).await;
        assert_eq!(sa.get("s2", t(4)).await, None);
        assert_eq!(sa.get("s1", t(4)).await, Some("chan-a".to_string()));
        assert_eq!(sa.get("s3", t(4)).await, Some("chan-c".to_string()));
    }

    #[tokio::test]
    async fn eviction_removes_exactly_the_lru_entry() {
        let sa = SessionAffinity::new(1, Duration::hours(5));
        sa.set("s1", "chan-a", t(0)).await;
        sa.set("s2", "chan-b", t(1)).await;
        assert_eq!(sa.len().await, 1);
        assert_eq!(sa.get("s1", t(2)).await, None);
        assert_eq!(sa.get("s2", t(2)).await, Some("chan-b".to_string()));
    }

    #[tokio::test]
    async fn prune_removes_exactly_ttl_expired_entries() {
        let sa = SessionAffinity::new(10, Duration::seconds(10));
        sa.set("s1", "chan-a", t(0)).await;
        sa.set("s2", "chan-b", t(100)).await;
        let removed = sa.prune(t(105)).await;
        assert_eq!(removed, 1);
        assert_eq!(sa.len().await, 1);
        assert_eq!(sa.get("s2", t(105)).await, Some("chan-b".to_string()));
    }

    #[tokio::test]
    async fn overwriting_existing_session_updates_channel_and_ttl() {
        let sa = SessionAffinity::new(10, Duration::seconds(10));
        sa.set("s1", "chan-a", t(0)).await;
        sa.set("s1", "chan-b", t(5)).await;
        assert_eq!(sa.get("s1", t(14)).await, Some("chan-b".to_string()));
    }
}
