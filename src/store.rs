//! In-memory, TOML-seeded configuration store: channels, routing rules, and
//! tee destinations, behind copy-on-write snapshots.
//!
//! Readers (the pipeline, on every request) take an `Arc` clone of the
//! current [`Snapshot`] and finish their request against it even if an
//! admin mutation installs a new snapshot mid-flight — the same discipline
//! the teacher's `RouterState` uses for its `Arc<RwLock<Arc<Config>>>`
//! config pointer, generalized from one config value to three collections.
//!
//! Channel counters/breaker state are the one piece of per-request *write*
//! traffic, so they don't live behind the CoW pointer: each channel gets its
//! own `tokio::sync::Mutex`, looked up by id, so a breaker update on one
//! channel never blocks a read of the whole snapshot or another channel's
//! update.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::channel::Channel;
use crate::config::{ChannelSeed, SeedFile};
use crate::smart_router::{RoutingRule, RuleSeed, RuleTargetSeed};
use crate::tee::{TeeDestination, TeeDestinationSeed};

#[derive(Clone, Default)]
pub struct Snapshot {
    pub channel_order: Vec<String>,
    pub rules: Vec<RoutingRule>,
    pub tee_destinations: Vec<TeeDestination>,
}

pub struct ConfigStore {
    snapshot: RwLock<Arc<Snapshot>>,
    channels: RwLock<HashMap<String, Arc<Mutex<Channel>>>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn seed(&self, seed: &SeedFile) -> anyhow::Result<()> {
        let mut channel_order = Vec::new();
        let mut channels = self.channels.write().await;
        for cs in &seed.channels {
            let channel = build_channel(cs)?;
            channel_order.push(channel.id.clone());
            channels.insert(channel.id.clone(), Arc::new(Mutex::new(channel)));
        }
        drop(channels);

        let channels_snapshot = self.channel_snapshot().await;
        let rules = seed
            .rules
            .iter()
            .map(|r| build_rule(r, &channels_snapshot))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let tee_destinations = seed.tee.iter().map(build_tee_destination).collect();

        let mut guard = self.snapshot.write().await;
        *guard = Arc::new(Snapshot { channel_order, rules, tee_destinations });
        Ok(())
    }

    pub async fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().await.clone()
    }

    /// Clone every channel's current state into a flat `Vec`, in seed/insert
    /// order. Used by the router/load balancer as the per-request
    /// eligibility snapshot.
    pub async fn channel_snapshot(&self) -> Vec<Channel> {
        let order = self.snapshot.read().await.channel_order.clone();
        let channels = self.channels.read().await;
        let mut out = Vec::with_capacity(order.len());
        for id in order {
            if let Some(slot) = channels.get(&id) {
                out.push(slot.lock().await.clone());
            }
        }
        out
    }

    pub async fn get_channel(&self, id: &str) -> Option<Channel> {
        let channels = self.channels.read().await;
        let slot = channels.get(id)?.clone();
        drop(channels);
        let value = slot.lock().await.clone();
        Some(value)
    }

    /// Mutate the channel in place under its lock (counters, breaker state,
    /// admin edits). `f` receives `&mut Channel`.
    pub async fn with_channel_mut<F, T>(&self, id: &str, f: F) -> Option<T>
    where
        F: FnOnce(&mut Channel) -> T,
    {
        let channels = self.channels.read().await;
        let slot = channels.get(id)?.clone();
        drop(channels);
        let mut guard = slot.lock().await;
        Some(f(&mut guard))
    }

    pub async fn insert_channel(&self, channel: Channel) {
        let id = channel.id.clone();
        {
            let mut channels = self.channels.write().await;
            channels.insert(id.clone(), Arc::new(Mutex::new(channel)));
        }
        let mut guard = self.snapshot.write().await;
        let mut next = (**guard).clone();
        if !next.channel_order.contains(&id) {
            next.channel_order.push(id);
        }
        *guard = Arc::new(next);
    }

    pub async fn remove_channel(&self, id: &str) -> bool {
        let removed = self.channels.write().await.remove(id).is_some();
        if removed {
            let mut guard = self.snapshot.write().await;
            let mut next = (**guard).clone();
            next.channel_order.retain(|c| c != id);
            *guard = Arc::new(next);
        }
        removed
    }

    pub async fn replace_rules(&self, rules: Vec<RoutingRule>) {
        let mut guard = self.snapshot.write().await;
        let mut next = (**guard).clone();
        next.rules = rules;
        *guard = Arc::new(next);
    }

    pub async fn replace_tee_destinations(&self, destinations: Vec<TeeDestination>) {
        let mut guard = self.snapshot.write().await;
        let mut next = (**guard).clone();
        next.tee_destinations = destinations;
        *guard = Arc::new(next);
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

fn build_channel(seed: &ChannelSeed) -> anyhow::Result<Channel> {
    let credential = seed.resolve_credential()?;
    let id = Uuid::new_v4().to_string();
    let mut channel = Channel::new(id, seed.name.clone(), seed.provider, credential);
    channel.base_url = seed.base_url.clone();
    channel.models = seed.models.clone();
    channel.priority = seed.priority;
    channel.weight = seed.weight;
    Ok(channel)
}

fn build_rule(seed: &RuleSeed, channels: &[Channel]) -> anyhow::Result<RoutingRule> {
    let RuleTargetSeed::Channel(target_name) = &seed.target;
    let target_channel = channels
        .iter()
        .find(|c| &c.name == target_name)
        .map(|c| c.id.clone())
        .unwrap_or_else(|| target_name.clone());
    Ok(RoutingRule {
        id: Uuid::new_v4().to_string(),
        name: seed.name.clone(),
        priority: seed.priority,
        enabled: seed.enabled,
        predicates: seed.predicates.clone(),
        target_channel,
        target_model: seed.target_model.clone(),
    })
}

fn build_tee_destination(seed: &TeeDestinationSeed) -> TeeDestination {
    TeeDestination {
        id: Uuid::new_v4().to_string(),
        name: seed.name.clone(),
        kind: seed.kind,
        filter: seed.filter.clone(),
        url: seed.url.clone(),
        headers: seed.headers.clone(),
        method: seed.method.clone(),
        file_path: seed.file_path.clone(),
        handler_ref: seed.handler_ref.clone(),
        timeout: std::time::Duration::from_millis(seed.timeout_ms),
        retries: seed.retries,
        enabled: seed.enabled,
    }
}
