//! Process-wide shared state, composed once at startup and handed to every
//! request handler behind an `Arc` — the same role the teacher's
//! `RouterState` plays, generalized from one `Config`/`TrafficLog` pair into
//! the full set of Routex collaborators.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::api::rate_limit::RateLimiter;
use crate::config::{GatewayConfig, SeedFile};
use crate::load_balancer::RoundRobinCursor;
use crate::metrics::Metrics;
use crate::session_affinity::SessionAffinity;
use crate::smart_router::CustomRouterRegistry;
use crate::store::ConfigStore;
use crate::tee::TeeStream;
use crate::traffic::RequestLog;
use crate::transformers::TransformerRegistry;

pub struct AppState {
    pub store: ConfigStore,
    pub tee: Arc<TeeStream>,
    pub request_log: Arc<RequestLog>,
    pub session_affinity: SessionAffinity,
    pub custom_routers: CustomRouterRegistry,
    pub transformers: TransformerRegistry,
    pub metrics: Arc<Metrics>,
    pub rr_cursor: RoundRobinCursor,
    pub http_client: reqwest::Client,
    pub gateway: RwLock<GatewayConfig>,
    pub config_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub admin_token: Option<String>,
    pub rate_limiter: Option<RateLimiter>,
}

impl AppState {
    pub async fn new(seed: SeedFile, config_path: PathBuf) -> anyhow::Result<Self> {
        let store = ConfigStore::new();
        store.seed(&seed).await?;

        let admin_token = match &seed.gateway.admin_token_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                anyhow::anyhow!("admin_token_env `{var}` is set in config but not present in the environment")
            })?),
            None => None,
        };

        let rate_limiter = seed.gateway.client_rate_limit_rpm.map(RateLimiter::new);

        Ok(Self {
            rate_limiter,
            tee: Arc::new(TeeStream::new(
                std::time::Duration::from_millis(seed.gateway.tee_flush_interval_ms),
                seed.gateway.tee_batch_size,
            )),
            request_log: Arc::new(RequestLog::new(seed.gateway.traffic_log_capacity)),
            session_affinity: SessionAffinity::new(
                seed.gateway.session_affinity_capacity,
                seed.gateway.session_affinity_ttl(),
            ),
            custom_routers: CustomRouterRegistry::new(),
            transformers: TransformerRegistry::default(),
            metrics: Arc::new(Metrics::new()?),
            rr_cursor: RoundRobinCursor::new(),
            http_client: reqwest::Client::new(),
            gateway: RwLock::new(seed.gateway.clone()),
            config_path,
            started_at: Utc::now(),
            admin_token,
            store,
        })
    }

    /// Re-read the seed file and merge any channels/rules/tee destinations
    /// that are new by name. Existing entries (and anything added since
    /// through the admin API) are left untouched — operator edits always
    /// win over a stale file on disk.
    pub async fn reload_from_disk(&self) -> anyhow::Result<()> {
        let seed = SeedFile::load(&self.config_path)?;
        let existing = self.store.channel_snapshot().await;
        let existing_names: std::collections::HashSet<String> =
            existing.iter().map(|c| c.name.clone()).collect();

        for channel_seed in &seed.channels {
            if existing_names.contains(&channel_seed.name) {
                continue;
            }
            let credential = channel_seed.resolve_credential()?;
            let id = uuid::Uuid::new_v4().to_string();
            let mut channel = crate::channel::Channel::new(id, channel_seed.name.clone(), channel_seed.provider, credential);
            channel.base_url = channel_seed.base_url.clone();
            channel.models = channel_seed.models.clone();
            channel.priority = channel_seed.priority;
            channel.weight = channel_seed.weight;
            self.store.insert_channel(channel).await;
        }

        *self.gateway.write().await = seed.gateway;
        Ok(())
    }
}
