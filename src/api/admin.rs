//! Admin API (admin port) — operator-facing control plane.
//!
//! Separated onto its own port so it can be network-restricted independently
//! of the client API (e.g. reachable only from an internal network, never
//! exposed to the internet), and gated by [`crate::api::admin_auth`] when a
//! bearer token is configured.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::channel::{Channel, ChannelStatus};
use crate::config::ChannelSeed;
use crate::error::{AppError, RoutexErrorKind};
use crate::smart_router::{self, Predicate, RouteDecision, RouterContext, RoutingRule};
use crate::state::AppState;
use crate::tee::{TeeDestination, TeeDestinationSeed};
use crate::transformers::{TransformContext, TransformerSpec};

/// Build the admin-facing axum router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/admin/health", get(health))
        .route("/admin/traffic", get(traffic))
        .route("/admin/metrics", get(super::metrics_route::metrics))
        .route("/admin/channels", get(list_channels).post(create_channel))
        .route("/admin/channels/:id", get(get_channel).put(update_channel).delete(delete_channel))
        .route("/admin/channels/:id/enable", post(enable_channel))
        .route("/admin/channels/:id/disable", post(disable_channel))
        .route("/admin/channels/:id/test", post(test_channel))
        .route("/admin/rules", get(list_rules).put(replace_rules))
        .route("/admin/rules/test", post(test_rule))
        .route("/admin/tee", get(list_tee).put(replace_tee))
        .route("/admin/transformers", get(list_transformers))
        .route("/admin/transformers/test", post(test_transformer))
        .layer(axum::middleware::from_fn_with_state(state.clone(), super::admin_auth::admin_auth_middleware))
        .with_state(state)
}

/// GET /admin/health — liveness plus the shape of the current configuration.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let channel_count = state.store.channel_snapshot().await.len();
    let snapshot = state.store.current().await;
    Json(json!({
        "status": "ok",
        "channels": channel_count,
        "rules": snapshot.rules.len(),
        "tee_destinations": snapshot.tee_destinations.len(),
    }))
}

#[derive(Deserialize)]
pub struct TrafficQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}
fn default_limit() -> usize {
    100
}

/// GET /admin/traffic?limit=N — recent N request-log entries plus aggregate stats.
pub async fn traffic(State(state): State<Arc<AppState>>, Query(q): Query<TrafficQuery>) -> impl IntoResponse {
    let entries = state.request_log.recent(q.limit).await;
    let stats = state.request_log.stats().await;
    Json(json!({ "stats": stats, "entries": entries }))
}

fn channel_view(c: &Channel) -> Value {
    json!({
        "id": c.id,
        "name": c.name,
        "provider": c.provider,
        "base_url": c.base_url,
        "models": c.models,
        "priority": c.priority,
        "weight": c.weight,
        "status": c.status,
        "request_count": c.request_count.load(std::sync::atomic::Ordering::Relaxed),
        "success_count": c.success_count,
        "failure_count": c.failure_count,
        "consecutive_failures": c.consecutive_failures,
        "circuit_breaker_until": c.circuit_breaker_until,
        "last_used_at": c.last_used_at,
    })
}

/// GET /admin/channels — list all channels with credentials redacted.
pub async fn list_channels(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let channels = state.store.channel_snapshot().await;
    Json(json!({ "channels": channels.iter().map(channel_view).collect::<Vec<_>>() }))
}

/// GET /admin/channels/:id
pub async fn get_channel(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let channel = state
        .store
        .get_channel(&id)
        .await
        .ok_or_else(|| RoutexErrorKind::NotFound(format!("channel `{id}`")))?;
    Ok(Json(channel_view(&channel)))
}

/// POST /admin/channels — create a channel. Body mirrors [`ChannelSeed`];
/// the credential is resolved from `credential_env` immediately, matching
/// the seed-file discipline of never accepting a raw secret over the wire.
pub async fn create_channel(State(state): State<Arc<AppState>>, Json(seed): Json<ChannelSeed>) -> Result<impl IntoResponse, AppError> {
    let credential = seed
        .resolve_credential()
        .map_err(|e| RoutexErrorKind::Validation(e.to_string()))?;
    let id = uuid::Uuid::new_v4().to_string();
    let mut channel = Channel::new(id, seed.name.clone(), seed.provider, credential);
    channel.base_url = seed.base_url.clone();
    channel.models = seed.models.clone();
    channel.priority = seed.priority;
    channel.weight = seed.weight;
    let view = channel_view(&channel);
    state.store.insert_channel(channel).await;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Deserialize)]
pub struct ChannelUpdate {
    pub base_url: Option<String>,
    pub models: Option<Vec<String>>,
    pub priority: Option<i32>,
    pub weight: Option<f64>,
    pub transformers: Option<Vec<TransformerSpec>>,
}

/// PUT /admin/channels/:id — partial update of the mutable, non-identity fields.
pub async fn update_channel(State(state): State<Arc<AppState>>, Path(id): Path<String>, Json(update): Json<ChannelUpdate>) -> Result<impl IntoResponse, AppError> {
    let updated = state
        .store
        .with_channel_mut(&id, |c| {
            if let Some(base_url) = update.base_url {
                c.base_url = Some(base_url);
            }
            if let Some(models) = update.models {
                c.models = models;
            }
            if let Some(priority) = update.priority {
                c.priority = priority;
            }
            if let Some(weight) = update.weight {
                c.weight = weight;
            }
            if let Some(transformers) = update.transformers {
                c.transformers = Some(transformers);
            }
            c.updated_at = Utc::now();
            channel_view(c)
        })
        .await
        .ok_or_else(|| RoutexErrorKind::NotFound(format!("channel `{id}`")))?;
    Ok(Json(updated))
}

/// DELETE /admin/channels/:id
pub async fn delete_channel(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    if state.store.remove_channel(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RoutexErrorKind::NotFound(format!("channel `{id}`")).into())
    }
}

async fn set_channel_status(state: &AppState, id: &str, status: ChannelStatus) -> Result<Value, AppError> {
    state
        .store
        .with_channel_mut(id, |c| {
            c.status = status;
            c.updated_at = Utc::now();
            channel_view(c)
        })
        .await
        .ok_or_else(|| RoutexErrorKind::NotFound(format!("channel `{id}`")).into())
}

/// POST /admin/channels/:id/enable
pub async fn enable_channel(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(set_channel_status(&state, &id, ChannelStatus::Enabled).await?))
}

/// POST /admin/channels/:id/disable
pub async fn disable_channel(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(set_channel_status(&state, &id, ChannelStatus::Disabled).await?))
}

#[derive(Deserialize)]
pub struct TestChannelRequest {
    #[serde(default)]
    pub body: Value,
}

/// POST /admin/channels/:id/test — run a synthetic request through the
/// channel's transformer pipeline and upstream dispatch without touching
/// routing rules, load balancing, or the request log.
pub async fn test_channel(State(state): State<Arc<AppState>>, Path(id): Path<String>, Json(req): Json<TestChannelRequest>) -> Result<impl IntoResponse, AppError> {
    let channel = state
        .store
        .get_channel(&id)
        .await
        .ok_or_else(|| RoutexErrorKind::NotFound(format!("channel `{id}`")))?;

    let body = if req.body.is_null() {
        json!({"model": "test", "messages": [{"role": "user", "content": "ping"}]})
    } else {
        req.body
    };

    let gateway = state.gateway.read().await.clone();
    let specs = channel.transformers.clone().unwrap_or_default();
    let ctx = TransformContext { channel_name: channel.name.clone(), model: body.get("model").and_then(|m| m.as_str()).map(str::to_string), metadata: Default::default() };

    let request_out = crate::transformers::run_request(&specs, &state.transformers, body, &ctx).await?;
    let timeout = std::time::Duration::from_millis(gateway.request_timeout_ms);
    match crate::backends::dispatch(&state.http_client, &channel, request_out.body, timeout).await {
        Ok(response) => Ok(Json(json!({ "ok": true, "response": response }))),
        Err(e) => Ok(Json(json!({ "ok": false, "error": e.to_string() }))),
    }
}

fn rule_view(r: &RoutingRule) -> Value {
    json!({
        "id": r.id,
        "name": r.name,
        "priority": r.priority,
        "enabled": r.enabled,
        "predicates": r.predicates,
        "target_channel": r.target_channel,
        "target_model": r.target_model,
    })
}

/// GET /admin/rules
pub async fn list_rules(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.store.current().await;
    Json(json!({ "rules": snapshot.rules.iter().map(rule_view).collect::<Vec<_>>() }))
}

#[derive(Deserialize)]
pub struct RuleInput {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
    pub target_channel: String,
    #[serde(default)]
    pub target_model: Option<String>,
}
fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
pub struct ReplaceRulesRequest {
    pub rules: Vec<RuleInput>,
}

/// PUT /admin/rules — wholesale replace the routing-rule set. Rules are
/// validated to resolve to a known channel by name; targets are stored as
/// channel ids the way the seed loader resolves them.
pub async fn replace_rules(State(state): State<Arc<AppState>>, Json(req): Json<ReplaceRulesRequest>) -> Result<impl IntoResponse, AppError> {
    let channels = state.store.channel_snapshot().await;
    let mut rules = Vec::with_capacity(req.rules.len());
    for input in req.rules {
        let target_channel = channels
            .iter()
            .find(|c| c.name == input.target_channel || c.id == input.target_channel)
            .map(|c| c.id.clone())
            .ok_or_else(|| RoutexErrorKind::Validation(format!("rule `{}` targets unknown channel `{}`", input.name, input.target_channel)))?;
        rules.push(RoutingRule {
            id: uuid::Uuid::new_v4().to_string(),
            name: input.name,
            priority: input.priority,
            enabled: input.enabled,
            predicates: input.predicates,
            target_channel,
            target_model: input.target_model,
        });
    }
    state.store.replace_rules(rules).await;
    let snapshot = state.store.current().await;
    Ok(Json(json!({ "rules": snapshot.rules.iter().map(rule_view).collect::<Vec<_>>() })))
}

#[derive(Deserialize)]
pub struct TestRuleRequest {
    pub body: Value,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// POST /admin/rules/test — dry-run routing against the live rule set and a
/// synthetic request body, returning the would-match rule and resolved
/// channel without dispatching anything upstream.
pub async fn test_rule(State(state): State<Arc<AppState>>, Json(req): Json<TestRuleRequest>) -> Result<impl IntoResponse, AppError> {
    let messages = crate::pipeline::extract_messages(&req.body)?;
    let model = req.body.get("model").and_then(|m| m.as_str());
    let tools: Option<Vec<Value>> = req.body.get("tools").and_then(|t| t.as_array()).cloned();

    let snapshot = state.store.current().await;
    let channels = state.store.channel_snapshot().await;
    let channel_refs: Vec<&Channel> = channels.iter().collect();

    let ctx = RouterContext { model, messages: &messages, tools: tools.as_deref(), session_id: req.session_id.as_deref(), metadata: Default::default() };
    let decision: RouteDecision = smart_router::route(&snapshot.rules, &ctx, &channel_refs, &state.custom_routers, Utc::now());

    let matched_channel = decision.channel_id.as_ref().and_then(|id| channels.iter().find(|c| &c.id == id));

    Ok(Json(json!({
        "matched_rule": decision.rule_name,
        "channel_id": decision.channel_id,
        "channel_name": matched_channel.map(|c| c.name.clone()),
        "model_override": decision.model_override,
        "analysis": {
            "category": decision.analysis.category,
            "complexity": decision.analysis.complexity,
            "intent": decision.analysis.intent,
            "estimated_tokens": decision.analysis.estimated_tokens,
            "word_count": decision.analysis.word_count,
            "has_code": decision.analysis.has_code,
            "has_tools": decision.analysis.has_tools,
            "has_images": decision.analysis.has_images,
        },
    })))
}

fn tee_view(d: &TeeDestination) -> Value {
    json!({
        "id": d.id,
        "name": d.name,
        "kind": d.kind,
        "filter": d.filter,
        "url": d.url,
        "method": d.method,
        "file_path": d.file_path,
        "handler_ref": d.handler_ref,
        "timeout_ms": d.timeout.as_millis(),
        "retries": d.retries,
        "enabled": d.enabled,
    })
}

/// GET /admin/tee
pub async fn list_tee(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.store.current().await;
    Json(json!({ "destinations": snapshot.tee_destinations.iter().map(tee_view).collect::<Vec<_>>() }))
}

#[derive(Deserialize)]
pub struct ReplaceTeeRequest {
    pub destinations: Vec<TeeDestinationSeed>,
}

/// PUT /admin/tee — wholesale replace the tee-destination set.
pub async fn replace_tee(State(state): State<Arc<AppState>>, Json(req): Json<ReplaceTeeRequest>) -> impl IntoResponse {
    let destinations: Vec<TeeDestination> = req
        .destinations
        .iter()
        .map(|seed| TeeDestination {
            id: uuid::Uuid::new_v4().to_string(),
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
        })
        .collect();
    state.store.replace_tee_destinations(destinations).await;
    let snapshot = state.store.current().await;
    Json(json!({ "destinations": snapshot.tee_destinations.iter().map(tee_view).collect::<Vec<_>>() }))
}

/// GET /admin/transformers — names of every registered transformer.
pub async fn list_transformers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut names = state.transformers.names();
    names.sort();
    Json(json!({ "transformers": names }))
}

#[derive(Deserialize)]
pub struct TestTransformerRequest {
    pub name: String,
    #[serde(default)]
    pub options: Value,
    pub body: Value,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub direction: TestDirection,
}

#[derive(Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TestDirection {
    #[default]
    Request,
    Response,
}

/// POST /admin/transformers/test — run a single transformer against a
/// caller-supplied body, skipping channel resolution and dispatch entirely.
pub async fn test_transformer(State(state): State<Arc<AppState>>, Json(req): Json<TestTransformerRequest>) -> Result<impl IntoResponse, AppError> {
    if !state.transformers.names().contains(&req.name) {
        return Err(RoutexErrorKind::NotFound(format!("transformer `{}`", req.name)).into());
    }
    let specs = vec![TransformerSpec { name: req.name.clone(), options: req.options, condition: None, skip_on_error: false }];
    let ctx = TransformContext { channel_name: "test".into(), model: req.model, metadata: Default::default() };

    if req.direction == TestDirection::Request {
        let out = crate::transformers::run_request(&specs, &state.transformers, req.body, &ctx).await?;
        Ok(Json(json!({ "body": out.body, "headers": out.headers, "metadata": out.metadata })))
    } else {
        let out = crate::transformers::run_response(&specs, &state.transformers, req.body, &ctx).await?;
        Ok(Json(json!({ "body": out.body, "metadata": out.metadata })))
    }
}
