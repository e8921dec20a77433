//! Request orchestration: content analysis → smart routing → load balancing
//! → transformer pipeline → provider dispatch → transformer pipeline
//! (response) → tee/metrics/log recording.
//!
//! This replaces the teacher's `router::route`/`route_stream` tier-ladder
//! dispatch — there is no tier/profile/escalation concept in Routex's
//! domain — but keeps its shape: try a candidate, record the outcome, fall
//! back to the next one on failure, bounded by a retry budget, with a
//! `tracing::instrument` span around the whole attempt.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::backends;
use crate::channel::Channel;
use crate::content_analyzer::{Message, MessageContent, Role};
use crate::error::RoutexErrorKind;
use crate::load_balancer::{self, Strategy};
use crate::smart_router::{self, RouteDecision, RouterContext};
use crate::state::AppState;
use crate::tee::{ChannelRef, RequestEnvelope, ResponseEnvelope, TeePayload, TokenUsage as TeeTokenUsage};
use crate::token_estimator::ModelFamily;
use crate::traffic::RequestLogEntry;
use crate::transformers::{self, TransformContext};

/// Inbound request, already stripped of transport concerns by the HTTP
/// layer (headers consumed into `session_id`, body left exactly as the
/// client sent it).
pub struct ChatRequest {
    pub method: String,
    pub path: String,
    pub session_id: Option<String>,
    pub body: Value,
}

/// Outcome surfaced to the HTTP layer: the provider-shaped body plus the
/// routing facts the client response headers expose (`X-Channel-Name`,
/// `X-Routing-Rule`, and — when the preferred channel's breaker was open —
/// `X-Circuit-Fallback`).
pub struct ChatResponse {
    pub body: Value,
    pub channel_name: String,
    pub rule_name: Option<String>,
    pub circuit_fallback_from: Option<String>,
}

/// Run one client-facing chat-completion request end to end.
#[tracing::instrument(skip(state, request), fields(path = %request.path))]
pub async fn dispatch_chat_completion(state: &AppState, request: ChatRequest) -> Result<ChatResponse, crate::error::AppError> {
    let now = Utc::now();
    let gateway = state.gateway.read().await.clone();

    let model = request.body.get("model").and_then(|m| m.as_str()).map(str::to_string);
    let messages = extract_messages(&request.body)?;
    let tools: Option<Vec<Value>> = request.body.get("tools").and_then(|t| t.as_array()).cloned();

    let snapshot = state.store.current().await;
    let channels = state.store.channel_snapshot().await;
    let channel_refs: Vec<&Channel> = channels.iter().collect();

    let router_ctx = RouterContext {
        model: model.as_deref(),
        messages: &messages,
        tools: tools.as_deref(),
        session_id: request.session_id.as_deref(),
        metadata: HashMap::new(),
    };
    let decision = smart_router::route(&snapshot.rules, &router_ctx, &channel_refs, &state.custom_routers, now);
    let effective_model = decision.model_override.clone().or_else(|| model.clone());

    let mut tried: Vec<String> = Vec::new();
    let mut last_error: Option<anyhow::Error> = None;
    let mut circuit_fallback_from: Option<String> = None;
    let attempts = gateway.max_upstream_retries + 1;

    for _ in 0..attempts {
        let (channel, skipped_circuit_open) = pick_channel(
            state,
            &decision,
            &channel_refs,
            &tried,
            effective_model.as_deref(),
            request.session_id.as_deref(),
            gateway.load_balancer_strategy,
            now,
        )
        .await;
        let Some(channel) = channel else { break };

        if circuit_fallback_from.is_none() {
            if let Some(preferred) = skipped_circuit_open {
                let reason = RoutexErrorKind::CircuitOpen { fallback_channel: channel.name.clone() };
                tracing::info!(preferred_channel = %preferred, %reason, "routing around open circuit breaker");
                state.metrics.record_circuit_fallback(&preferred, &channel.name);
                circuit_fallback_from = Some(preferred);
            }
        }

        tried.push(channel.id.clone());
        let attempt_start = Instant::now();

        match dispatch_once(state, &gateway, &channel, effective_model.as_deref(), &request).await {
            Ok((response_body, raw_usage)) => {
                let latency_ms = attempt_start.elapsed().as_millis() as u64;
                on_success(state, &channel, &request, effective_model.as_deref(), now, latency_ms, raw_usage, &response_body).await;
                return Ok(ChatResponse {
                    body: response_body,
                    channel_name: channel.name.clone(),
                    rule_name: decision.rule_name.clone(),
                    circuit_fallback_from,
                });
            }
            Err(e) => {
                let latency_ms = attempt_start.elapsed().as_millis() as u64;
                on_failure(state, &channel, &request, effective_model.as_deref(), now, latency_ms, &e).await;
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => RoutexErrorKind::Upstream(e.to_string()).into(),
        None => RoutexErrorKind::ServiceUnavailable("no eligible channel for this request".into()).into(),
    })
}

/// Picks the next channel to try. The second element of the return value
/// names the preferred (sticky-session or rule-decided) channel when it was
/// skipped specifically because its breaker was open — as opposed to any
/// other ineligibility reason — so the caller can tell a `CircuitOpen`
/// fallback apart from ordinary load-balancer selection.
async fn pick_channel<'a>(
    state: &AppState,
    decision: &RouteDecision,
    channels: &[&'a Channel],
    tried: &[String],
    model: Option<&str>,
    session_id: Option<&str>,
    strategy: Strategy,
    now: DateTime<Utc>,
) -> (Option<Channel>, Option<String>) {
    let untried = |c: &&Channel| !tried.contains(&c.id) && c.is_eligible(now, model);
    let mut skipped_circuit_open: Option<String> = None;

    if let Some(session_id) = session_id {
        if let Some(sticky_id) = state.session_affinity.get(session_id, now).await {
            if let Some(c) = channels.iter().find(|c| c.id == sticky_id) {
                if untried(c) {
                    return (Some((*c).clone()), None);
                }
                if c.is_circuit_open(now) {
                    skipped_circuit_open = Some(c.name.clone());
                }
            }
        }
    }

    if let Some(decided_id) = &decision.channel_id {
        if let Some(c) = channels.iter().find(|c| &c.id == decided_id) {
            if untried(c) {
                return (Some((*c).clone()), None);
            }
            if c.is_circuit_open(now) {
                skipped_circuit_open = Some(c.name.clone());
            }
        }
    }

    let candidates: Vec<&Channel> = channels.iter().copied().filter(untried).collect();
    let picked = load_balancer::select(&candidates, strategy, &state.rr_cursor).cloned();
    let fallback_reason = picked.as_ref().and(skipped_circuit_open);
    (picked, fallback_reason)
}

async fn dispatch_once(
    state: &AppState,
    gateway: &crate::config::GatewayConfig,
    channel: &Channel,
    model: Option<&str>,
    request: &ChatRequest,
) -> anyhow::Result<(Value, backends::TokenUsage)> {
    let specs = channel.transformers.clone().unwrap_or_default();
    let ctx = TransformContext {
        channel_name: channel.name.clone(),
        model: model.map(str::to_string),
        metadata: HashMap::new(),
    };

    let request_out = transformers::run_request(&specs, &state.transformers, request.body.clone(), &ctx).await?;

    let timeout = Duration::from_millis(gateway.request_timeout_ms);
    let raw_response = backends::dispatch(&state.http_client, channel, request_out.body, timeout).await?;

    let usage = backends::adapter_for(channel.provider).extract_token_usage(&raw_response);
    let response_out = transformers::run_response(&specs, &state.transformers, raw_response, &ctx).await?;

    Ok((response_out.body, usage))
}

#[allow(clippy::too_many_arguments)]
async fn on_success(
    state: &AppState,
    channel: &Channel,
    request: &ChatRequest,
    model: Option<&str>,
    now: DateTime<Utc>,
    latency_ms: u64,
    usage: backends::TokenUsage,
    response_body: &Value,
) {
    let cfg = state.gateway.read().await.breaker_config();
    state.store.with_channel_mut(&channel.id, |c| {
        c.record_dispatch(now);
        c.record_success(now, &cfg);
    }).await;

    if let Some(session_id) = &request.session_id {
        state.session_affinity.set(session_id, &channel.id, now).await;
    }

    let model_name = model.unwrap_or("unknown").to_string();
    state.metrics.record_request(&channel.name, &model_name, "200", latency_ms as f64 / 1000.0, usage.input + usage.output);

    let entry = RequestLogEntry::new(channel.id.clone(), model_name.clone(), request.method.clone(), request.path.clone())
        .with_outcome(200, latency_ms, true)
        .with_tokens(usage.input, usage.output, usage.cached);
    state.request_log.push(entry);

    let snapshot = state.store.current().await;
    if !snapshot.tee_destinations.is_empty() {
        let payload = TeePayload {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now,
            channel: ChannelRef { id: channel.id.clone(), name: channel.name.clone(), provider: channel.provider.to_string() },
            request: RequestEnvelope {
                method: request.method.clone(),
                path: request.path.clone(),
                model: model_name,
                body: request.body.clone(),
                headers: Vec::new(),
            },
            response: ResponseEnvelope { status: 200, body: response_body.clone(), headers: Vec::new(), latency_ms },
            tokens: TeeTokenUsage { input: usage.input, output: usage.output, cached: usage.cached },
            success: true,
            error: None,
        };
        state.tee.tee(&snapshot.tee_destinations, payload, rand_sample).await;
    }
}

/// Mirrors [`on_success`]'s bookkeeping for a failed dispatch attempt: trips
/// (or re-trips) the breaker, then records the failure through the same
/// three channels a success goes through — request log, tee, metrics — so a
/// failed attempt is just as visible as a successful one.
#[allow(clippy::too_many_arguments)]
async fn on_failure(
    state: &AppState,
    channel: &Channel,
    request: &ChatRequest,
    model: Option<&str>,
    now: DateTime<Utc>,
    latency_ms: u64,
    error: &anyhow::Error,
) {
    let cfg = state.gateway.read().await.breaker_config();
    let was_open = channel.is_circuit_open(now);
    state.store.with_channel_mut(&channel.id, |c| c.record_failure(now, &cfg)).await;
    if !was_open {
        if let Some(updated) = state.store.get_channel(&channel.id).await {
            state.metrics.set_breaker_open(&channel.name, updated.is_circuit_open(now));
        }
    }

    let model_name = model.unwrap_or("unknown").to_string();
    let error_message = error.to_string();
    let status_code = 502;
    state.metrics.record_request(&channel.name, &model_name, "error", latency_ms as f64 / 1000.0, 0);

    let entry = RequestLogEntry::new(channel.id.clone(), model_name.clone(), request.method.clone(), request.path.clone())
        .with_outcome(status_code, latency_ms, false)
        .with_error(&error_message);
    state.request_log.push(entry);

    let snapshot = state.store.current().await;
    if !snapshot.tee_destinations.is_empty() {
        let payload = TeePayload {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: now,
            channel: ChannelRef { id: channel.id.clone(), name: channel.name.clone(), provider: channel.provider.to_string() },
            request: RequestEnvelope {
                method: request.method.clone(),
                path: request.path.clone(),
                model: model_name,
                body: request.body.clone(),
                headers: Vec::new(),
            },
            response: ResponseEnvelope { status: status_code, body: Value::Null, headers: Vec::new(), latency_ms },
            tokens: TeeTokenUsage { input: 0, output: 0, cached: 0 },
            success: false,
            error: Some(error_message),
        };
        state.tee.tee(&snapshot.tee_destinations, payload, rand_sample).await;
    }
}

fn rand_sample() -> f64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0.0..1.0)
}

/// Translate the client's OpenAI/Anthropic-shaped wire body into the
/// analyzer's [`Message`] list. Best-effort: messages missing a recognized
/// `content` shape are treated as empty rather than rejected, since content
/// analysis is a routing signal, not a validation gate.
pub(crate) fn extract_messages(body: &Value) -> Result<Vec<Message>, crate::error::AppError> {
    let raw = body
        .get("messages")
        .and_then(|m| m.as_array())
        .ok_or_else(|| RoutexErrorKind::Validation("`messages` field is required and must be an array".into()))?;

    Ok(raw.iter().map(parse_message).collect())
}

fn parse_message(value: &Value) -> Message {
    let role = match value.get("role").and_then(|r| r.as_str()) {
        Some("assistant") => Role::Assistant,
        Some("system") => Role::System,
        Some("tool") => Role::Tool,
        _ => Role::User,
    };

    let content = match value.get("content") {
        Some(Value::String(text)) => vec![MessageContent::Text(text.clone())],
        Some(Value::Array(blocks)) => blocks.iter().map(parse_content_block).collect(),
        _ => Vec::new(),
    };

    Message { role, content }
}

fn parse_content_block(value: &Value) -> MessageContent {
    match value.get("type").and_then(|t| t.as_str()) {
        Some("text") => MessageContent::Text(value.get("text").and_then(|t| t.as_str()).unwrap_or_default().to_string()),
        Some("image") | Some("image_url") => MessageContent::Image {
            detail: value.get("detail").and_then(|d| d.as_str()).map(str::to_string),
        },
        _ => MessageContent::Text(value.as_str().unwrap_or_default().to_string()),
    }
}

/// Token estimate for a raw wire body, used by admin test endpoints and
/// before a request has a resolved channel/model.
pub fn estimate_tokens(body: &Value) -> Result<u32, crate::error::AppError> {
    let messages = extract_messages(body)?;
    let family = body
        .get("model")
        .and_then(|m| m.as_str())
        .map(ModelFamily::from_model_name)
        .unwrap_or_default();
    Ok(crate::token_estimator::estimate(&messages, family))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Provider, SeedFile};
    use crate::tee::{SinkKind, TeeDestination, TeeFilter};

    async fn test_state() -> AppState {
        AppState::new(SeedFile::default(), "unused.toml".into()).await.unwrap()
    }

    fn decision_for(channel_id: Option<&str>) -> RouteDecision {
        RouteDecision {
            channel_id: channel_id.map(str::to_string),
            model_override: None,
            rule_name: None,
            analysis: crate::content_analyzer::analyze(&[], None),
        }
    }

    fn tee_dest(name: &str) -> TeeDestination {
        TeeDestination {
            id: name.into(),
            name: name.into(),
            kind: SinkKind::Http,
            filter: TeeFilter::default(),
            url: Some("http://localhost:1/tee".into()),
            headers: vec![],
            method: None,
            file_path: None,
            handler_ref: None,
            timeout: Duration::from_millis(50),
            retries: 0,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn pick_channel_falls_back_when_preferred_channel_is_circuit_open() {
        let state = test_state().await;
        let cfg = crate::channel::BreakerConfig::default();
        let now = Utc::now();

        let mut broken = Channel::new("broken".into(), "broken-channel".into(), Provider::OpenAI, "k".into());
        for _ in 0..cfg.threshold {
            broken.record_failure(now, &cfg);
        }
        assert!(broken.is_circuit_open(now));
        state.store.insert_channel(broken).await;
        state.store.insert_channel(Channel::new("healthy".into(), "healthy-channel".into(), Provider::OpenAI, "k".into())).await;

        let channels = state.store.channel_snapshot().await;
        let refs: Vec<&Channel> = channels.iter().collect();
        let decision = decision_for(Some("broken"));

        let (picked, skipped) = pick_channel(&state, &decision, &refs, &[], None, None, Strategy::Priority, now).await;

        assert_eq!(picked.unwrap().id, "healthy");
        assert_eq!(skipped.as_deref(), Some("broken-channel"));
    }

    #[tokio::test]
    async fn pick_channel_reports_no_fallback_when_preferred_channel_is_healthy() {
        let state = test_state().await;
        let now = Utc::now();
        state.store.insert_channel(Channel::new("c1".into(), "c1-name".into(), Provider::OpenAI, "k".into())).await;

        let channels = state.store.channel_snapshot().await;
        let refs: Vec<&Channel> = channels.iter().collect();
        let decision = decision_for(Some("c1"));

        let (picked, skipped) = pick_channel(&state, &decision, &refs, &[], None, None, Strategy::Priority, now).await;

        assert_eq!(picked.unwrap().id, "c1");
        assert!(skipped.is_none());
    }

    #[tokio::test]
    async fn on_failure_records_a_failed_entry_and_tees_it() {
        let state = test_state().await;
        let now = Utc::now();
        let channel = Channel::new("c1".into(), "c1-name".into(), Provider::OpenAI, "k".into());
        state.store.insert_channel(channel.clone()).await;
        state.store.replace_tee_destinations(vec![tee_dest("sink")]).await;

        let request = ChatRequest { method: "POST".into(), path: "/v1/chat/completions".into(), session_id: None, body: serde_json::json!({}) };
        let error = anyhow::anyhow!("upstream exploded");

        on_failure(&state, &channel, &request, Some("gpt-4o"), now, 12, &error).await;

        let stats = state.request_log.stats().await;
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.error_count, 1);

        let recent = state.request_log.recent(1).await;
        assert_eq!(recent[0].error.as_deref(), Some("upstream exploded"));
        assert!(!recent[0].success);

        assert_eq!(state.tee.stats().queue_size.load(std::sync::atomic::Ordering::Relaxed), 1);
    }

    #[test]
    fn extract_messages_requires_messages_array() {
        let body = serde_json::json!({"model": "gpt-4o"});
        assert!(extract_messages(&body).is_err());
    }

    #[test]
    fn extract_messages_parses_string_content() {
        let body = serde_json::json!({"messages": [{"role": "user", "content": "hello"}]});
        let messages = extract_messages(&body).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn extract_messages_parses_block_content() {
        let body = serde_json::json!({
            "messages": [{"role": "assistant", "content": [{"type": "text", "text": "hi"}]}]
        });
        let messages = extract_messages(&body).unwrap();
        assert_eq!(messages[0].role, Role::Assistant);
        assert!(matches!(messages[0].content[0], MessageContent::Text(_)));
    }

    #[test]
    fn estimate_tokens_uses_model_family_from_name() {
        let body = serde_json::json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]});
        assert!(estimate_tokens(&body).unwrap() > 0);
    }
}
