//! `anthropic` transformer: OpenAI Chat Completions ⇄ Anthropic Messages.
//!
//! Request direction assumes an OpenAI-shaped body and converts it to
//! Anthropic's `/v1/messages` shape (system message hoisted to a top-level
//! field, `max_tokens` defaulted since Anthropic requires it); response
//! direction converts an Anthropic response back to OpenAI chat-completion
//! shape. Adapted from the teacher's `backends::anthropic::{to_anthropic,
//! from_anthropic}`, generalized from a direct-call adapter into a
//! pipeline-stage transformer.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{TransformContext, TransformOutput, Transformer};

const DEFAULT_MAX_TOKENS: u64 = 8_192;

pub struct AnthropicTransformer;

#[async_trait]
impl Transformer for AnthropicTransformer {
    async fn transform_request(&self, body: Value, _options: &Value, _ctx: &TransformContext) -> anyhow::Result<TransformOutput> {
        Ok(to_anthropic(body)?.into())
    }

    async fn transform_response(&self, body: Value, _options: &Value, _ctx: &TransformContext) -> anyhow::Result<Value> {
        from_anthropic(body)
    }
}

pub(crate) fn to_anthropic(request: Value) -> anyhow::Result<Value> {
    let model = request["model"].as_str().context("`model` field is required")?.to_string();
    let max_tokens = request["max_tokens"].as_u64().unwrap_or(DEFAULT_MAX_TOKENS);
    let raw_messages = request["messages"].as_array().context("`messages` array is required")?;

    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages: Vec<Value> = Vec::with_capacity(raw_messages.len());

    for msg in raw_messages {
        if msg["role"].as_str() == Some("system") {
            if let Some(content) = msg["content"].as_str() {
                system_parts.push(content);
            }
        } else {
            messages.push(msg.clone());
        }
    }

    let mut req = json!({ "model": model, "max_tokens": max_tokens, "messages": messages });
    if !system_parts.is_empty() {
        req["system"] = Value::String(system_parts.join("\n\n"));
    }
    if let Some(temp) = request["temperature"].as_f64() {
        req["temperature"] = json!(temp);
    }
    if let Some(stop) = request.get("stop") {
        req["stop_sequences"] = stop.clone();
    }
    if let Some(tools) = request.get("tools") {
        req["tools"] = tools.clone();
    }
    Ok(req)
}

pub(crate) fn from_anthropic(resp: Value) -> anyhow::Result<Value> {
    let text = resp["content"]
        .as_array()
        .and_then(|blocks| blocks.iter().find(|b| b["type"] == "text"))
        .and_then(|b| b["text"].as_str())
        .context("no text block in Anthropic response `content` array")?
        .to_string();

    let model = resp["model"].as_str().unwrap_or("unknown");
    let finish_reason = match resp["stop_reason"].as_str().unwrap_or("stop") {
        "end_turn" => "stop",
        "max_tokens" => "length",
        other => other,
    };

    let input_tokens = resp["usage"]["input_tokens"].as_u64().unwrap_or(0);
    let output_tokens = resp["usage"]["output_tokens"].as_u64().unwrap_or(0);

    Ok(json!({
        "id": resp["id"],
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": input_tokens,
            "completion_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_anthropic_hoists_system_message() {
        let req = json!({
            "model": "claude-3-5-sonnet",
            "messages": [
                { "role": "system", "content": "Be concise." },
                { "role": "user", "content": "Hi" },
            ],
        });
        let out = to_anthropic(req).unwrap();
        assert_eq!(out["system"], "Be concise.");
        assert_eq!(out["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn to_anthropic_defaults_max_tokens() {
        let req = json!({ "model": "m", "messages": [{"role": "user", "content": "hi"}] });
        let out = to_anthropic(req).unwrap();
        assert_eq!(out["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn from_anthropic_maps_stop_reasons() {
        let resp = json!({
            "id": "msg_1", "model": "claude-3-5-sonnet",
            "content": [{"type": "text", "text": "hi"}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 1, "output_tokens": 2},
        });
        let out = from_anthropic(resp).unwrap();
        assert_eq!(out["choices"][0]["finish_reason"], "length");
        assert_eq!(out["usage"]["total_tokens"], 3);
    }

    #[test]
    fn from_anthropic_errors_without_text_block() {
        let resp = json!({
            "id": "msg_1", "model": "m",
            "content": [{"type": "tool_use"}],
            "stop_reason": "tool_use",
            "usage": {},
        });
        assert!(from_anthropic(resp).is_err());
    }
}
