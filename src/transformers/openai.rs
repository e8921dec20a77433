//! `openai` transformer: Anthropic Messages ⇄ OpenAI Chat Completions.
//!
//! Mirror image of [`super::anthropic`]: in the teacher, OpenAI is the
//! untranslated native wire format (`backends::openai` forwards bodies
//! verbatim), so there is no existing conversion pair to adapt here. This
//! transformer supplies the direction the teacher never needed — converting
//! an Anthropic-shaped body into OpenAI chat-completion shape on the request
//! side, and back on the response side — using the same field mapping as
//! [`super::anthropic::to_anthropic`]/`from_anthropic`, inverted.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{TransformContext, TransformOutput, Transformer};

pub struct OpenAiTransformer;

#[async_trait]
impl Transformer for OpenAiTransformer {
    async fn transform_request(&self, body: Value, _options: &Value, _ctx: &TransformContext) -> anyhow::Result<TransformOutput> {
        Ok(to_openai(body).into())
    }

    async fn transform_response(&self, body: Value, _options: &Value, _ctx: &TransformContext) -> anyhow::Result<Value> {
        Ok(from_openai(body))
    }
}

/// Anthropic request shape → OpenAI chat-completion request shape. A leaf
/// `system` field becomes a leading `{"role": "system", ...}` message;
/// `stop_sequences` becomes `stop`; everything else passes through.
fn to_openai(request: Value) -> Value {
    let mut messages: Vec<Value> = Vec::new();
    if let Some(system) = request["system"].as_str() {
        messages.push(json!({ "role": "system", "content": system }));
    }
    if let Some(existing) = request["messages"].as_array() {
        messages.extend(existing.iter().cloned());
    }

    let mut out = json!({
        "model": request["model"],
        "messages": messages,
    });
    if let Some(max_tokens) = request["max_tokens"].as_u64() {
        out["max_tokens"] = json!(max_tokens);
    }
    if let Some(temp) = request["temperature"].as_f64() {
        out["temperature"] = json!(temp);
    }
    if let Some(stop) = request.get("stop_sequences") {
        out["stop"] = stop.clone();
    }
    if let Some(tools) = request.get("tools") {
        out["tools"] = tools.clone();
    }
    out
}

/// OpenAI chat-completion response shape → Anthropic message response shape.
fn from_openai(resp: Value) -> Value {
    let choice = &resp["choices"][0];
    let text = choice["message"]["content"].as_str().unwrap_or("").to_string();
    let finish_reason = choice["finish_reason"].as_str().unwrap_or("stop");
    let stop_reason = match finish_reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        other => other,
    };

    let prompt_tokens = resp["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
    let completion_tokens = resp["usage"]["completion_tokens"].as_u64().unwrap_or(0);

    json!({
        "id": resp["id"],
        "type": "message",
        "role": "assistant",
        "model": resp["model"],
        "content": [{ "type": "text", "text": text }],
        "stop_reason": stop_reason,
        "usage": {
            "input_tokens": prompt_tokens,
            "output_tokens": completion_tokens,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_openai_reintroduces_system_as_leading_message() {
        let req = json!({
            "model": "claude-3-5-sonnet",
            "system": "Be concise.",
            "messages": [{ "role": "user", "content": "hi" }],
        });
        let out = to_openai(req);
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn to_openai_maps_stop_sequences_to_stop() {
        let req = json!({
            "model": "m",
            "messages": [],
            "stop_sequences": ["END"],
        });
        let out = to_openai(req);
        assert_eq!(out["stop"], json!(["END"]));
    }

    #[test]
    fn from_openai_maps_finish_reason_to_stop_reason() {
        let resp = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [{ "message": { "role": "assistant", "content": "hi" }, "finish_reason": "length" }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 4 },
        });
        let out = from_openai(resp);
        assert_eq!(out["stop_reason"], "max_tokens");
        assert_eq!(out["content"][0]["text"], "hi");
        assert_eq!(out["usage"]["input_tokens"], 3);
    }

    #[test]
    fn round_trip_preserves_text_through_both_directions() {
        let anthropic_req = json!({
            "model": "claude-3-5-sonnet",
            "system": "Be terse.",
            "messages": [{ "role": "user", "content": "hi" }],
        });
        let openai_req = to_openai(anthropic_req);
        assert_eq!(openai_req["messages"][0]["content"], "Be terse.");

        let openai_resp = json!({
            "id": "x", "model": "gpt-4o",
            "choices": [{ "message": { "content": "hello" }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1 },
        });
        let anthropic_resp = from_openai(openai_resp);
        assert_eq!(anthropic_resp["stop_reason"], "end_turn");
    }
}
