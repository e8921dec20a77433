//! `sampling` transformer: clamps `temperature`/`top_p` into configured
//! ranges and can inject defaults when the caller omitted them.
//!
//! Options: `{"temperature_min", "temperature_max", "top_p_min", "top_p_max",
//! "default_temperature", "default_top_p"}`, all optional `f64`s.

use async_trait::async_trait;
use serde_json::Value;

use super::{TransformContext, TransformOutput, Transformer};

pub struct SamplingTransformer;

#[async_trait]
impl Transformer for SamplingTransformer {
    async fn transform_request(&self, mut body: Value, options: &Value, _ctx: &TransformContext) -> anyhow::Result<TransformOutput> {
        clamp_or_default(&mut body, "temperature", options, "temperature_min", "temperature_max", "default_temperature");
        clamp_or_default(&mut body, "top_p", options, "top_p_min", "top_p_max", "default_top_p");
        Ok(body.into())
    }

    async fn transform_response(&self, body: Value, _options: &Value, _ctx: &TransformContext) -> anyhow::Result<Value> {
        Ok(body)
    }
}

fn clamp_or_default(body: &mut Value, field: &str, options: &Value, min_key: &str, max_key: &str, default_key: &str) {
    let min = options[min_key].as_f64();
    let max = options[max_key].as_f64();

    match body[field].as_f64() {
        Some(value) => {
            let mut clamped = value;
            if let Some(min) = min {
                clamped = clamped.max(min);
            }
            if let Some(max) = max {
                clamped = clamped.min(max);
            }
            if clamped != value {
                body[field] = Value::from(clamped);
            }
        }
        None => {
            if let Some(default) = options[default_key].as_f64() {
                body[field] = Value::from(default);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn clamps_temperature_above_max() {
        let t = SamplingTransformer;
        let out = t
            .transform_request(json!({"temperature": 2.5}), &json!({"temperature_max": 1.0}), &TransformContext::default())
            .await
            .unwrap();
        assert_eq!(out.body["temperature"], 1.0);
    }

    #[tokio::test]
    async fn clamps_temperature_below_min() {
        let t = SamplingTransformer;
        let out = t
            .transform_request(json!({"temperature": -1.0}), &json!({"temperature_min": 0.0}), &TransformContext::default())
            .await
            .unwrap();
        assert_eq!(out.body["temperature"], 0.0);
    }

    #[tokio::test]
    async fn injects_default_when_field_absent() {
        let t = SamplingTransformer;
        let out = t
            .transform_request(json!({}), &json!({"default_temperature": 0.7}), &TransformContext::default())
            .await
            .unwrap();
        assert_eq!(out.body["temperature"], 0.7);
    }

    #[tokio::test]
    async fn leaves_in_range_values_untouched() {
        let t = SamplingTransformer;
        let out = t
            .transform_request(
                json!({"top_p": 0.9}),
                &json!({"top_p_min": 0.0, "top_p_max": 1.0}),
                &TransformContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.body["top_p"], 0.9);
    }
}
