//! `maxtoken` transformer: clamps `max_tokens` to a configured ceiling,
//! optionally failing the request outright instead of silently clamping.
//!
//! Options: `{"limit": <u64>, "strict": <bool>}`. `strict` defaults to
//! `false` (clamp); when `true`, a request whose `max_tokens` exceeds
//! `limit` is rejected rather than rewritten.

use async_trait::async_trait;
use serde_json::Value;

use super::{TransformContext, TransformOutput, Transformer};

const DEFAULT_LIMIT: u64 = 4_096;

pub struct MaxTokenTransformer;

#[async_trait]
impl Transformer for MaxTokenTransformer {
    async fn transform_request(&self, mut body: Value, options: &Value, _ctx: &TransformContext) -> anyhow::Result<TransformOutput> {
        let limit = options["limit"].as_u64().unwrap_or(DEFAULT_LIMIT);
        let strict = options["strict"].as_bool().unwrap_or(false);

        if let Some(requested) = body["max_tokens"].as_u64() {
            if requested > limit {
                anyhow::ensure!(
                    !strict,
                    "max_tokens {requested} exceeds configured limit {limit}"
                );
                body["max_tokens"] = Value::from(limit);
            }
        }
        Ok(body.into())
    }

    async fn transform_response(&self, body: Value, _options: &Value, _ctx: &TransformContext) -> anyhow::Result<Value> {
        Ok(body)
    }
}
