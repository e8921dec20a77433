//! `cleancache` transformer: strips cache-control metadata from message
//! content blocks before a request leaves the gateway, and from response
//! blocks before they reach the caller — used ahead of providers that
//! reject or mis-handle `cache_control` annotations they don't support.

use async_trait::async_trait;
use serde_json::Value;

use super::{TransformContext, TransformOutput, Transformer};

pub struct CleanCacheTransformer;

#[async_trait]
impl Transformer for CleanCacheTransformer {
    async fn transform_request(&self, mut body: Value, _options: &Value, _ctx: &TransformContext) -> anyhow::Result<TransformOutput> {
        strip_cache_control(&mut body);
        Ok(body.into())
    }

    async fn transform_response(&self, mut body: Value, _options: &Value, _ctx: &TransformContext) -> anyhow::Result<Value> {
        strip_cache_control(&mut body);
        Ok(body)
    }
}

fn strip_cache_control(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove("cache_control");
            for v in map.values_mut() {
                strip_cache_control(v);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_cache_control(item);
            }
        }
        _ => {}
    }
}
