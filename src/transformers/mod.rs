//! Ordered, conditional, bidirectional transformer pipeline.
//!
//! Transformers work against a recursive JSON-value body (the `any`/dynamic
//! body redesign: a typed sum instead of untyped objects threaded through
//! every transformer) and are registered behind a copy-on-write registry —
//! same shape as the teacher's single `to_anthropic`/`from_anthropic` pair,
//! generalized to an arbitrary named, ordered chain.

pub mod anthropic;
pub mod cleancache;
pub mod maxtoken;
pub mod openai;
pub mod presets;
pub mod sampling;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context available to a transformer's condition and body, carrying enough
/// request-shaped information to make conditional decisions without the
/// transformer needing direct access to the whole pipeline.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    pub channel_name: String,
    pub model: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Result of a request-direction transform: a body, optionally with headers
/// to merge (last write wins) into the accumulating header map.
pub struct TransformOutput {
    pub body: Value,
    pub headers: Vec<(String, String)>,
}

impl From<Value> for TransformOutput {
    fn from(body: Value) -> Self {
        Self { body, headers: Vec::new() }
    }
}

/// A registered transformer: async, object-safe so it can live behind
/// `Arc<dyn Transformer>` in the registry.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform_request(&self, body: Value, options: &Value, ctx: &TransformContext) -> anyhow::Result<TransformOutput>;
    async fn transform_response(&self, body: Value, options: &Value, ctx: &TransformContext) -> anyhow::Result<Value>;
}

/// One entry in a pipeline: names a registered transformer plus optional
/// options, a predicate, and a skip-on-error flag.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformerSpec {
    pub name: String,
    #[serde(default)]
    pub options: Value,
    /// Serialized predicate evaluated against body+context; `None` means
    /// "always run". Kept as a small typed enum rather than embedding a
    /// scripting language, consistent with the condition-modeling redesign
    /// used for routing predicates.
    #[serde(default)]
    pub condition: Option<TransformCondition>,
    #[serde(default)]
    pub skip_on_error: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformCondition {
    ModelEquals { model: String },
    ChannelEquals { channel_name: String },
    BodyHasField { field: String },
}

impl TransformCondition {
    fn evaluate(&self, body: &Value, ctx: &TransformContext) -> bool {
        match self {
            Self::ModelEquals { model } => ctx.model.as_deref() == Some(model.as_str()),
            Self::ChannelEquals { channel_name } => ctx.channel_name == *channel_name,
            Self::BodyHasField { field } => body.get(field).is_some(),
        }
    }
}

/// Process-wide `name → Transformer` map behind a copy-on-write pointer:
/// registration installs a new `Arc<HashMap>` snapshot, readers hold a
/// pointer they already resolved.
#[derive(Clone)]
pub struct TransformerRegistry {
    entries: Arc<DashMap<String, Arc<dyn Transformer>>>,
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        let registry = Self { entries: Arc::new(DashMap::new()) };
        registry.register("anthropic", Arc::new(anthropic::AnthropicTransformer));
        registry.register("openai", Arc::new(openai::OpenAiTransformer));
        registry.register("maxtoken", Arc::new(maxtoken::MaxTokenTransformer));
        registry.register("sampling", Arc::new(sampling::SamplingTransformer));
        registry.register("cleancache", Arc::new(cleancache::CleanCacheTransformer));
        registry
    }
}

impl TransformerRegistry {
    pub fn register(&self, name: impl Into<String>, transformer: Arc<dyn Transformer>) {
        self.entries.insert(name.into(), transformer);
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Transformer>> {
        self.entries.get(name).map(|e| e.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }
}

/// Outcome of running a pipeline in one direction.
#[derive(Debug, Default, Clone, Serialize)]
pub struct PipelineMetadata {
    pub applied_transformers: Vec<String>,
    pub skipped_transformers: Vec<String>,
    pub errors: Vec<String>,
}

pub struct PipelineOutput {
    pub body: Value,
    pub headers: Vec<(String, String)>,
    pub metadata: PipelineMetadata,
}

/// Run the request-direction pass: specs in declared order.
pub async fn run_request(
    specs: &[TransformerSpec],
    registry: &TransformerRegistry,
    body: Value,
    ctx: &TransformContext,
) -> anyhow::Result<PipelineOutput> {
    let mut body = body;
    let mut headers = Vec::new();
    let mut metadata = PipelineMetadata::default();

    for spec in specs {
        if let Some(cond) = &spec.condition {
            if !cond.evaluate(&body, ctx) {
                metadata.skipped_transformers.push(spec.name.clone());
                continue;
            }
        }
        let Some(transformer) = registry.get(&spec.name) else {
            tracing::warn!(transformer = %spec.name, "unknown transformer, skipping");
            metadata.skipped_transformers.push(spec.name.clone());
            continue;
        };

        match transformer.transform_request(body.clone(), &spec.options, ctx).await {
            Ok(out) => {
                body = out.body;
                headers.extend(out.headers);
                metadata.applied_transformers.push(spec.name.clone());
            }
            Err(e) => {
                if spec.skip_on_error {
                    metadata.skipped_transformers.push(spec.name.clone());
                    metadata.errors.push(format!("{}: {e}", spec.name));
                } else {
                    return Err(crate::error::RoutexErrorKind::Transformer {
                        name: spec.name.clone(),
                        source: e,
                    }
                    .into());
                }
            }
        }
    }

    Ok(PipelineOutput { body, headers, metadata })
}

/// Run the response-direction pass: specs in REVERSE order, applying
/// `transform_response` only.
pub async fn run_response(
    specs: &[TransformerSpec],
    registry: &TransformerRegistry,
    body: Value,
    ctx: &TransformContext,
) -> anyhow::Result<PipelineOutput> {
    let mut body = body;
    let mut metadata = PipelineMetadata::default();

    for spec in specs.iter().rev() {
        if let Some(cond) = &spec.condition {
            if !cond.evaluate(&body, ctx) {
                metadata.skipped_transformers.push(spec.name.clone());
                continue;
            }
        }
        let Some(transformer) = registry.get(&spec.name) else {
            metadata.skipped_transformers.push(spec.name.clone());
            continue;
        };

        match transformer.transform_response(body.clone(), &spec.options, ctx).await {
            Ok(out) => {
                body = out;
                metadata.applied_transformers.push(spec.name.clone());
            }
            Err(e) => {
                if spec.skip_on_error {
                    metadata.skipped_transformers.push(spec.name.clone());
                    metadata.errors.push(format!("{}: {e}", spec.name));
                } else {
                    return Err(crate::error::RoutexErrorKind::Transformer {
                        name: spec.name.clone(),
                        source: e,
                    }
                    .into());
                }
            }
        }
    }

    Ok(PipelineOutput { body, headers: Vec::new(), metadata })
}
