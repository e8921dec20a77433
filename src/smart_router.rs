//! Rule-based channel selection over content analysis.
//!
//! Conditions are a tagged sum type (one typed variant per predicate
//! family) rather than a dynamic property bag, per the condition-modeling
//! redesign: evaluation dispatches on variant instead of probing arbitrary
//! fields. The custom-router registry is a copy-on-write `DashMap` of
//! boxed closures plus combinators, mirroring the teacher's provider
//! registry pattern generalized to runtime-registered predicates.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::content_analyzer::{self, Category, Complexity, ContentAnalysis, Intent, Message};

/// One typed predicate family. A rule's full condition is the AND of every
/// field present on a [`RuleSeed`]'s condition object; this enum is the
/// typed counterpart used once deserialized and validated.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    TokenThreshold { threshold: u32 },
    Keywords { keywords: Vec<String> },
    UserPattern { pattern: String },
    ModelPattern { pattern: String },
    HasTools { expected: bool },
    HasImages { expected: bool },
    CustomFunction { name: String },
    ContentCategory { category: Category },
    ComplexityLevel { complexity: Complexity },
    HasCode { expected: bool },
    ProgrammingLanguage { language: String },
    Intent { intent: Intent },
    MinWordCount { min: usize },
    MaxWordCount { max: usize },
}

/// Request-shaped context a rule condition is evaluated against.
pub struct RouterContext<'a> {
    pub model: Option<&'a str>,
    pub messages: &'a [Message],
    pub tools: Option<&'a [serde_json::Value]>,
    pub session_id: Option<&'a str>,
    pub metadata: HashMap<String, String>,
}

/// Outcome of evaluating a single [`Predicate`] — plain boolean, or a direct
/// channel short-circuit from a custom function (§4.3's "result is `true` or
/// a Channel").
enum PredicateOutcome {
    Bool(bool),
    DirectChannel(Channel),
}

fn eval_predicate(
    predicate: &Predicate,
    ctx: &RouterContext<'_>,
    analysis: &ContentAnalysis,
    registry: &CustomRouterRegistry,
) -> PredicateOutcome {
    use PredicateOutcome::Bool as B;
    match predicate {
        Predicate::TokenThreshold { threshold } => B(analysis.estimated_tokens >= *threshold),
        Predicate::Keywords { keywords } => {
            let text = user_text(ctx.messages).to_lowercase();
            B(keywords.iter().any(|k| text.contains(&k.to_lowercase())))
        }
        Predicate::UserPattern { pattern } => {
            let text = user_text(ctx.messages);
            B(Regex::new(&format!("(?i){pattern}")).map(|re| re.is_match(&text)).unwrap_or(false))
        }
        Predicate::ModelPattern { pattern } => {
            let model = ctx.model.unwrap_or("");
            B(Regex::new(pattern).map(|re| re.is_match(model)).unwrap_or(false))
        }
        Predicate::HasTools { expected } => B(analysis.has_tools == *expected),
        Predicate::HasImages { expected } => B(analysis.has_images == *expected),
        Predicate::CustomFunction { name } => match registry.invoke(name, ctx, analysis) {
            Some(CustomResult::Bool(b)) => B(b),
            Some(CustomResult::Channel(c)) => PredicateOutcome::DirectChannel(c),
            None => B(false),
        },
        Predicate::ContentCategory { category } => B(analysis.category == *category),
        Predicate::ComplexityLevel { complexity } => B(analysis.complexity == *complexity),
        Predicate::HasCode { expected } => B(analysis.has_code == *expected),
        Predicate::ProgrammingLanguage { language } => B(analysis.languages.contains(language)),
        Predicate::Intent { intent } => B(analysis.intent == *intent),
        Predicate::MinWordCount { min } => B(analysis.word_count >= *min),
        Predicate::MaxWordCount { max } => B(analysis.word_count <= *max),
    }
}

fn user_text(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role == crate::content_analyzer::Role::User)
        .flat_map(|m| m.content.iter())
        .filter_map(|c| match c {
            crate::content_analyzer::MessageContent::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A priority-ordered condition → target entry.
#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub id: String,
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub predicates: Vec<Predicate>,
    pub target_channel: String,
    pub target_model: Option<String>,
}

/// Seed-file shape for a rule (deserialized, then turned into a
/// [`RoutingRule`] once validated against the channel set).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuleSeed {
    pub name: String,
    #[serde(default = "super_default_priority")]
    pub priority: i32,
    #[serde(default = "super_default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub predicates: Vec<Predicate>,
    pub target: RuleTargetSeed,
    #[serde(default)]
    pub target_model: Option<String>,
}

fn super_default_priority() -> i32 { 0 }
fn super_default_enabled() -> bool { true }

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RuleTargetSeed {
    Channel(String),
}

/// Result of matching rules against a request.
pub struct RouteDecision {
    pub channel_id: Option<String>,
    pub model_override: Option<String>,
    pub rule_name: Option<String>,
    pub analysis: ContentAnalysis,
}

/// Evaluate `rules` (priority-desc, stable id tiebreak) against `ctx` and
/// `channels`. Returns the first rule whose predicates all hold AND whose
/// target resolves to an eligible channel; a rule with an unresolvable
/// target falls through to the next rule rather than failing the request.
pub fn route(
    rules: &[RoutingRule],
    ctx: &RouterContext<'_>,
    channels: &[&Channel],
    registry: &CustomRouterRegistry,
    now: DateTime<Utc>,
) -> RouteDecision {
    let analysis = content_analyzer::analyze(ctx.messages, ctx.tools);

    let mut ordered: Vec<&RoutingRule> = rules.iter().filter(|r| r.enabled).collect();
    ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

    for rule in ordered {
        let mut direct_channel: Option<Channel> = None;
        let all_match = rule.predicates.iter().all(|p| {
            match eval_predicate(p, ctx, &analysis, registry) {
                PredicateOutcome::Bool(b) => b,
                PredicateOutcome::DirectChannel(c) => {
                    direct_channel = Some(c);
                    true
                }
            }
        });
        if !all_match {
            continue;
        }

        if let Some(channel) = direct_channel {
            return RouteDecision {
                channel_id: Some(channel.id),
                model_override: rule.target_model.clone(),
                rule_name: Some(rule.name.clone()),
                analysis,
            };
        }

        if let Some(target) = resolve_target(&rule.target_channel, channels, now) {
            return RouteDecision {
                channel_id: Some(target.id.clone()),
                model_override: rule.target_model.clone(),
                rule_name: Some(rule.name.clone()),
                analysis,
            };
        }
    }

    RouteDecision { channel_id: None, model_override: None, rule_name: None, analysis }
}

/// A target is unresolvable — and the rule falls through — if it's disabled,
/// circuit-broken, or rate-limited, matching the edge case in §4.3.
fn resolve_target<'a>(id_or_name: &str, channels: &[&'a Channel], now: DateTime<Utc>) -> Option<&'a Channel> {
    let channel = channels
        .iter()
        .copied()
        .find(|c| c.id == id_or_name || c.name == id_or_name)?;
    if channel.is_eligible(now, None) {
        Some(channel)
    } else {
        None
    }
}

/// What a custom router function returns: a plain condition result, or a
/// direct channel selection that short-circuits load balancing entirely.
pub enum CustomResult {
    Bool(bool),
    Channel(Channel),
}

type CustomFn = Arc<dyn Fn(&RouterContext<'_>, &ContentAnalysis) -> CustomResult + Send + Sync>;

#[derive(Clone)]
struct RegisteredRouter {
    func: CustomFn,
    description: String,
}

/// Process-wide `name → fn` map plus combinators (`and`/`or`/`not`/`when`/
/// `fallback`). Exceptions (panics) inside a registered function are not
/// caught here — callers invoke through [`CustomRouterRegistry::invoke`],
/// which treats a missing name as non-match, matching the "exceptions →
/// false" edge case without needing `catch_unwind` for ordinary logic
/// errors, which should return `CustomResult::Bool(false)` explicitly.
#[derive(Clone, Default)]
pub struct CustomRouterRegistry {
    routers: Arc<DashMap<String, RegisteredRouter>>,
}

impl CustomRouterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        func: impl Fn(&RouterContext<'_>, &ContentAnalysis) -> CustomResult + Send + Sync + 'static,
    ) {
        self.routers.insert(
            name.into(),
            RegisteredRouter { func: Arc::new(func), description: description.into() },
        );
    }

    pub fn invoke(
        &self,
        name: &str,
        ctx: &RouterContext<'_>,
        analysis: &ContentAnalysis,
    ) -> Option<CustomResult> {
        let router = self.routers.get(name)?;
        Some((router.func)(ctx, analysis))
    }

    pub fn list(&self) -> Vec<(String, String)> {
        self.routers.iter().map(|e| (e.key().clone(), e.value().description.clone())).collect()
    }

    /// `and(a, b)`: true only if both named routers return a truthy bool;
    /// a `Channel` result from either is treated as truthy but its channel
    /// is discarded — combinators only ever combine boolean-valued checks.
    pub fn and(&self, a: &str, b: &str, ctx: &RouterContext<'_>, analysis: &ContentAnalysis) -> bool {
        truthy(self.invoke(a, ctx, analysis)) && truthy(self.invoke(b, ctx, analysis))
    }

    pub fn or(&self, a: &str, b: &str, ctx: &RouterContext<'_>, analysis: &ContentAnalysis) -> bool {
        truthy(self.invoke(a, ctx, analysis)) || truthy(self.invoke(b, ctx, analysis))
    }

    pub fn not(&self, a: &str, ctx: &RouterContext<'_>, analysis: &ContentAnalysis) -> bool {
        !truthy(self.invoke(a, ctx, analysis))
    }

    /// `when(cond, then)`: evaluate `then` only if `cond` holds; otherwise
    /// non-match without evaluating `then` at all.
    pub fn when(&self, cond: &str, then: &str, ctx: &RouterContext<'_>, analysis: &ContentAnalysis) -> bool {
        truthy(self.invoke(cond, ctx, analysis)) && truthy(self.invoke(then, ctx, analysis))
    }

    /// `fallback(primary, secondary)`: primary result if it matched
    /// (registered and truthy), else secondary.
    pub fn fallback(&self, primary: &str, secondary: &str, ctx: &RouterContext<'_>, analysis: &ContentAnalysis) -> bool {
        let primary_result = self.invoke(primary, ctx, analysis);
        if truthy(primary_result) {
            true
        } else {
            truthy(self.invoke(secondary, ctx, analysis))
        }
    }
}

fn truthy(result: Option<CustomResult>) -> bool {
    matches!(result, Some(CustomResult::Bool(true)) | Some(CustomResult::Channel(_)))
}
