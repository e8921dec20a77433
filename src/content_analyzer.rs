//! Derives [`ContentAnalysis`] from a request's messages — word/char counts,
//! feature flags, detected languages, topic, category, complexity, intent,
//! and top keywords. Pure: same input always yields the same output, so
//! callers may memoize by request id.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Minimal chat-message shape the analyzer and token estimator both need.
/// The HTTP layer and provider adapters translate their wire formats into
/// this before handing requests to the core pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<MessageContent>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text(String),
    Image { detail: Option<String> },
}

impl Message {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                MessageContent::Text(t) => Some(t.as_str()),
                MessageContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Coding,
    Technical,
    Writing,
    Analysis,
    Research,
    Creative,
    Conversation,
    General,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Question,
    Task,
    Generation,
    Analysis,
    Conversation,
    Review,
    Debug,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentAnalysis {
    pub word_count: usize,
    pub character_count: usize,
    pub estimated_tokens: u32,
    pub has_code: bool,
    pub has_urls: bool,
    pub has_images: bool,
    pub has_tools: bool,
    pub languages: Vec<String>,
    pub topic: Option<String>,
    pub category: Category,
    pub complexity: Complexity,
    pub intent: Intent,
    pub keywords: Vec<String>,
}

fn code_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```").unwrap())
}

fn inline_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"`[^`\n]+`").unwrap())
}

fn code_signature_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            function\s+\w+\s*\(
            | class\s+\w+
            | import\s+.+\s+from
            | const\s+\w+\s*=
            | def\s+\w+\s*\(
            | public\s+class
            | </?[a-zA-Z][\w-]*[^>]*>
            ",
        )
        .unwrap()
    })
}

fn url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://\S+").unwrap())
}

/// One entry per detectable language: name plus a set of recognizer
/// patterns. Any match adds the language.
fn language_patterns() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        ("rust", &[r"\bfn\s+\w+\s*\(", r"\blet\s+mut\b", r"::<", r"\bimpl\b"]),
        ("python", &[r"\bdef\s+\w+\s*\(", r"\bimport\s+\w+", r"^\s*#!.*python", r":\s*$"]),
        ("javascript", &[r"\bconst\s+\w+\s*=", r"\b=>\s*\{", r"\brequire\(", r"\bfunction\s*\("]),
        ("typescript", &[r":\s*(string|number|boolean)\b", r"\binterface\s+\w+", r"\bas\s+\w+\b"]),
        ("go", &[r"\bfunc\s+\w+\s*\(", r"\bpackage\s+main\b", r":=\s"]),
        ("java", &[r"\bpublic\s+class\b", r"\bSystem\.out\.println\b", r"\bprivate\s+\w+\s+\w+\("]),
        ("sql", &[r"(?i)\bSELECT\b.+\bFROM\b", r"(?i)\bINSERT\s+INTO\b", r"(?i)\bCREATE\s+TABLE\b"]),
        ("html", &[r"<html", r"<div", r"</\w+>"]),
        ("css", &[r"\{\s*[\w-]+\s*:\s*[\w#.%-]+;", r"@media\b"]),
        ("shell", &[r"^\s*\$\s+\w+", r"\bfi\b", r"\bdone\b"]),
    ]
}

/// `(topic, keyword weight list)` — argmax over summed weights.
fn topic_bank() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        ("API", &["api", "endpoint", "rest", "graphql", "request", "response", "webhook"]),
        ("Database", &["database", "sql", "query", "schema", "table", "index", "migration"]),
        ("Frontend", &["react", "vue", "component", "css", "html", "ui", "browser", "dom"]),
        ("Backend", &["server", "backend", "service", "microservice", "middleware", "handler"]),
        ("DevOps", &["docker", "kubernetes", "deploy", "ci/cd", "pipeline", "infrastructure"]),
        ("ML", &["model", "training", "neural", "dataset", "inference", "embedding", "llm"]),
        ("Testing", &["test", "unit test", "assertion", "mock", "coverage", "regression"]),
        ("Security", &["security", "vulnerability", "auth", "encryption", "exploit", "cve"]),
        ("Performance", &["performance", "latency", "throughput", "bottleneck", "optimize", "cache"]),
        ("Documentation", &["documentation", "readme", "guide", "tutorial", "changelog"]),
    ]
}

fn technical_terms() -> &'static [&'static str] {
    &["architecture", "system design", "scalability", "distributed", "microservice", "infrastructure", "protocol"]
}

fn writing_terms() -> &'static [&'static str] {
    &["essay", "article", "blog post", "paragraph", "story", "narrative", "draft"]
}

fn analysis_terms() -> &'static [&'static str] {
    &["analyze", "analysis", "compare", "evaluate", "assessment", "breakdown", "summarize"]
}

fn research_terms() -> &'static [&'static str] {
    &["research", "study", "literature", "citation", "survey", "investigate"]
}

fn creative_terms() -> &'static [&'static str] {
    &["poem", "story", "creative", "imagine", "fiction", "fantasy"]
}

fn five_w1h_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(who|what|when|where|why|how)\b").unwrap())
}

fn task_verbs() -> &'static [&'static str] {
    &["write", "create", "build", "implement", "add", "make", "generate", "design"]
}

fn generation_terms() -> &'static [&'static str] {
    &["generate", "produce", "draft", "compose"]
}

fn review_terms() -> &'static [&'static str] {
    &["review", "critique", "feedback", "check this"]
}

fn debug_terms() -> &'static [&'static str] {
    &["bug", "error", "fix", "debug", "not working", "exception", "crash", "fails"]
}

fn stopwords() -> &'static std::collections::HashSet<&'static str> {
    static SET: OnceLock<std::collections::HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "be", "been",
            "to", "of", "in", "on", "for", "with", "as", "by", "at", "this", "that", "it",
            "i", "you", "he", "she", "we", "they", "my", "your", "his", "her", "our", "their",
            "can", "could", "will", "would", "should", "do", "does", "did", "have", "has", "had",
            "not", "no", "yes", "if", "then", "else", "so", "from", "into", "about", "what",
        ]
        .into_iter()
        .collect()
    })
}

fn has_tool_content(tools: Option<&[serde_json::Value]>) -> bool {
    tools.is_some_and(|t| !t.is_empty())
}

/// Analyze a full message list, plus whether tools are attached to the
/// request (a separate wire field, not a message content block).
pub fn analyze(messages: &[Message], tools: Option<&[serde_json::Value]>) -> ContentAnalysis {
    let combined_text: String = messages.iter().map(|m| m.text()).collect::<Vec<_>>().join(" ");
    let user_text: String = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.text())
        .collect::<Vec<_>>()
        .join(" ");

    let word_count = combined_text.split_whitespace().count();
    let character_count = combined_text.chars().count();
    let message_count = messages.len();

    let has_images = messages
        .iter()
        .any(|m| m.content.iter().any(|c| matches!(c, MessageContent::Image { .. })));
    let has_urls = url_re().is_match(&combined_text);
    let has_code = code_fence_re().is_match(&combined_text)
        || inline_code_re().is_match(&combined_text)
        || code_signature_re().is_match(&combined_text);
    let has_tools = has_tool_content(tools);

    let languages = detect_languages(&combined_text);
    let topic = detect_topic(&combined_text);
    let category = categorize(has_code, &languages, &combined_text, word_count, message_count, has_tools);
    let complexity = classify_complexity(word_count, message_count, has_code);
    let intent = classify_intent(&user_text, word_count);
    let keywords = top_keywords(&combined_text, 10);

    let family = crate::token_estimator::ModelFamily::Claude;
    let estimated_tokens = crate::token_estimator::estimate(messages, family);

    ContentAnalysis {
        word_count,
        character_count,
        estimated_tokens,
        has_code,
        has_urls,
        has_images,
        has_tools,
        languages,
        topic,
        category,
        complexity,
        intent,
        keywords,
    }
}

fn detect_languages(text: &str) -> Vec<String> {
    language_patterns()
        .iter()
        .filter(|(_, patterns)| {
            patterns.iter().any(|p| Regex::new(p).map(|re| re.is_match(text)).unwrap_or(false))
        })
        .map(|(name, _)| name.to_string())
        .collect()
}

fn keyword_score(text: &str, keywords: &[&str]) -> u32 {
    let lower = text.to_lowercase();
    keywords.iter().map(|kw| lower.matches(kw).count() as u32).sum()
}

fn detect_topic(text: &str) -> Option<String> {
    topic_bank()
        .iter()
        .map(|(name, keywords)| (*name, keyword_score(text, keywords)))
        .max_by_key(|(_, score)| *score)
        .filter(|(_, score)| *score > 0)
        .map(|(name, _)| name.to_string())
}

fn categorize(
    has_code: bool,
    languages: &[String],
    text: &str,
    word_count: usize,
    message_count: usize,
    has_tools: bool,
) -> Category {
    if has_code || !languages.is_empty() {
        return Category::Coding;
    }
    if has_tools || keyword_score(text, technical_terms()) > 0 {
        return Category::Technical;
    }
    if keyword_score(text, writing_terms()) > 0 {
        return Category::Writing;
    }
    if keyword_score(text, analysis_terms()) > 0 {
        return Category::Analysis;
    }
    if keyword_score(text, research_terms()) > 0 {
        return Category::Research;
    }
    if keyword_score(text, creative_terms()) > 0 {
        return Category::Creative;
    }
    if word_count < 50 && message_count > 2 {
        return Category::Conversation;
    }
    Category::General
}

fn classify_complexity(word_count: usize, message_count: usize, has_code: bool) -> Complexity {
    if word_count > 2000 || (has_code && word_count > 500) {
        Complexity::VeryComplex
    } else if word_count > 500 || message_count > 10 {
        Complexity::Complex
    } else if word_count > 100 || message_count > 3 {
        Complexity::Moderate
    } else {
        Complexity::Simple
    }
}

fn classify_intent(user_text: &str, word_count: usize) -> Intent {
    let trimmed = user_text.trim_end();
    if trimmed.ends_with('?') || five_w1h_re().is_match(user_text) {
        return Intent::Question;
    }
    let lower = user_text.to_lowercase();
    if task_verbs().iter().any(|v| lower.contains(v)) {
        return Intent::Task;
    }
    if keyword_score(user_text, generation_terms()) > 0 {
        return Intent::Generation;
    }
    if keyword_score(user_text, analysis_terms()) > 0 {
        return Intent::Analysis;
    }
    if keyword_score(user_text, review_terms()) > 0 {
        return Intent::Review;
    }
    if keyword_score(user_text, debug_terms()) > 0 {
        return Intent::Debug;
    }
    if word_count < 20 {
        return Intent::Conversation;
    }
    Intent::Task
}

fn tokenize_words(text: &str) -> Vec<String> {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    let re = WORD_RE.get_or_init(|| Regex::new(r"[A-Za-z0-9']+").unwrap());
    re.find_iter(&text.to_lowercase()).map(|m| m.as_str().to_string()).collect()
}

fn top_keywords(text: &str, k: usize) -> Vec<String> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for word in tokenize_words(text) {
        if word.len() < 3 || stopwords().contains(word.as_str()) {
            continue;
        }
        *counts.entry(word).or_insert(0) += 1;
    }
    let mut ranked: Vec<(String, u32)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(k).map(|(w, _)| w).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, text: &str) -> Message {
        Message { role, content: vec![MessageContent::Text(text.to_string())] }
    }

    #[test]
    fn has_code_detects_fenced_block() {
        let analysis = analyze(&[msg(Role::User, "here:\n```\nlet x = 1;\n```")], None);
        assert!(analysis.has_code);
    }

    #[test]
    fn has_code_detects_function_signature() {
        let analysis = analyze(&[msg(Role::User, "function doThing(a, b) { return a + b; }")], None);
        assert!(analysis.has_code);
    }

    #[test]
    fn has_urls_detects_http_link() {
        let analysis = analyze(&[msg(Role::User, "see https://example.com/docs for details")], None);
        assert!(analysis.has_urls);
    }

    #[test]
    fn detects_rust_language() {
        let analysis = analyze(&[msg(Role::User, "fn main() { let mut x = 0; }")], None);
        assert!(analysis.languages.contains(&"rust".to_string()));
    }

    #[test]
    fn topic_returns_none_when_no_keywords_match() {
        let analysis = analyze(&[msg(Role::User, "hello there how are you")], None);
        assert_eq!(analysis.topic, None);
    }

    #[test]
    fn topic_picks_highest_scoring_bank() {
        let analysis = analyze(
            &[msg(Role::User, "our database schema needs a new index and a migration for this table")],
            None,
        );
        assert_eq!(analysis.topic, Some("Database".to_string()));
    }

    #[test]
    fn category_coding_wins_over_other_signals_when_code_present() {
        let analysis = analyze(&[msg(Role::User, "```\nfn main() {}\n```")], None);
        assert_eq!(analysis.category, Category::Coding);
    }

    #[test]
    fn category_falls_back_to_conversation_for_short_multiturn_chat() {
        let analysis = analyze(
            &[msg(Role::User, "hi"), msg(Role::Assistant, "hello"), msg(Role::User, "how are you")],
            None,
        );
        assert_eq!(analysis.category, Category::Conversation);
    }

    #[test]
    fn complexity_very_complex_above_2000_words() {
        let long_text = "word ".repeat(2001);
        let analysis = analyze(&[msg(Role::User, &long_text)], None);
        assert_eq!(analysis.complexity, Complexity::VeryComplex);
    }

    #[test]
    fn complexity_simple_for_short_message() {
        let analysis = analyze(&[msg(Role::User, "hi there")], None);
        assert_eq!(analysis.complexity, Complexity::Simple);
    }

    #[test]
    fn intent_question_when_ending_in_question_mark() {
        let analysis = analyze(&[msg(Role::User, "what is the capital of France?")], None);
        assert_eq!(analysis.intent, Intent::Question);
    }

    #[test]
    fn intent_debug_for_bug_report_language() {
        let analysis = analyze(&[msg(Role::User, "this is not working, I'm getting an exception when I run it")], None);
        assert_eq!(analysis.intent, Intent::Debug);
    }

    #[test]
    fn keywords_exclude_stopwords_and_rank_by_frequency() {
        let analysis = analyze(
            &[msg(Role::User, "database database database schema schema index")],
            None,
        );
        assert_eq!(analysis.keywords[0], "database");
        assert_eq!(analysis.keywords[1], "schema");
    }

    #[test]
    fn has_tools_reflects_attached_tool_list() {
        let tools = vec![serde_json::json!({"name": "search"})];
        let analysis = analyze(&[msg(Role::User, "hi")], Some(&tools));
        assert!(analysis.has_tools);
        let analysis_none = analyze(&[msg(Role::User, "hi")], None);
        assert!(!analysis_none.has_tools);
    }

    #[test]
    fn tool_bearing_request_categorizes_as_technical() {
        let tools = vec![serde_json::json!({"name": "search"})];
        let analysis = analyze(&[msg(Role::User, "hi there")], Some(&tools));
        assert_eq!(analysis.category, Category::Technical);
    }
}
