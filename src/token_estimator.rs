//! Deterministic, side-effect-free token-count estimator used as a routing
//! signal — never to truncate or bill. No BPE tokenizer is involved; a
//! character-based heuristic is the whole contract (see
//! `tiktoken-rs` removal note in `SPEC_FULL.md`).

use serde::{Deserialize, Serialize};

use crate::content_analyzer::{Message, MessageContent};

/// Tokenizer family an estimate is calibrated against.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    #[default]
    Claude,
    OpenAI,
}

impl ModelFamily {
    /// Best-effort guess from a model name; falls back to `Claude`.
    pub fn from_model_name(model: &str) -> Self {
        let lower = model.to_lowercase();
        if lower.contains("gpt") || lower.contains("o1") || lower.contains("o3") {
            Self::OpenAI
        } else {
            Self::Claude
        }
    }

    fn chars_per_token(self) -> f64 {
        match self {
            Self::Claude => 3.5,
            Self::OpenAI => 4.0,
        }
    }

    fn image_tokens(self) -> u32 {
        match self {
            Self::Claude => 1500,
            Self::OpenAI => 1000,
        }
    }
}

const PER_MESSAGE_OVERHEAD: u32 = 4;

/// Estimate the token count for a full message list under `family`.
pub fn estimate(messages: &[Message], family: ModelFamily) -> u32 {
    messages.iter().map(|m| estimate_message(m, family)).sum()
}

fn estimate_message(message: &Message, family: ModelFamily) -> u32 {
    let mut total = PER_MESSAGE_OVERHEAD;
    for block in &message.content {
        total += match block {
            MessageContent::Text(text) => estimate_text(text, family),
            MessageContent::Image { .. } => family.image_tokens(),
        };
    }
    total
}

fn estimate_text(text: &str, family: ModelFamily) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let base = (text.chars().count() as f64 / family.chars_per_token()).ceil() as u32;
    let correction = whitespace_punct_correction(text);
    match family {
        ModelFamily::Claude => base + correction,
        ModelFamily::OpenAI => base + correction + digit_run_correction(text),
    }
}

/// Punctuation marks and runs of multiple whitespace characters tend to
/// tokenize as their own token even though the flat chars-per-token average
/// doesn't budget for them separately from surrounding word text; applies
/// to both families.
fn whitespace_punct_correction(text: &str) -> u32 {
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count() as u32;

    let mut whitespace_runs = 0u32;
    let mut run_len = 0u32;
    for c in text.chars() {
        if c.is_whitespace() {
            run_len += 1;
        } else {
            if run_len > 1 {
                whitespace_runs += 1;
            }
            run_len = 0;
        }
    }
    if run_len > 1 {
        whitespace_runs += 1;
    }

    (punct_count + whitespace_runs) / 4
}

/// Digit runs compress roughly 2 chars/token under OpenAI's tokenizer
/// (vs. the flat 4 chars/token already counted), so long numeric runs need a
/// small upward correction.
fn digit_run_correction(text: &str) -> u32 {
    let mut correction = 0u32;
    let mut run_len = 0u32;
    for c in text.chars() {
        if c.is_ascii_digit() {
            run_len += 1;
        } else {
            correction += digit_run_bonus(run_len);
            run_len = 0;
        }
    }
    correction += digit_run_bonus(run_len);
    correction
}

fn digit_run_bonus(run_len: u32) -> u32 {
    if run_len < 4 {
        return 0;
    }
    // Already counted at ~4 chars/token; re-tokenized at ~2 chars/token costs
    // this many more tokens for the run.
    let already_counted = (run_len as f64 / 4.0).ceil() as u32;
    let actual = (run_len as f64 / 2.0).ceil() as u32;
    actual.saturating_sub(already_counted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_analyzer::{Message, MessageContent, Role};

    fn text_msg(role: Role, text: &str) -> Message {
        Message {
            role,
            content: vec![MessageContent::Text(text.to_string())],
        }
    }

    #[test]
    fn empty_messages_estimate_to_zero() {
        assert_eq!(estimate(&[], ModelFamily::Claude), 0);
    }

    #[test]
    fn per_message_overhead_is_applied() {
        let msgs = vec![text_msg(Role::User, "")];
        assert_eq!(estimate(&msgs, ModelFamily::Claude), PER_MESSAGE_OVERHEAD);
    }

    #[test]
    fn claude_uses_3_5_chars_per_token() {
        let msgs = vec![text_msg(Role::User, "a".repeat(7).as_str())];
        // ceil(7/3.5) = 2, plus overhead
        assert_eq!(estimate(&msgs, ModelFamily::Claude), PER_MESSAGE_OVERHEAD + 2);
    }

    #[test]
    fn openai_uses_4_chars_per_token() {
        let msgs = vec![text_msg(Role::User, "a".repeat(8).as_str())];
        assert_eq!(estimate(&msgs, ModelFamily::OpenAI), PER_MESSAGE_OVERHEAD + 2);
    }

    #[test]
    fn image_block_is_flat_cost() {
        let msgs = vec![Message {
            role: Role::User,
            content: vec![MessageContent::Image { detail: None }],
        }];
        assert_eq!(estimate(&msgs, ModelFamily::Claude), PER_MESSAGE_OVERHEAD + 1500);
        assert_eq!(estimate(&msgs, ModelFamily::OpenAI), PER_MESSAGE_OVERHEAD + 1000);
    }

    #[test]
    fn estimate_is_monotonic_in_concatenation() {
        let a = vec![text_msg(Role::User, "hello world this is a test")];
        let b = vec![text_msg(Role::User, "another unrelated message here")];
        let mut combined = a.clone();
        combined.extend(b.clone());

        let est_a = estimate(&a, ModelFamily::Claude);
        let est_b = estimate(&b, ModelFamily::Claude);
        let est_combined = estimate(&combined, ModelFamily::Claude);

        assert!(est_combined >= est_a.max(est_b));
    }

    #[test]
    fn long_digit_runs_get_a_small_upward_correction_under_openai() {
        let msgs = vec![text_msg(Role::User, "1234567890123456")];
        let plain = (16.0_f64 / 4.0).ceil() as u32;
        let estimated = estimate(&msgs, ModelFamily::OpenAI) - PER_MESSAGE_OVERHEAD;
        assert!(estimated >= plain);
    }

    #[test]
    fn heavy_punctuation_adds_a_correction_on_top_of_the_flat_rate() {
        let plain = "word ".repeat(20);
        let punctuated = "word!?;:.,".repeat(10);
        assert_eq!(plain.chars().count(), punctuated.chars().count());

        for family in [ModelFamily::Claude, ModelFamily::OpenAI] {
            let plain_est = estimate(&[text_msg(Role::User, &plain)], family);
            let punct_est = estimate(&[text_msg(Role::User, &punctuated)], family);
            assert!(punct_est > plain_est, "{family:?}: {punct_est} should exceed {plain_est}");
        }
    }

    #[test]
    fn runs_of_whitespace_contribute_to_the_correction() {
        let tight = "a b c d e";
        let spaced = "a    b    c    d    e";
        let tight_est = estimate(&[text_msg(Role::User, tight)], ModelFamily::Claude);
        let spaced_est = estimate(&[text_msg(Role::User, spaced)], ModelFamily::Claude);
        assert!(spaced_est >= tight_est);
    }

    #[test]
    fn from_model_name_detects_openai_family() {
        assert_eq!(ModelFamily::from_model_name("gpt-4o"), ModelFamily::OpenAI);
        assert_eq!(ModelFamily::from_model_name("claude-3-5-sonnet"), ModelFamily::Claude);
        assert_eq!(ModelFamily::from_model_name("unknown-model"), ModelFamily::Claude);
    }
}
