//! "Continue"-style follow-ups.
//!
//! A continuation asks the model to pick up its previous answer instead of
//! starting a new one. It only counts as one when there is a prior
//! assistant turn to continue.

/// Whole-message matches.
const EXACT: &[&str] = &[
    "continue", "more", "next", "go on", "go ahead", "keep going", "carry on", "and then",
    "what else", "finish", "finish that", "finish it", "tell me more", "keep writing",
    "continue please", "please continue", "more please",
];

/// Phrases that still mark a continuation inside a short message,
/// e.g. "ok, keep going with that".
const EMBEDDED: &[&str] = &[
    "continue", "keep going", "go on", "carry on", "tell me more", "keep writing",
    "finish that", "finish it", "what else",
];

/// Longer messages are treated as new questions even if they contain a phrase.
const MAX_EMBEDDED_WORDS: usize = 6;

/// How much of the previous answer is quoted back to the model.
const TAIL_CHARS: usize = 400;

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_phrase(haystack: &[String], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split(' ').collect();
    haystack
        .windows(needle.len())
        .any(|w| w.iter().zip(&needle).all(|(a, b)| a == b))
}

/// True if `message` reads as a request to continue.
pub fn is_continuation(message: &str) -> bool {
    let tokens = words(message);
    if tokens.is_empty() {
        return false;
    }
    let normalized = tokens.join(" ");
    if EXACT.contains(&normalized.as_str()) {
        return true;
    }
    tokens.len() <= MAX_EMBEDDED_WORDS && EMBEDDED.iter().any(|p| contains_phrase(&tokens, p))
}

/// The instruction that replaces the user's "continue".
pub fn continuation_prompt(previous_answer: &str) -> String {
    let chars: Vec<char> = previous_answer.trim_end().chars().collect();
    let tail: String = chars[chars.len().saturating_sub(TAIL_CHARS)..].iter().collect();
    format!(
        "Continue your previous answer exactly where it left off. \
         Do not repeat or summarize what you already wrote, and keep the same format.\n\n\
         Your previous answer ended with:\n\"\"\"\n{tail}\n\"\"\""
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_phrases() {
        for m in ["continue", "Continue.", "GO ON!", "tell me more", "more", "  keep going  "] {
            assert!(is_continuation(m), "{m}");
        }
    }

    #[test]
    fn embedded_in_short_messages() {
        assert!(is_continuation("ok please continue with that"));
        assert!(is_continuation("yes, keep going"));
    }

    #[test]
    fn ordinary_questions_are_not_continuations() {
        for m in [
            "",
            "I want more customers",
            "what is the next step for my launch",
            "Can you explain how I should continue building my email list over the next month?",
            "go online",
        ] {
            assert!(!is_continuation(m), "{m}");
        }
    }

    #[test]
    fn prompt_quotes_tail_of_previous_answer() {
        let previous = format!("{}END", "a".repeat(1000));
        let prompt = continuation_prompt(&previous);
        assert!(prompt.starts_with("Continue your previous answer"));
        assert!(prompt.contains("END"));
        assert!(!prompt.contains(&"a".repeat(TAIL_CHARS)));
    }
}
