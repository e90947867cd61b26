//! String helpers for log output.
//!
//! Chat content and upstream error bodies are logged only in shortened,
//! redacted form.

use regex::Regex;
use std::sync::OnceLock;

/// Characters of a message or reply shown in request logs.
pub const PREVIEW_CHARS: usize = 30;

/// Cut `s` to `max_chars` characters, marking the cut with "...".
///
/// Counts Unicode scalar values, so multi-byte text is never split
/// mid-character.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", s[..end].trim_end()),
        None => s.to_string(),
    }
}

/// Short preview of user or model text.
pub fn preview(s: &str) -> String {
    truncate_with_ellipsis(s, PREVIEW_CHARS)
}

fn redactions() -> &'static [(Regex, &'static str)] {
    static REDACTIONS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    REDACTIONS.get_or_init(|| {
        [
            (r"(?i)(api[_-]?key|apikey)\s*[=:]\s*\S{8,}", "$1=[REDACTED]"),
            (r"(?i)\b(bearer|token|secret)\s*[=:]?\s*\S{10,}", "$1 [REDACTED]"),
            (r"\bsk-[A-Za-z0-9_-]{16,}", "[REDACTED_KEY]"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|re| (re, replacement))
        })
        .collect()
    })
}

/// Redact credentials that upstream error bodies sometimes echo back.
pub fn sanitize_for_log(s: &str) -> String {
    redactions()
        .iter()
        .fold(s.to_string(), |text, (re, replacement)| {
            re.replace_all(&text, *replacement).into_owned()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
        assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
        assert_eq!(truncate_with_ellipsis("😀😀😀😀", 2), "😀😀...");
        assert_eq!(truncate_with_ellipsis("", 10), "");
    }

    #[test]
    fn test_preview_limits_to_thirty_chars() {
        assert_eq!(preview("I feel anxious"), "I feel anxious");
        let long = "a".repeat(45);
        assert_eq!(preview(&long), format!("{}...", "a".repeat(30)));
    }

    #[test]
    fn test_redacts_echoed_api_key() {
        let output = sanitize_for_log(r#"{"error":"invalid api_key: sk-0123456789abcdef0123"}"#);
        assert!(!output.contains("sk-0123456789abcdef0123"));
        assert!(output.contains("REDACTED"));
    }

    #[test]
    fn test_redacts_bearer_token() {
        let output = sanitize_for_log("Authorization: Bearer abcdefghijklmnop rejected");
        assert!(!output.contains("abcdefghijklmnop"));
        assert!(output.ends_with("rejected"));
    }

    #[test]
    fn test_plain_text_untouched() {
        let body = r#"{"error":{"message":"Model overloaded","type":"server_error"}}"#;
        assert_eq!(sanitize_for_log(body), body);
    }
}
