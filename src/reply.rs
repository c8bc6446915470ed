//! Tolerant parsing of LLM replies that are expected to contain a list or
//! object literal, mirroring the reasoning-model quirks seen in practice:
//! a leading `<think>...</think>` span, a fenced code block, or stray prose
//! around the actual literal.

use regex::Regex;
use serde_json::Value;

use crate::error::CoercionError;

/// Strips a leading `<think>...</think>` block, if both tags are present.
fn strip_think_tag(s: &str) -> String {
    if let Some(think_end) = s.find("</think>") {
        if s.contains("<think>") {
            return s[think_end + "</think>".len()..].trim().to_string();
        }
    }
    s.to_string()
}

/// Strips a recognized fenced code block wrapper (```python, ```json, ```str,
/// or a bare ```), returning `None` if the content is fenced but the prefix
/// isn't one we recognize (the original raises in that case and falls
/// through to the regex scan over the *un-stripped* content).
fn strip_fence(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if !(trimmed.starts_with("```") && trimmed.ends_with("```")) {
        return Some(trimmed.to_string());
    }
    let body = &trimmed[..trimmed.len() - 3];
    for prefix in ["```python", "```json", "```str"] {
        if let Some(rest) = body.strip_prefix(prefix) {
            return Some(rest.trim().to_string());
        }
    }
    if let Some(rest) = body.strip_prefix("```\n") {
        return Some(rest.trim().to_string());
    }
    None
}

/// Normalizes Python-literal syntax (`True`/`False`/`None`, single-quoted
/// strings) into valid JSON text so `serde_json` can parse it.
fn normalize_python_literal(s: &str) -> String {
    let keyword_normalized = Regex::new(r"\bTrue\b")
        .unwrap()
        .replace_all(s, "true")
        .to_string();
    let keyword_normalized = Regex::new(r"\bFalse\b")
        .unwrap()
        .replace_all(&keyword_normalized, "false")
        .to_string();
    let keyword_normalized = Regex::new(r"\bNone\b")
        .unwrap()
        .replace_all(&keyword_normalized, "null")
        .to_string();

    if !keyword_normalized.contains('\'') {
        return keyword_normalized;
    }

    // Swap single-quoted strings for double-quoted ones. This is a best-effort
    // normalization, not a full Python tokenizer: it assumes the literal
    // doesn't mix escaped single quotes inside single-quoted strings.
    let mut out = String::with_capacity(keyword_normalized.len());
    let mut in_single = false;
    for c in keyword_normalized.chars() {
        match c {
            '\'' if !in_single => {
                in_single = true;
                out.push('"');
            }
            '\'' if in_single => {
                in_single = false;
                out.push('"');
            }
            '"' if in_single => {
                out.push('\\');
                out.push('"');
            }
            other => out.push(other),
        }
    }
    out
}

fn parse_literal(s: &str) -> Result<Value, CoercionError> {
    let trimmed = s.trim();
    serde_json::from_str(trimmed)
        .or_else(|_| serde_json::from_str(&normalize_python_literal(trimmed)))
        .map_err(|e| CoercionError::InvalidSyntax(e.to_string()))
}

fn regex_fallback(s: &str) -> Result<Value, CoercionError> {
    let re = Regex::new(r"(?s)(\[.*?\]|\{.*?\})").unwrap();
    let matches: Vec<_> = re.find_iter(s).collect();
    match matches.len() {
        0 => Err(CoercionError::NotFound),
        1 => parse_literal(matches[0].as_str()),
        n => Err(CoercionError::Ambiguous(n)),
    }
}

/// Coerces an LLM reply into a [`serde_json::Value`], tolerating reasoning
/// spans and fenced code blocks. Falls back to scanning for exactly one
/// bracketed/braced span if a strict parse fails.
pub fn coerce_literal(raw: &str) -> Result<Value, CoercionError> {
    let content = strip_think_tag(raw.trim());

    if let Some(unfenced) = strip_fence(&content) {
        if let Ok(v) = parse_literal(&unfenced) {
            return Ok(v);
        }
    }

    regex_fallback(&content)
}

/// Coerces an LLM reply into a list of strings (sub-queries, gap queries, routed
/// collection names).
pub fn coerce_string_list(raw: &str) -> Result<Vec<String>, CoercionError> {
    let value = coerce_literal(raw)?;
    value
        .as_array()
        .ok_or_else(|| CoercionError::InvalidSyntax("expected a list".to_string()))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| CoercionError::InvalidSyntax("expected a list of strings".to_string()))
        })
        .collect()
}

/// Coerces an LLM reply into a list of integer indices (supporting-document filtering).
pub fn coerce_index_list(raw: &str) -> Result<Vec<usize>, CoercionError> {
    let value = coerce_literal(raw)?;
    value
        .as_array()
        .ok_or_else(|| CoercionError::InvalidSyntax("expected a list".to_string()))?
        .iter()
        .map(|v| {
            v.as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| CoercionError::InvalidSyntax("expected a list of indices".to_string()))
        })
        .collect()
}

/// `YES`/`NO` judge-reply acceptance: conservative in the face of ambiguity.
/// Accepts only if `YES` is present and `NO` is absent, after stripping a
/// leading `<think>...</think>` span.
pub fn judge_accepts(raw: &str) -> bool {
    let content = strip_think_tag(raw.trim());
    content.contains("YES") && !content.contains("NO")
}

/// Scans a string from the right for the last ASCII digit, used as a
/// fallback when the agent router's reply isn't a bare integer.
pub fn find_last_digit(s: &str) -> Option<u32> {
    s.chars().rev().find(|c| c.is_ascii_digit()).and_then(|c| c.to_digit(10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_list() {
        let out = coerce_string_list(r#"["q1", "q2", "q3"]"#).unwrap();
        assert_eq!(out, vec!["q1", "q2", "q3"]);
    }

    #[test]
    fn strips_think_tag_before_parsing() {
        let out = coerce_string_list("<think>reasoning about it</think>\n[\"q1\"]").unwrap();
        assert_eq!(out, vec!["q1"]);
    }

    #[test]
    fn strips_python_fence() {
        let out = coerce_string_list("```python\n[\"q1\", \"q2\"]\n```").unwrap();
        assert_eq!(out, vec!["q1", "q2"]);
    }

    #[test]
    fn strips_json_fence() {
        let out = coerce_string_list("```json\n[\"q1\"]\n```").unwrap();
        assert_eq!(out, vec!["q1"]);
    }

    #[test]
    fn normalizes_single_quoted_python_list() {
        let out = coerce_string_list("['q1', 'q2']").unwrap();
        assert_eq!(out, vec!["q1", "q2"]);
    }

    #[test]
    fn falls_back_to_regex_scan_with_surrounding_prose() {
        let out = coerce_string_list(
            "Sure, here are the sub-queries you asked for: [\"q1\", \"q2\"] - hope that helps!",
        )
        .unwrap();
        assert_eq!(out, vec!["q1", "q2"]);
    }

    #[test]
    fn rejects_ambiguous_multi_match() {
        let err = coerce_literal("[\"a\"] and also [\"b\"]").unwrap_err();
        assert!(matches!(err, CoercionError::Ambiguous(2)));
    }

    #[test]
    fn rejects_no_match() {
        let err = coerce_literal("no literal here at all").unwrap_err();
        assert!(matches!(err, CoercionError::NotFound));
    }

    #[test]
    fn coerces_index_list() {
        let out = coerce_index_list("[0, 1]").unwrap();
        assert_eq!(out, vec![0, 1]);
    }

    #[test]
    fn judge_accepts_plain_yes() {
        assert!(judge_accepts("YES"));
    }

    #[test]
    fn judge_rejects_plain_no() {
        assert!(!judge_accepts("NO"));
    }

    #[test]
    fn judge_rejects_yes_and_no_together() {
        assert!(!judge_accepts("YES, but also NO"));
    }

    #[test]
    fn judge_strips_think_tag_first() {
        assert!(judge_accepts("<think>weighing the evidence, NO wait</think> YES"));
    }

    #[test]
    fn find_last_digit_scans_from_the_right() {
        assert_eq!(find_last_digit("I recommend agent 2"), Some(2));
        assert_eq!(find_last_digit("no digits here"), None);
    }
}
