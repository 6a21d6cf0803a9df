//! JSON payload extraction from free-form oracle text
//!
//! Two stages, best-effort:
//! 1. A fenced block (```` ``` ```` or ```` ```json ````) containing a JSON object
//! 2. A balanced-brace scan over the raw text
//!
//! The first candidate that parses as a JSON object wins.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

static FENCED_OBJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("fenced-block pattern is valid")
});

/// Extraction failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("Empty response text")]
    Empty,

    #[error("No JSON object found in response")]
    NoObject,

    #[error("JSON object could not be parsed: {0}")]
    Malformed(String),
}

/// Recover the first JSON object embedded in `text`
pub fn extract_json_object(text: &str) -> Result<Value, ExtractError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ExtractError::Empty);
    }

    let mut last_parse_error = None;

    // Stage 1: fenced blocks
    for captures in FENCED_OBJECT.captures_iter(text) {
        if let Some(body) = captures.get(1) {
            match parse_object(body.as_str()) {
                Ok(value) => return Ok(value),
                Err(e) => last_parse_error = Some(e),
            }
        }
    }

    // Stage 2: balanced braces anywhere in the text
    for candidate in brace_candidates(text) {
        match parse_object(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_parse_error = Some(e),
        }
    }

    Err(match last_parse_error {
        Some(msg) => ExtractError::Malformed(msg),
        None => ExtractError::NoObject,
    })
}

fn parse_object(candidate: &str) -> Result<Value, String> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err("not an object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Every `{ ... }` span whose braces balance, ordered by opening brace
/// (outermost first).
///
/// Single pass over the text with a stack of open positions. Braces inside
/// JSON string literals are ignored; quotes only count once a brace is open.
fn brace_candidates(text: &str) -> Vec<&str> {
    let mut open: Vec<usize> = Vec::new();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' if !open.is_empty() => in_string = true,
            b'{' => open.push(i),
            b'}' => {
                if let Some(start) = open.pop() {
                    spans.push((start, i));
                }
            }
            _ => {}
        }
    }

    spans.sort_unstable_by_key(|&(start, _)| start);
    spans.into_iter().map(|(start, end)| &text[start..=end]).collect()
}
