//! Response Validator
//!
//! Field-level checks that enforce an annotation task's output contract before
//! a payload becomes an [`AnnotationRecord`](crate::models::AnnotationRecord):
//! - categorical fields must belong to their enumerated domain (case-normalized)
//! - confidence must parse as a float in [0, 1]
//! - free-text rationale is shortened at a sentence boundary instead of rejected
//!
//! Every other violation is a [`ValidationError`], which the retry executor
//! treats as a retryable cause.

use crate::models::Confidence;
use serde_json::{Map, Value};
use thiserror::Error;

/// Maximum length (characters) of a stored rationale
pub const MAX_RATIONALE_CHARS: usize = 500;

/// Output-contract violations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Field '{field}' has wrong type: expected {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Invalid {field}: {value}. Must be one of: {allowed}")]
    OutOfDomain {
        field: &'static str,
        value: String,
        allowed: String,
    },

    #[error("Invalid {field}: {value}. Must be within {range}")]
    OutOfRange {
        field: &'static str,
        value: String,
        range: &'static str,
    },
}

/// Closed set of lowercase labels a categorical field may take
pub trait Categorical: Sized + Copy + 'static {
    /// Every member of the domain, in display order
    const DOMAIN: &'static [Self];

    fn label(self) -> &'static str;

    fn parse(normalized: &str) -> Option<Self> {
        Self::DOMAIN.iter().copied().find(|v| v.label() == normalized)
    }

    fn allowed() -> String {
        Self::DOMAIN
            .iter()
            .map(|v| format!("'{}'", v.label()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Ensure the payload is a JSON object
pub fn as_object(payload: &Value) -> Result<&Map<String, Value>, ValidationError> {
    payload.as_object().ok_or(ValidationError::NotAnObject)
}

fn required<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, ValidationError> {
    match object.get(field) {
        Some(Value::Null) | None => Err(ValidationError::MissingField(field)),
        Some(value) => Ok(value),
    }
}

/// Categorical field: a string, trimmed and lowercased, inside the domain of `C`
pub fn categorical<C: Categorical>(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<C, ValidationError> {
    let raw = required(object, field)?
        .as_str()
        .ok_or(ValidationError::WrongType {
            field,
            expected: "string",
        })?;

    let normalized = raw.trim().to_lowercase();
    C::parse(&normalized).ok_or_else(|| ValidationError::OutOfDomain {
        field,
        value: normalized,
        allowed: C::allowed(),
    })
}

/// Integer field within an inclusive range.
///
/// Accepts JSON integers, integral floats (`3.0`) and numeric strings (`"3"`).
pub fn integer_in_range(
    object: &Map<String, Value>,
    field: &'static str,
    min: i64,
    max: i64,
    range: &'static str,
) -> Result<i64, ValidationError> {
    let value = required(object, field)?;
    let wrong_type = ValidationError::WrongType {
        field,
        expected: "integer",
    };

    let parsed = match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i,
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.is_finite() => f as i64,
                _ => return Err(wrong_type),
            },
        },
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| wrong_type)?,
        _ => return Err(wrong_type),
    };

    if parsed < min || parsed > max {
        return Err(ValidationError::OutOfRange {
            field,
            value: parsed.to_string(),
            range,
        });
    }
    Ok(parsed)
}

/// `confidence` field: a number (or numeric string) in [0, 1]
pub fn confidence(object: &Map<String, Value>) -> Result<Confidence, ValidationError> {
    const FIELD: &str = "confidence";
    let value = required(object, FIELD)?;

    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or(ValidationError::WrongType {
        field: FIELD,
        expected: "float",
    })?;

    Confidence::new(parsed).ok_or(ValidationError::OutOfRange {
        field: FIELD,
        value: parsed.to_string(),
        range: "0.0-1.0",
    })
}

/// Free-text rationale, shortened to at most [`MAX_RATIONALE_CHARS`]
pub fn rationale(object: &Map<String, Value>, field: &'static str) -> Result<String, ValidationError> {
    let text = required(object, field)?
        .as_str()
        .ok_or(ValidationError::WrongType {
            field,
            expected: "string",
        })?;

    Ok(truncate_at_sentence(text.trim(), MAX_RATIONALE_CHARS))
}

/// Shorten `text` to at most `max_chars` characters.
///
/// Cuts after the last sentence terminator (`.`, `!`, `?`) at or before the cap.
/// Without one, cuts at the last word boundary. A single word longer than the
/// cap is the only case that is cut mid-word.
pub fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    let Some((cap_byte, _)) = text.char_indices().nth(max_chars) else {
        return text.to_string();
    };
    let window = &text[..cap_byte];
    let next_char = text[cap_byte..].chars().next();

    // A terminator, plus any closing quotes or brackets after it, ends a
    // sentence when followed by whitespace or the end of text
    let chars: Vec<(usize, char)> = window.char_indices().collect();
    let mut sentence_end = None;
    for (pos, &(_, c)) in chars.iter().enumerate() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let mut end = pos + 1;
        while chars.get(end).map_or(false, |&(_, n)| is_closing_mark(n)) {
            end += 1;
        }
        let (end_byte, following) = match chars.get(end) {
            Some(&(idx, n)) => (idx, Some(n)),
            None => (window.len(), next_char),
        };
        if following.map_or(true, char::is_whitespace) {
            sentence_end = Some(end_byte);
        }
    }
    if let Some(end) = sentence_end {
        return window[..end].trim_end().to_string();
    }

    // Word boundary: the cap itself may fall on whitespace
    if next_char.map_or(false, char::is_whitespace) {
        return window.trim_end().to_string();
    }
    if let Some(space) = window.rfind(char::is_whitespace) {
        let cut = window[..space].trim_end();
        if !cut.is_empty() {
            return cut.to_string();
        }
    }

    window.to_string()
}

fn is_closing_mark(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '\u{201d}' | '\u{2019}' | '\u{bb}')
}
