//! Prompt Builder
//!
//! Renders a task template by substituting `{{name}}` placeholders with work
//! item fields. Each inserted value is capped at [`MAX_FIELD_CHARS`]
//! characters; nothing else is transformed. The rendered prompt keeps a record
//! of exactly what was inserted.

use std::collections::HashMap;

/// Maximum characters of any single free-text field inserted into a prompt
pub const MAX_FIELD_CHARS: usize = 8000;

/// One substituted template input, as sent
#[derive(Debug, Clone, PartialEq)]
pub struct PromptInput {
    pub name: &'static str,
    pub value: String,
    /// Whether the original value exceeded the cap
    pub truncated: bool,
}

/// Final prompt text plus the inputs that went into it
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    pub text: String,
    pub inputs: Vec<PromptInput>,
}

impl RenderedPrompt {
    /// Value sent for input `name`
    pub fn input(&self, name: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.value.as_str())
    }
}

/// First `max_chars` characters of `text`, and whether anything was cut
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

/// Render `template`, replacing each `{{name}}` with the matching input.
///
/// Substitution is single-pass, so placeholder-like text inside a value is
/// never expanded. Unknown placeholders are left verbatim.
pub fn render(template: &str, inputs: &[(&'static str, &str)]) -> RenderedPrompt {
    let recorded: Vec<PromptInput> = inputs
        .iter()
        .map(|&(name, raw)| {
            let (value, truncated) = truncate_chars(raw, MAX_FIELD_CHARS);
            PromptInput {
                name,
                value: value.to_string(),
                truncated,
            }
        })
        .collect();

    let lookup: HashMap<&str, &str> = recorded
        .iter()
        .map(|i| (i.name, i.value.as_str()))
        .collect();

    let mut text = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        text.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        match after_open.find("}}") {
            Some(close) => {
                let name = after_open[..close].trim();
                match lookup.get(name) {
                    Some(value) => text.push_str(value),
                    None => text.push_str(&rest[open..open + 2 + close + 2]),
                }
                rest = &after_open[close + 2..];
            }
            None => {
                text.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    text.push_str(rest);

    RenderedPrompt {
        text,
        inputs: recorded,
    }
}
