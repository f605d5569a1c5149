use serde_json::Value;

pub const DEFAULT_MAX_CHARS: usize = 2000;
pub const TRUNCATION_MARKER: &str = "\n\n... (response truncated due to length)";

/// Caps tool output before it goes back into the model context.
///
/// Text passes through as is, anything else is pretty-printed JSON. Lengths are counted
/// in characters, so a cut never splits a UTF-8 sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseGuard {
    max_chars: usize,
}

impl Default for ResponseGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

impl ResponseGuard {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn guard(&self, value: &Value) -> String {
        self.truncate(serialize_value(value))
    }

    pub fn truncate(&self, text: String) -> String {
        match text.char_indices().nth(self.max_chars) {
            None => text,
            Some((cut, _)) => {
                let mut truncated = String::with_capacity(cut + TRUNCATION_MARKER.len());
                truncated.push_str(&text[..cut]);
                truncated.push_str(TRUNCATION_MARKER);
                truncated
            }
        }
    }
}

fn serialize_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| format!("{:?}", other)),
    }
}
