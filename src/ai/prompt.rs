//! Prompt building and response parsing for the generateContent API.

use serde_json::{json, Value};

/// Columns used when a card request names none
pub const DEFAULT_CARD_HEADERS: &[&str] = &["Name", "Company", "Email", "Phone", "Website", "Address"];

/// Builds the prompt text for each request stage
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    default_headers: Vec<String>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            default_headers: DEFAULT_CARD_HEADERS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Card text to a JSON record keyed by `headers` (or the default columns).
    pub fn format_card(&self, raw_text: &str, headers: &[String]) -> String {
        let headers: &[String] = if headers.is_empty() {
            &self.default_headers
        } else {
            headers
        };
        format!(
            "Convert the unstructured business card text below into one JSON object. \
             Use exactly these keys: {}. Use an empty string \"\" for any missing value. \
             Reply with the JSON object only, without markdown or commentary.\n\nText: {}",
            headers.join(", "),
            raw_text
        )
    }

    /// OCR clean-up stage
    pub fn refine(&self, raw_text: &str) -> String {
        format!(
            "Clean up the following OCR output. Remove noise, repair spacing and line breaks, \
             and reply with the corrected text only.\n\nText:\n{}",
            raw_text
        )
    }

    /// Structuring stage; expects JSON back
    pub fn structure(&self, cleaned_text: &str) -> String {
        format!(
            "Turn the following text into a well-structured JSON object. Include only fields \
             that actually appear, such as name, address, ID number, date or card number. \
             Do not invent data. Reply with valid JSON only.\n\nText:\n{}",
            cleaned_text
        )
    }

    /// Validation stage over the structured record
    pub fn finalize(&self, structured: &Value) -> String {
        format!(
            "Review this JSON record for consistency. Fix obvious OCR misreads such as broken \
             dates or misplaced values, rename keys to lower_snake_case and reply with the \
             corrected JSON only.\n\nJSON Input:\n{}",
            structured
        )
    }
}

/// Request body carrying a single text prompt
pub fn generate_content_body(prompt: &str) -> Value {
    json!({
        "contents": [
            { "parts": [ { "text": prompt } ] }
        ]
    })
}

/// Text of the first candidate's first part
pub fn response_text(body: &Value) -> Option<&str> {
    body.pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
}

/// Parse the outermost `{ ... }` span of `text` as JSON.
///
/// Models often wrap JSON in prose or code fences; everything before the
/// first `{` and after the last `}` is ignored.
pub fn extract_json(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}
