//! AI service adapters
//!
//! Prompt text for each request stage, extraction of the model's reply from
//! a generateContent response, the per-endpoint flows and the API key lookup
//! used by the transport.

pub mod flows;
pub mod keys;
pub mod prompt;

pub use flows::{format_card, process_ocr, FormatCardResponse, ProcessOcrResponse};
pub use keys::{EnvKeyProvider, KeyProvider, StaticKeyProvider};
pub use prompt::{extract_json, generate_content_body, response_text, PromptBuilder};

use serde_json::Value;

use crate::downstream::{DownstreamRequest, DownstreamResponse};

/// Downstream request for a single prompt
pub fn prompt_request(prompt: &str) -> DownstreamRequest {
    DownstreamRequest::new(generate_content_body(prompt))
}

/// Model reply text from a downstream response, if the response carries one
pub fn completion_text(response: &DownstreamResponse) -> Option<String> {
    let body: Value = response.json()?;
    response_text(&body).map(str::to_string)
}
