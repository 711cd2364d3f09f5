//! Downstream invocations for each endpoint.
//!
//! Each flow runs inside [`AdmissionPipeline::run`](crate::admission::AdmissionPipeline::run)
//! and reports the units it consumed, estimated from the model's replies.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::prompt::{extract_json, PromptBuilder};
use super::{completion_text, prompt_request};
use crate::admission::{Admission, AdmissionError, Completion};
use crate::downstream::ResilientClient;
use crate::rate_limit::estimate_units;

const LOG_EXCERPT_CHARS: usize = 200;

/// `/format-card` success body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatCardResponse {
    pub ok: bool,
    pub data: Value,
    pub source: &'static str,
}

/// `/process-ocr` success body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessOcrResponse {
    pub ok: bool,
    pub cleaned_text: String,
    pub structured_json: Value,
    pub final_json: Value,
}

fn excerpt(text: &str) -> String {
    text.chars().take(LOG_EXCERPT_CHARS).collect()
}

async fn complete(client: &ResilientClient, prompt: &str) -> Result<String, AdmissionError> {
    let response = client.call(&prompt_request(prompt)).await?;
    if !response.is_success() {
        debug!(status = response.status, "Downstream returned an error status");
    }
    Ok(completion_text(&response).unwrap_or_default())
}

/// One completion turning card text into a record keyed by the template.
pub async fn format_card(
    admission: Admission,
    client: ResilientClient,
    prompts: &PromptBuilder,
) -> Result<Completion<FormatCardResponse>, AdmissionError> {
    let request = &admission.request;
    let prompt = prompts.format_card(&request.raw_text, &request.template);
    let text = complete(&client, &prompt).await?;

    let data = extract_json(&text).ok_or_else(|| {
        warn!(
            identity = %admission.identity,
            reply = %excerpt(&text),
            "Model reply is not JSON"
        );
        AdmissionError::ParseError
    })?;

    Ok(Completion::new(
        FormatCardResponse {
            ok: true,
            data,
            source: "ai",
        },
        estimate_units(&text),
    ))
}

/// Refine, structure and finalize OCR output.
///
/// A finalize reply that is not JSON falls back to the structured record.
pub async fn process_ocr(
    admission: Admission,
    client: ResilientClient,
    prompts: &PromptBuilder,
) -> Result<Completion<ProcessOcrResponse>, AdmissionError> {
    let identity = &admission.identity;

    let refined = complete(&client, &prompts.refine(&admission.request.raw_text)).await?;
    let cleaned_text = refined.trim().to_string();
    if cleaned_text.is_empty() {
        warn!(identity = %identity, "Refine stage returned no text");
        return Err(AdmissionError::RefineFailed);
    }

    let structured_text = complete(&client, &prompts.structure(&cleaned_text)).await?;
    let structured = extract_json(&structured_text).ok_or_else(|| {
        warn!(
            identity = %identity,
            reply = %excerpt(&structured_text),
            "Structure stage reply is not JSON"
        );
        AdmissionError::StructureFailed
    })?;

    let final_text = complete(&client, &prompts.finalize(&structured)).await?;
    let final_json = match extract_json(&final_text) {
        Some(value) => value,
        None => {
            debug!(identity = %identity, "Finalize reply is not JSON, keeping structured record");
            structured.clone()
        }
    };

    let consumed = estimate_units(&[cleaned_text.as_str(), &structured_text, &final_text].join(" "));

    Ok(Completion::new(
        ProcessOcrResponse {
            ok: true,
            cleaned_text,
            structured_json: structured,
            final_json,
        },
        consumed,
    ))
}
