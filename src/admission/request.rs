//! Inbound requests: body validation, sanitisation and identity resolution.

use bytes::Bytes;
use serde_json::Value;
use std::net::IpAddr;

use super::error::ValidationError;
use crate::config::ValidationConfig;
use crate::rate_limit::estimate_units;

/// Identity used when nothing else identifies the caller
pub const ANONYMOUS: &str = "anonymous";

/// The request as received, before any check has run
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// Raw body bytes, exactly as signed by the client
    pub body: Bytes,

    /// Signature header value
    pub signature: Option<String>,

    /// `Authorization` header value
    pub authorization: Option<String>,

    /// Peer address
    pub client_ip: Option<IpAddr>,
}

impl InboundRequest {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_authorization(mut self, authorization: impl Into<String>) -> Self {
        self.authorization = Some(authorization.into());
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }
}

/// Which endpoint a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// One completion turning card text into a record
    FormatCard,
    /// Refine, structure and finalize: three completions
    ProcessOcr,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::FormatCard => "format_card",
            RequestKind::ProcessOcr => "process_ocr",
        }
    }

    /// Downstream calls made per request
    pub fn calls(&self) -> i64 {
        match self {
            RequestKind::FormatCard => 1,
            RequestKind::ProcessOcr => 3,
        }
    }

    /// Units reserved before calling downstream
    pub fn estimate(&self, request: &CardRequest) -> i64 {
        estimate_units(&request.raw_text) * self.calls()
    }
}

/// A validated, sanitised request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRequest {
    pub raw_text: String,
    pub session_id: Option<String>,
    pub template: Vec<String>,
}

/// Parse and validate a request body.
///
/// `/format-card` checks the whole body. `/process-ocr` only looks at
/// `raw_text` and `session_id`, and ignores any other field.
pub fn parse_body(
    body: &[u8],
    kind: RequestKind,
    limits: &ValidationConfig,
) -> Result<CardRequest, ValidationError> {
    let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(body).map_err(|_| ValidationError::MissingBody)?
    };

    match kind {
        RequestKind::FormatCard => validate(&value, limits),
        RequestKind::ProcessOcr => {
            let mut narrowed = serde_json::Map::new();
            for field in ["raw_text", "session_id"] {
                if let Some(v) = value.get(field) {
                    narrowed.insert(field.to_string(), v.clone());
                }
            }
            validate(&Value::Object(narrowed), limits)
        }
    }
}

/// Validate a JSON body; checks run in a fixed order and the first failure wins.
pub fn validate(body: &Value, limits: &ValidationConfig) -> Result<CardRequest, ValidationError> {
    let object = body.as_object().ok_or(ValidationError::MissingBody)?;
    if object.len() > limits.max_body_keys {
        return Err(ValidationError::TooManyFields);
    }

    let raw = match object.get("raw_text") {
        Some(Value::String(raw)) if !raw.is_empty() => raw,
        _ => return Err(ValidationError::MissingRawText),
    };
    if raw.chars().count() > limits.max_raw_text_len {
        return Err(ValidationError::RawTextTooLong);
    }

    // Non-string session ids are ignored rather than rejected
    let session_id = match object.get("session_id") {
        Some(Value::String(id)) if !id.is_empty() => {
            if id.chars().count() > limits.max_session_id_len {
                return Err(ValidationError::SessionIdTooLong);
            }
            Some(id.clone())
        }
        _ => None,
    };

    let template = match object.get("template") {
        None => Vec::new(),
        Some(value) => validate_template(value, limits)?,
    };

    let raw_text = sanitize_raw_text(raw);
    if raw_text.is_empty() {
        return Err(ValidationError::MissingRawText);
    }

    Ok(CardRequest {
        raw_text,
        session_id,
        template,
    })
}

fn validate_template(
    value: &Value,
    limits: &ValidationConfig,
) -> Result<Vec<String>, ValidationError> {
    let headers = value
        .as_array()
        .ok_or(ValidationError::InvalidTemplateFormat)?;
    if headers.len() > limits.max_template_headers {
        return Err(ValidationError::TooManyTemplateHeaders);
    }

    headers
        .iter()
        .map(|header| {
            let header = header
                .as_str()
                .ok_or(ValidationError::InvalidTemplateHeaderType)?;
            let len = header.chars().count();
            if len == 0 || len > limits.max_template_header_len {
                return Err(ValidationError::TemplateHeaderLength);
            }
            if !header.chars().all(is_header_char) {
                return Err(ValidationError::TemplateHeaderInvalidChars);
            }
            Ok(header.to_string())
        })
        .collect()
}

/// ASCII word characters, space, hyphen, dot and parentheses
fn is_header_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | ' ' | '-' | '.' | '(' | ')')
}

/// Replace control characters with spaces, trim and collapse whitespace runs.
pub fn sanitize_raw_text(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Key under which rate limits and quotas are tracked.
///
/// Session id, then authenticated user, then client address, then
/// [`ANONYMOUS`].
pub fn resolve_identity(
    session_id: Option<&str>,
    user_id: Option<&str>,
    client_ip: Option<IpAddr>,
) -> String {
    session_id
        .filter(|s| !s.is_empty())
        .or(user_id.filter(|u| !u.is_empty()))
        .map(str::to_string)
        .or_else(|| client_ip.map(|ip| ip.to_string()))
        .unwrap_or_else(|| ANONYMOUS.to_string())
}
