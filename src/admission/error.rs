//! Admission Error Types
//!
//! Every failure a client can observe, with its machine-readable kind and
//! HTTP status.

use std::time::Duration;
use thiserror::Error;

use super::auth::AuthError;
use crate::downstream::DownstreamError;
use crate::signature::SignatureRejection;

/// Error categories, used for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request body (400)
    Validation,
    /// Missing or bad credentials or signature (401)
    Auth,
    /// Rate limit or quota (429 / 402)
    Admission,
    /// Server configuration prevents serving the request (500)
    Configuration,
    /// Downstream call or reply unusable (500)
    Downstream,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::Admission => "admission",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Downstream => "downstream",
        }
    }
}

/// Request body validation failures, in the order they are checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing_body")]
    MissingBody,
    #[error("too_many_fields")]
    TooManyFields,
    #[error("missing_raw_text")]
    MissingRawText,
    #[error("raw_text_too_long")]
    RawTextTooLong,
    #[error("session_id_too_long")]
    SessionIdTooLong,
    #[error("invalid_template_format")]
    InvalidTemplateFormat,
    #[error("too_many_template_headers")]
    TooManyTemplateHeaders,
    #[error("invalid_template_header_type")]
    InvalidTemplateHeaderType,
    #[error("template_header_length")]
    TemplateHeaderLength,
    #[error("template_header_invalid_chars")]
    TemplateHeaderInvalidChars,
}

/// Errors returned by the admission pipeline
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Body failed validation
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Bearer token missing or rejected
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// Signature or replay check failed
    #[error("{0}")]
    Signature(#[from] SignatureRejection),

    /// Identity exceeded its window or is banned
    #[error("rate_limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Identity exhausted its quota for the period
    #[error("quota_exceeded")]
    QuotaExceeded,

    /// Server cannot serve requests as configured
    #[error("server_misconfigured: {0}")]
    Misconfigured(String),

    /// Model reply was not parseable JSON
    #[error("parse_error")]
    ParseError,

    /// OCR refinement produced no text
    #[error("refine_failed")]
    RefineFailed,

    /// OCR structuring produced no JSON
    #[error("structure_failed")]
    StructureFailed,

    /// Anything else
    #[error("internal_error: {0}")]
    Internal(String),
}

impl AdmissionError {
    /// Machine-readable error kind returned to clients
    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionError::Validation(e) => validation_kind(e),
            AdmissionError::Auth(e) => e.kind(),
            AdmissionError::Signature(rejection) => rejection.kind(),
            AdmissionError::RateLimited { .. } => "rate_limited",
            AdmissionError::QuotaExceeded => "quota_exceeded",
            AdmissionError::Misconfigured(_) => "server_misconfigured",
            AdmissionError::ParseError => "parse_error",
            AdmissionError::RefineFailed => "refine_failed",
            AdmissionError::StructureFailed => "structure_failed",
            AdmissionError::Internal(_) => "internal_error",
        }
    }

    pub fn category(&self) -> ErrorKind {
        match self {
            AdmissionError::Validation(_) => ErrorKind::Validation,
            AdmissionError::Auth(_) => ErrorKind::Auth,
            AdmissionError::Signature(SignatureRejection::Misconfigured) => {
                ErrorKind::Configuration
            }
            AdmissionError::Signature(_) => ErrorKind::Auth,
            AdmissionError::RateLimited { .. } | AdmissionError::QuotaExceeded => {
                ErrorKind::Admission
            }
            AdmissionError::Misconfigured(_) => ErrorKind::Configuration,
            AdmissionError::ParseError
            | AdmissionError::RefineFailed
            | AdmissionError::StructureFailed
            | AdmissionError::Internal(_) => ErrorKind::Downstream,
        }
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AdmissionError::RateLimited { .. } => 429,
            AdmissionError::QuotaExceeded => 402,
            _ => match self.category() {
                ErrorKind::Validation => 400,
                ErrorKind::Auth => 401,
                _ => 500,
            },
        }
    }

    /// Seconds for a `Retry-After` header, when known
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            AdmissionError::RateLimited {
                retry_after: Some(after),
            } => Some(after.as_millis().div_ceil(1000).max(1) as u64),
            _ => None,
        }
    }
}

fn validation_kind(error: &ValidationError) -> &'static str {
    match error {
        ValidationError::MissingBody => "missing_body",
        ValidationError::TooManyFields => "too_many_fields",
        ValidationError::MissingRawText => "missing_raw_text",
        ValidationError::RawTextTooLong => "raw_text_too_long",
        ValidationError::SessionIdTooLong => "session_id_too_long",
        ValidationError::InvalidTemplateFormat => "invalid_template_format",
        ValidationError::TooManyTemplateHeaders => "too_many_template_headers",
        ValidationError::InvalidTemplateHeaderType => "invalid_template_header_type",
        ValidationError::TemplateHeaderLength => "template_header_length",
        ValidationError::TemplateHeaderInvalidChars => "template_header_invalid_chars",
    }
}

impl From<DownstreamError> for AdmissionError {
    fn from(err: DownstreamError) -> Self {
        match err {
            DownstreamError::Misconfigured(message) => AdmissionError::Misconfigured(message),
            other => AdmissionError::Internal(other.to_string()),
        }
    }
}
