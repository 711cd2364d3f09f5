//! Admission
//!
//! Everything between an inbound HTTP request and the paid downstream call:
//! token auth, signature and replay checks, body validation, identity
//! resolution, rate limiting and quota settlement.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────┐   ┌────────────┐   ┌────────────┐   ┌─────────────┐
//! │ token/signat.│──▶│ validation│──▶│ rate limit │──▶│ quota      │──▶│ downstream  │
//! │ (401 / 500)  │   │ (400)     │   │ (429)      │   │ (402)      │   │ + adjust    │
//! └──────────────┘   └───────────┘   └────────────┘   └────────────┘   └─────────────┘
//! ```
//!
//! Handlers only talk to [`AdmissionPipeline`]; the components behind it
//! are never called directly.

pub mod auth;
pub mod error;
pub mod pipeline;
pub mod request;

pub use auth::{bearer_token, AuthError, Principal, StaticTokenVerifier, TokenVerifier};
pub use error::{AdmissionError, ErrorKind, ValidationError};
pub use pipeline::{Admission, AdmissionPipeline, Completion};
pub use request::{
    parse_body, resolve_identity, sanitize_raw_text, validate, CardRequest, InboundRequest,
    RequestKind,
};
