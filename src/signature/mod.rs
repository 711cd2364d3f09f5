//! Request Signatures
//!
//! HMAC-SHA256 request signing with timestamp freshness and replay
//! protection.
//!
//! # Wire format
//!
//! Clients send `<unix-ms-timestamp>:<hex-hmac>` in the signature header
//! (default `x-proxy-signature`). The HMAC covers the exact bytes
//! `"{timestamp}:{raw body}"`.
//!
//! # Rotation
//!
//! The verifier accepts an ordered list of candidate secrets (current,
//! previous, alternates) and accepts the first constant-time match, so
//! clients holding a rotated-out secret keep working for the rotation window.

pub mod replay;
pub mod verifier;

pub use replay::{ReplayGuard, ReplayStatus};
pub use verifier::{check_signature, sign, Accepted, SignatureRejection, SignatureVerifier};
