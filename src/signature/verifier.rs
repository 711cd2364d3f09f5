//! Signature verification
//!
//! Parses the signature header, checks timestamp freshness, matches the HMAC
//! against each candidate secret in constant time and finally consults the
//! [`ReplayGuard`].

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::replay::{ReplayGuard, ReplayStatus};
use crate::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

/// Reasons a signed request is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureRejection {
    /// Header absent or empty
    #[error("missing_signature")]
    Missing,

    /// Header is not `<timestamp>:<hex>`
    #[error("invalid_signature_format")]
    InvalidFormat,

    /// Timestamp is not an integer
    #[error("invalid_signature_timestamp")]
    InvalidTimestamp,

    /// Timestamp is further than the TTL from now
    #[error("signature_expired")]
    Expired,

    /// No candidate secret produced a matching digest
    #[error("invalid_signature")]
    Invalid,

    /// Digest was already accepted within the TTL
    #[error("replay")]
    Replay,

    /// Signing is enabled but no secret is configured
    #[error("server_misconfigured")]
    Misconfigured,
}

impl SignatureRejection {
    /// Machine-readable error kind returned to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            SignatureRejection::Missing => "missing_signature",
            SignatureRejection::InvalidFormat => "invalid_signature_format",
            SignatureRejection::InvalidTimestamp => "invalid_signature_timestamp",
            SignatureRejection::Expired => "signature_expired",
            SignatureRejection::Invalid => "invalid_signature",
            SignatureRejection::Replay => "replay",
            SignatureRejection::Misconfigured => "server_misconfigured",
        }
    }
}

/// An accepted signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Lowercase hex digest that matched; the replay key
    pub matched_hash: String,
    /// Position of the matching secret among the candidates
    pub secret_index: usize,
}

fn mac_for(secret: &str, timestamp_ms: i64, body: &[u8]) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(b":");
    mac.update(body);
    mac
}

/// Produce a signature header value for `body` signed at `timestamp_ms`.
pub fn sign(secret: &str, timestamp_ms: i64, body: &[u8]) -> String {
    let digest = mac_for(secret, timestamp_ms, body).finalize().into_bytes();
    format!("{}:{}", timestamp_ms, hex::encode(digest))
}

/// Check header shape, freshness and digest without touching replay state.
pub fn check_signature(
    header: Option<&str>,
    body: &[u8],
    secrets: &[String],
    ttl: Duration,
    now_ms: i64,
) -> Result<Accepted, SignatureRejection> {
    if secrets.is_empty() {
        return Err(SignatureRejection::Misconfigured);
    }

    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(SignatureRejection::Missing)?;

    let (timestamp, provided) = header
        .split_once(':')
        .filter(|(_, rest)| !rest.contains(':'))
        .ok_or(SignatureRejection::InvalidFormat)?;

    let timestamp_ms: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureRejection::InvalidTimestamp)?;

    let ttl_ms = ttl.as_millis().min(i64::MAX as u128) as i64;
    if now_ms.saturating_sub(timestamp_ms).saturating_abs() > ttl_ms {
        return Err(SignatureRejection::Expired);
    }

    let provided = hex::decode(provided.trim()).map_err(|_| SignatureRejection::Invalid)?;

    for (index, secret) in secrets.iter().enumerate() {
        let digest = mac_for(secret, timestamp_ms, body).finalize().into_bytes();
        if bool::from(digest.as_slice().ct_eq(provided.as_slice())) {
            return Ok(Accepted {
                matched_hash: hex::encode(digest),
                secret_index: index,
            });
        }
    }

    Err(SignatureRejection::Invalid)
}

/// Verifier holding the candidate secrets and the replay guard.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secrets: Arc<Vec<String>>,
    ttl: Duration,
    replay: ReplayGuard,
    clock: Arc<dyn Clock>,
}

impl SignatureVerifier {
    /// Create a verifier. `secrets` are tried in order.
    pub fn new(
        secrets: Vec<String>,
        ttl: Duration,
        replay: ReplayGuard,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            secrets: Arc::new(secrets),
            ttl,
            replay,
            clock,
        }
    }

    /// Signature freshness window.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Verify a request's signature header against its raw body.
    ///
    /// Freshness and digest are checked before the replay record is written,
    /// so an expired or forged request never consumes a replay slot.
    pub async fn verify(
        &self,
        header: Option<&str>,
        body: &[u8],
    ) -> Result<Accepted, SignatureRejection> {
        let accepted = check_signature(header, body, &self.secrets, self.ttl, self.clock.now_ms())
            .inspect_err(|rejection| {
                warn!(reason = rejection.kind(), "Signature rejected");
            })?;

        match self
            .replay
            .check_and_record(&accepted.matched_hash, self.ttl)
            .await
        {
            ReplayStatus::Fresh => {
                debug!(secret_index = accepted.secret_index, "Signature accepted");
                Ok(accepted)
            }
            ReplayStatus::Replayed => {
                warn!(reason = "replay", "Signature rejected");
                Err(SignatureRejection::Replay)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::store::{Backends, LocalStore};

    const NOW: i64 = 1_700_000_000_000;
    const TTL: Duration = Duration::from_millis(120_000);

    fn verifier(secrets: &[&str]) -> (SignatureVerifier, MockClock) {
        let clock = MockClock::new(NOW);
        let backends = Backends::local_only(LocalStore::new(Arc::new(clock.clone())));
        let verifier = SignatureVerifier::new(
            secrets.iter().map(|s| s.to_string()).collect(),
            TTL,
            ReplayGuard::new(backends),
            Arc::new(clock.clone()),
        );
        (verifier, clock)
    }

    #[test]
    fn test_sign_format() {
        let header = sign("secret", 1234, b"{}");
        let (ts, digest) = header.split_once(':').unwrap();
        assert_eq!(ts, "1234");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_header_shape_errors() {
        let secrets = vec!["s".to_string()];
        let check = |header: Option<&str>| check_signature(header, b"{}", &secrets, TTL, NOW);

        assert_eq!(check(None), Err(SignatureRejection::Missing));
        assert_eq!(check(Some("  ")), Err(SignatureRejection::Missing));
        assert_eq!(check(Some("abc")), Err(SignatureRejection::InvalidFormat));
        assert_eq!(check(Some("1:2:3")), Err(SignatureRejection::InvalidFormat));
        assert_eq!(
            check(Some("soon:abcd")),
            Err(SignatureRejection::InvalidTimestamp)
        );
        assert_eq!(
            check(Some(&format!("{}:zz", NOW))),
            Err(SignatureRejection::Invalid)
        );
    }

    #[test]
    fn test_expiry_both_directions() {
        let secrets = vec!["s".to_string()];
        let old = sign("s", NOW - 120_001, b"{}");
        let future = sign("s", NOW + 120_001, b"{}");
        let edge = sign("s", NOW - 120_000, b"{}");

        assert_eq!(
            check_signature(Some(&old), b"{}", &secrets, TTL, NOW),
            Err(SignatureRejection::Expired)
        );
        assert_eq!(
            check_signature(Some(&future), b"{}", &secrets, TTL, NOW),
            Err(SignatureRejection::Expired)
        );
        assert!(check_signature(Some(&edge), b"{}", &secrets, TTL, NOW).is_ok());
    }

    #[test]
    fn test_no_secrets_is_misconfigured() {
        let header = sign("s", NOW, b"{}");
        assert_eq!(
            check_signature(Some(&header), b"{}", &[], TTL, NOW),
            Err(SignatureRejection::Misconfigured)
        );
    }

    #[test]
    fn test_body_tampering_rejected() {
        let secrets = vec!["s".to_string()];
        let header = sign("s", NOW, br#"{"rawText":"a"}"#);
        assert_eq!(
            check_signature(Some(&header), br#"{"rawText":"b"}"#, &secrets, TTL, NOW),
            Err(SignatureRejection::Invalid)
        );
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let secrets = vec!["s".to_string()];
        let header = sign("s", NOW, b"{}").to_uppercase();
        let accepted = check_signature(Some(&header), b"{}", &secrets, TTL, NOW).unwrap();
        assert_eq!(accepted.matched_hash, accepted.matched_hash.to_lowercase());
    }

    #[tokio::test]
    async fn test_rotation_accepts_previous_secret() {
        let (verifier, _clock) = verifier(&["current", "previous"]);

        let header = sign("previous", NOW, b"{}");
        let accepted = verifier.verify(Some(&header), b"{}").await.unwrap();
        assert_eq!(accepted.secret_index, 1);

        let header = sign("retired", NOW, b"{}");
        assert_eq!(
            verifier.verify(Some(&header), b"{}").await,
            Err(SignatureRejection::Invalid)
        );
    }

    #[tokio::test]
    async fn test_replay_rejected() {
        let (verifier, _clock) = verifier(&["s"]);
        let header = sign("s", NOW, b"{}");

        assert!(verifier.verify(Some(&header), b"{}").await.is_ok());
        assert_eq!(
            verifier.verify(Some(&header), b"{}").await,
            Err(SignatureRejection::Replay)
        );
    }

    #[tokio::test]
    async fn test_expired_replay_reports_expiry() {
        let (verifier, clock) = verifier(&["s"]);
        let header = sign("s", NOW, b"{}");

        assert!(verifier.verify(Some(&header), b"{}").await.is_ok());
        clock.advance(Duration::from_millis(120_001));
        assert_eq!(
            verifier.verify(Some(&header), b"{}").await,
            Err(SignatureRejection::Expired)
        );
    }

    #[tokio::test]
    async fn test_rejected_signature_does_not_consume_replay_slot() {
        let (verifier, _clock) = verifier(&["s"]);
        let forged = format!("{}:{}", NOW, "00".repeat(32));

        assert_eq!(
            verifier.verify(Some(&forged), b"{}").await,
            Err(SignatureRejection::Invalid)
        );
        let good = sign("s", NOW, b"{}");
        assert!(verifier.verify(Some(&good), b"{}").await.is_ok());
    }
}
