//! Webhook signature verification using HMAC-SHA256.
//!
//! The provider signs each payload with a shared secret and sends the result
//! in the `X-Hub-Signature-256` header as `sha256=<64 hex digits>`.
//! Verification is the first step of ingestion: nothing is parsed or stored
//! for a delivery whose signature does not check out.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Length of an HMAC-SHA256 digest in bytes.
pub const SIGNATURE_LEN: usize = 32;

/// Why a signature was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,
    #[error("signature header malformed")]
    Malformed,
    #[error("signature has {0} bytes, expected {SIGNATURE_LEN}")]
    WrongLength(usize),
    #[error("signature does not match payload")]
    Mismatch,
}

/// Parses a signature header (e.g. `sha256=abc123...`) into raw bytes.
///
/// # Examples
///
/// ```
/// use tf_lifecycle::webhooks::{SignatureError, parse_signature_header};
///
/// let header = format!("sha256={}", "ab".repeat(32));
/// assert_eq!(parse_signature_header(&header).unwrap().len(), 32);
///
/// assert_eq!(parse_signature_header("abcd1234"), Err(SignatureError::Malformed));
/// assert_eq!(parse_signature_header("sha1=abcd1234"), Err(SignatureError::Malformed));
/// assert_eq!(parse_signature_header("sha256=abcd"), Err(SignatureError::WrongLength(2)));
/// ```
pub fn parse_signature_header(header: &str) -> Result<Vec<u8>, SignatureError> {
    let hex_sig = header
        .trim()
        .strip_prefix("sha256=")
        .ok_or(SignatureError::Malformed)?;
    let bytes = hex::decode(hex_sig).map_err(|_| SignatureError::Malformed)?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(SignatureError::WrongLength(bytes.len()));
    }
    Ok(bytes)
}

/// Computes the HMAC-SHA256 of a payload. Used to sign test payloads.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as a header value (`sha256=<hex>`).
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}

/// Verifies a webhook signature against the raw payload.
///
/// The comparison is constant time.
///
/// # Examples
///
/// ```
/// use tf_lifecycle::webhooks::{compute_signature, format_signature_header, verify_signature};
///
/// let payload = b"Hello, World!";
/// let header = format_signature_header(&compute_signature(payload, b"secret"));
///
/// assert!(verify_signature(payload, Some(&header), b"secret").is_ok());
/// assert!(verify_signature(payload, Some(&header), b"other").is_err());
/// assert!(verify_signature(payload, None, b"secret").is_err());
/// ```
pub fn verify_signature(
    payload: &[u8],
    signature_header: Option<&str>,
    secret: &[u8],
) -> Result<(), SignatureError> {
    let header = signature_header.ok_or(SignatureError::Missing)?;
    let expected = parse_signature_header(header)?;

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Mismatch)?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}
