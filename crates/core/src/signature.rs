//! HMAC-SHA256 signatures for inbound webhook bodies.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-slawatch-signature";
const SCHEME_PREFIX: &str = "sha256=";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing `x-slawatch-signature` header")]
    Missing,
    #[error("signature header must look like `sha256=<hex>`")]
    Malformed,
    #[error("signature does not match request body")]
    Mismatch,
    #[error("webhook secret is unusable as an HMAC key")]
    InvalidKey,
}

/// Returns the header value for `body`, as `sha256=<hex>`.
pub fn sign(secret: &SecretString, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = mac_for(secret)?;
    mac.update(body);
    Ok(format!("{SCHEME_PREFIX}{}", encode_hex(mac.finalize().into_bytes().as_slice())))
}

/// Verifies a signature header against the raw request body in constant time.
pub fn verify(
    secret: &SecretString,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), SignatureError> {
    let header =
        header.map(str::trim).filter(|value| !value.is_empty()).ok_or(SignatureError::Missing)?;
    let hex = header.strip_prefix(SCHEME_PREFIX).ok_or(SignatureError::Malformed)?;
    let expected = decode_hex(hex).ok_or(SignatureError::Malformed)?;

    let mut mac = mac_for(secret)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}

fn mac_for(secret: &SecretString) -> Result<HmacSha256, SignatureError> {
    HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| SignatureError::InvalidKey)
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn decode_hex(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|index| value.get(index..index + 2).and_then(|pair| u8::from_str_radix(pair, 16).ok()))
        .collect()
}
