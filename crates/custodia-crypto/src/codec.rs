//! Text encoding of bytes at rest
//!
//! Canonical form is standard padded base64. Older rows were written as
//! PostgreSQL `bytea` escape output (`\x` followed by lowercase hex). That form
//! is still accepted on read so existing profiles keep working, and callers
//! re-encode it canonically on their next write. It is a migration shim only:
//! nothing in this crate ever produces it.

use base64::{engine::general_purpose::STANDARD, Engine};
use custodia_core::{CustodiaError, CustodiaResult};

use crate::NONCE_SIZE;

/// Prefix of the legacy escaped-hex encoding.
pub const LEGACY_HEX_PREFIX: &str = "\\x";

/// Encode bytes in the canonical storage form.
pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a stored value: canonical base64 first, legacy `\x` hex as fallback.
pub fn decode_bytes(text: &str) -> CustodiaResult<Vec<u8>> {
    let canonical_err = match STANDARD.decode(text) {
        Ok(bytes) => return Ok(bytes),
        Err(e) => e,
    };

    match text.strip_prefix(LEGACY_HEX_PREFIX) {
        Some(hex_digits) => hex::decode(hex_digits).map_err(|e| {
            CustodiaError::MalformedCiphertext(format!("invalid legacy hex value: {e}"))
        }),
        None => Err(CustodiaError::MalformedCiphertext(format!(
            "value is neither base64 nor legacy hex: {canonical_err}"
        ))),
    }
}

/// Whether a stored value uses the legacy encoding and should be rewritten.
pub fn is_legacy_encoding(text: &str) -> bool {
    text.starts_with(LEGACY_HEX_PREFIX)
}

/// Re-encode a stored value canonically (no-op for values already in base64).
pub fn normalize(text: &str) -> CustodiaResult<String> {
    if is_legacy_encoding(text) {
        Ok(encode_bytes(&decode_bytes(text)?))
    } else {
        Ok(text.to_string())
    }
}

/// Decode a stored nonce and check it is exactly 96 bits.
pub fn decode_nonce(text: &str) -> CustodiaResult<[u8; NONCE_SIZE]> {
    let bytes = decode_bytes(text)?;
    <[u8; NONCE_SIZE]>::try_from(bytes.as_slice()).map_err(|_| {
        CustodiaError::MalformedCiphertext(format!(
            "nonce must be {NONCE_SIZE} bytes, got {}",
            bytes.len()
        ))
    })
}
