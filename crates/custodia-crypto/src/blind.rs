//! HMAC-SHA256 blind index for equality search over encrypted columns
//!
//! The index is deterministic (same canonical value + key = same token), which
//! is exactly what makes it searchable. It is a MAC, not a cipher: there is no
//! inverse operation anywhere in this workspace.

use custodia_core::{CustodiaError, CustodiaResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use unicode_normalization::UnicodeNormalization;

use crate::keys::{BlindIndexKey, KeyBytes};

/// Canonical form used for indexing: trimmed, lowercased, NFC.
pub fn canonicalize(value: &str) -> String {
    value.trim().to_lowercase().nfc().collect()
}

/// Compute the blind index of `value` as lowercase hex.
pub fn blind_index(key: &BlindIndexKey, value: &str) -> CustodiaResult<String> {
    let canonical = canonicalize(value);

    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key.as_bytes())
        .map_err(|e| CustodiaError::Crypto(format!("HMAC key init: {e}")))?;
    mac.update(canonical.as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}
