//! Per-field AES-256-GCM encryption bound to its record context
//!
//! ```text
//! ciphertext = AES-256-GCM(key=scope DEK, nonce=random 96-bit, AAD=table|field|recordId)
//! ```
//!
//! The AAD binds each value to its table, column and row, so a ciphertext
//! copied onto another record or into another column fails to decrypt.

use custodia_core::CustodiaResult;

use crate::aead::{open, seal, Sealed};
use crate::keys::{DataKey, KeyBytes};

/// Build the AAD for one attribute: `table|field|record_id`.
pub fn build_aad(table: &str, field: &str, record_id: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(table.len() + field.len() + record_id.len() + 2);
    aad.extend_from_slice(table.as_bytes());
    aad.push(b'|');
    aad.extend_from_slice(field.as_bytes());
    aad.push(b'|');
    aad.extend_from_slice(record_id.as_bytes());
    aad
}

/// Encrypt one attribute value under the scope DEK.
pub fn encrypt_field(dek: &DataKey, aad: &[u8], plaintext: &[u8]) -> CustodiaResult<Sealed> {
    seal(dek.as_bytes(), aad, plaintext)
}

/// Decrypt one attribute value. `aad` must match what was used to encrypt.
pub fn decrypt_field(dek: &DataKey, aad: &[u8], sealed: &Sealed) -> CustodiaResult<Vec<u8>> {
    open(dek.as_bytes(), aad, sealed)
}
