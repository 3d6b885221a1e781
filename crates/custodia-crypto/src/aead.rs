//! AES-256-GCM seal/open shared by key wrapping and field encryption

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use custodia_core::{CustodiaError, CustodiaResult};
use rand::RngCore;

use crate::codec::{decode_bytes, decode_nonce, encode_bytes};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// AEAD output: ciphertext (with trailing tag) and the nonce it was sealed under.
///
/// Kept as two values because the store persists them in separate columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

impl Sealed {
    /// Text form for storage: `(ciphertext, nonce)` as canonical base64.
    pub fn to_text(&self) -> (String, String) {
        (encode_bytes(&self.ciphertext), encode_bytes(&self.nonce))
    }

    /// Parse the stored text form. Legacy hex is accepted for either value.
    pub fn from_text(ciphertext: &str, nonce: &str) -> CustodiaResult<Self> {
        let ciphertext = decode_bytes(ciphertext)?;
        if ciphertext.len() < TAG_SIZE {
            return Err(CustodiaError::MalformedCiphertext(format!(
                "ciphertext too short: {} bytes (minimum {TAG_SIZE})",
                ciphertext.len()
            )));
        }
        Ok(Self {
            ciphertext,
            nonce: decode_nonce(nonce)?,
        })
    }
}

pub(crate) fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

pub(crate) fn seal(key: &[u8; KEY_SIZE], aad: &[u8], plaintext: &[u8]) -> CustodiaResult<Sealed> {
    let cipher = Aes256Gcm::new(key.into());
    let nonce = random_nonce();

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CustodiaError::Crypto(format!("AES-GCM encryption failed: {e}")))?;

    Ok(Sealed { ciphertext, nonce })
}

pub(crate) fn open(key: &[u8; KEY_SIZE], aad: &[u8], sealed: &Sealed) -> CustodiaResult<Vec<u8>> {
    if sealed.ciphertext.len() < TAG_SIZE {
        return Err(CustodiaError::MalformedCiphertext(format!(
            "ciphertext too short: {} bytes (minimum {TAG_SIZE})",
            sealed.ciphertext.len()
        )));
    }

    let cipher = Aes256Gcm::new(key.into());
    cipher
        .decrypt(
            Nonce::from_slice(&sealed.nonce),
            Payload {
                msg: &sealed.ciphertext,
                aad,
            },
        )
        .map_err(|_| {
            CustodiaError::Integrity("authentication tag mismatch (wrong key or context, or tampered data)".into())
        })
}
