//! Key types and envelope wrapping: raw 256-bit keys sealed under another key

use custodia_core::{CustodiaError, CustodiaResult};
use rand::RngCore;
use zeroize::Zeroize;

use crate::aead::{open, seal, Sealed};
use crate::KEY_SIZE;

/// A wrapped key as persisted: AES-256-GCM ciphertext of the raw key bytes
/// plus its nonce.
pub type WrappedKey = Sealed;

/// Common access to the fixed-size key newtypes.
pub trait KeyBytes: Sized {
    fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self;
    fn as_bytes(&self) -> &[u8; KEY_SIZE];

    /// Fresh random key from the thread RNG.
    fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        let key = Self::from_bytes(bytes);
        bytes.zeroize();
        key
    }
}

macro_rules! secret_key {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        ///
        /// Zeroized on drop; `Debug` never prints the bytes.
        #[derive(Clone)]
        pub struct $name {
            bytes: [u8; KEY_SIZE],
        }

        impl KeyBytes for $name {
            fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self { bytes }
            }

            fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.bytes
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.bytes.zeroize();
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("bytes", &"[REDACTED]")
                    .finish()
            }
        }
    };
}

secret_key!(
    /// Key-encryption key derived from the passphrase. Only ever wraps the master key.
    Kek
);
secret_key!(
    /// The per-user master key at the top of the hierarchy.
    MasterKey
);
secret_key!(
    /// Per-scope data-encryption key for field ciphertext.
    DataKey
);
secret_key!(
    /// Per-scope key for blind-index HMACs.
    BlindIndexKey
);

/// Wrap (encrypt) `key` under `wrapping`.
///
/// Uses AES-256-GCM with a fresh random nonce and no AAD.
pub fn wrap_key(wrapping: &impl KeyBytes, key: &impl KeyBytes) -> CustodiaResult<WrappedKey> {
    seal(wrapping.as_bytes(), &[], key.as_bytes())
}

/// Unwrap (decrypt) a key previously produced by [`wrap_key`].
///
/// A wrong wrapping key and tampered bytes are indistinguishable: both fail
/// with `Integrity`.
pub fn unwrap_key<K: KeyBytes>(wrapping: &impl KeyBytes, wrapped: &WrappedKey) -> CustodiaResult<K> {
    let mut plaintext = open(wrapping.as_bytes(), &[], wrapped)?;

    if plaintext.len() != KEY_SIZE {
        let len = plaintext.len();
        plaintext.zeroize();
        return Err(CustodiaError::MalformedCiphertext(format!(
            "unwrapped key has wrong size: {len} bytes (expected {KEY_SIZE})"
        )));
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    let key = K::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}
