//! custodia-crypto: primitives behind the custodia key hierarchy
//!
//! Key hierarchy:
//! ```text
//! Passphrase
//!   └── KEK (PBKDF2-HMAC-SHA256/512, per-profile salt, never persisted)
//!       └── Master Key (256-bit random, AES-256-GCM wrapped under KEK)
//!           ├── Scope DEK (256-bit random per scope, wrapped under MK)
//!           │   └── Field AEAD: AES-256-GCM (nonce=random 96-bit, AAD=table|field|recordId)
//!           └── Scope BI key (256-bit random per scope, wrapped under MK)
//!               └── Blind index: HMAC-SHA256(canonical(value))
//! ```
//!
//! Everything persisted is text: canonical base64, with the legacy `\x` hex
//! form accepted on read (see [`codec`]).

mod aead;
pub mod blind;
pub mod codec;
pub mod field;
pub mod kdf;
pub mod keys;

pub use aead::Sealed;
pub use blind::{blind_index, canonicalize};
pub use codec::{decode_bytes, decode_nonce, encode_bytes, is_legacy_encoding};
pub use field::{build_aad, decrypt_field, encrypt_field};
pub use kdf::{derive_kek, generate_salt, validate_params};
pub use keys::{unwrap_key, wrap_key, BlindIndexKey, DataKey, Kek, KeyBytes, MasterKey, WrappedKey};

/// Size of every symmetric key in the hierarchy (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of an AES-GCM authentication tag
pub const TAG_SIZE: usize = 16;
