use serde::{Deserialize, Serialize};

/// Lowest PBKDF2 iteration count accepted for new or stored profiles.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Iteration count used when bootstrapping a profile without explicit config.
pub const DEFAULT_KDF_ITERATIONS: u32 = 310_000;

/// Persisted KDF parameters, one record per user profile.
///
/// Stored verbatim next to the salt so a later unlock derives the same KEK
/// even after the defaults change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// KDF name, currently only `PBKDF2`
    pub algorithm: String,
    /// PBKDF2 round count (>= [`MIN_KDF_ITERATIONS`])
    pub iterations: u32,
    /// PRF hash: `SHA-256` or `SHA-512`
    pub hash: String,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            algorithm: "PBKDF2".into(),
            iterations: DEFAULT_KDF_ITERATIONS,
            hash: "SHA-256".into(),
        }
    }
}

/// Wrapped master key plus everything needed to re-derive its KEK.
///
/// All byte fields are text-encoded (canonical base64; legacy `\x` hex is
/// accepted on read).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileKeyMaterial {
    pub wrapped_mk: String,
    pub wrapped_mk_nonce: String,
    pub salt: String,
    pub kdf_params: KdfParams,
}

/// One `(user, scope)` key row: DEK and blind-index key, each wrapped under MK.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeKeyRow {
    pub wrapped_dek: String,
    pub wrapped_dek_nonce: String,
    /// Absent on rows written before blind indexing was introduced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped_bi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped_bi_nonce: Option<String>,
}

/// Ciphertext and nonce of a single encrypted record attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    pub ciphertext: String,
    pub nonce: String,
}
