use thiserror::Error;

pub type CustodiaResult<T> = Result<T, CustodiaError>;

#[derive(Debug, Error)]
pub enum CustodiaError {
    /// Wrong passphrase or unusable profile. Deliberately carries no detail.
    #[error("authentication failed: unable to unlock with the supplied passphrase")]
    Authentication,

    #[error("vault is locked: unlock with a passphrase first")]
    NotUnlocked,

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("scope '{0}' is not initialized in this session")]
    ScopeNotInitialized(String),

    #[error("scope '{0}' has no blind-index key")]
    BlindIndexUnavailable(String),

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("unsupported KDF parameters: {0}")]
    UnsupportedAlgorithm(String),

    #[error("scope key row already exists for user '{user_id}', scope '{scope}'")]
    ScopeKeyConflict { user_id: String, scope: String },

    #[error("cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CustodiaError {
    /// True for failures that mean "the bytes did not authenticate or decode",
    /// as opposed to missing state or backend trouble.
    pub fn is_unreadable(&self) -> bool {
        matches!(
            self,
            CustodiaError::Integrity(_) | CustodiaError::MalformedCiphertext(_)
        )
    }
}
