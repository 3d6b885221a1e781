use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CustodiaError, CustodiaResult};
use crate::types::{KdfParams, DEFAULT_KDF_ITERATIONS, MIN_KDF_ITERATIONS};

/// Top-level configuration (loaded from custodia.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodiaConfig {
    pub kdf: KdfConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
}

/// Parameters applied when a profile is bootstrapped or its passphrase rotated.
///
/// Existing profiles keep the parameters they were created with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// KDF name (default: PBKDF2)
    pub algorithm: String,
    /// PRF hash (default: SHA-256)
    pub hash: String,
    /// Iteration count (default: 310000, minimum 100000)
    pub iterations: u32,
    /// Salt length in bytes (default: 16)
    pub salt_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON record store used by the CLI
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            algorithm: "PBKDF2".into(),
            hash: "SHA-256".into(),
            iterations: DEFAULT_KDF_ITERATIONS,
            salt_len: 16,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/custodia/store.json"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl KdfConfig {
    /// The `KdfParams` record persisted for newly wrapped master keys.
    pub fn params(&self) -> KdfParams {
        KdfParams {
            algorithm: self.algorithm.clone(),
            iterations: self.iterations,
            hash: self.hash.clone(),
        }
    }

    /// Reject settings that would produce a weaker profile than allowed.
    ///
    /// Algorithm/hash names are checked by the KDF itself at derive time.
    pub fn validate(&self) -> CustodiaResult<()> {
        if self.iterations < MIN_KDF_ITERATIONS {
            return Err(CustodiaError::Config(format!(
                "kdf.iterations = {} is below the minimum of {MIN_KDF_ITERATIONS}",
                self.iterations
            )));
        }
        if self.salt_len < 16 {
            return Err(CustodiaError::Config(format!(
                "kdf.salt_len = {} is below the minimum of 16 bytes",
                self.salt_len
            )));
        }
        Ok(())
    }
}

impl CustodiaConfig {
    pub fn from_toml_str(content: &str) -> CustodiaResult<Self> {
        let config: CustodiaConfig =
            toml::from_str(content).map_err(|e| CustodiaError::Config(e.to_string()))?;
        config.kdf.validate()?;
        Ok(config)
    }
}
