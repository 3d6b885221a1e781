pub mod config;
pub mod error;
pub mod types;

pub use error::{CustodiaError, CustodiaResult};
pub use types::{EncryptedField, KdfParams, ProfileKeyMaterial, ScopeKeyRow};
