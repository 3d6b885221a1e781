//! custodia-store: the Record Store collaborator
//!
//! The key hierarchy only ever persists wrapped key material and ciphertext.
//! `RecordStore` is the contract it needs from the host; two backends ship
//! with the crate:
//!   - **memory**: `tokio` `RwLock` over plain maps, for tests and embedders
//!     that persist elsewhere.
//!   - **json**: whole store in one JSON document, rewritten atomically
//!     (temp + rename) on every mutation. Used by the CLI.
//!
//! Both enforce uniqueness of `(user, scope)` key rows (the JSON backend across
//! every handle on the same file): a second insert fails
//! with `CustodiaError::ScopeKeyConflict` and leaves the first row intact.

pub mod json;
pub mod memory;
pub mod tables;

pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use tables::StoreTables;

use async_trait::async_trait;
use custodia_core::{CustodiaResult, EncryptedField, ProfileKeyMaterial, ScopeKeyRow};

/// Row/key-value persistence used by the key managers and the field cipher.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Wrapped master key + KDF inputs for a user, if the profile exists.
    async fn get_profile_key_material(
        &self,
        user_id: &str,
    ) -> CustodiaResult<Option<ProfileKeyMaterial>>;

    /// Upsert the profile key material (bootstrap and passphrase rotation).
    async fn set_profile_key_material(
        &self,
        user_id: &str,
        material: &ProfileKeyMaterial,
    ) -> CustodiaResult<()>;

    async fn get_scope_key_row(
        &self,
        user_id: &str,
        scope: &str,
    ) -> CustodiaResult<Option<ScopeKeyRow>>;

    /// Insert a new scope key row.
    ///
    /// Must fail with `ScopeKeyConflict` if a row for `(user_id, scope)`
    /// already exists; existing rows are never overwritten.
    async fn insert_scope_key_row(
        &self,
        user_id: &str,
        scope: &str,
        row: &ScopeKeyRow,
    ) -> CustodiaResult<()>;

    async fn read_encrypted_field(
        &self,
        table: &str,
        record_id: &str,
        field: &str,
    ) -> CustodiaResult<Option<EncryptedField>>;

    /// Upsert one encrypted attribute.
    async fn write_encrypted_field(
        &self,
        table: &str,
        record_id: &str,
        field: &str,
        value: &EncryptedField,
    ) -> CustodiaResult<()>;
}
