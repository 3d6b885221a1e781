//! Caller-owned unlocked state
//!
//! A `Vault` is stateless: it knows the store and the KDF settings for new
//! wrappings. `Vault::unlock` hands back a `Session` that owns the master key
//! and the scope key cache for one user. Nothing is shared between sessions
//! except the store.

use custodia_core::config::KdfConfig;
use custodia_core::{CustodiaError, CustodiaResult, EncryptedField};
use custodia_crypto::{blind_index, MasterKey};
use custodia_store::RecordStore;
use secrecy::SecretString;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::fields::{self, DecryptedFields, EncryptedFields};
use crate::master::MasterKeyManager;
use crate::scope::{ScopeKeyManager, ScopeKeys};

/// Entry point: turns a passphrase into a [`Session`].
#[derive(Clone)]
pub struct Vault {
    store: Arc<dyn RecordStore>,
    kdf: KdfConfig,
}

impl Vault {
    pub fn new(store: Arc<dyn RecordStore>, kdf: KdfConfig) -> Self {
        Self { store, kdf }
    }

    /// Unlock (or bootstrap) `user_id`'s master key.
    ///
    /// A wrong passphrase is `CustodiaError::Authentication` and leaves the
    /// store untouched.
    pub async fn unlock(
        &self,
        user_id: &str,
        passphrase: &SecretString,
    ) -> CustodiaResult<Session> {
        let masters = MasterKeyManager::new(self.store.clone(), self.kdf.clone());
        let master = masters.unlock(user_id, passphrase).await?;

        Ok(Session {
            user_id: user_id.to_string(),
            store: self.store.clone(),
            masters,
            master: Some(master),
            scopes: ScopeKeyManager::new(self.store.clone(), user_id),
        })
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").field("kdf", &self.kdf).finish()
    }
}

/// One user's unlocked keys. Dropping or locking it zeroizes them.
pub struct Session {
    user_id: String,
    store: Arc<dyn RecordStore>,
    masters: MasterKeyManager,
    master: Option<MasterKey>,
    scopes: ScopeKeyManager,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_unlocked(&self) -> bool {
        self.master.is_some()
    }

    /// Re-wrap the master key under `new_passphrase`.
    pub async fn rewrap(&self, new_passphrase: &SecretString) -> CustodiaResult<()> {
        let master = self.master()?;
        self.masters
            .rewrap(&self.user_id, master, new_passphrase)
            .await
    }

    /// Load the scope's key pair into this session, creating it on first use.
    pub async fn get_or_create_scope_keys(&mut self, scope: &str) -> CustodiaResult<&ScopeKeys> {
        let master = self.master.as_ref().ok_or(CustodiaError::NotUnlocked)?;
        self.scopes.get_or_create(master, scope).await
    }

    pub fn encrypt_fields(
        &self,
        scope: &str,
        table: &str,
        record_id: &str,
        values: &Map<String, Value>,
    ) -> CustodiaResult<EncryptedFields> {
        fields::encrypt_fields(self.scope_keys(scope)?, table, record_id, values)
    }

    pub fn decrypt_fields(
        &self,
        scope: &str,
        table: &str,
        record_id: &str,
        stored: &EncryptedFields,
        names: &[&str],
    ) -> CustodiaResult<DecryptedFields> {
        fields::decrypt_fields(self.scope_keys(scope)?, table, record_id, stored, names)
    }

    pub fn decrypt_row(
        &self,
        scope: &str,
        table: &str,
        record_id: &str,
        row: &Map<String, Value>,
        names: &[&str],
    ) -> CustodiaResult<DecryptedFields> {
        fields::decrypt_row(self.scope_keys(scope)?, table, record_id, row, names)
    }

    pub fn decrypt_field(
        &self,
        scope: &str,
        table: &str,
        record_id: &str,
        field: &str,
        stored: &EncryptedField,
    ) -> CustodiaResult<Value> {
        fields::decrypt_one(self.scope_keys(scope)?, table, record_id, field, stored)
    }

    /// Lowercase hex search token for `value` under the scope's BI key.
    pub fn compute_blind_index(&self, scope: &str, value: &str) -> CustodiaResult<String> {
        let key = self
            .scope_keys(scope)?
            .blind_index_key()
            .ok_or_else(|| CustodiaError::BlindIndexUnavailable(scope.to_string()))?;
        blind_index(key, value)
    }

    /// Encrypt `values` and write each field through the store.
    pub async fn store_fields(
        &mut self,
        scope: &str,
        table: &str,
        record_id: &str,
        values: &Map<String, Value>,
    ) -> CustodiaResult<EncryptedFields> {
        self.get_or_create_scope_keys(scope).await?;
        let encrypted = self.encrypt_fields(scope, table, record_id, values)?;

        for (field, value) in encrypted.iter() {
            self.store
                .write_encrypted_field(table, record_id, field, value)
                .await?;
        }
        Ok(encrypted)
    }

    /// Read `names` from the store and decrypt them with the batch policy.
    pub async fn load_fields(
        &mut self,
        scope: &str,
        table: &str,
        record_id: &str,
        names: &[&str],
    ) -> CustodiaResult<DecryptedFields> {
        self.get_or_create_scope_keys(scope).await?;

        let mut stored = EncryptedFields::new();
        for &name in names {
            if let Some(value) = self.store.read_encrypted_field(table, record_id, name).await? {
                stored.insert(name, value);
            }
        }
        self.decrypt_fields(scope, table, record_id, &stored, names)
    }

    /// Drop the master key and every cached scope key.
    pub fn lock(&mut self) {
        if self.master.take().is_some() {
            tracing::info!(user = %self.user_id, "session locked");
        }
        self.scopes.clear();
    }

    fn master(&self) -> CustodiaResult<&MasterKey> {
        self.master.as_ref().ok_or(CustodiaError::NotUnlocked)
    }

    fn scope_keys(&self, scope: &str) -> CustodiaResult<&ScopeKeys> {
        self.master()?;
        self.scopes
            .get(scope)
            .ok_or_else(|| CustodiaError::ScopeNotInitialized(scope.to_string()))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("unlocked", &self.is_unlocked())
            .field("cached_scopes", &self.scopes.cached_scopes())
            .finish()
    }
}
