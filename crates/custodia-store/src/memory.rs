//! In-memory record store.

use async_trait::async_trait;
use custodia_core::{CustodiaResult, EncryptedField, ProfileKeyMaterial, ScopeKeyRow};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::tables::StoreTables;
use crate::RecordStore;

/// Thread-safe in-memory store. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<StoreTables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from existing tables (e.g. legacy fixtures).
    pub fn from_tables(tables: StoreTables) -> Self {
        Self {
            tables: Arc::new(RwLock::new(tables)),
        }
    }

    /// Copy of the current contents.
    pub async fn snapshot(&self) -> StoreTables {
        self.tables.read().await.clone()
    }

    /// Number of scope key rows held for a user.
    pub async fn scope_row_count(&self, user_id: &str) -> usize {
        self.tables.read().await.scope_row_count(user_id)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_profile_key_material(
        &self,
        user_id: &str,
    ) -> CustodiaResult<Option<ProfileKeyMaterial>> {
        Ok(self.tables.read().await.profile(user_id).cloned())
    }

    async fn set_profile_key_material(
        &self,
        user_id: &str,
        material: &ProfileKeyMaterial,
    ) -> CustodiaResult<()> {
        self.tables
            .write()
            .await
            .set_profile(user_id, material.clone());
        Ok(())
    }

    async fn get_scope_key_row(
        &self,
        user_id: &str,
        scope: &str,
    ) -> CustodiaResult<Option<ScopeKeyRow>> {
        Ok(self.tables.read().await.scope_row(user_id, scope).cloned())
    }

    async fn insert_scope_key_row(
        &self,
        user_id: &str,
        scope: &str,
        row: &ScopeKeyRow,
    ) -> CustodiaResult<()> {
        self.tables
            .write()
            .await
            .insert_scope_row(user_id, scope, row.clone())
    }

    async fn read_encrypted_field(
        &self,
        table: &str,
        record_id: &str,
        field: &str,
    ) -> CustodiaResult<Option<EncryptedField>> {
        Ok(self
            .tables
            .read()
            .await
            .field(table, record_id, field)
            .cloned())
    }

    async fn write_encrypted_field(
        &self,
        table: &str,
        record_id: &str,
        field: &str,
        value: &EncryptedField,
    ) -> CustodiaResult<()> {
        self.tables
            .write()
            .await
            .set_field(table, record_id, field, value.clone());
        Ok(())
    }
}
