//! In-memory table layout shared by every backend.

use custodia_core::{
    CustodiaError, CustodiaResult, EncryptedField, ProfileKeyMaterial, ScopeKeyRow,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Full store contents. Serialized as-is by the JSON backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreTables {
    /// user id → profile key material
    pub profiles: BTreeMap<String, ProfileKeyMaterial>,
    /// user id → scope → key row
    pub scope_keys: BTreeMap<String, BTreeMap<String, ScopeKeyRow>>,
    /// table → record id → field → ciphertext
    pub fields: BTreeMap<String, BTreeMap<String, BTreeMap<String, EncryptedField>>>,
}

impl StoreTables {
    pub fn profile(&self, user_id: &str) -> Option<&ProfileKeyMaterial> {
        self.profiles.get(user_id)
    }

    pub fn set_profile(&mut self, user_id: &str, material: ProfileKeyMaterial) {
        self.profiles.insert(user_id.to_string(), material);
    }

    pub fn scope_row(&self, user_id: &str, scope: &str) -> Option<&ScopeKeyRow> {
        self.scope_keys.get(user_id).and_then(|rows| rows.get(scope))
    }

    /// Insert a scope key row, enforcing `(user, scope)` uniqueness.
    pub fn insert_scope_row(
        &mut self,
        user_id: &str,
        scope: &str,
        row: ScopeKeyRow,
    ) -> CustodiaResult<()> {
        let rows = self.scope_keys.entry(user_id.to_string()).or_default();
        if rows.contains_key(scope) {
            return Err(CustodiaError::ScopeKeyConflict {
                user_id: user_id.to_string(),
                scope: scope.to_string(),
            });
        }
        rows.insert(scope.to_string(), row);
        Ok(())
    }

    /// Number of scope key rows stored for a user.
    pub fn scope_row_count(&self, user_id: &str) -> usize {
        self.scope_keys.get(user_id).map_or(0, |rows| rows.len())
    }

    pub fn field(&self, table: &str, record_id: &str, field: &str) -> Option<&EncryptedField> {
        self.fields
            .get(table)
            .and_then(|records| records.get(record_id))
            .and_then(|fields| fields.get(field))
    }

    pub fn set_field(&mut self, table: &str, record_id: &str, field: &str, value: EncryptedField) {
        self.fields
            .entry(table.to_string())
            .or_default()
            .entry(record_id.to_string())
            .or_default()
            .insert(field.to_string(), value);
    }
}
