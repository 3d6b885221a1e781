//! Per-scope key pairs (DEK + blind index key), created lazily under the MK
//!
//! One row per `(user, scope)`. The first caller to touch a scope generates
//! both keys, wraps them under the master key and inserts the row; everyone
//! after that unwraps the stored pair. Two writers racing on the first insert
//! are settled by the store: the loser gets `ScopeKeyConflict`, re-reads, and
//! adopts the winner's keys.

use custodia_core::{CustodiaError, CustodiaResult, ScopeKeyRow};
use custodia_crypto::{unwrap_key, wrap_key, BlindIndexKey, DataKey, KeyBytes, MasterKey, WrappedKey};
use custodia_store::RecordStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Unwrapped key pair for one scope. Both keys zeroize on drop.
#[derive(Debug)]
pub struct ScopeKeys {
    dek: DataKey,
    bi: Option<BlindIndexKey>,
}

impl ScopeKeys {
    pub fn dek(&self) -> &DataKey {
        &self.dek
    }

    /// `None` for rows written before blind indexing existed.
    pub fn blind_index_key(&self) -> Option<&BlindIndexKey> {
        self.bi.as_ref()
    }
}

/// Fetch-or-create for scope keys, with a per-session cache.
pub struct ScopeKeyManager {
    store: Arc<dyn RecordStore>,
    user_id: String,
    cache: HashMap<String, ScopeKeys>,
}

impl ScopeKeyManager {
    pub fn new(store: Arc<dyn RecordStore>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
            cache: HashMap::new(),
        }
    }

    /// Return the scope's keys, loading or creating the row on first access.
    ///
    /// The cache is only populated after the row is known to be persisted,
    /// so dropping this future part way leaves nothing behind.
    pub async fn get_or_create(
        &mut self,
        master: &MasterKey,
        scope: &str,
    ) -> CustodiaResult<&ScopeKeys> {
        if self.cache.contains_key(scope) {
            tracing::debug!(user = %self.user_id, scope, "scope keys cache hit");
        } else {
            let keys = self.load_or_create(master, scope).await?;
            self.cache.insert(scope.to_string(), keys);
        }

        self.cache
            .get(scope)
            .ok_or_else(|| CustodiaError::ScopeNotInitialized(scope.to_string()))
    }

    /// Cached keys only; never touches the store.
    pub fn get(&self, scope: &str) -> Option<&ScopeKeys> {
        self.cache.get(scope)
    }

    pub fn cached_scopes(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached key pair.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    async fn load_or_create(&self, master: &MasterKey, scope: &str) -> CustodiaResult<ScopeKeys> {
        if let Some(row) = self.store.get_scope_key_row(&self.user_id, scope).await? {
            tracing::debug!(user = %self.user_id, scope, "unwrapping stored scope keys");
            return open_row(master, scope, &row);
        }

        let keys = ScopeKeys {
            dek: DataKey::generate(),
            bi: Some(BlindIndexKey::generate()),
        };
        let row = seal_row(master, &keys)?;

        match self
            .store
            .insert_scope_key_row(&self.user_id, scope, &row)
            .await
        {
            Ok(()) => {
                tracing::debug!(user = %self.user_id, scope, "created scope keys");
                Ok(keys)
            }
            Err(CustodiaError::ScopeKeyConflict { .. }) => {
                tracing::debug!(
                    user = %self.user_id,
                    scope,
                    "scope keys created concurrently, adopting stored row"
                );
                let winner = self
                    .store
                    .get_scope_key_row(&self.user_id, scope)
                    .await?
                    .ok_or_else(|| {
                        CustodiaError::Store(format!(
                            "scope key row for {scope} missing after insert conflict"
                        ))
                    })?;
                open_row(master, scope, &winner)
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for ScopeKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopeKeyManager")
            .field("user_id", &self.user_id)
            .field("cached_scopes", &self.cache.len())
            .finish()
    }
}

fn seal_row(master: &MasterKey, keys: &ScopeKeys) -> CustodiaResult<ScopeKeyRow> {
    let (wrapped_dek, wrapped_dek_nonce) = wrap_key(master, &keys.dek)?.to_text();
    let (wrapped_bi, wrapped_bi_nonce) = match &keys.bi {
        Some(bi) => {
            let (ct, nonce) = wrap_key(master, bi)?.to_text();
            (Some(ct), Some(nonce))
        }
        None => (None, None),
    };

    Ok(ScopeKeyRow {
        wrapped_dek,
        wrapped_dek_nonce,
        wrapped_bi,
        wrapped_bi_nonce,
    })
}

fn open_row(master: &MasterKey, scope: &str, row: &ScopeKeyRow) -> CustodiaResult<ScopeKeys> {
    let dek_wrapped = WrappedKey::from_text(&row.wrapped_dek, &row.wrapped_dek_nonce)?;
    let dek: DataKey = unwrap_key(master, &dek_wrapped)?;

    let bi = match (&row.wrapped_bi, &row.wrapped_bi_nonce) {
        (Some(ct), Some(nonce)) => {
            let wrapped = WrappedKey::from_text(ct, nonce)?;
            Some(unwrap_key::<BlindIndexKey>(master, &wrapped)?)
        }
        (None, None) => {
            tracing::debug!(scope, "scope row has no blind index key");
            None
        }
        _ => {
            return Err(CustodiaError::MalformedCiphertext(format!(
                "scope {scope}: blind index key and nonce must be stored together"
            )))
        }
    };

    Ok(ScopeKeys { dek, bi })
}
