//! Master key lifecycle: unlock, first-use bootstrap, passphrase rotation
//!
//! Unlock flow:
//!   1. Fetch the profile's key material from the store
//!   2. Present → derive KEK from stored salt + params, unwrap MK
//!   3. Absent  → bootstrap: fresh salt, random MK, wrap, persist
//!
//! A failed unwrap surfaces as the generic `Authentication` error and writes
//! nothing. There is no retry or backoff here; rate limiting belongs to the
//! host.

use custodia_core::config::KdfConfig;
use custodia_core::{CustodiaError, CustodiaResult, ProfileKeyMaterial};
use custodia_crypto::codec::{self, decode_bytes, encode_bytes, is_legacy_encoding};
use custodia_crypto::{derive_kek, generate_salt, unwrap_key, validate_params, wrap_key};
use custodia_crypto::{KeyBytes, MasterKey, WrappedKey};
use custodia_store::RecordStore;
use secrecy::SecretString;
use std::sync::Arc;

/// Owns the unlock/bootstrap/rotate operations for master keys.
#[derive(Clone)]
pub struct MasterKeyManager {
    store: Arc<dyn RecordStore>,
    kdf: KdfConfig,
}

impl MasterKeyManager {
    /// `kdf` applies to new wrappings only; existing profiles keep the
    /// parameters stored with them.
    pub fn new(store: Arc<dyn RecordStore>, kdf: KdfConfig) -> Self {
        Self { store, kdf }
    }

    /// Unwrap the user's master key, bootstrapping the profile on first use.
    pub async fn unlock(
        &self,
        user_id: &str,
        passphrase: &SecretString,
    ) -> CustodiaResult<MasterKey> {
        match self.store.get_profile_key_material(user_id).await? {
            Some(material) => self.unlock_existing(user_id, passphrase, &material).await,
            None => self.bootstrap(user_id, passphrase).await,
        }
    }

    /// Re-wrap an unlocked master key under a new passphrase.
    ///
    /// The old wrapped copy is overwritten, so the old passphrase stops
    /// working. Scope keys are untouched because the MK itself is unchanged.
    pub async fn rewrap(
        &self,
        user_id: &str,
        master: &MasterKey,
        new_passphrase: &SecretString,
    ) -> CustodiaResult<()> {
        let material = self.seal_profile(master, new_passphrase)?;
        self.store
            .set_profile_key_material(user_id, &material)
            .await?;

        tracing::info!(user = user_id, "master key rewrapped under new passphrase");
        Ok(())
    }

    async fn unlock_existing(
        &self,
        user_id: &str,
        passphrase: &SecretString,
        material: &ProfileKeyMaterial,
    ) -> CustodiaResult<MasterKey> {
        // Params are checked first: an unsupported KDF is a deployment
        // problem, not a passphrase oracle.
        validate_params(&material.kdf_params)?;

        let master = open_profile(passphrase, material).map_err(|e| {
            tracing::debug!(user = user_id, error = %e, "master key unwrap failed");
            CustodiaError::Authentication
        })?;

        if uses_legacy_encoding(material) {
            self.normalize_profile(user_id, material).await;
        }

        tracing::debug!(user = user_id, "master key unlocked");
        Ok(master)
    }

    async fn bootstrap(
        &self,
        user_id: &str,
        passphrase: &SecretString,
    ) -> CustodiaResult<MasterKey> {
        let master = MasterKey::generate();
        let material = self.seal_profile(&master, passphrase)?;
        self.store
            .set_profile_key_material(user_id, &material)
            .await?;

        // A concurrent first unlock may have overwritten our upsert. Scope rows
        // get wrapped under whatever MK is stored, so follow the stored one.
        match self.store.get_profile_key_material(user_id).await? {
            Some(stored) if stored.wrapped_mk != material.wrapped_mk => {
                tracing::debug!(user = user_id, "lost bootstrap race, unlocking stored profile");
                return self.unlock_existing(user_id, passphrase, &stored).await;
            }
            Some(_) => {}
            None => {
                return Err(CustodiaError::Store(
                    "profile key material missing after bootstrap".into(),
                ))
            }
        }

        tracing::info!(
            user = user_id,
            iterations = material.kdf_params.iterations,
            "bootstrapped new master key"
        );
        Ok(master)
    }

    /// Fresh salt + configured params, KEK from `passphrase`, MK wrapped under it.
    fn seal_profile(
        &self,
        master: &MasterKey,
        passphrase: &SecretString,
    ) -> CustodiaResult<ProfileKeyMaterial> {
        let kdf_params = self.kdf.params();
        validate_params(&kdf_params)?;

        let salt = generate_salt(self.kdf.salt_len);
        let kek = derive_kek(passphrase, &salt, &kdf_params)?;
        let wrapped = wrap_key(&kek, master)?;
        let (wrapped_mk, wrapped_mk_nonce) = wrapped.to_text();

        Ok(ProfileKeyMaterial {
            wrapped_mk,
            wrapped_mk_nonce,
            salt: encode_bytes(&salt),
            kdf_params,
        })
    }

    /// Rewrite legacy-hex material in canonical base64. Best effort: the
    /// unlock already succeeded and the old form stays readable.
    async fn normalize_profile(&self, user_id: &str, material: &ProfileKeyMaterial) {
        let result = match normalized_material(material) {
            Ok(m) => self.store.set_profile_key_material(user_id, &m).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => tracing::info!(user = user_id, "normalized legacy key material encoding"),
            Err(e) => {
                tracing::warn!(user = user_id, error = %e, "could not normalize legacy key material")
            }
        }
    }
}

fn open_profile(
    passphrase: &SecretString,
    material: &ProfileKeyMaterial,
) -> CustodiaResult<MasterKey> {
    let salt = decode_bytes(&material.salt)?;
    let wrapped = WrappedKey::from_text(&material.wrapped_mk, &material.wrapped_mk_nonce)?;
    let kek = derive_kek(passphrase, &salt, &material.kdf_params)?;
    unwrap_key(&kek, &wrapped)
}

fn normalized_material(material: &ProfileKeyMaterial) -> CustodiaResult<ProfileKeyMaterial> {
    Ok(ProfileKeyMaterial {
        wrapped_mk: codec::normalize(&material.wrapped_mk)?,
        wrapped_mk_nonce: codec::normalize(&material.wrapped_mk_nonce)?,
        salt: codec::normalize(&material.salt)?,
        kdf_params: material.kdf_params.clone(),
    })
}

fn uses_legacy_encoding(material: &ProfileKeyMaterial) -> bool {
    [
        &material.wrapped_mk,
        &material.wrapped_mk_nonce,
        &material.salt,
    ]
    .iter()
    .any(|v| is_legacy_encoding(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use custodia_core::types::MIN_KDF_ITERATIONS;
    use custodia_core::{EncryptedField, ScopeKeyRow};
    use custodia_store::MemoryStore;
    use tokio::sync::Mutex;

    fn fast_kdf() -> KdfConfig {
        KdfConfig {
            iterations: MIN_KDF_ITERATIONS,
            ..KdfConfig::default()
        }
    }

    fn manager(store: &MemoryStore) -> MasterKeyManager {
        MasterKeyManager::new(Arc::new(store.clone()), fast_kdf())
    }

    #[tokio::test]
    async fn test_bootstrap_then_unlock_same_key() {
        let store = MemoryStore::new();
        let mgr = manager(&store);
        let pass = SecretString::from("correct horse");

        let first = mgr.unlock("u1", &pass).await.unwrap();
        let second = mgr.unlock("u1", &pass).await.unwrap();

        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[tokio::test]
    async fn test_bootstrap_persists_configured_params() {
        let store = MemoryStore::new();
        manager(&store)
            .unlock("u1", &SecretString::from("pw-123456"))
            .await
            .unwrap();

        let material = store.get_profile_key_material("u1").await.unwrap().unwrap();
        assert_eq!(material.kdf_params.iterations, MIN_KDF_ITERATIONS);
        assert_eq!(decode_bytes(&material.salt).unwrap().len(), 16);
        assert!(!material.wrapped_mk.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_passphrase_is_generic_and_writes_nothing() {
        let store = MemoryStore::new();
        let mgr = manager(&store);
        mgr.unlock("u1", &SecretString::from("right")).await.unwrap();
        let before = store.snapshot().await;

        let err = mgr
            .unlock("u1", &SecretString::from("wrong"))
            .await
            .unwrap_err();

        assert!(matches!(err, CustodiaError::Authentication));
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_unsupported_config() {
        let store = MemoryStore::new();
        let mgr = MasterKeyManager::new(
            Arc::new(store.clone()),
            KdfConfig {
                algorithm: "bcrypt".into(),
                ..fast_kdf()
            },
        );

        let err = mgr
            .unlock("u1", &SecretString::from("pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, CustodiaError::UnsupportedAlgorithm(_)));
        assert!(store.get_profile_key_material("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rewrap_switches_passphrase() {
        let store = MemoryStore::new();
        let mgr = manager(&store);
        let old = SecretString::from("old-pass");
        let new = SecretString::from("new-pass");

        let master = mgr.unlock("u1", &old).await.unwrap();
        mgr.rewrap("u1", &master, &new).await.unwrap();

        assert!(matches!(
            mgr.unlock("u1", &old).await,
            Err(CustodiaError::Authentication)
        ));
        let again = mgr.unlock("u1", &new).await.unwrap();
        assert_eq!(again.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_legacy_detection() {
        let mut material = ProfileKeyMaterial {
            wrapped_mk: "AAAA".into(),
            wrapped_mk_nonce: "AAAA".into(),
            salt: "AAAA".into(),
            kdf_params: Default::default(),
        };
        assert!(!uses_legacy_encoding(&material));
        material.salt = "\\x0011".into();
        assert!(uses_legacy_encoding(&material));
    }

    /// The first profile upsert lands, then another writer's material replaces it.
    struct OverwrittenProfileStore {
        inner: MemoryStore,
        winner: Mutex<Option<ProfileKeyMaterial>>,
    }

    #[async_trait]
    impl RecordStore for OverwrittenProfileStore {
        async fn get_profile_key_material(
            &self,
            user_id: &str,
        ) -> CustodiaResult<Option<ProfileKeyMaterial>> {
            self.inner.get_profile_key_material(user_id).await
        }

        async fn set_profile_key_material(
            &self,
            user_id: &str,
            material: &ProfileKeyMaterial,
        ) -> CustodiaResult<()> {
            self.inner.set_profile_key_material(user_id, material).await?;
            let winner = self.winner.lock().await.take();
            if let Some(winner) = winner {
                self.inner.set_profile_key_material(user_id, &winner).await?;
            }
            Ok(())
        }

        async fn get_scope_key_row(
            &self,
            user_id: &str,
            scope: &str,
        ) -> CustodiaResult<Option<ScopeKeyRow>> {
            self.inner.get_scope_key_row(user_id, scope).await
        }

        async fn insert_scope_key_row(
            &self,
            user_id: &str,
            scope: &str,
            row: &ScopeKeyRow,
        ) -> CustodiaResult<()> {
            self.inner.insert_scope_key_row(user_id, scope, row).await
        }

        async fn read_encrypted_field(
            &self,
            table: &str,
            record_id: &str,
            field: &str,
        ) -> CustodiaResult<Option<EncryptedField>> {
            self.inner.read_encrypted_field(table, record_id, field).await
        }

        async fn write_encrypted_field(
            &self,
            table: &str,
            record_id: &str,
            field: &str,
            value: &EncryptedField,
        ) -> CustodiaResult<()> {
            self.inner
                .write_encrypted_field(table, record_id, field, value)
                .await
        }
    }

    #[tokio::test]
    async fn test_bootstrap_race_follows_stored_profile() {
        let pass = SecretString::from("pw-123456");

        // the other writer's profile, bootstrapped elsewhere with the same passphrase
        let elsewhere = MemoryStore::new();
        let winning_mk = manager(&elsewhere).unlock("u1", &pass).await.unwrap();
        let winning = elsewhere.get_profile_key_material("u1").await.unwrap();

        let inner = MemoryStore::new();
        let racing = MasterKeyManager::new(
            Arc::new(OverwrittenProfileStore {
                inner: inner.clone(),
                winner: Mutex::new(winning.clone()),
            }),
            fast_kdf(),
        );

        let master = racing.unlock("u1", &pass).await.unwrap();
        assert_eq!(master.as_bytes(), winning_mk.as_bytes());
        assert_eq!(inner.get_profile_key_material("u1").await.unwrap(), winning);

        // a later plain unlock agrees with the key handed out during the race
        let again = manager(&inner).unlock("u1", &pass).await.unwrap();
        assert_eq!(again.as_bytes(), master.as_bytes());
    }
}
