//! JSON file record store
//!
//! The whole store lives in one JSON document. Every mutation runs under an
//! exclusive lock on a sidecar `.<name>.lock` file, re-reads the document,
//! applies the change to those fresh contents, then writes a temp file in the
//! same directory and renames it over the original. Separate processes
//! sharing one path therefore see each other's writes, and `(user, scope)`
//! uniqueness holds across them. A failed write leaves the file as it was.
//!
//! Reads are served from the copy held in memory, refreshed on every commit.

use async_trait::async_trait;
use custodia_core::{
    CustodiaError, CustodiaResult, EncryptedField, ProfileKeyMaterial, ScopeKeyRow,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::tables::StoreTables;
use crate::RecordStore;

pub struct JsonFileStore {
    path: PathBuf,
    tables: Mutex<StoreTables>,
}

impl JsonFileStore {
    /// Load or create a store at the given path.
    /// If the file doesn't exist, starts empty; nothing is written until the
    /// first mutation.
    pub async fn open(path: &Path) -> CustodiaResult<Self> {
        let tables = load_tables(path).await?;

        tracing::debug!(path = %path.display(), "opened JSON record store");
        Ok(Self {
            path: path.to_path_buf(),
            tables: Mutex::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current contents.
    pub async fn snapshot(&self) -> StoreTables {
        self.tables.lock().await.clone()
    }

    /// Apply `mutate` to the on-disk contents under the file lock, persist,
    /// then publish.
    ///
    /// The in-memory copy is refreshed from disk even when `mutate` fails, so
    /// a conflicting insert is followed by a read that sees the winning row.
    async fn commit<F>(&self, mutate: F) -> CustodiaResult<()>
    where
        F: FnOnce(&mut StoreTables) -> CustodiaResult<()>,
    {
        let mut guard = self.tables.lock().await;
        let _lock = lock_exclusive(&self.path).await?;

        let current = load_tables(&self.path).await?;
        let mut next = current.clone();
        *guard = current;
        mutate(&mut next)?;

        let content = serde_json::to_string_pretty(&next)
            .map_err(|e| CustodiaError::Store(format!("serializing store: {e}")))?;
        atomic_replace(&self.path, &content).await?;

        *guard = next;
        Ok(())
    }
}

async fn load_tables(path: &Path) -> CustodiaResult<StoreTables> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).map_err(|e| {
            CustodiaError::Store(format!("parsing store {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreTables::default()),
        Err(e) => Err(e.into()),
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    parent_dir(path).join(format!(
        ".{}.{suffix}",
        path.file_name().unwrap_or_default().to_string_lossy()
    ))
}

/// Take the exclusive advisory lock guarding `path`.
///
/// The lock lives as long as the returned handle; dropping it releases the
/// lock. Acquisition blocks, so it runs on the blocking pool.
async fn lock_exclusive(path: &Path) -> CustodiaResult<File> {
    tokio::fs::create_dir_all(parent_dir(path)).await?;
    let lock_path = sidecar(path, "lock");

    tokio::task::spawn_blocking(move || -> CustodiaResult<File> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;
        file.lock()?;
        Ok(file)
    })
    .await
    .map_err(|e| CustodiaError::Store(format!("acquiring store lock: {e}")))?
}

/// Atomically replace a file with new content.
///
/// Writes to a temp file in the same directory, then renames, so readers
/// never observe a partial document.
pub async fn atomic_replace(path: &Path, new_content: &str) -> CustodiaResult<()> {
    tokio::fs::create_dir_all(parent_dir(path)).await?;
    let tmp_path = sidecar(path, "tmp");

    tokio::fs::write(&tmp_path, new_content.as_bytes()).await?;
    tokio::fs::rename(&tmp_path, path).await?;

    tracing::trace!(path = %path.display(), "record store flushed");
    Ok(())
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn get_profile_key_material(
        &self,
        user_id: &str,
    ) -> CustodiaResult<Option<ProfileKeyMaterial>> {
        Ok(self.tables.lock().await.profile(user_id).cloned())
    }

    async fn set_profile_key_material(
        &self,
        user_id: &str,
        material: &ProfileKeyMaterial,
    ) -> CustodiaResult<()> {
        self.commit(|t| {
            t.set_profile(user_id, material.clone());
            Ok(())
        })
        .await
    }

    async fn get_scope_key_row(
        &self,
        user_id: &str,
        scope: &str,
    ) -> CustodiaResult<Option<ScopeKeyRow>> {
        Ok(self.tables.lock().await.scope_row(user_id, scope).cloned())
    }

    async fn insert_scope_key_row(
        &self,
        user_id: &str,
        scope: &str,
        row: &ScopeKeyRow,
    ) -> CustodiaResult<()> {
        self.commit(|t| t.insert_scope_row(user_id, scope, row.clone()))
            .await
    }

    async fn read_encrypted_field(
        &self,
        table: &str,
        record_id: &str,
        field: &str,
    ) -> CustodiaResult<Option<EncryptedField>> {
        Ok(self
            .tables
            .lock()
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
        self.commit(|t| {
            t.set_field(table, record_id, field, value.clone());
            Ok(())
        })
        .await
    }
}
