//! Batch field encryption and decryption for one record
//!
//! Values are JSON. The plaintext of a field is the compact JSON encoding of
//! its value, so a string `Bar Centrale` is sealed as `"Bar Centrale"` and a
//! number keeps its type on the way back. Bare UTF-8 that is not JSON is read
//! back as a string.
//!
//! Decrypt policy for a batch: a field that fails its integrity check (or
//! cannot be decoded) comes back as `None` and is logged; the rest of the
//! batch still decrypts. If every field that had ciphertext failed, the
//! first error is returned instead, which is what a record opened under the
//! wrong id looks like.

use custodia_core::{CustodiaError, CustodiaResult, EncryptedField};
use custodia_crypto::{build_aad, decrypt_field, encrypt_field, Sealed};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::scope::ScopeKeys;

/// Column suffix for a field's ciphertext in row-shaped records.
pub const CIPHERTEXT_SUFFIX: &str = "_enc";
/// Column suffix for a field's nonce in row-shaped records.
pub const NONCE_SUFFIX: &str = "_iv";

/// Decrypted values by field name. `None` means absent or unreadable.
pub type DecryptedFields = BTreeMap<String, Option<Value>>;

/// Encrypted values by field name, as base64 text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptedFields(BTreeMap<String, EncryptedField>);

impl EncryptedFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: EncryptedField) {
        self.0.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&EncryptedField> {
        self.0.get(field)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EncryptedField)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flatten into `<field>_enc` / `<field>_iv` row columns.
    pub fn into_row_columns(self) -> Map<String, Value> {
        let mut row = Map::new();
        for (field, value) in self.0 {
            row.insert(
                format!("{field}{CIPHERTEXT_SUFFIX}"),
                Value::String(value.ciphertext),
            );
            row.insert(format!("{field}{NONCE_SUFFIX}"), Value::String(value.nonce));
        }
        row
    }
}

impl FromIterator<(String, EncryptedField)> for EncryptedFields {
    fn from_iter<I: IntoIterator<Item = (String, EncryptedField)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for EncryptedFields {
    type Item = (String, EncryptedField);
    type IntoIter = std::collections::btree_map::IntoIter<String, EncryptedField>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Encrypt every non-null, non-empty value under the scope DEK.
pub fn encrypt_fields(
    keys: &ScopeKeys,
    table: &str,
    record_id: &str,
    fields: &Map<String, Value>,
) -> CustodiaResult<EncryptedFields> {
    let mut out = EncryptedFields::new();
    for (name, value) in fields {
        if is_blank(value) {
            continue;
        }
        let plaintext = serde_json::to_vec(value)
            .map_err(|e| CustodiaError::Crypto(format!("encoding field {name}: {e}")))?;
        let aad = build_aad(table, name, record_id);
        let (ciphertext, nonce) = encrypt_field(keys.dek(), &aad, &plaintext)?.to_text();
        out.insert(name.clone(), EncryptedField { ciphertext, nonce });
    }

    tracing::debug!(table, record = record_id, fields = out.len(), "encrypted fields");
    Ok(out)
}

/// Decrypt one stored field. Every failure is returned.
pub fn decrypt_one(
    keys: &ScopeKeys,
    table: &str,
    record_id: &str,
    field: &str,
    stored: &EncryptedField,
) -> CustodiaResult<Value> {
    let sealed = Sealed::from_text(&stored.ciphertext, &stored.nonce)?;
    let aad = build_aad(table, field, record_id);
    let plaintext = decrypt_field(keys.dek(), &aad, &sealed)?;

    match serde_json::from_slice(&plaintext) {
        Ok(value) => Ok(value),
        Err(_) => String::from_utf8(plaintext).map(Value::String).map_err(|_| {
            CustodiaError::MalformedCiphertext(format!("field {field}: plaintext is not UTF-8"))
        }),
    }
}

/// Decrypt `names` out of map-shaped stored values.
pub fn decrypt_fields(
    keys: &ScopeKeys,
    table: &str,
    record_id: &str,
    stored: &EncryptedFields,
    names: &[&str],
) -> CustodiaResult<DecryptedFields> {
    decrypt_batch(keys, table, record_id, names, |name| {
        Ok(stored.get(name).cloned())
    })
}

/// Decrypt `names` out of a row carrying `<field>_enc` / `<field>_iv` columns.
pub fn decrypt_row(
    keys: &ScopeKeys,
    table: &str,
    record_id: &str,
    row: &Map<String, Value>,
    names: &[&str],
) -> CustodiaResult<DecryptedFields> {
    decrypt_batch(keys, table, record_id, names, |name| row_field(row, name))
}

fn decrypt_batch<F>(
    keys: &ScopeKeys,
    table: &str,
    record_id: &str,
    names: &[&str],
    mut lookup: F,
) -> CustodiaResult<DecryptedFields>
where
    F: FnMut(&str) -> CustodiaResult<Option<EncryptedField>>,
{
    let mut out = DecryptedFields::new();
    let mut attempted = 0usize;
    let mut failed = 0usize;
    let mut first_error = None;

    for &name in names {
        let result = match lookup(name) {
            Ok(None) => {
                out.insert(name.to_string(), None);
                continue;
            }
            Ok(Some(stored)) => decrypt_one(keys, table, record_id, name, &stored),
            Err(e) => Err(e),
        };
        attempted += 1;

        match result {
            Ok(value) => {
                out.insert(name.to_string(), Some(value));
            }
            Err(e) if e.is_unreadable() => {
                tracing::warn!(table, record = record_id, field = name, error = %e, "field could not be decrypted");
                failed += 1;
                first_error.get_or_insert(e);
                out.insert(name.to_string(), None);
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(e) = first_error {
        if failed == attempted {
            return Err(e);
        }
    }
    Ok(out)
}

/// Both columns present → stored value; both absent or null → `None`.
fn row_field(row: &Map<String, Value>, name: &str) -> CustodiaResult<Option<EncryptedField>> {
    let ciphertext = row.get(&format!("{name}{CIPHERTEXT_SUFFIX}"));
    let nonce = row.get(&format!("{name}{NONCE_SUFFIX}"));

    match (non_null(ciphertext), non_null(nonce)) {
        (None, None) => Ok(None),
        (Some(Value::String(ct)), Some(Value::String(iv))) => Ok(Some(EncryptedField {
            ciphertext: ct.clone(),
            nonce: iv.clone(),
        })),
        _ => Err(CustodiaError::MalformedCiphertext(format!(
            "field {name}: ciphertext and nonce columns must both be strings"
        ))),
    }
}

fn non_null(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
