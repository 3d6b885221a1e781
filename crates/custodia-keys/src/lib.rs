//! custodia-keys: the key hierarchy as seen by an application
//!
//! ```text
//! Vault::unlock(user, passphrase) ──► Session
//!                                      ├── master key (unwrapped or bootstrapped)
//!                                      ├── scope key cache: scope → (DEK, BI key)
//!                                      ├── encrypt_fields / decrypt_fields / decrypt_row
//!                                      ├── compute_blind_index
//!                                      └── lock() zeroizes everything above
//! ```
//!
//! The `Session` is owned by the caller. There is no process-wide key cache:
//! dropping or locking the session is the only way keys leave memory, and the
//! host decides when that happens (logout, inactivity).

pub mod fields;
pub mod master;
pub mod scope;
pub mod session;

pub use fields::{DecryptedFields, EncryptedFields};
pub use master::MasterKeyManager;
pub use scope::{ScopeKeyManager, ScopeKeys};
pub use session::{Session, Vault};
