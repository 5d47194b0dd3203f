//! Durable key-value storage for session and preference blobs.
//!
//! The session manager never touches a backend directly; it is handed a
//! `KeyValueStore` so callers choose where blobs live:
//! - `KeyringStore`: OS credential store (keychain, secret service, keystore)
//! - `EncryptedFileStore`: ChaCha20-Poly1305 sealed files under a directory
//! - `MemoryStore`: process-local map, used by tests and ephemeral runs

pub mod error;
pub mod file;
pub mod keychain;
pub mod memory;

pub use error::StorageError;
pub use file::EncryptedFileStore;
pub use keychain::KeyringStore;
pub use memory::MemoryStore;

/// Storage key holding the serialized session.
pub const SESSION_KEY: &str = "dashbite.session";

/// Storage key holding the serialized user preferences.
pub const PREFERENCES_KEY: &str = "dashbite.preferences";

/// A string-valued key-value store.
///
/// Deleting a key that does not exist succeeds.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Check whether a value is stored under `key`
    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }
}
