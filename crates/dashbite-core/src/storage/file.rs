use std::path::{Path, PathBuf};

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use tracing::debug;

use super::{KeyValueStore, StorageError};

/// Salt file name in the store directory
const SALT_FILE: &str = "store.salt";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// File-backed store that seals every value with ChaCha20-Poly1305.
///
/// The cipher key is derived from a passphrase with Argon2 and a random salt
/// kept next to the data. Each value lives in its own file as
/// `nonce || ciphertext`, with the storage key bound as associated data so a
/// file renamed to another key fails to open.
pub struct EncryptedFileStore {
    dir: PathBuf,
    cipher: ChaCha20Poly1305,
}

impl EncryptedFileStore {
    /// Open (or initialize) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>, passphrase: &str) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let salt = Self::load_or_create_salt(&dir)?;
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
            .map_err(|e| StorageError::Crypto(e.to_string()))?;

        Ok(Self {
            dir,
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load_or_create_salt(dir: &Path) -> Result<Vec<u8>, StorageError> {
        let path = dir.join(SALT_FILE);
        if path.exists() {
            let salt = std::fs::read(&path)?;
            if salt.len() != SALT_LEN {
                return Err(StorageError::Corrupt(format!(
                    "salt file has {} bytes, expected {}",
                    salt.len(),
                    SALT_LEN
                )));
            }
            return Ok(salt);
        }

        let mut salt = vec![0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        std::fs::write(&path, &salt)?;
        debug!(path = %path.display(), "Created new store salt");
        Ok(salt)
    }

    /// Map a storage key onto a safe file name
    fn value_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.bin", name))
    }
}

impl KeyValueStore for EncryptedFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.value_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let sealed = std::fs::read(&path)?;
        if sealed.len() < NONCE_LEN {
            return Err(StorageError::Corrupt(format!("value for {} is truncated", key)));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

        let plaintext = self
            .cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| StorageError::Corrupt(format!("value for {} failed authentication", key)))?;

        String::from_utf8(plaintext)
            .map(Some)
            .map_err(|_| StorageError::Corrupt(format!("value for {} is not UTF-8", key)))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: value.as_bytes(),
                    aad: key.as_bytes(),
                },
            )
            .map_err(|e| StorageError::Crypto(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);

        // Write then rename so a crash never leaves a half-written value
        let path = self.value_path(key);
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, sealed)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        match std::fs::remove_file(self.value_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::open(dir.path(), "hunter2").unwrap();

        assert!(store.get("dashbite.session").unwrap().is_none());

        store.set("dashbite.session", r#"{"a":1}"#).unwrap();
        assert_eq!(
            store.get("dashbite.session").unwrap().as_deref(),
            Some(r#"{"a":1}"#)
        );
    }

    #[test]
    fn test_values_are_not_stored_in_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::open(dir.path(), "hunter2").unwrap();
        store.set("token", "super-secret-token").unwrap();

        let raw = std::fs::read(store.value_path("token")).unwrap();
        let needle = b"super-secret-token";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_reopen_with_same_passphrase_reads_values() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = EncryptedFileStore::open(dir.path(), "hunter2").unwrap();
            store.set("k", "v").unwrap();
        }
        let store = EncryptedFileStore::open(dir.path(), "hunter2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_wrong_passphrase_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        EncryptedFileStore::open(dir.path(), "right")
            .unwrap()
            .set("k", "v")
            .unwrap();

        let store = EncryptedFileStore::open(dir.path(), "wrong").unwrap();
        assert!(matches!(store.get("k"), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::open(dir.path(), "pw").unwrap();
        store.set("k", "v").unwrap();
        store.delete("k").unwrap();
        store.delete("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn test_key_names_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = EncryptedFileStore::open(dir.path(), "pw").unwrap();
        let path = store.value_path("../escape/attempt");
        assert_eq!(path.parent(), Some(dir.path()));
    }
}
