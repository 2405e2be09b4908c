//! Key-value storage port for the snapshot slot.

use crate::error::{LedgerError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Device-local key-value storage.
///
/// Implementations must leave the previous value in place when a `put`
/// fails.
pub trait KeyValuePort: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Magic bytes for slot files.
const SLOT_MAGIC: &[u8; 4] = b"SLT\0";

/// Current slot format version.
const SLOT_VERSION: u8 = 1;

/// One file per key, replaced atomically on write.
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn slot_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(LedgerError::InvalidFormat(format!("invalid slot key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.slot", key)))
    }
}

impl KeyValuePort for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.slot_path(key)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SLOT_MAGIC {
            return Err(LedgerError::InvalidFormat("Invalid slot magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SLOT_VERSION {
            return Err(LedgerError::InvalidFormat(format!(
                "Unsupported slot version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);

        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        let len = match content.len().checked_sub(4) {
            Some(held) if held as u64 == len => held,
            _ => {
                return Err(LedgerError::Corruption(format!(
                    "slot {} holds {} bytes, header says {}",
                    key,
                    content.len().saturating_sub(4),
                    len
                )));
            }
        };

        let checksum_bytes: [u8; 4] = content[len..]
            .try_into()
            .map_err(|_| LedgerError::Corruption("slot checksum missing".into()))?;
        content.truncate(len);

        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&content);
        if stored_checksum != computed_checksum {
            return Err(LedgerError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        String::from_utf8(content)
            .map(Some)
            .map_err(|_| LedgerError::Corruption(format!("slot {} is not UTF-8", key)))
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.slot_path(key)?;
        let tmp_path = path.with_extension("slot.tmp");

        let write = || -> Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(SLOT_MAGIC)?;
            file.write_all(&[SLOT_VERSION])?;
            file.write_all(&(value.len() as u64).to_le_bytes())?;
            file.write_all(value.as_bytes())?;
            file.write_all(&crc32fast::hash(value.as_bytes()).to_le_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)?;
            Ok(())
        };

        let result = write();
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result?;

        debug!(key, bytes = value.len(), "slot written");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.slot_path(key)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for sessions that do not persist.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValuePort for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(dir.path()).unwrap();

        assert_eq!(store.get("fuelReceiptsData").unwrap(), None);

        store.put("fuelReceiptsData", "{\"a\":1}").unwrap();
        assert_eq!(store.get("fuelReceiptsData").unwrap().as_deref(), Some("{\"a\":1}"));

        store.put("fuelReceiptsData", "second").unwrap();
        assert_eq!(store.get("fuelReceiptsData").unwrap().as_deref(), Some("second"));

        store.remove("fuelReceiptsData").unwrap();
        assert_eq!(store.get("fuelReceiptsData").unwrap(), None);
        store.remove("fuelReceiptsData").unwrap();
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        FileKeyValueStore::new(dir.path()).unwrap().put("k", "v").unwrap();
        let store = FileKeyValueStore::new(dir.path()).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_file_store_detects_damage() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(dir.path()).unwrap();
        store.put("k", "hello world").unwrap();

        let path = dir.path().join("k.slot");
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(store.get("k"), Err(LedgerError::ChecksumMismatch { .. })));

        fs::write(&path, &bytes[..10]).unwrap();
        assert!(store.get("k").is_err());
    }

    #[test]
    fn test_file_store_rejects_oversized_length() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(dir.path()).unwrap();

        let mut bytes = SLOT_MAGIC.to_vec();
        bytes.push(SLOT_VERSION);
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        bytes.extend_from_slice(b"{}\0\0\0\0");
        fs::write(dir.path().join("k.slot"), &bytes).unwrap();

        assert!(matches!(store.get("k"), Err(LedgerError::Corruption(_))));

        // The store keeps working afterwards.
        store.put("k", "fresh").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("fresh"));
    }

    #[test]
    fn test_failed_put_keeps_previous_value() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(dir.path()).unwrap();
        store.put("k", "old").unwrap();

        // A directory squatting on the temp path makes the write fail.
        fs::create_dir(dir.path().join("k.slot.tmp")).unwrap();
        assert!(matches!(store.put("k", "new"), Err(LedgerError::StorageUnavailable(_))));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("old"));
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyValueStore::new(dir.path()).unwrap();
        assert!(store.put("../escape", "x").is_err());
        assert!(store.get("").is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryKeyValueStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.put("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }
}
