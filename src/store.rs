//! Record store tying the three collections together.

use crate::error::{LedgerError, Result};
use crate::records::{Collection, CollectionName};
use crate::types::{BulkFill, Receipt, RecordId, ShiftEntry, Stored};
use crate::wal::{WalOperation, WriteAheadLog};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Record store configuration.
#[derive(Clone, Debug)]
pub struct RecordStoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Sync collection logs every N appends.
    pub sync_interval: u64,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./fuel-ledger"),
            create_if_missing: true,
            sync_interval: 1,
        }
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"FLS\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Local structured record store.
///
/// Holds three append-only collections: shift entries, bulk fills and
/// receipts. Reads and appends share the collection guard; clears take it
/// exclusively so a multi-collection clear is never observed half done.
pub struct RecordStore {
    config: RecordStoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    shifts: Collection<ShiftEntry>,
    fills: Collection<BulkFill>,
    receipts: Collection<Receipt>,

    wal: WriteAheadLog,

    guard: RwLock<()>,
}

impl RecordStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: RecordStoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(LedgerError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: RecordStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        Self::open_components(config)
    }

    /// Open an existing store, finishing any clear that was interrupted.
    pub fn open(config: RecordStoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let store = Self::open_components(config)?;
        store.replay_wal()?;
        Ok(store)
    }

    fn open_components(config: RecordStoreConfig) -> Result<Self> {
        let lock_file = Self::acquire_lock(&config.path)?;

        let dir = config.path.as_path();
        let shifts = Collection::open(CollectionName::Shifts, dir, config.sync_interval)?;
        let fills = Collection::open(CollectionName::Fills, dir, config.sync_interval)?;
        let receipts = Collection::open(CollectionName::Receipts, dir, config.sync_interval)?;
        let wal = WriteAheadLog::open(dir.join("records.wal"))?;

        debug!(path = %dir.display(), "record store opened");

        Ok(Self {
            config,
            _lock_file: lock_file,
            shifts,
            fills,
            receipts,
            wal,
            guard: RwLock::new(()),
        })
    }

    // --- Shift entries ---

    pub fn add_shift_entry(&self, entry: &ShiftEntry) -> Result<RecordId> {
        let _guard = self.guard.read();
        self.shifts.add(entry)
    }

    pub fn fetch_shift_entries(&self) -> Result<Vec<Stored<ShiftEntry>>> {
        let _guard = self.guard.read();
        self.shifts.fetch_all()
    }

    pub fn clear_shift_entries(&self) -> Result<()> {
        self.clear(WalOperation::Clear {
            collection: CollectionName::Shifts,
        })
    }

    // --- Bulk fills ---

    pub fn add_fill(&self, fill: &BulkFill) -> Result<RecordId> {
        let _guard = self.guard.read();
        self.fills.add(fill)
    }

    pub fn fetch_fills(&self) -> Result<Vec<Stored<BulkFill>>> {
        let _guard = self.guard.read();
        self.fills.fetch_all()
    }

    pub fn clear_fills(&self) -> Result<()> {
        self.clear(WalOperation::Clear {
            collection: CollectionName::Fills,
        })
    }

    // --- Receipts ---

    pub fn add_receipt(&self, receipt: &Receipt) -> Result<RecordId> {
        let _guard = self.guard.read();
        self.receipts.add(receipt)
    }

    pub fn fetch_receipts(&self) -> Result<Vec<Stored<Receipt>>> {
        let _guard = self.guard.read();
        self.receipts.fetch_all()
    }

    pub fn clear_receipts(&self) -> Result<()> {
        self.clear(WalOperation::Clear {
            collection: CollectionName::Receipts,
        })
    }

    // --- Store-wide ---

    /// Clear all three collections as one step.
    pub fn clear_all_data(&self) -> Result<()> {
        self.clear(WalOperation::ClearAll)?;
        info!(path = %self.config.path.display(), "all record store data cleared");
        Ok(())
    }

    /// Whether every collection is empty.
    pub fn is_empty(&self) -> bool {
        let _guard = self.guard.read();
        self.shifts.is_empty() && self.fills.is_empty() && self.receipts.is_empty()
    }

    /// Force sync all collections.
    pub fn sync(&self) -> Result<()> {
        let _guard = self.guard.read();
        self.shifts.sync()?;
        self.fills.sync()?;
        self.receipts.sync()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Journal and apply a clear.
    ///
    /// A clear that fails partway is retried once; if it still fails it stays
    /// pending in the WAL and is finished by the next clear or the next open.
    fn clear(&self, operation: WalOperation) -> Result<()> {
        let _guard = self.guard.write();

        let seq = self.wal.log(operation.clone())?;
        if let Err(e) = self.apply_clear(&operation) {
            warn!(seq, error = %e, "clear failed partway, retrying");
            self.apply_clear(&operation)?;
        }
        self.wal.commit(seq, operation)?;
        self.finish_pending()
    }

    fn apply_clear(&self, operation: &WalOperation) -> Result<()> {
        for collection in operation.collections() {
            match collection {
                CollectionName::Shifts => self.shifts.clear()?,
                CollectionName::Fills => self.fills.clear()?,
                CollectionName::Receipts => self.receipts.clear()?,
            }
        }
        Ok(())
    }

    fn replay_wal(&self) -> Result<()> {
        if !self.wal.has_pending()? {
            return Ok(());
        }

        let _guard = self.guard.write();
        self.finish_pending()
    }

    /// Apply every clear still pending in the WAL, then empty it.
    ///
    /// Callers hold the collection guard exclusively.
    fn finish_pending(&self) -> Result<()> {
        for entry in self.wal.get_pending_entries()? {
            warn!(seq = entry.seq, operation = ?entry.operation, "finishing interrupted clear");
            self.apply_clear(&entry.operation)?;
        }
        self.wal.clear()
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(LedgerError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(LedgerError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| LedgerError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for RecordStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ShiftEntryKind;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> RecordStoreConfig {
        RecordStoreConfig {
            path: dir.path().join("store"),
            ..Default::default()
        }
    }

    fn entry(kind: ShiftEntryKind) -> ShiftEntry {
        ShiftEntry {
            truck_id: "TR123".into(),
            start_meter: "1000".into(),
            end_meter: "1200".into(),
            start_dip: "50".into(),
            end_dip: "40".into(),
            kind,
        }
    }

    #[test]
    fn test_create_store() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::create(test_config(&dir)).unwrap();
        assert!(store.is_empty());
        assert!(store.path().join("MANIFEST").exists());
    }

    #[test]
    fn test_collections_are_independent() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::create(test_config(&dir)).unwrap();

        store.add_shift_entry(&entry(ShiftEntryKind::StartOfDay)).unwrap();
        store.add_fill(&BulkFill::new("08:30", "190")).unwrap();
        store.add_fill(&BulkFill::new("10:30", "20")).unwrap();

        assert_eq!(store.fetch_shift_entries().unwrap().len(), 1);
        assert_eq!(store.fetch_fills().unwrap().len(), 2);
        assert!(store.fetch_receipts().unwrap().is_empty());

        store.clear_fills().unwrap();
        assert!(store.fetch_fills().unwrap().is_empty());
        assert_eq!(store.fetch_shift_entries().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_all_data() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::create(test_config(&dir)).unwrap();

        store.add_shift_entry(&entry(ShiftEntryKind::EndOfDay)).unwrap();
        store.add_fill(&BulkFill::new("08:30", "190")).unwrap();
        store.add_receipt(&Receipt::default()).unwrap();

        store.clear_all_data().unwrap();

        assert!(store.fetch_shift_entries().unwrap().is_empty());
        assert!(store.fetch_fills().unwrap().is_empty());
        assert!(store.fetch_receipts().unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_ids_not_reused_after_clear() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::create(test_config(&dir)).unwrap();

        let first = store.add_fill(&BulkFill::new("08:30", "190")).unwrap();
        store.clear_all_data().unwrap();
        let second = store.add_fill(&BulkFill::new("09:30", "10")).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        {
            let store = RecordStore::create(config.clone()).unwrap();
            store.add_fill(&BulkFill::new("08:30", "190")).unwrap();
            store.add_shift_entry(&entry(ShiftEntryKind::StartOfDay)).unwrap();
        }

        let store = RecordStore::open(config).unwrap();
        let fills = store.fetch_fills().unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].record.amount, "190");
        assert_eq!(store.fetch_shift_entries().unwrap()[0].record.kind, ShiftEntryKind::StartOfDay);
    }

    #[test]
    fn test_store_lock() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let _store = RecordStore::create(config.clone()).unwrap();
        let result = RecordStore::open(config);
        assert!(matches!(result, Err(LedgerError::Locked)));
    }

    #[test]
    fn test_interrupted_clear_is_replayed() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        {
            let store = RecordStore::create(config.clone()).unwrap();
            store.add_fill(&BulkFill::new("08:30", "190")).unwrap();
            store.add_receipt(&Receipt::default()).unwrap();
            // Intent logged, crash before any collection was truncated.
            store.wal.log(WalOperation::ClearAll).unwrap();
        }

        let store = RecordStore::open(config).unwrap();
        assert!(store.fetch_fills().unwrap().is_empty());
        assert!(store.fetch_receipts().unwrap().is_empty());
        assert!(!store.wal.has_pending().unwrap());
    }

    #[test]
    fn test_failed_clear_finished_by_next_clear() {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::create(test_config(&dir)).unwrap();
        store.add_fill(&BulkFill::new("08:30", "190")).unwrap();
        store.add_receipt(&Receipt::default()).unwrap();

        // A clear-all that never got past its journal entry.
        store.wal.log(WalOperation::ClearAll).unwrap();
        assert_eq!(store.fetch_fills().unwrap().len(), 1);

        store.clear_shift_entries().unwrap();
        assert!(store.fetch_fills().unwrap().is_empty());
        assert!(store.fetch_receipts().unwrap().is_empty());
        assert!(!store.wal.has_pending().unwrap());
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = TempDir::new().unwrap();
        let result = RecordStore::open_or_create(RecordStoreConfig {
            create_if_missing: false,
            ..test_config(&dir)
        });
        assert!(matches!(result, Err(LedgerError::NotInitialized)));
    }
}
