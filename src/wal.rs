//! Write-ahead log for record store clears.
//!
//! A clear touches several collection logs. The intent is written here first
//! and committed afterwards; an entry still pending when the store is next
//! opened is replayed, so a clear is never left half-applied.

use crate::error::{LedgerError, Result};
use crate::records::CollectionName;
use crate::types::Timestamp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for WAL file.
const WAL_MAGIC: &[u8; 4] = b"WAL\0";

/// Current WAL format version.
const WAL_VERSION: u8 = 1;

const WAL_HEADER_SIZE: u64 = 5;

/// WAL entry status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalEntryStatus {
    /// Intent written, not yet applied.
    Pending,
    /// Applied to every affected collection.
    Committed,
}

/// A single WAL entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub status: WalEntryStatus,
    pub operation: WalOperation,
    pub timestamp: Timestamp,
}

/// Operations that can be recorded in the WAL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOperation {
    /// Clear one collection.
    Clear { collection: CollectionName },
    /// Clear every collection.
    ClearAll,
}

impl WalOperation {
    /// Collections the operation empties.
    pub fn collections(&self) -> Vec<CollectionName> {
        match self {
            WalOperation::Clear { collection } => vec![*collection],
            WalOperation::ClearAll => CollectionName::ALL.to_vec(),
        }
    }
}

/// Write-ahead log manager.
pub struct WriteAheadLog {
    path: PathBuf,
    next_seq: Mutex<u64>,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl WriteAheadLog {
    /// Create or open a WAL file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let next_seq = if path.exists() {
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            let mut reader = BufReader::new(file);
            Self::read_header(&mut reader)?;

            let mut max_seq = 0u64;
            let mut good_end = WAL_HEADER_SIZE;
            while let Ok(entry) = Self::read_entry(&mut reader) {
                max_seq = max_seq.max(entry.seq);
                good_end = reader.stream_position()?;
            }

            // Appends must not land behind a torn entry.
            let file = reader.into_inner();
            if file.metadata()?.len() > good_end {
                file.set_len(good_end)?;
                file.sync_all()?;
            }

            max_seq + 1
        } else {
            Self::write_fresh(&path)?;
            1
        };

        let writer = BufWriter::new(OpenOptions::new().append(true).open(&path)?);

        Ok(Self {
            path,
            next_seq: Mutex::new(next_seq),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Log an operation (returns sequence number).
    pub fn log(&self, operation: WalOperation) -> Result<u64> {
        let mut next_seq = self.next_seq.lock();
        let seq = *next_seq;
        *next_seq += 1;

        self.append(&WalEntry {
            seq,
            status: WalEntryStatus::Pending,
            operation,
            timestamp: Timestamp::now(),
        })?;

        Ok(seq)
    }

    /// Mark an entry as committed.
    pub fn commit(&self, seq: u64, operation: WalOperation) -> Result<()> {
        self.append(&WalEntry {
            seq,
            status: WalEntryStatus::Committed,
            operation,
            timestamp: Timestamp::now(),
        })
    }

    /// All pending (uncommitted) entries, oldest first.
    pub fn get_pending_entries(&self) -> Result<Vec<WalEntry>> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(WAL_HEADER_SIZE))?;

        let mut entries = HashMap::new();
        let mut committed = HashSet::new();

        while let Ok(entry) = Self::read_entry(&mut reader) {
            match entry.status {
                WalEntryStatus::Committed => {
                    committed.insert(entry.seq);
                }
                WalEntryStatus::Pending => {
                    entries.insert(entry.seq, entry);
                }
            }
        }

        let mut pending: Vec<_> = entries
            .into_iter()
            .filter(|(seq, _)| !committed.contains(seq))
            .map(|(_, entry)| entry)
            .collect();
        pending.sort_by_key(|entry| entry.seq);

        Ok(pending)
    }

    /// Truncate the WAL (called once every entry is applied).
    pub fn clear(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        *writer = None;

        Self::write_fresh(&self.path)?;
        *writer = Some(BufWriter::new(
            OpenOptions::new().append(true).open(&self.path)?,
        ));
        *self.next_seq.lock() = 1;

        Ok(())
    }

    /// Check if WAL has any pending entries.
    pub fn has_pending(&self) -> Result<bool> {
        Ok(!self.get_pending_entries()?.is_empty())
    }

    fn append(&self, entry: &WalEntry) -> Result<()> {
        let mut writer = self.writer.lock();
        let w = writer
            .as_mut()
            .ok_or_else(|| LedgerError::StorageUnavailable("WAL writer closed".into()))?;

        let encoded = rmp_serde::to_vec(entry)?;
        w.write_all(&(encoded.len() as u32).to_le_bytes())?;
        w.write_all(&encoded)?;
        w.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
        w.flush()?;
        w.get_ref().sync_all()?;

        Ok(())
    }

    fn write_fresh(path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(WAL_MAGIC)?;
        file.write_all(&[WAL_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn read_header(reader: &mut impl Read) -> Result<()> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != WAL_MAGIC {
            return Err(LedgerError::InvalidFormat("Invalid WAL magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != WAL_VERSION {
            return Err(LedgerError::InvalidFormat(format!(
                "Unsupported WAL version: {}",
                version[0]
            )));
        }
        Ok(())
    }

    fn read_entry(reader: &mut impl Read) -> Result<WalEntry> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > 1024 * 1024 {
            return Err(LedgerError::Corruption("WAL entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        if u32::from_le_bytes(checksum_bytes) != crc32fast::hash(&encoded) {
            return Err(LedgerError::Corruption("WAL checksum mismatch".into()));
        }

        rmp_serde::from_slice(&encoded)
            .map_err(|e| LedgerError::Corruption(format!("unreadable WAL entry: {}", e)))
    }
}
