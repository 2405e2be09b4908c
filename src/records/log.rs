//! Append-only record log.

use crate::error::{LedgerError, Result};
use crate::types::{RecordId, Timestamp};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for record log.
const LOG_MAGIC: &[u8; 4] = b"FRL\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// File header: magic + version + id floor.
const LOG_HEADER_SIZE: u64 = 4 + 1 + 8;

/// Record header: id + timestamp + payload length.
const RECORD_HEADER_SIZE: usize = 8 + 8 + 4;

/// Payload size sanity limit.
const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// A record as stored in the log, payload still encoded.
#[derive(Clone, Debug)]
pub struct RawRecord {
    pub id: RecordId,
    pub timestamp: Timestamp,
    pub payload: Vec<u8>,
}

struct LogState {
    file: File,
    next_id: u64,
    file_size: u64,
    writes_since_sync: u64,
}

/// Append-only record log.
///
/// Ids are assigned by the log and keep increasing across [`RecordLog::clear`]:
/// the header records the id floor so a truncated log never hands out an id
/// twice.
pub struct RecordLog {
    path: PathBuf,
    state: Mutex<LogState>,
    /// Sync every N writes (1 = sync every write).
    sync_interval: u64,
}

impl RecordLog {
    /// Default sync interval.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 1;

    /// Open or create a record log with default sync interval.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(path, Self::DEFAULT_SYNC_INTERVAL)
    }

    /// Open or create a record log with custom sync interval.
    pub fn open_with_sync_interval(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let (next_id, file_size) = if file.metadata()?.len() == 0 {
            Self::write_header(&mut file, 1)?;
            (1, LOG_HEADER_SIZE)
        } else {
            Self::recover(&mut file, &path)?
        };

        Ok(Self {
            path,
            state: Mutex::new(LogState {
                file,
                next_id,
                file_size,
                writes_since_sync: 0,
            }),
            sync_interval: sync_interval.max(1),
        })
    }

    /// Append a payload, returning its assigned id and timestamp.
    pub fn append(&self, payload: &[u8]) -> Result<(RecordId, Timestamp)> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(LedgerError::InvalidFormat(format!(
                "record payload too large: {} bytes",
                payload.len()
            )));
        }

        let mut state = self.state.lock();

        let id = RecordId(state.next_id);
        let timestamp = Timestamp::now();

        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len() + 4);
        buf.extend_from_slice(&id.0.to_le_bytes());
        buf.extend_from_slice(&timestamp.0.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(payload);
        buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());

        let offset = state.file_size;
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&buf)?;

        state.writes_since_sync += 1;
        if state.writes_since_sync >= self.sync_interval {
            state.file.sync_data()?;
            state.writes_since_sync = 0;
        }

        // Only advance once the bytes are down.
        state.file_size = offset + buf.len() as u64;
        state.next_id += 1;

        Ok((id, timestamp))
    }

    /// Read every record in insertion order.
    pub fn read_all(&self) -> Result<Vec<RawRecord>> {
        let mut state = self.state.lock();
        let end = state.file_size;
        state.file.seek(SeekFrom::Start(LOG_HEADER_SIZE))?;

        let mut reader = BufReader::new(&mut state.file);
        let mut position = LOG_HEADER_SIZE;
        let mut records = Vec::new();

        while position < end {
            let record = Self::read_record(&mut reader)?;
            position += (RECORD_HEADER_SIZE + record.payload.len() + 4) as u64;
            records.push(record);
        }

        Ok(records)
    }

    /// Drop every record, keeping the id floor.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        let floor = state.next_id;

        // Floor goes down before the records go away.
        Self::write_header(&mut state.file, floor)?;
        state.file.set_len(LOG_HEADER_SIZE)?;
        state.file.sync_all()?;
        state.file_size = LOG_HEADER_SIZE;
        state.writes_since_sync = 0;

        debug!(path = %self.path.display(), next_id = floor, "record log cleared");
        Ok(())
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.file.sync_all()?;
        state.writes_since_sync = 0;
        Ok(())
    }

    /// Id the next append will receive.
    pub fn next_id(&self) -> RecordId {
        RecordId(self.state.lock().next_id)
    }

    /// Whether the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.state.lock().file_size <= LOG_HEADER_SIZE
    }

    fn write_header(file: &mut File, id_floor: u64) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(LOG_MAGIC)?;
        file.write_all(&[LOG_VERSION])?;
        file.write_all(&id_floor.to_le_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Verify the header and scan the records, dropping a torn tail.
    fn recover(file: &mut File, path: &Path) -> Result<(u64, u64)> {
        file.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(LedgerError::InvalidFormat("Invalid record log magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(LedgerError::InvalidFormat(format!(
                "Unsupported record log version: {}",
                version[0]
            )));
        }

        let mut floor_bytes = [0u8; 8];
        file.read_exact(&mut floor_bytes)?;
        let mut next_id = u64::from_le_bytes(floor_bytes).max(1);

        let file_len = file.metadata()?.len();
        let mut position = LOG_HEADER_SIZE;
        let mut reader = BufReader::new(&mut *file);

        while position < file_len {
            match Self::read_record(&mut reader) {
                Ok(record) => {
                    next_id = next_id.max(record.id.0 + 1);
                    position += (RECORD_HEADER_SIZE + record.payload.len() + 4) as u64;
                }
                Err(LedgerError::Corruption(_)) => {
                    warn!(
                        path = %path.display(),
                        offset = position,
                        "truncating incomplete record at end of log"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        drop(reader);
        if position < file_len {
            file.set_len(position)?;
            file.sync_all()?;
        }

        Ok((next_id, position))
    }

    fn read_record(reader: &mut impl Read) -> Result<RawRecord> {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        read_exact(reader, &mut header)?;

        let id = RecordId(u64::from_le_bytes(header[0..8].try_into().unwrap_or([0; 8])));
        let timestamp = Timestamp(i64::from_le_bytes(header[8..16].try_into().unwrap_or([0; 8])));
        let payload_len = u32::from_le_bytes(header[16..20].try_into().unwrap_or([0; 4])) as usize;

        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(LedgerError::Corruption(format!(
                "record {} claims {} payload bytes",
                id, payload_len
            )));
        }

        let mut payload = vec![0u8; payload_len];
        read_exact(reader, &mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        read_exact(reader, &mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&payload);

        if stored_checksum != computed_checksum {
            return Err(LedgerError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        Ok(RawRecord {
            id,
            timestamp,
            payload,
        })
    }
}

/// A short read inside a record means the record was never finished.
fn read_exact(reader: &mut impl Read, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => LedgerError::Corruption("record ends early".into()),
        _ => LedgerError::from(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let log = RecordLog::open(dir.path().join("log.bin")).unwrap();
        assert!(log.is_empty());

        let (id, _) = log.append(b"hello").unwrap();
        assert_eq!(id, RecordId(1));

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"hello");
    }

    #[test]
    fn test_ids_strictly_increase() {
        let dir = TempDir::new().unwrap();
        let log = RecordLog::open(dir.path().join("log.bin")).unwrap();

        for i in 1..=10u64 {
            let (id, _) = log.append(format!("record {}", i).as_bytes()).unwrap();
            assert_eq!(id.0, i);
        }

        let ids: Vec<_> = log.read_all().unwrap().iter().map(|r| r.id.0).collect();
        assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_clear_keeps_id_floor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.bin");

        {
            let log = RecordLog::open(&path).unwrap();
            log.append(b"one").unwrap();
            log.append(b"two").unwrap();
            log.clear().unwrap();
            assert!(log.read_all().unwrap().is_empty());

            let (id, _) = log.append(b"three").unwrap();
            assert_eq!(id, RecordId(3));
            log.clear().unwrap();
        }

        let log = RecordLog::open(&path).unwrap();
        assert!(log.is_empty());
        assert_eq!(log.next_id(), RecordId(4));
    }

    #[test]
    fn test_clear_interrupted_before_truncate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.bin");

        {
            let log = RecordLog::open(&path).unwrap();
            log.append(b"one").unwrap();
            log.append(b"two").unwrap();
        }

        // Header already carries the new floor, records still present.
        let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        RecordLog::write_header(&mut file, 9).unwrap();
        drop(file);

        let log = RecordLog::open(&path).unwrap();
        assert_eq!(log.read_all().unwrap().len(), 2);
        assert_eq!(log.next_id(), RecordId(9));
        log.clear().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), LOG_HEADER_SIZE);
        assert_eq!(log.append(b"three").unwrap().0, RecordId(9));
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.bin");

        {
            let log = RecordLog::open(&path).unwrap();
            for i in 1..=5 {
                log.append(format!("record {}", i).as_bytes()).unwrap();
            }
        }

        let log = RecordLog::open(&path).unwrap();
        assert_eq!(log.read_all().unwrap().len(), 5);
        let (id, _) = log.append(b"record 6").unwrap();
        assert_eq!(id, RecordId(6));
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.bin");

        {
            let log = RecordLog::open(&path).unwrap();
            log.append(b"complete").unwrap();
            log.append(b"will be torn").unwrap();
        }

        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let log = RecordLog::open(&path).unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload, b"complete");
        assert_eq!(log.next_id(), RecordId(2));
    }

    #[test]
    fn test_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.bin");
        std::fs::write(&path, b"definitely not a record log").unwrap();

        assert!(matches!(
            RecordLog::open(&path),
            Err(LedgerError::InvalidFormat(_))
        ));
    }
}
