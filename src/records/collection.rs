//! Typed collection over a record log.

use super::log::RecordLog;
use crate::error::Result;
use crate::types::{RecordId, Stored};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use tracing::debug;

/// The three collections of the record store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionName {
    Shifts,
    Fills,
    Receipts,
}

impl CollectionName {
    pub const ALL: [CollectionName; 3] = [
        CollectionName::Shifts,
        CollectionName::Fills,
        CollectionName::Receipts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionName::Shifts => "shifts",
            CollectionName::Fills => "fills",
            CollectionName::Receipts => "receipts",
        }
    }

    /// Log file name inside the store directory.
    pub fn file_name(&self) -> String {
        format!("{}.log", self.as_str())
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rows of one type, MessagePack-encoded into a [`RecordLog`].
pub struct Collection<T> {
    name: CollectionName,
    log: RecordLog,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn open(name: CollectionName, dir: &Path, sync_interval: u64) -> Result<Self> {
        let log = RecordLog::open_with_sync_interval(dir.join(name.file_name()), sync_interval)?;
        Ok(Self {
            name,
            log,
            _marker: PhantomData,
        })
    }

    /// Append a row, returning its id.
    pub fn add(&self, record: &T) -> Result<RecordId> {
        let payload = rmp_serde::to_vec_named(record)?;
        let (id, _) = self.log.append(&payload)?;
        Ok(id)
    }

    /// All rows in insertion order.
    ///
    /// A row that no longer decodes fails the whole fetch with a
    /// validation error.
    pub fn fetch_all(&self) -> Result<Vec<Stored<T>>> {
        self.log
            .read_all()?
            .into_iter()
            .map(|raw| -> Result<Stored<T>> {
                Ok(Stored {
                    id: raw.id,
                    recorded_at: raw.timestamp,
                    record: rmp_serde::from_slice(&raw.payload)?,
                })
            })
            .collect()
    }

    pub fn clear(&self) -> Result<()> {
        self.log.clear()?;
        debug!(collection = %self.name, "collection cleared");
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn sync(&self) -> Result<()> {
        self.log.sync()
    }
}
