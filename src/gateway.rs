//! Persistence gateway.
//!
//! Mediates every read and write of persisted ledger data:
//!
//! - the snapshot slot, a single key in a [`KeyValuePort`] holding the
//!   structured encoding of the whole [`Snapshot`];
//! - an optional [`RecordStore`] with the shift, fill and receipt
//!   collections.
//!
//! Slot writes are scheduled on a background writer and return a
//! [`PendingWrite`]. Anything loaded from the slot passes the structural
//! validator before it is handed back.

use crate::codec::structured;
use crate::error::{LedgerError, Result};
use crate::slot::KeyValuePort;
use crate::store::RecordStore;
use crate::types::Snapshot;
use crate::writer::{PendingWrite, SlotWriter};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Storage key of the snapshot slot.
pub const SNAPSHOT_SLOT_KEY: &str = "fuelReceiptsData";

/// Gateway configuration.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Key of the snapshot slot.
    pub slot_key: String,

    /// How long a slot operation may take before it is reported as failed.
    pub io_timeout: Duration,

    /// Slot operations that may be queued before callers block.
    pub queue_depth: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            slot_key: SNAPSHOT_SLOT_KEY.to_string(),
            io_timeout: Duration::from_secs(5),
            queue_depth: 64,
        }
    }
}

pub struct Gateway {
    config: GatewayConfig,
    writer: SlotWriter,
    records: Option<RecordStore>,
}

impl Gateway {
    /// Create a gateway over the given slot storage.
    pub fn new(port: Arc<dyn KeyValuePort>, config: GatewayConfig) -> Result<Self> {
        let writer = SlotWriter::spawn(port, config.queue_depth, config.io_timeout)?;
        Ok(Self {
            config,
            writer,
            records: None,
        })
    }

    /// Attach a record store.
    pub fn with_record_store(mut self, records: RecordStore) -> Self {
        self.records = Some(records);
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The attached record store, if any.
    pub fn records(&self) -> Option<&RecordStore> {
        self.records.as_ref()
    }

    // --- Snapshot slot ---

    /// Overwrite the slot with `snapshot`.
    pub fn save(&self, snapshot: &Snapshot) -> PendingWrite {
        match structured::encode(snapshot) {
            Ok(document) => {
                debug!(
                    fills = snapshot.fills.len(),
                    has_report = snapshot.report.is_some(),
                    "scheduling snapshot save"
                );
                self.writer.put(&self.config.slot_key, document)
            }
            Err(e) => {
                warn!(error = %e, "snapshot not saved");
                PendingWrite::ready(Err(e))
            }
        }
    }

    /// Read the slot. `None` if it was never written or has been cleared.
    ///
    /// Waits behind any save still queued. A stored document that fails the
    /// structural check is rejected with [`LedgerError::Validation`].
    pub fn load(&self) -> Result<Option<Snapshot>> {
        let Some(document) = self.writer.get(&self.config.slot_key)? else {
            return Ok(None);
        };

        let value: Value = serde_json::from_str(&document).map_err(|e| {
            warn!(error = %e, "snapshot slot is not a JSON document, rejecting load");
            LedgerError::Validation(format!("stored snapshot is not JSON: {}", e))
        })?;

        if let Err(e) = structured::validate(&value) {
            warn!(error = %e, "stored snapshot failed validation, rejecting load");
            return Err(e);
        }

        structured::decode_value(value)
            .map(Some)
            .map_err(|e| {
                warn!(error = %e, "stored snapshot failed to decode, rejecting load");
                e
            })
    }

    /// Delete the slot.
    pub fn clear(&self) -> PendingWrite {
        info!(key = %self.config.slot_key, "clearing snapshot slot");
        self.writer.remove(&self.config.slot_key)
    }

    /// Wait for every slot operation queued so far.
    pub fn flush(&self) -> Result<()> {
        self.writer.flush()
    }

    // --- Record store ---

    /// Clear the three record-store collections together.
    pub fn clear_all_data(&self) -> Result<()> {
        self.require_records()?.clear_all_data()
    }

    pub(crate) fn require_records(&self) -> Result<&RecordStore> {
        self.records.as_ref().ok_or(LedgerError::NotInitialized)
    }
}
