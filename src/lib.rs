//! # Fuel Ledger
//!
//! Shift reconciliation for a fuel delivery truck. A driver records meter
//! and dip readings at the start and end of a shift plus every bulk fill
//! made during it; the ledger computes how much fuel is unaccounted for.
//!
//! ## Core Concepts
//!
//! - **Session**: The in-memory shift, its bulk-fill ledger and the last report
//! - **Reconciliation**: `meter used + dip difference - fills`, positive is a loss
//! - **Snapshot slot**: One key-value entry holding the whole session as JSON
//! - **Codecs**: A structured JSON document and a fixed-layout text export
//! - **Record store**: Append-only shift, fill and receipt collections
//!
//! ## Example
//!
//! ```ignore
//! use fuel_ledger::{FileKeyValueStore, Gateway, GatewayConfig, Session};
//! use std::sync::Arc;
//!
//! let port = Arc::new(FileKeyValueStore::new("./slots")?);
//! let gateway = Arc::new(Gateway::new(port, GatewayConfig::default())?);
//! let session = Session::open(gateway)?;
//!
//! session.start_of_day("TR123", "1000", "50")?;
//! session.add_bulk_fill("08:30", "190")?;
//! session.end_of_day("1200", "40")?;
//!
//! let (report, saved) = session.calculate()?;
//! saved.wait()?;
//! println!("{} {}", report.classification, report.discrepancy);
//! ```

pub mod codec;
pub mod error;
pub mod gateway;
pub mod reconcile;
pub mod records;
pub mod session;
pub mod slot;
pub mod store;
pub mod types;
pub mod wal;
pub mod writer;

// Re-exports
pub use codec::ExportFormat;
pub use error::{LedgerError, RequiredField, Result};
pub use gateway::{Gateway, GatewayConfig, SNAPSHOT_SLOT_KEY};
pub use reconcile::{compute, compute_with_warnings, Reconciliation, UnparsableAmount};
pub use records::{Collection, CollectionName, RawRecord, RecordLog};
pub use session::Session;
pub use slot::{FileKeyValueStore, KeyValuePort, MemoryKeyValueStore};
pub use store::{RecordStore, RecordStoreConfig};
pub use types::*;
pub use wal::{WalEntry, WalEntryStatus, WalOperation, WriteAheadLog};
pub use writer::{PendingWrite, SlotWriter};
