//! Record store collections.
//!
//! Each collection is an append-only log of serialized rows with
//! store-assigned ids.

mod collection;
mod log;

pub use collection::{Collection, CollectionName};
pub use log::{RawRecord, RecordLog};
