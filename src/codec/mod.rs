//! Snapshot codecs.
//!
//! Two independent representations of a [`Snapshot`]:
//!
//! - [`structured`]: JSON document, lossless. Also used for the snapshot slot.
//! - [`text`]: human-readable positional template for plain-text export.

pub mod structured;
pub mod text;

use crate::error::Result;
use crate::types::{Snapshot, Timestamp};
use std::path::Path;

/// File format used for explicit export and import.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Structured,
    Text,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Structured => "json",
            ExportFormat::Text => "txt",
        }
    }

    /// Pick the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(ExportFormat::Structured),
            "txt" => Some(ExportFormat::Text),
            _ => None,
        }
    }

    pub fn encode(&self, snapshot: &Snapshot) -> Result<String> {
        match self {
            ExportFormat::Structured => structured::encode(snapshot),
            ExportFormat::Text => Ok(text::encode(snapshot)),
        }
    }

    pub fn decode(&self, input: &str) -> Result<Snapshot> {
        match self {
            ExportFormat::Structured => structured::decode(input),
            ExportFormat::Text => text::decode(input),
        }
    }

    /// Export file name embedding the export time.
    pub fn file_name(&self, at: Timestamp) -> String {
        format!("fuel-data-{}.{}", at, self.extension())
    }
}
