//! Core types for the fuel ledger.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Store-assigned identifier for a record-store row.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl RecordId {
    pub fn next(self) -> Self {
        RecordId(self.0 + 1)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Meter and dip readings for one shift, kept exactly as entered.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftRecord {
    #[serde(default, deserialize_with = "text_field")]
    pub truck_id: String,
    #[serde(default, deserialize_with = "text_field")]
    pub start_meter: String,
    #[serde(default, deserialize_with = "text_field")]
    pub start_dip: String,
    #[serde(default, deserialize_with = "text_field")]
    pub end_meter: String,
    #[serde(default, deserialize_with = "text_field")]
    pub end_dip: String,
}

impl ShiftRecord {
    /// True when no field has been entered.
    pub fn is_blank(&self) -> bool {
        self.truck_id.is_empty()
            && self.start_meter.is_empty()
            && self.start_dip.is_empty()
            && self.end_meter.is_empty()
            && self.end_dip.is_empty()
    }
}

/// A refill event added to the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFill {
    /// Clock value as entered.
    #[serde(default, deserialize_with = "text_field")]
    pub time: String,

    /// Liters as entered; may fail to parse.
    #[serde(default, deserialize_with = "text_field")]
    pub amount: String,
}

impl BulkFill {
    pub fn new(time: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            time: time.into(),
            amount: amount.into(),
        }
    }
}

/// Whether fuel went missing or turned up extra.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Loss,
    Surplus,
}

impl Classification {
    /// Positive discrepancy is a loss; zero and below count as surplus.
    pub fn of(discrepancy: f64) -> Self {
        if discrepancy > 0.0 {
            Classification::Loss
        } else {
            Classification::Surplus
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Loss => "Loss",
            Classification::Surplus => "Surplus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Loss" => Some(Classification::Loss),
            "Surplus" => Some(Classification::Surplus),
            _ => None,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of reconciling a shift against its bulk fills.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscrepancyReport {
    pub meter_fuel_used: f64,
    pub dip_difference: f64,
    pub calculated_fuel_used: f64,
    pub total_bulk_fills: f64,
    /// Signed; positive means fuel unaccounted for.
    pub discrepancy: f64,
    #[serde(rename = "status")]
    pub classification: Classification,
}

/// Complete persisted state for one shift.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub shift: ShiftRecord,
    pub fills: Vec<BulkFill>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<DiscrepancyReport>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.shift.is_blank() && self.fills.is_empty() && self.report.is_none()
    }
}

/// Which end of the shift a journalled entry records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShiftEntryKind {
    #[serde(rename = "start")]
    StartOfDay,
    #[serde(rename = "end")]
    EndOfDay,
}

/// A shift row in the record store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftEntry {
    pub truck_id: String,
    pub start_meter: String,
    pub end_meter: String,
    pub start_dip: String,
    pub end_dip: String,
    #[serde(rename = "type")]
    pub kind: ShiftEntryKind,
}

impl ShiftEntry {
    /// Capture the current readings of `shift`.
    pub fn from_shift(shift: &ShiftRecord, kind: ShiftEntryKind) -> Self {
        Self {
            truck_id: shift.truck_id.clone(),
            start_meter: shift.start_meter.clone(),
            end_meter: shift.end_meter.clone(),
            start_dip: shift.start_dip.clone(),
            end_dip: shift.end_dip.clone(),
            kind,
        }
    }
}

/// Best-effort fields read off a fuel receipt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    #[serde(default)]
    pub fuel_type: Option<String>,
    #[serde(default)]
    pub volume: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub total_cost: Option<String>,
}

/// A record as returned from the record store.
#[derive(Clone, Debug, PartialEq)]
pub struct Stored<T> {
    pub id: RecordId,
    pub recorded_at: Timestamp,
    pub record: T,
}

/// Accept text, a bare number (kept as its literal), or null (empty).
fn text_field<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrNumber {
        Text(String),
        Number(serde_json::Number),
        Null,
    }

    Ok(match TextOrNumber::deserialize(deserializer)? {
        TextOrNumber::Text(s) => s,
        TextOrNumber::Number(n) => n.to_string(),
        TextOrNumber::Null => String::new(),
    })
}
