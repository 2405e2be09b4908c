//! JSON snapshot document.
//!
//! ```text
//! { "version": 1,
//!   "shift": { "truckId", "startMeter", "startDip", "endMeter", "endDip" },
//!   "fills": [ { "time", "amount" }, ... ],
//!   "report": { ... } }            // optional
//! ```
//!
//! Every shift and fill field is carried as text so entered formatting
//! survives a round trip.

use crate::error::{LedgerError, Result};
use crate::types::{BulkFill, DiscrepancyReport, ShiftRecord, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current structured document version.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct DocumentRef<'a> {
    version: u32,
    shift: &'a ShiftRecord,
    fills: &'a [BulkFill],
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a DiscrepancyReport>,
}

#[derive(Deserialize)]
struct Document {
    #[serde(default = "legacy_version")]
    version: u32,
    shift: ShiftRecord,
    fills: Vec<BulkFill>,
    #[serde(default)]
    report: Option<DiscrepancyReport>,
}

/// Documents written before versioning carry no version field.
fn legacy_version() -> u32 {
    1
}

/// Encode a snapshot as a JSON document.
pub fn encode(snapshot: &Snapshot) -> Result<String> {
    if let Some(report) = &snapshot.report {
        let values = [
            report.meter_fuel_used,
            report.dip_difference,
            report.calculated_fuel_used,
            report.total_bulk_fills,
            report.discrepancy,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(LedgerError::Serialization(
                "report contains a non-finite value".into(),
            ));
        }
    }

    let document = DocumentRef {
        version: FORMAT_VERSION,
        shift: &snapshot.shift,
        fills: &snapshot.fills,
        report: snapshot.report.as_ref(),
    };
    serde_json::to_string_pretty(&document).map_err(|e| LedgerError::Serialization(e.to_string()))
}

/// Decode a JSON document into a snapshot.
///
/// The document is checked by [`validate`] before any field is read.
pub fn decode(input: &str) -> Result<Snapshot> {
    let value: Value = serde_json::from_str(input)
        .map_err(|e| LedgerError::Validation(format!("not a JSON document: {}", e)))?;
    decode_value(value)
}

/// Decode an already-parsed document.
pub fn decode_value(value: Value) -> Result<Snapshot> {
    validate(&value)?;

    let document: Document = serde_json::from_value(value)
        .map_err(|e| LedgerError::Validation(e.to_string()))?;

    if document.version != FORMAT_VERSION {
        return Err(LedgerError::Validation(format!(
            "unsupported document version: {}",
            document.version
        )));
    }

    Ok(Snapshot {
        shift: document.shift,
        fills: document.fills,
        report: document.report,
    })
}

/// Structural check: an object holding a `shift` object and a `fills` array.
pub fn validate(value: &Value) -> Result<()> {
    let object = value
        .as_object()
        .ok_or_else(|| LedgerError::Validation("document is not an object".into()))?;

    match object.get("shift") {
        Some(Value::Object(_)) => {}
        Some(_) => return Err(LedgerError::Validation("`shift` is not an object".into())),
        None => return Err(LedgerError::Validation("missing `shift`".into())),
    }

    match object.get("fills") {
        Some(Value::Array(_)) => {}
        Some(_) => return Err(LedgerError::Validation("`fills` is not a list".into())),
        None => return Err(LedgerError::Validation("missing `fills`".into())),
    }

    Ok(())
}
