//! Discrepancy computation.
//!
//! Fuel used is taken from the meter and corrected by the dip readings; the
//! result is compared against the total of the bulk-fill ledger. The
//! correction is always applied: reconciling against the raw meter delta
//! alone disagrees whenever the dips differ and is not supported.

use crate::error::{LedgerError, RequiredField, Result};
use crate::types::{BulkFill, Classification, DiscrepancyReport, ShiftRecord};
use tracing::warn;

/// A bulk-fill amount that did not parse and was counted as zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnparsableAmount {
    /// Position in the ledger.
    pub index: usize,
    /// The amount as entered.
    pub amount: String,
}

/// A report together with the fallbacks taken while computing it.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconciliation {
    pub report: DiscrepancyReport,
    pub warnings: Vec<UnparsableAmount>,
}

/// Compute the discrepancy report for a shift.
///
/// Unparsable fill amounts count as zero and are logged.
pub fn compute(shift: &ShiftRecord, fills: &[BulkFill]) -> Result<DiscrepancyReport> {
    let reconciliation = compute_with_warnings(shift, fills)?;
    for warning in &reconciliation.warnings {
        warn!(
            index = warning.index,
            amount = %warning.amount,
            "bulk fill amount is not a number, counting it as 0"
        );
    }
    Ok(reconciliation.report)
}

/// Compute the report and return the unparsable amounts alongside it.
pub fn compute_with_warnings(shift: &ShiftRecord, fills: &[BulkFill]) -> Result<Reconciliation> {
    let start_meter = reading(&shift.start_meter, RequiredField::StartMeter)?;
    let end_meter = reading(&shift.end_meter, RequiredField::EndMeter)?;
    let start_dip = reading(&shift.start_dip, RequiredField::StartDip)?;
    let end_dip = reading(&shift.end_dip, RequiredField::EndDip)?;

    if fills.is_empty() {
        return Err(LedgerError::MissingData(RequiredField::BulkFills));
    }

    let meter_fuel_used = end_meter - start_meter;
    let dip_difference = start_dip - end_dip;
    let calculated_fuel_used = meter_fuel_used + dip_difference;

    let mut warnings = Vec::new();
    let mut total_bulk_fills = 0.0;
    for (index, fill) in fills.iter().enumerate() {
        match fill_amount(&fill.amount) {
            Some(amount) => total_bulk_fills += amount,
            None => warnings.push(UnparsableAmount {
                index,
                amount: fill.amount.clone(),
            }),
        }
    }

    let discrepancy = calculated_fuel_used - total_bulk_fills;

    let derived = [
        ("meter fuel used", meter_fuel_used),
        ("dip difference", dip_difference),
        ("calculated fuel used", calculated_fuel_used),
        ("total bulk fills", total_bulk_fills),
        ("discrepancy", discrepancy),
    ];
    if let Some((name, value)) = derived.iter().find(|(_, value)| !value.is_finite()) {
        return Err(LedgerError::InvalidReading(format!(
            "{} is out of range ({})",
            name, value
        )));
    }

    Ok(Reconciliation {
        report: DiscrepancyReport {
            meter_fuel_used,
            dip_difference,
            calculated_fuel_used,
            total_bulk_fills,
            discrepancy,
            classification: Classification::of(discrepancy),
        },
        warnings,
    })
}

/// Parse a reading as entered, ignoring surrounding whitespace.
pub fn parse_reading(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn reading(text: &str, field: RequiredField) -> Result<f64> {
    parse_reading(text).ok_or(LedgerError::MissingData(field))
}

/// An empty amount contributes nothing and is not worth a warning.
fn fill_amount(text: &str) -> Option<f64> {
    if text.trim().is_empty() {
        return Some(0.0);
    }
    parse_reading(text)
}
