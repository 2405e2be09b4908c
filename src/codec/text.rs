//! Positional plain-text export.
//!
//! ```text
//! Format-Version: 1
//! Truck Data:
//! Truck ID: TR123
//! Start Meter: 1000
//! Start Dip: 50
//! End Meter: 1200
//! End Dip: 40
//!
//! Bulk Fills:
//! Time: 08:30, Amount: 190 L
//!
//! Discrepancy:
//! Meter Fuel Used: 200 L
//! Dip Difference: 10 L
//! Calculated Fuel Used: 210 L
//! Total Bulk Fills: 190 L
//! Discrepancy: 20 L (Loss)
//! ```
//!
//! Report numbers are read back by word position, not by label, and fill
//! lines are split on `,` and single spaces. Changing any label wording or
//! the ` L` suffix shifts those positions, so the layout is versioned: a
//! decoder rejects any `Format-Version` it does not know. Values containing
//! `,`, `:`, spaces or newlines do not survive a round trip.

use crate::error::{LedgerError, Result};
use crate::types::{BulkFill, Classification, DiscrepancyReport, ShiftRecord, Snapshot};
use tracing::{debug, warn};

/// Current text layout version.
pub const FORMAT_VERSION: u32 = 1;

const VERSION_LABEL: &str = "Format-Version:";
const TRUCK_HEADER: &str = "Truck Data:";
const FILLS_HEADER: &str = "Bulk Fills:";
const REPORT_HEADER: &str = "Discrepancy:";

const TRUCK_ID: &str = "Truck ID";
const START_METER: &str = "Start Meter";
const START_DIP: &str = "Start Dip";
const END_METER: &str = "End Meter";
const END_DIP: &str = "End Dip";

/// Report line labels with the word offset of their value.
const REPORT_LINES: [(&str, usize); 5] = [
    ("Meter Fuel Used:", 3),
    ("Dip Difference:", 2),
    ("Calculated Fuel Used:", 3),
    ("Total Bulk Fills:", 3),
    ("Discrepancy:", 1),
];

/// Fill line: `Time: <t>, Amount: <a> L`.
const FILL_TIME_OFFSET: usize = 1;
const FILL_AMOUNT_OFFSET: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Preamble,
    Truck,
    Fills,
    Report,
}

/// Encode a snapshot using the fixed text template.
pub fn encode(snapshot: &Snapshot) -> String {
    let shift = &snapshot.shift;
    let mut out = String::new();

    out.push_str(&format!("{} {}\n", VERSION_LABEL, FORMAT_VERSION));

    out.push_str(TRUCK_HEADER);
    out.push('\n');
    for (label, value) in [
        (TRUCK_ID, &shift.truck_id),
        (START_METER, &shift.start_meter),
        (START_DIP, &shift.start_dip),
        (END_METER, &shift.end_meter),
        (END_DIP, &shift.end_dip),
    ] {
        out.push_str(&format!("{}: {}\n", label, value));
    }

    out.push('\n');
    out.push_str(FILLS_HEADER);
    out.push('\n');
    for fill in &snapshot.fills {
        out.push_str(&format!("Time: {}, Amount: {} L\n", fill.time, fill.amount));
    }

    if let Some(report) = &snapshot.report {
        let values = [
            report.meter_fuel_used,
            report.dip_difference,
            report.calculated_fuel_used,
            report.total_bulk_fills,
        ];

        out.push('\n');
        out.push_str(REPORT_HEADER);
        out.push('\n');
        for ((label, _), value) in REPORT_LINES.iter().zip(values) {
            out.push_str(&format!("{} {} L\n", label, value));
        }
        out.push_str(&format!(
            "{} {} L ({})\n",
            REPORT_LINES[4].0, report.discrepancy, report.classification
        ));
    }

    out
}

/// Decode a text export.
///
/// Missing sections decode as blank; a document without any known section
/// header is rejected.
pub fn decode(input: &str) -> Result<Snapshot> {
    let mut section = Section::Preamble;
    let mut seen_header = false;
    let mut shift = ShiftRecord::default();
    let mut fills = Vec::new();
    let mut report_lines = Vec::new();

    for line in input.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(version) = line.strip_prefix(VERSION_LABEL) {
            check_version(version.trim())?;
            continue;
        }

        match line.trim() {
            TRUCK_HEADER => {
                section = Section::Truck;
                seen_header = true;
                continue;
            }
            FILLS_HEADER => {
                section = Section::Fills;
                seen_header = true;
                continue;
            }
            REPORT_HEADER => {
                section = Section::Report;
                seen_header = true;
                continue;
            }
            _ => {}
        }

        match section {
            Section::Preamble => debug!(line, "ignoring line before first section"),
            Section::Truck => read_shift_line(line, &mut shift),
            Section::Fills => match parse_fill(line) {
                Some(fill) => fills.push(fill),
                None => warn!(line, "skipping malformed bulk fill line"),
            },
            Section::Report => report_lines.push(line),
        }
    }

    if !seen_header {
        return Err(LedgerError::Validation(
            "no recognizable section header".into(),
        ));
    }

    let report = if report_lines.is_empty() {
        None
    } else {
        let report = parse_report(&report_lines);
        if report.is_none() {
            warn!(lines = report_lines.len(), "discrepancy section unreadable, dropping report");
        }
        report
    };

    Ok(Snapshot {
        shift,
        fills,
        report,
    })
}

fn check_version(token: &str) -> Result<()> {
    match token.parse::<u32>() {
        Ok(FORMAT_VERSION) => Ok(()),
        Ok(other) => Err(LedgerError::Validation(format!(
            "unsupported text format version: {}",
            other
        ))),
        Err(_) => Err(LedgerError::Validation(format!(
            "unreadable text format version: {:?}",
            token
        ))),
    }
}

fn read_shift_line(line: &str, shift: &mut ShiftRecord) {
    let fields = [
        (TRUCK_ID, &mut shift.truck_id),
        (START_METER, &mut shift.start_meter),
        (START_DIP, &mut shift.start_dip),
        (END_METER, &mut shift.end_meter),
        (END_DIP, &mut shift.end_dip),
    ];

    for (label, slot) in fields {
        if let Some(value) = labelled_value(line, label) {
            *slot = value.to_string();
            return;
        }
    }
    debug!(line, "ignoring unknown truck data line");
}

/// `"<label>: <value>"`, tolerating a bare `"<label>:"`.
fn labelled_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(label)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn parse_fill(line: &str) -> Option<BulkFill> {
    let (time_part, amount_part) = line.split_once(',')?;
    let time = time_part.split(' ').nth(FILL_TIME_OFFSET).unwrap_or("");
    let amount = amount_part.split(' ').nth(FILL_AMOUNT_OFFSET).unwrap_or("");
    Some(BulkFill::new(time, amount))
}

fn parse_report(lines: &[&str]) -> Option<DiscrepancyReport> {
    if lines.len() < REPORT_LINES.len() {
        return None;
    }

    let mut values = [0.0f64; 5];
    for (i, (line, (_, offset))) in lines.iter().zip(REPORT_LINES.iter()).enumerate() {
        values[i] = line.split(' ').nth(*offset)?.parse::<f64>().ok()?;
    }

    let tag = lines[4].split(' ').last()?;
    let classification = Classification::parse(tag.trim_start_matches('(').trim_end_matches(')'))?;

    // Older exports wrote the magnitude only.
    let mut discrepancy = values[4];
    if classification == Classification::Surplus && discrepancy > 0.0 {
        discrepancy = -discrepancy;
    }

    Some(DiscrepancyReport {
        meter_fuel_used: values[0],
        dip_difference: values[1],
        calculated_fuel_used: values[2],
        total_bulk_fills: values[3],
        discrepancy,
        classification,
    })
}
