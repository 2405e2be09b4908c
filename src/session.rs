//! Shift session.
//!
//! The single actor that owns the in-memory [`Snapshot`]. Every mutation
//! drops the cached report and schedules a slot save through the
//! [`Gateway`]. Imports and restores are decoded and validated before the
//! state lock is taken, then swapped in whole.

use crate::codec::{structured, text, ExportFormat};
use crate::error::{LedgerError, RequiredField, Result};
use crate::gateway::Gateway;
use crate::reconcile::{self, parse_reading};
use crate::types::{
    BulkFill, DiscrepancyReport, Receipt, RecordId, ShiftEntry, ShiftEntryKind, Snapshot, Timestamp,
};
use crate::writer::PendingWrite;
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Session {
    state: RwLock<Snapshot>,
    gateway: Arc<Gateway>,
}

impl Session {
    /// Start with an empty shift.
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            state: RwLock::new(Snapshot::default()),
            gateway,
        }
    }

    /// Start from whatever the snapshot slot holds.
    pub fn open(gateway: Arc<Gateway>) -> Result<Self> {
        let session = Self::new(gateway);
        session.restore()?;
        Ok(session)
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> Snapshot {
        self.state.read().clone()
    }

    /// The cached report, if calculated since the last change.
    pub fn report(&self) -> Option<DiscrepancyReport> {
        self.state.read().report.clone()
    }

    // --- Shift workflow ---

    /// Record the start-of-day readings.
    pub fn start_of_day(&self, truck_id: &str, start_meter: &str, start_dip: &str) -> Result<PendingWrite> {
        require(truck_id, RequiredField::TruckId)?;
        require(start_meter, RequiredField::StartMeter)?;
        require(start_dip, RequiredField::StartDip)?;

        self.mutate(|snapshot| {
            snapshot.shift.truck_id = truck_id.to_string();
            snapshot.shift.start_meter = start_meter.to_string();
            snapshot.shift.start_dip = start_dip.to_string();
            Ok(Some(ShiftEntryKind::StartOfDay))
        })
    }

    /// Record the end-of-day readings.
    ///
    /// The end meter must read higher than the start meter.
    pub fn end_of_day(&self, end_meter: &str, end_dip: &str) -> Result<PendingWrite> {
        require(end_meter, RequiredField::EndMeter)?;
        require(end_dip, RequiredField::EndDip)?;

        self.mutate(|snapshot| {
            let start = parse_reading(&snapshot.shift.start_meter);
            let end = parse_reading(end_meter);
            if let (Some(start), Some(end)) = (start, end) {
                if end <= start {
                    return Err(LedgerError::InvalidReading(format!(
                        "end meter {} must be greater than start meter {}",
                        end, start
                    )));
                }
            }

            snapshot.shift.end_meter = end_meter.to_string();
            snapshot.shift.end_dip = end_dip.to_string();
            Ok(Some(ShiftEntryKind::EndOfDay))
        })
    }

    /// Append a bulk fill to the ledger.
    ///
    /// The amount is kept as entered even if it is not a number.
    pub fn add_bulk_fill(&self, time: &str, amount: &str) -> Result<PendingWrite> {
        require(time, RequiredField::FillTime)?;
        require(amount, RequiredField::FillAmount)?;

        let fill = BulkFill::new(time, amount);
        if let Some(records) = self.gateway.records() {
            records.add_fill(&fill)?;
        }

        self.mutate(|snapshot| {
            snapshot.fills.push(fill);
            Ok(None)
        })
    }

    /// Journal receipt data read off a fuel slip.
    pub fn add_receipt(&self, receipt: &Receipt) -> Result<RecordId> {
        self.gateway.require_records()?.add_receipt(receipt)
    }

    /// Compute the discrepancy report and keep it with the state.
    ///
    /// A report already cached for the current state is returned as is; the
    /// state is saved again either way, so an earlier failed save is retried.
    pub fn calculate(&self) -> Result<(DiscrepancyReport, PendingWrite)> {
        let mut state = self.state.write();
        if let Some(report) = &state.report {
            let report = report.clone();
            let pending = self.gateway.save(&state);
            return Ok((report, pending));
        }

        let report = reconcile::compute(&state.shift, &state.fills)?;
        state.report = Some(report.clone());
        debug!(discrepancy = report.discrepancy, status = %report.classification, "report calculated");

        let pending = self.gateway.save(&state);
        Ok((report, pending))
    }

    /// Discard the shift, its ledger and report, and clear the slot.
    pub fn reset(&self) -> PendingWrite {
        let mut state = self.state.write();
        *state = Snapshot::default();
        info!("session reset");
        self.gateway.clear()
    }

    // --- Persistence ---

    /// Replace the state with the slot contents.
    ///
    /// Returns `false` when the slot is empty. On any error the current
    /// state is kept.
    pub fn restore(&self) -> Result<bool> {
        match self.gateway.load()? {
            Some(snapshot) => {
                *self.state.write() = snapshot;
                info!("session restored from snapshot slot");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace the state with a structured document.
    pub fn import_structured(&self, input: &str) -> Result<PendingWrite> {
        let snapshot = structured::decode(input)?;
        Ok(self.replace(snapshot))
    }

    /// Replace the state with a plain-text export.
    pub fn import_text(&self, input: &str) -> Result<PendingWrite> {
        let snapshot = text::decode(input)?;
        Ok(self.replace(snapshot))
    }

    /// Replace the state with an export file, picking the codec by extension.
    pub fn import_file(&self, path: &Path) -> Result<PendingWrite> {
        let format = ExportFormat::from_path(path).ok_or_else(|| {
            LedgerError::Validation(format!("unrecognized export file: {}", path.display()))
        })?;
        let bytes = fs::read(path)?;
        let input = String::from_utf8(bytes).map_err(|e| {
            LedgerError::Validation(format!("{} is not UTF-8 text: {}", path.display(), e))
        })?;
        let snapshot = format.decode(&input)?;
        info!(path = %path.display(), "importing export file");
        Ok(self.replace(snapshot))
    }

    pub fn export_structured(&self) -> Result<String> {
        structured::encode(&self.state.read())
    }

    pub fn export_text(&self) -> String {
        text::encode(&self.state.read())
    }

    /// Write an export file into `dir`, named after the export time.
    pub fn export_to_dir(&self, dir: &Path, format: ExportFormat) -> Result<PathBuf> {
        let content = format.encode(&self.state.read())?;
        let path = dir.join(format.file_name(Timestamp::now()));
        fs::write(&path, content)?;
        info!(path = %path.display(), "snapshot exported");
        Ok(path)
    }

    fn replace(&self, snapshot: Snapshot) -> PendingWrite {
        let mut state = self.state.write();
        *state = snapshot;
        self.gateway.save(&state)
    }

    /// Apply `change` to a working copy; journal and commit it only if it
    /// succeeds.
    fn mutate<F>(&self, change: F) -> Result<PendingWrite>
    where
        F: FnOnce(&mut Snapshot) -> Result<Option<ShiftEntryKind>>,
    {
        let mut state = self.state.write();

        let mut next = state.clone();
        let journal = change(&mut next)?;
        next.report = None;

        if let (Some(kind), Some(records)) = (journal, self.gateway.records()) {
            records.add_shift_entry(&ShiftEntry::from_shift(&next.shift, kind))?;
        }

        *state = next;
        Ok(self.gateway.save(&state))
    }
}

fn require(value: &str, field: RequiredField) -> Result<()> {
    if value.trim().is_empty() {
        Err(LedgerError::MissingData(field))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayConfig;
    use crate::slot::MemoryKeyValueStore;
    use crate::types::Classification;

    fn session() -> Session {
        let gateway = Gateway::new(Arc::new(MemoryKeyValueStore::new()), GatewayConfig::default()).unwrap();
        Session::new(Arc::new(gateway))
    }

    #[test]
    fn test_full_shift() {
        let s = session();
        s.start_of_day("TR123", "1000", "50").unwrap().wait().unwrap();
        s.add_bulk_fill("08:30", "190").unwrap().wait().unwrap();
        s.end_of_day("1200", "40").unwrap().wait().unwrap();

        let (report, pending) = s.calculate().unwrap();
        pending.wait().unwrap();
        assert_eq!(report.discrepancy, 20.0);
        assert_eq!(report.classification, Classification::Loss);
        assert_eq!(s.report(), Some(report));
    }

    #[test]
    fn test_start_of_day_requires_all_fields() {
        let s = session();
        let err = s.start_of_day("", "1000", "50").unwrap_err();
        assert!(matches!(err, LedgerError::MissingData(RequiredField::TruckId)));
        let err = s.start_of_day("TR1", "1000", "  ").unwrap_err();
        assert!(matches!(err, LedgerError::MissingData(RequiredField::StartDip)));
        assert!(s.snapshot().is_empty());
    }

    #[test]
    fn test_end_meter_must_exceed_start() {
        let s = session();
        s.start_of_day("TR1", "1000", "50").unwrap().wait().unwrap();

        let err = s.end_of_day("1000", "40").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidReading(_)));
        assert_eq!(s.snapshot().shift.end_meter, "");
    }

    #[test]
    fn test_mutation_drops_cached_report() {
        let s = session();
        s.start_of_day("TR1", "1000", "50").unwrap().wait().unwrap();
        s.end_of_day("1200", "40").unwrap().wait().unwrap();
        s.add_bulk_fill("08:30", "190").unwrap().wait().unwrap();
        s.calculate().unwrap().1.wait().unwrap();
        assert!(s.report().is_some());

        s.add_bulk_fill("09:30", "30").unwrap().wait().unwrap();
        assert!(s.report().is_none());

        let (report, _) = s.calculate().unwrap();
        assert_eq!(report.discrepancy, -10.0);
        assert_eq!(report.classification, Classification::Surplus);
    }

    #[test]
    fn test_calculate_without_fills() {
        let s = session();
        s.start_of_day("TR1", "1000", "50").unwrap().wait().unwrap();
        s.end_of_day("1200", "40").unwrap().wait().unwrap();

        let err = s.calculate().unwrap_err();
        assert!(matches!(err, LedgerError::MissingData(RequiredField::BulkFills)));
        assert!(s.report().is_none());
    }

    #[test]
    fn test_out_of_range_report_not_cached() {
        let s = session();
        s.start_of_day("TR1", "-1e308", "50").unwrap().wait().unwrap();
        s.add_bulk_fill("08:30", "190").unwrap().wait().unwrap();
        s.end_of_day("1.7e308", "40").unwrap().wait().unwrap();

        assert!(matches!(s.calculate(), Err(LedgerError::InvalidReading(_))));
        assert!(s.report().is_none());
        assert!(s.export_structured().is_ok());
    }

    #[test]
    fn test_receipt_requires_record_store() {
        let s = session();
        assert!(matches!(
            s.add_receipt(&Receipt::default()),
            Err(LedgerError::NotInitialized)
        ));
    }

    #[test]
    fn test_reset_and_restore() {
        let s = session();
        s.start_of_day("TR1", "1000", "50").unwrap().wait().unwrap();

        let other = Session::open(s.gateway().clone()).unwrap();
        assert_eq!(other.snapshot().shift.truck_id, "TR1");

        s.reset().wait().unwrap();
        assert!(s.snapshot().is_empty());
        assert!(!other.restore().unwrap());
        // Nothing to restore leaves state alone.
        assert_eq!(other.snapshot().shift.truck_id, "TR1");
    }
}
