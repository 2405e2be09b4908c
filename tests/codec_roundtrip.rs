//! Property tests for the snapshot codecs and the reconciliation engine.

use fuel_ledger::codec::{structured, text};
use fuel_ledger::{
    compute, compute_with_warnings, BulkFill, Classification, DiscrepancyReport, ShiftRecord,
    Snapshot,
};
use proptest::prelude::*;

/// Hundredths keep decimal text exact in both directions.
fn quantity() -> impl Strategy<Value = f64> {
    (-10_000_000i64..10_000_000).prop_map(|hundredths| hundredths as f64 / 100.0)
}

fn report() -> impl Strategy<Value = DiscrepancyReport> {
    (quantity(), quantity(), quantity(), quantity(), quantity()).prop_map(
        |(meter_fuel_used, dip_difference, calculated_fuel_used, total_bulk_fills, discrepancy)| {
            DiscrepancyReport {
                meter_fuel_used,
                dip_difference,
                calculated_fuel_used,
                total_bulk_fills,
                discrepancy,
                classification: Classification::of(discrepancy),
            }
        },
    )
}

fn snapshot_with(field: impl Strategy<Value = String> + Clone) -> impl Strategy<Value = Snapshot> {
    let shift = (field.clone(), field.clone(), field.clone(), field.clone(), field.clone()).prop_map(
        |(truck_id, start_meter, start_dip, end_meter, end_dip)| ShiftRecord {
            truck_id,
            start_meter,
            start_dip,
            end_meter,
            end_dip,
        },
    );
    let fills = prop::collection::vec(
        (field.clone(), field).prop_map(|(time, amount)| BulkFill { time, amount }),
        0..8,
    );
    (shift, fills, prop::option::of(report())).prop_map(|(shift, fills, report)| Snapshot {
        shift,
        fills,
        report,
    })
}

/// Values the text layout can carry: no delimiters, spaces or newlines.
fn plain_field() -> impl Strategy<Value = String> + Clone {
    "[A-Za-z0-9._-]{0,12}"
}

fn reading() -> impl Strategy<Value = f64> {
    (0i64..1_000_000).prop_map(|tenths| tenths as f64 / 10.0)
}

proptest! {
    #[test]
    fn structured_roundtrip(snapshot in snapshot_with(any::<String>())) {
        let document = structured::encode(&snapshot).unwrap();
        prop_assert_eq!(structured::decode(&document).unwrap(), snapshot);
    }

    #[test]
    fn text_roundtrip(snapshot in snapshot_with(plain_field())) {
        let document = text::encode(&snapshot);
        prop_assert_eq!(text::decode(&document).unwrap(), snapshot);
    }

    #[test]
    fn classification_follows_sign(
        start_meter in reading(),
        used in reading(),
        start_dip in reading(),
        end_dip in reading(),
        amounts in prop::collection::vec(reading(), 1..6),
    ) {
        let shift = ShiftRecord {
            truck_id: "TR1".into(),
            start_meter: start_meter.to_string(),
            end_meter: (start_meter + used).to_string(),
            start_dip: start_dip.to_string(),
            end_dip: end_dip.to_string(),
        };
        let fills: Vec<BulkFill> = amounts
            .iter()
            .map(|amount| BulkFill::new("08:00", amount.to_string()))
            .collect();

        let report = compute(&shift, &fills).unwrap();
        prop_assert_eq!(report.classification, Classification::of(report.discrepancy));
        prop_assert_eq!(
            report.discrepancy,
            report.calculated_fuel_used - report.total_bulk_fills
        );
        prop_assert_eq!(
            report.calculated_fuel_used,
            report.meter_fuel_used + report.dip_difference
        );

        // Same inputs, same report.
        prop_assert_eq!(compute(&shift, &fills).unwrap(), report);
    }

    #[test]
    fn unparsable_amounts_count_as_zero(
        amounts in prop::collection::vec(reading(), 1..6),
        bad_at in 0usize..6,
    ) {
        let shift = ShiftRecord {
            truck_id: "TR1".into(),
            start_meter: "1000".into(),
            end_meter: "1200".into(),
            start_dip: "50".into(),
            end_dip: "40".into(),
        };
        let mut fills: Vec<BulkFill> = amounts
            .iter()
            .map(|amount| BulkFill::new("08:00", amount.to_string()))
            .collect();
        let bad_at = bad_at % fills.len();
        let clean = compute(&shift, &fills).unwrap();
        let dropped = amounts[bad_at];

        fills[bad_at].amount = "abc".into();
        let result = compute_with_warnings(&shift, &fills).unwrap();

        prop_assert_eq!(result.warnings.len(), 1);
        prop_assert_eq!(result.warnings[0].index, bad_at);
        prop_assert_eq!(result.warnings[0].amount.as_str(), "abc");
        prop_assert!((clean.total_bulk_fills - dropped - result.report.total_bulk_fills).abs() < 1e-6);
    }
}

#[test]
fn abc_amount_reference_case() {
    let shift = ShiftRecord {
        truck_id: "TR123".into(),
        start_meter: "1000".into(),
        end_meter: "1200".into(),
        start_dip: "50".into(),
        end_dip: "40".into(),
    };
    let fills = vec![BulkFill::new("08:30", "abc"), BulkFill::new("12:00", "190")];

    let report = compute(&shift, &fills).unwrap();
    assert_eq!(report.total_bulk_fills, 190.0);
    assert_eq!(report.discrepancy, 20.0);
    assert_eq!(report.classification, Classification::Loss);
}
