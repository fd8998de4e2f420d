//! Feature derivation
//!
//! This module appends the leakage-free historical columns to labeled rows:
//! - Expanding port mean of earlier waiting times
//! - Moving average of the most recent earlier waiting times at the terminal
//! - Trailing arrival density at the terminal
//! - Queue depth at the moment of arrival

use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::debug;

use crate::clipper::GroupColumn;
use crate::config::AggregateSettings;
use crate::history::{AggregateKeys, HistoryIndex};
use crate::queue::{OwnEntry, QueueTimeline};
use crate::types::{FeatureRow, HistoricalFeatures, LabeledRow};

/// Feature deriver for labeled training rows
pub struct FeatureDeriver;

impl FeatureDeriver {
    /// Derive feature rows and return the index they were read from
    ///
    /// Output order matches input order.
    pub fn derive(
        rows: Vec<LabeledRow>,
        keys: AggregateKeys,
        settings: &AggregateSettings,
    ) -> (Vec<FeatureRow>, HistoryIndex) {
        let timelines = queue_timelines(&rows, keys.terminal);
        Self::derive_with_timelines(rows, &timelines, keys, settings)
    }

    /// Derive feature rows whose queue depth counts every vessel in `queue_rows`
    ///
    /// Aggregates are read from `rows` alone. Queue depth is read from
    /// `queue_rows`, which must contain `rows`; vessels that were dropped as
    /// training labels still occupied the queue.
    pub fn derive_with_queue(
        rows: Vec<LabeledRow>,
        queue_rows: &[LabeledRow],
        keys: AggregateKeys,
        settings: &AggregateSettings,
    ) -> (Vec<FeatureRow>, HistoryIndex) {
        let timelines = queue_timelines(queue_rows, keys.terminal);
        Self::derive_with_timelines(rows, &timelines, keys, settings)
    }

    fn derive_with_timelines(
        rows: Vec<LabeledRow>,
        timelines: &BTreeMap<String, QueueTimeline>,
        keys: AggregateKeys,
        settings: &AggregateSettings,
    ) -> (Vec<FeatureRow>, HistoryIndex) {
        let index = HistoryIndex::from_rows(&rows, keys, settings);

        let features: Vec<HistoricalFeatures> = rows
            .par_iter()
            .map(|row| features_for(&index, timelines, keys.terminal, row))
            .collect();

        let derived: Vec<FeatureRow> = rows
            .into_iter()
            .zip(features)
            .map(|(row, features)| FeatureRow { row, features })
            .collect();

        debug!(
            rows = derived.len(),
            ports = index.port_count(),
            terminals = index.terminal_count(),
            "derived historical features"
        );
        (derived, index)
    }
}

/// Append lagged aggregates and queue depth to every row
pub fn historical_aggregates(
    rows: &[LabeledRow],
    keys: &AggregateKeys,
    settings: &AggregateSettings,
) -> Vec<FeatureRow> {
    FeatureDeriver::derive(rows.to_vec(), *keys, settings).0
}

/// Arrival/berthing timelines per terminal group
pub fn queue_timelines(rows: &[LabeledRow], key: GroupColumn) -> BTreeMap<String, QueueTimeline> {
    let mut pairs: BTreeMap<String, Vec<_>> = BTreeMap::new();
    for row in rows {
        pairs
            .entry(key.key(row).to_string())
            .or_default()
            .push((row.arrival_time(), row.berthing_time()));
    }
    pairs
        .into_iter()
        .map(|(group, pairs)| (group, QueueTimeline::from_pairs(pairs)))
        .collect()
}

fn features_for(
    index: &HistoryIndex,
    timelines: &BTreeMap<String, QueueTimeline>,
    terminal_key: GroupColumn,
    row: &LabeledRow,
) -> HistoricalFeatures {
    let arrival = row.arrival_time();
    let lagged = index.aggregates_at(row, arrival);
    let queue_depth = timelines
        .get(terminal_key.key(row))
        .map(|timeline| {
            timeline.depth_at(
                arrival,
                Some(OwnEntry {
                    arrival,
                    departure: Some(row.berthing_time()),
                }),
            )
        })
        .unwrap_or(0);

    HistoricalFeatures {
        port_mean_historical: lagged.port_mean_historical,
        terminal_ma5: lagged.terminal_ma,
        arrivals_7d: lagged.arrivals_in_window,
        queue_depth,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CargoProfile, WaitingTimeRecord};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap()
    }

    fn row(vessel: &str, port: &str, terminal: &str, arrival: DateTime<Utc>, wait_minutes: i64) -> LabeledRow {
        LabeledRow {
            label: WaitingTimeRecord::new(vessel, port, arrival, arrival + Duration::minutes(wait_minutes))
                .unwrap(),
            terminal_id: terminal.to_string(),
            cargo_profile: CargoProfile::Mineral,
        }
    }

    fn derive(rows: &[LabeledRow]) -> Vec<FeatureRow> {
        historical_aggregates(rows, &AggregateKeys::default(), &AggregateSettings::default())
    }

    fn mixed_rows() -> Vec<LabeledRow> {
        (0..30)
            .map(|i| {
                let terminal = if i % 2 == 0 { "PDM-1" } else { "PDM-2" };
                let port = if i % 5 == 0 { "ITAQUI" } else { "SANTOS" };
                row(
                    &format!("V{:02}", i),
                    port,
                    terminal,
                    t0() + Duration::hours(i * 17),
                    (i * 131) % 4000,
                )
            })
            .collect()
    }

    #[test]
    fn test_queue_depth_is_not_row_position() {
        // Each vessel berths 30 minutes after arriving, an hour before the next arrives
        let rows: Vec<LabeledRow> = (0..4)
            .map(|i| row(&format!("V{}", i), "SANTOS", "T1", t0() + Duration::hours(i), 30))
            .collect();

        let depths: Vec<u32> = derive(&rows).iter().map(|r| r.features.queue_depth).collect();
        assert_eq!(depths, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_moving_average_window() {
        let rows: Vec<LabeledRow> = (0..7)
            .map(|i| row(&format!("V{}", i), "SANTOS", "T1", t0() + Duration::days(i), (i + 1) * 60))
            .collect();
        let derived = derive(&rows);

        assert_eq!(derived[0].features.terminal_ma5, 0.0);
        assert!((derived[1].features.terminal_ma5 - 1.0).abs() < 1e-9);
        // Waits 2..=6 hours precede the last row
        assert!((derived[6].features.terminal_ma5 - 4.0).abs() < 1e-9);
        // Expanding port mean of 1..=6
        assert!((derived[6].features.port_mean_historical - 3.5).abs() < 1e-9);
        // First row of the port falls back to the dataset median
        assert!((derived[0].features.port_mean_historical - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_arrival_density_window() {
        let rows: Vec<LabeledRow> = [0, 3, 6, 7, 14]
            .iter()
            .enumerate()
            .map(|(i, d)| row(&format!("V{}", i), "SANTOS", "T1", t0() + Duration::days(*d), 60))
            .collect();

        let density: Vec<u32> = derive(&rows).iter().map(|r| r.features.arrivals_7d).collect();
        assert_eq!(density, vec![1, 2, 3, 3, 1]);
    }

    #[test]
    fn test_future_rows_do_not_leak() {
        let rows = mixed_rows();
        let baseline = derive(&rows);
        let pivot = 14;
        let pivot_time = rows[pivot].arrival_time();

        // Rewrite every later label and reverse the input order
        let mut altered: Vec<LabeledRow> = rows
            .iter()
            .map(|r| {
                if r.arrival_time() > pivot_time {
                    row(&r.label.vessel_id, &r.label.port_id, &r.terminal_id, r.arrival_time(), 7000)
                } else {
                    r.clone()
                }
            })
            .collect();
        altered.reverse();

        let changed = derive(&altered);
        let target = changed
            .iter()
            .find(|r| r.row.label.vessel_id == rows[pivot].label.vessel_id)
            .unwrap();
        let original = &baseline[pivot].features;

        assert_eq!(target.features.port_mean_historical.to_bits(), original.port_mean_historical.to_bits());
        assert_eq!(target.features.terminal_ma5.to_bits(), original.terminal_ma5.to_bits());
        assert_eq!(target.features.arrivals_7d, original.arrivals_7d);
        assert_eq!(target.features.queue_depth, original.queue_depth);
    }

    #[test]
    fn test_same_instant_rows_do_not_see_each_other() {
        let rows = vec![
            row("A", "SANTOS", "T1", t0(), 600),
            row("B", "SANTOS", "T1", t0() + Duration::hours(5), 60),
            row("C", "SANTOS", "T1", t0() + Duration::hours(5), 3000),
        ];
        let derived = derive(&rows);

        for r in &derived[1..] {
            assert!((r.features.port_mean_historical - 10.0).abs() < 1e-9);
            assert!((r.features.terminal_ma5 - 10.0).abs() < 1e-9);
            assert_eq!(r.features.arrivals_7d, 2);
        }
    }

    #[test]
    fn test_output_preserves_input_order() {
        let mut rows = mixed_rows();
        rows.swap(0, 20);
        let derived = derive(&rows);
        let ids: Vec<&str> = derived.iter().map(|r| r.row.label.vessel_id.as_str()).collect();
        let expected: Vec<&str> = rows.iter().map(|r| r.label.vessel_id.as_str()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_queue_counts_rows_outside_the_feature_set() {
        let long_waiter = row("A", "SANTOS", "T1", t0(), 6000);
        let later = row("B", "SANTOS", "T1", t0() + Duration::hours(10), 60);
        let all = vec![long_waiter, later.clone()];

        let (derived, index) = FeatureDeriver::derive_with_queue(
            vec![later.clone()],
            &all,
            AggregateKeys::default(),
            &AggregateSettings::default(),
        );

        assert_eq!(derived[0].features.queue_depth, 1);
        assert_eq!(derived[0].features.terminal_ma5, 0.0);
        assert_eq!(index.terminal_count(), 1);

        let (alone, _) =
            FeatureDeriver::derive(vec![later], AggregateKeys::default(), &AggregateSettings::default());
        assert_eq!(alone[0].features.queue_depth, 0);
    }
}
