//! Pipeline orchestration
//!
//! This module provides the public API for berthq.
//! It runs raw position reports through to labeled rows, and labeled rows
//! through to a clipped, feature-enriched, fold-split training set.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clipper::{clip_outliers, ClipReport};
use crate::config::BerthConfig;
use crate::detector::BerthingDetector;
use crate::error::ComputeError;
use crate::features::FeatureDeriver;
use crate::history::{sample_order, AggregateKeys, HistoryIndex};
use crate::normalizer::{NormalizeReport, Normalizer, VesselSeries};
use crate::online::{LiveQuery, OnlineFeatures};
use crate::queue::LineupVessel;
use crate::splitter::{temporal_folds, TemporalFold};
use crate::types::{
    CargoProfile, FeatureRow, HistoricalFeatures, LabeledRow, PortGeofence, PortLogEntry,
    RawPositionRecord,
};
use crate::waiting::{label_berthing, labels_from_port_log, PortLogSummary, Unlabeled};

/// Counters from one labeling run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelingSummary {
    pub run_id: Uuid,
    pub completed_at: DateTime<Utc>,
    pub normalize: NormalizeReport,
    pub vessels: usize,
    pub events: usize,
    pub labeled: usize,
    pub insufficient_history: usize,
    pub out_of_range: usize,
}

#[derive(Default)]
struct VesselOutcome {
    rows: Vec<LabeledRow>,
    events: usize,
    insufficient_history: usize,
    out_of_range: usize,
}

/// Label raw position reports against every configured terminal.
///
/// Pipeline stages:
/// 1. Normalizer - Validate, group per vessel and sort
/// 2. BerthingDetector - Find transit to stopped-in-geofence transitions
/// 3. Waiting-time calculator - Label each event, dropping out-of-range waits
///
/// Vessels are processed in parallel and merged in vessel id order.
pub fn label_positions(
    raw: &[RawPositionRecord],
    config: &BerthConfig,
) -> Result<(Vec<LabeledRow>, LabelingSummary), ComputeError> {
    config.validate()?;
    if config.terminals.is_empty() {
        return Err(ComputeError::ConfigError(
            "no terminals configured".to_string(),
        ));
    }

    let (series, normalize) = Normalizer::normalize(raw);
    let geofences = config.geofences();
    let profiles: BTreeMap<&str, CargoProfile> = config
        .terminals
        .iter()
        .map(|t| (t.id.as_str(), t.cargo_profile))
        .collect();
    let detector = BerthingDetector::with_min_dwell(config.detector.min_dwell());

    let outcomes: Vec<VesselOutcome> = series
        .par_iter()
        .map(|vessel| label_vessel(vessel, &detector, &geofences, &profiles))
        .collect();

    let mut summary = LabelingSummary {
        run_id: Uuid::new_v4(),
        completed_at: Utc::now(),
        normalize,
        vessels: series.len(),
        events: 0,
        labeled: 0,
        insufficient_history: 0,
        out_of_range: 0,
    };
    let mut rows = Vec::new();
    for outcome in outcomes {
        summary.events += outcome.events;
        summary.insufficient_history += outcome.insufficient_history;
        summary.out_of_range += outcome.out_of_range;
        rows.extend(outcome.rows);
    }
    summary.labeled = rows.len();

    info!(
        run_id = %summary.run_id,
        vessels = summary.vessels,
        events = summary.events,
        labeled = summary.labeled,
        out_of_range = summary.out_of_range,
        "labeled position stream"
    );
    Ok((rows, summary))
}

fn label_vessel(
    vessel: &VesselSeries,
    detector: &BerthingDetector,
    geofences: &[PortGeofence],
    profiles: &BTreeMap<&str, CargoProfile>,
) -> VesselOutcome {
    let events = detector.detect_all(&vessel.records, geofences);
    let mut outcome = VesselOutcome {
        events: events.len(),
        ..Default::default()
    };

    for event in &events {
        match label_berthing(&vessel.records, event) {
            Ok(label) => outcome.rows.push(LabeledRow {
                label,
                terminal_id: event.terminal_id.clone(),
                cargo_profile: profiles
                    .get(event.terminal_id.as_str())
                    .copied()
                    .unwrap_or_default(),
            }),
            Err(Unlabeled::InsufficientHistory) => outcome.insufficient_history += 1,
            Err(Unlabeled::OutOfRange { waiting_hours }) => {
                debug!(vessel = %vessel.vessel_id, waiting_hours, "discarded out-of-range wait");
                outcome.out_of_range += 1;
            }
        }
    }
    outcome
}

/// Clipped, feature-enriched rows with their folds and the index behind them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSet {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Rows in chronological order; fold indices point into this vector
    pub rows: Vec<FeatureRow>,
    pub folds: Vec<TemporalFold>,
    pub clip: ClipReport,
    pub index: HistoryIndex,
}

/// Clip outliers, derive lagged features and draw temporal folds.
///
/// Clipping removes labels, not vessels: queue depth still counts clipped rows.
/// Fails when there are no rows to work with or no fold survives the gap.
pub fn prepare_training_set(
    rows: Vec<LabeledRow>,
    config: &BerthConfig,
) -> Result<TrainingSet, ComputeError> {
    if rows.is_empty() {
        return Err(ComputeError::NoLabeledRows(
            "training input is empty".to_string(),
        ));
    }

    let queue_rows = rows.clone();
    let (mut kept, clip) = clip_outliers(rows, config.clipper.group_by, config.clipper.percentile)?;
    if kept.is_empty() {
        return Err(ComputeError::NoLabeledRows(
            "every row was removed by outlier clipping".to_string(),
        ));
    }
    kept.sort_by(sample_order);

    let (rows, index) = FeatureDeriver::derive_with_queue(
        kept,
        &queue_rows,
        AggregateKeys::default(),
        &config.aggregates,
    );
    let folds = temporal_folds(
        &rows,
        |row| row.row.arrival_time(),
        config.splitter.n_splits,
        config.splitter.gap_days,
    )?;

    let set = TrainingSet {
        run_id: Uuid::new_v4(),
        created_at: Utc::now(),
        rows,
        folds,
        clip,
        index,
    };
    info!(
        run_id = %set.run_id,
        rows = set.rows.len(),
        folds = set.folds.len(),
        clipped = set.clip.total_dropped(),
        "prepared training set"
    );
    Ok(set)
}

/// Stateful processor that accumulates labels across batches.
///
/// Use this when positions and port logs arrive in several deliveries. Rows are
/// keyed by vessel, terminal and berthing time, so a re-delivered berthing
/// replaces the earlier label instead of duplicating it.
pub struct BerthProcessor {
    config: BerthConfig,
    rows: BTreeMap<(String, String, DateTime<Utc>), LabeledRow>,
    index: Option<HistoryIndex>,
}

impl BerthProcessor {
    pub fn new(config: BerthConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            config,
            rows: BTreeMap::new(),
            index: None,
        })
    }

    pub fn config(&self) -> &BerthConfig {
        &self.config
    }

    /// Label a batch of raw position reports and keep the rows
    pub fn ingest_positions(
        &mut self,
        raw: &[RawPositionRecord],
    ) -> Result<LabelingSummary, ComputeError> {
        let (rows, summary) = label_positions(raw, &self.config)?;
        self.insert_rows(rows);
        Ok(summary)
    }

    /// Label a batch of port-log entries and keep the rows
    pub fn ingest_port_log(&mut self, entries: &[PortLogEntry]) -> PortLogSummary {
        let (rows, summary) = labels_from_port_log(entries);
        self.insert_rows(rows);
        summary
    }

    fn insert_rows(&mut self, rows: Vec<LabeledRow>) {
        for row in rows {
            let key = (
                row.label.vessel_id.clone(),
                row.terminal_id.clone(),
                row.berthing_time(),
            );
            self.rows.insert(key, row);
        }
    }

    /// Labeled rows accumulated so far, in chronological order
    pub fn rows(&self) -> Vec<LabeledRow> {
        let mut rows: Vec<LabeledRow> = self.rows.values().cloned().collect();
        rows.sort_by(sample_order);
        rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Build a training set from everything ingested and keep its index for queries
    pub fn prepare(&mut self) -> Result<TrainingSet, ComputeError> {
        let set = prepare_training_set(self.rows(), &self.config)?;
        self.index = Some(set.index.clone());
        Ok(set)
    }

    /// Online features against the index of the last prepared training set
    pub fn query(
        &self,
        lineup: &[LineupVessel],
        query: &LiveQuery,
    ) -> Result<HistoricalFeatures, ComputeError> {
        let index = self.index.as_ref().ok_or_else(|| {
            ComputeError::NoLabeledRows("no training set has been prepared".to_string())
        })?;
        OnlineFeatures::query(index, lineup, query, &self.config)
    }

    /// Load labeled rows from JSON
    pub fn load_rows(&mut self, json: &str) -> Result<(), ComputeError> {
        let rows: Vec<LabeledRow> = serde_json::from_str(json)?;
        self.insert_rows(rows);
        Ok(())
    }

    /// Save labeled rows to JSON
    pub fn save_rows(&self) -> Result<String, ComputeError> {
        Ok(serde_json::to_string(&self.rows())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TerminalConfig;
    use chrono::{Duration, TimeZone};

    const IN_LAT: f64 = -20.28;
    const IN_LON: f64 = -40.24;
    const OUT_LAT: f64 = -20.10;
    const OUT_LON: f64 = -40.00;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap()
    }

    fn config() -> BerthConfig {
        BerthConfig {
            terminals: vec![TerminalConfig {
                id: "TUBARAO".to_string(),
                port_id: "VITORIA".to_string(),
                cargo_profile: CargoProfile::Mineral,
                lat_min: -20.30,
                lat_max: -20.25,
                lon_min: -40.30,
                lon_max: -40.20,
                stop_speed_knots: 1.0,
                berths: Some(2),
            }],
            ..Default::default()
        }
    }

    fn raw(vessel: &str, hours: i64, inside: bool, speed: f64) -> RawPositionRecord {
        let (lat, lon) = if inside { (IN_LAT, IN_LON) } else { (OUT_LAT, OUT_LON) };
        RawPositionRecord {
            vessel_id: Some(vessel.to_string()),
            timestamp: Some((t0() + Duration::hours(hours)).to_rfc3339()),
            latitude: Some(lat),
            longitude: Some(lon),
            speed: Some(speed),
            ..Default::default()
        }
    }

    fn three_vessel_stream() -> Vec<RawPositionRecord> {
        vec![
            // V1 never comes in
            raw("V1", 0, false, 11.0),
            raw("V1", 1, false, 10.5),
            raw("V1", 2, false, 9.8),
            // V2 enters and stops
            raw("V2", 1, false, 10.0),
            raw("V2", 2, true, 5.0),
            raw("V2", 3, true, 0.2),
            raw("V2", 4, true, 0.1),
            // V3 stops, leaves an hour later, comes back and stops again
            raw("V3", 2, false, 9.0),
            raw("V3", 3, true, 0.3),
            raw("V3", 4, false, 6.0),
            raw("V3", 5, true, 0.5),
        ]
    }

    #[test]
    fn test_three_vessel_end_to_end() {
        let (rows, summary) = label_positions(&three_vessel_stream(), &config()).unwrap();

        assert_eq!(summary.vessels, 3);
        assert_eq!(summary.events, 3);
        assert_eq!(summary.labeled, 3);
        assert_eq!(summary.normalize.dropped_records(), 0);

        let labels: Vec<(&str, DateTime<Utc>, f64)> = rows
            .iter()
            .map(|r| (r.label.vessel_id.as_str(), r.berthing_time(), r.waiting_hours()))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("V2", t0() + Duration::hours(3), 2.0),
                ("V3", t0() + Duration::hours(3), 1.0),
                ("V3", t0() + Duration::hours(5), 3.0),
            ]
        );
        assert!(rows.iter().all(|r| r.cargo_profile == CargoProfile::Mineral));
        assert!(rows.iter().all(|r| r.terminal_id == "TUBARAO"));
    }

    #[test]
    fn test_malformed_records_are_counted_not_fatal() {
        let mut stream = three_vessel_stream();
        stream.push(RawPositionRecord {
            vessel_id: Some("V4".to_string()),
            timestamp: Some("yesterday".to_string()),
            ..Default::default()
        });
        stream.push(RawPositionRecord::default());

        let (rows, summary) = label_positions(&stream, &config()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(summary.normalize.dropped_records(), 2);
    }

    #[test]
    fn test_label_positions_requires_terminals() {
        let err = label_positions(&three_vessel_stream(), &BerthConfig::default()).unwrap_err();
        assert!(matches!(err, ComputeError::ConfigError(_)));
    }

    fn port_log(days: i64) -> Vec<PortLogEntry> {
        (0..days * 2)
            .map(|i| {
                let arrival = t0() + Duration::hours(i * 12);
                PortLogEntry {
                    vessel_id: format!("IMO{}", 9_000_000 + i),
                    port_id: "VITORIA".to_string(),
                    terminal_id: "TUBARAO".to_string(),
                    cargo_profile: CargoProfile::Mineral,
                    arrival_time: arrival,
                    departure_time: Some(arrival + Duration::minutes((i * 53) % 2000)),
                }
            })
            .collect()
    }

    #[test]
    fn test_prepare_training_set() {
        let (rows, _) = labels_from_port_log(&port_log(90));
        let set = prepare_training_set(rows, &config()).unwrap();

        assert!(!set.folds.is_empty());
        assert_eq!(set.rows.len(), set.clip.total_kept());
        assert!(set
            .rows
            .windows(2)
            .all(|w| w[0].row.arrival_time() <= w[1].row.arrival_time()));

        let gap = Duration::days(config().splitter.gap_days);
        for fold in &set.folds {
            let max_train = fold.train.iter().map(|&i| set.rows[i].row.arrival_time()).max().unwrap();
            let min_val = fold
                .validation
                .iter()
                .map(|&i| set.rows[i].row.arrival_time())
                .min()
                .unwrap();
            assert!(max_train + gap <= min_val);
        }
    }

    #[test]
    fn test_clipped_long_waiter_still_occupies_queue() {
        let log: Vec<PortLogEntry> = (0..200)
            .map(|i| {
                let arrival = t0() + Duration::hours(i * 12);
                let wait = if i == 100 { 600 } else { 1 };
                PortLogEntry {
                    vessel_id: format!("V{}", i),
                    port_id: "VITORIA".to_string(),
                    terminal_id: "TUBARAO".to_string(),
                    cargo_profile: CargoProfile::Mineral,
                    arrival_time: arrival,
                    departure_time: Some(arrival + Duration::hours(wait)),
                }
            })
            .collect();
        let (rows, _) = labels_from_port_log(&log);

        let set = prepare_training_set(rows, &config()).unwrap();
        let find = |id: &str| set.rows.iter().find(|r| r.row.label.vessel_id == id);

        assert_eq!(set.clip.total_dropped(), 1);
        assert!(find("V100").is_none());
        assert_eq!(find("V99").unwrap().features.queue_depth, 0);
        assert_eq!(find("V101").unwrap().features.queue_depth, 1);
        let v110 = find("V110").unwrap();
        assert_eq!(v110.features.queue_depth, 1);
        assert_eq!(v110.features.port_mean_historical, 1.0);
        assert_eq!(find("V151").unwrap().features.queue_depth, 0);
    }

    #[test]
    fn test_prepare_training_set_errors() {
        assert!(matches!(
            prepare_training_set(Vec::new(), &config()).unwrap_err(),
            ComputeError::NoLabeledRows(_)
        ));

        let (rows, _) = labels_from_port_log(&port_log(3));
        assert!(matches!(
            prepare_training_set(rows, &config()).unwrap_err(),
            ComputeError::SplitUnavailable(_)
        ));
    }

    #[test]
    fn test_processor_accumulates_and_serves() {
        let mut processor = BerthProcessor::new(config()).unwrap();
        let log = port_log(60);

        processor.ingest_port_log(&log[..80]);
        processor.ingest_port_log(&log[60..]);
        assert_eq!(processor.len(), 120);

        assert!(processor
            .query(&[], &live_query(t0() + Duration::days(61)))
            .is_err());

        let set = processor.prepare().unwrap();
        let features = processor
            .query(&[], &live_query(t0() + Duration::days(61)))
            .unwrap();
        let last = set.rows.last().unwrap();
        assert!(features.port_mean_historical > 0.0);
        assert_eq!(features.queue_depth, 0);
        assert!(last.features.arrivals_7d >= 1);
    }

    #[test]
    fn test_processor_rows_round_trip() {
        let mut processor = BerthProcessor::new(config()).unwrap();
        processor.ingest_positions(&three_vessel_stream()).unwrap();
        let saved = processor.save_rows().unwrap();

        let mut restored = BerthProcessor::new(config()).unwrap();
        restored.load_rows(&saved).unwrap();
        assert_eq!(restored.rows(), processor.rows());
    }

    fn live_query(arrival: DateTime<Utc>) -> LiveQuery {
        LiveQuery {
            vessel_id: "LIVE".to_string(),
            port_id: "VITORIA".to_string(),
            terminal_id: "TUBARAO".to_string(),
            cargo_profile: CargoProfile::Mineral,
            arrival_time: arrival,
        }
    }
}
