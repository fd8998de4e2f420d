//! Waiting-time labels
//!
//! Arrival is the earliest record of the observation window at or before the
//! berthing instant, not the first record inside the port approach. Waiting time
//! is therefore bounded by how far back the fetched history reaches.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{
    waiting_hours_between, BerthingEvent, LabeledRow, PortLogEntry, PositionRecord,
    WaitingTimeRecord, MAX_WAITING_HOURS,
};

/// Why a berthing produced no label
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unlabeled {
    /// No record at or before the berthing instant
    InsufficientHistory,
    /// Waiting hours outside `[0, 720]`
    OutOfRange { waiting_hours: f64 },
}

/// Waiting-time label for a berthing event, or `None`
///
/// `series` must be sorted ascending by timestamp.
pub fn compute_waiting_time(
    series: &[PositionRecord],
    event: &BerthingEvent,
) -> Option<WaitingTimeRecord> {
    label_berthing(series, event).ok()
}

/// Waiting-time label for a berthing event, with the reason when none is produced
pub fn label_berthing(
    series: &[PositionRecord],
    event: &BerthingEvent,
) -> Result<WaitingTimeRecord, Unlabeled> {
    let arrival_time = series
        .first()
        .map(|record| record.timestamp)
        .filter(|first| *first <= event.timestamp)
        .ok_or(Unlabeled::InsufficientHistory)?;

    label_interval(&event.vessel_id, &event.port_id, arrival_time, event.timestamp)
}

fn label_interval(
    vessel_id: &str,
    port_id: &str,
    arrival_time: DateTime<Utc>,
    berthing_time: DateTime<Utc>,
) -> Result<WaitingTimeRecord, Unlabeled> {
    WaitingTimeRecord::new(vessel_id, port_id, arrival_time, berthing_time).ok_or_else(|| {
        Unlabeled::OutOfRange {
            waiting_hours: waiting_hours_between(arrival_time, berthing_time),
        }
    })
}

/// Counters from labeling a port log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortLogSummary {
    pub entries: usize,
    pub labeled: usize,
    /// Entries whose berthing time is not yet known
    pub pending: usize,
    pub out_of_range: usize,
}

/// Labeled rows from port-log entries with a known berthing time
///
/// Times are truncated to milliseconds, the resolution waiting hours are kept in.
pub fn labels_from_port_log(entries: &[PortLogEntry]) -> (Vec<LabeledRow>, PortLogSummary) {
    let mut summary = PortLogSummary {
        entries: entries.len(),
        ..Default::default()
    };
    let mut rows = Vec::new();

    for entry in entries {
        let Some(departure) = entry.departure_time else {
            summary.pending += 1;
            continue;
        };
        let arrival = entry.arrival_time.trunc_subsecs(3);
        let departure = departure.trunc_subsecs(3);
        match label_interval(&entry.vessel_id, &entry.port_id, arrival, departure) {
            Ok(label) => {
                summary.labeled += 1;
                rows.push(LabeledRow {
                    label,
                    terminal_id: entry.terminal_id.clone(),
                    cargo_profile: entry.cargo_profile,
                });
            }
            Err(_) => summary.out_of_range += 1,
        }
    }

    debug!(
        entries = summary.entries,
        labeled = summary.labeled,
        pending = summary.pending,
        out_of_range = summary.out_of_range,
        max_hours = MAX_WAITING_HOURS,
        "labeled port log"
    );
    (rows, summary)
}
