//! Berthing detection
//!
//! A two-state machine over a vessel's time-sorted series. A record is
//! `InPortStopped` when it lies inside the terminal geofence and is slower than
//! the stop threshold, `Transit` otherwise. An event fires on every
//! `Transit -> InPortStopped` transition.
//!
//! The first record has no predecessor and never fires, so a vessel already
//! stopped in port when its history begins yields no event.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::types::{BerthingEvent, PortGeofence, PositionRecord};

/// Per-record berthing state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BerthState {
    Transit,
    InPortStopped,
}

impl BerthState {
    pub fn classify(record: &PositionRecord, geofence: &PortGeofence) -> Self {
        if geofence.is_stopped_inside(record) {
            BerthState::InPortStopped
        } else {
            BerthState::Transit
        }
    }
}

/// Detect berthing events with the plain transition rule
///
/// `series` must be sorted ascending by timestamp (see [`crate::normalizer`]).
pub fn detect_events(series: &[PositionRecord], geofence: &PortGeofence) -> Vec<BerthingEvent> {
    BerthingDetector::default().detect(series, geofence)
}

/// Berthing detector with an optional minimum-dwell filter
///
/// With no minimum dwell this is exactly the transition rule. With one, a
/// transition only counts if the vessel stays stopped inside the geofence for
/// at least that long, measured up to the last consecutive stopped record.
#[derive(Debug, Clone, Default)]
pub struct BerthingDetector {
    min_dwell: Option<Duration>,
}

impl BerthingDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_dwell(min_dwell: Option<Duration>) -> Self {
        Self { min_dwell }
    }

    /// Events for one vessel series against one geofence
    pub fn detect(&self, series: &[PositionRecord], geofence: &PortGeofence) -> Vec<BerthingEvent> {
        let states: Vec<BerthState> = series
            .iter()
            .map(|record| BerthState::classify(record, geofence))
            .collect();

        let mut events = Vec::new();
        for i in 1..series.len() {
            if states[i - 1] != BerthState::Transit || states[i] != BerthState::InPortStopped {
                continue;
            }
            if let Some(min_dwell) = self.min_dwell {
                let run_end = states[i..]
                    .iter()
                    .take_while(|s| **s == BerthState::InPortStopped)
                    .count()
                    + i
                    - 1;
                if series[run_end].timestamp - series[i].timestamp < min_dwell {
                    continue;
                }
            }
            let record = &series[i];
            events.push(BerthingEvent {
                vessel_id: record.vessel_id.clone(),
                port_id: geofence.port_id.clone(),
                terminal_id: geofence.terminal_id.clone(),
                timestamp: record.timestamp,
                latitude: record.latitude,
                longitude: record.longitude,
                speed_knots: record.speed_knots,
            });
        }
        events
    }

    /// Events for one vessel series against every geofence, in time order
    pub fn detect_all(
        &self,
        series: &[PositionRecord],
        geofences: &[PortGeofence],
    ) -> Vec<BerthingEvent> {
        let mut events: Vec<BerthingEvent> = geofences
            .iter()
            .flat_map(|geofence| self.detect(series, geofence))
            .collect();
        events.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.terminal_id.cmp(&b.terminal_id))
        });
        events
    }
}
