//! Core types for the berthq pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw position reports, normalized positions, berthing events,
//! waiting-time labels, and feature rows.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Waiting times above this many hours (30 days) are discarded, never clamped
pub const MAX_WAITING_HOURS: f64 = 720.0;

/// Default stop-speed threshold in knots
pub const DEFAULT_STOP_SPEED_KNOTS: f64 = 1.0;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Cargo profile of a terminal or vessel call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CargoProfile {
    Generic,
    Mineral,
    Fertilizer,
    Grain,
    Liquid,
}

impl Default for CargoProfile {
    fn default() -> Self {
        CargoProfile::Generic
    }
}

impl CargoProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            CargoProfile::Generic => "generic",
            CargoProfile::Mineral => "mineral",
            CargoProfile::Fertilizer => "fertilizer",
            CargoProfile::Grain => "grain",
            CargoProfile::Liquid => "liquid",
        }
    }

    pub const ALL: [CargoProfile; 5] = [
        CargoProfile::Generic,
        CargoProfile::Mineral,
        CargoProfile::Fertilizer,
        CargoProfile::Grain,
        CargoProfile::Liquid,
    ];
}

/// Position report as delivered by a tracking provider, before normalization
///
/// Every field is optional so that malformed reports can be counted instead of
/// failing the whole batch at deserialization time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPositionRecord {
    #[serde(default)]
    pub vessel_id: Option<String>,
    /// Timestamp text (RFC 3339 or `YYYY-MM-DD HH:MM:SS`, naive values are UTC)
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Speed over ground (knots)
    #[serde(default)]
    pub speed: Option<f64>,
    /// Course over ground (degrees)
    #[serde(default)]
    pub course: Option<f64>,
    /// AIS navigational status code
    #[serde(default)]
    pub nav_status: Option<u8>,
}

/// Validated position report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub vessel_id: String,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Speed over ground (knots)
    pub speed_knots: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav_status: Option<u8>,
}

/// Axis-aligned bounding box around a terminal plus its stop-speed threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortGeofence {
    pub port_id: String,
    pub terminal_id: String,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    pub stop_speed_knots: f64,
}

impl PortGeofence {
    /// Containment is inclusive on all four edges
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.lat_min
            && latitude <= self.lat_max
            && longitude >= self.lon_min
            && longitude <= self.lon_max
    }

    /// Inside the box and slower than the stop threshold
    pub fn is_stopped_inside(&self, record: &PositionRecord) -> bool {
        self.contains(record.latitude, record.longitude)
            && record.speed_knots < self.stop_speed_knots
    }
}

/// A vessel coming to rest inside a terminal geofence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BerthingEvent {
    pub vessel_id: String,
    pub port_id: String,
    pub terminal_id: String,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_knots: f64,
}

/// Waiting-time label for one berthing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitingTimeRecord {
    pub vessel_id: String,
    pub port_id: String,
    pub arrival_time: DateTime<Utc>,
    pub berthing_time: DateTime<Utc>,
    pub waiting_hours: f64,
}

impl WaitingTimeRecord {
    /// Build a label if the waiting time falls in `[0, MAX_WAITING_HOURS]`
    pub fn new(
        vessel_id: impl Into<String>,
        port_id: impl Into<String>,
        arrival_time: DateTime<Utc>,
        berthing_time: DateTime<Utc>,
    ) -> Option<Self> {
        let waiting_hours = waiting_hours_between(arrival_time, berthing_time);
        if !(0.0..=MAX_WAITING_HOURS).contains(&waiting_hours) {
            return None;
        }
        Some(Self {
            vessel_id: vessel_id.into(),
            port_id: port_id.into(),
            arrival_time,
            berthing_time,
            waiting_hours,
        })
    }

    /// Recover the berthing time from the arrival time and waiting hours
    pub fn reconstructed_berthing_time(&self) -> DateTime<Utc> {
        let millis = (self.waiting_hours * MILLIS_PER_HOUR).round() as i64;
        self.arrival_time + Duration::milliseconds(millis)
    }
}

/// Waiting hours between two instants, measured at millisecond resolution
pub fn waiting_hours_between(arrival: DateTime<Utc>, berthing: DateTime<Utc>) -> f64 {
    (berthing - arrival).num_milliseconds() as f64 / MILLIS_PER_HOUR
}

/// Entry from a port authority arrival/departure log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortLogEntry {
    pub vessel_id: String,
    pub port_id: String,
    pub terminal_id: String,
    #[serde(default)]
    pub cargo_profile: CargoProfile,
    pub arrival_time: DateTime<Utc>,
    /// Berthing time, when already known
    #[serde(default)]
    pub departure_time: Option<DateTime<Utc>>,
}

/// Labeled training row: a waiting-time label plus terminal and cargo context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledRow {
    #[serde(flatten)]
    pub label: WaitingTimeRecord,
    pub terminal_id: String,
    pub cargo_profile: CargoProfile,
}

impl LabeledRow {
    pub fn arrival_time(&self) -> DateTime<Utc> {
        self.label.arrival_time
    }

    pub fn berthing_time(&self) -> DateTime<Utc> {
        self.label.berthing_time
    }

    pub fn waiting_hours(&self) -> f64 {
        self.label.waiting_hours
    }
}

/// Leakage-free historical features attached to a row or a live query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalFeatures {
    /// Mean waiting hours of strictly earlier rows at the same port
    pub port_mean_historical: f64,
    /// Mean waiting hours of the most recent earlier rows at the same terminal
    pub terminal_ma5: f64,
    /// Arrivals at the terminal in the trailing density window, self included
    pub arrivals_7d: u32,
    /// Vessels ahead and not yet departed at the moment of arrival
    pub queue_depth: u32,
}

/// Labeled row with appended feature columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    #[serde(flatten)]
    pub row: LabeledRow,
    #[serde(flatten)]
    pub features: HistoricalFeatures,
}
