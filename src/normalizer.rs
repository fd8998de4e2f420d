//! Event stream normalization
//!
//! This module turns raw, unordered position reports into clean per-vessel series.
//! - Malformed reports are dropped and counted per reason
//! - Each vessel's series is sorted ascending by timestamp
//! - Exact-timestamp duplicates keep the later-arriving report

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::types::{PositionRecord, RawPositionRecord};

/// Why a raw report was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    MissingVesselId,
    UnparseableTimestamp,
    MissingCoordinates,
    OutOfRangeCoordinates,
    MissingSpeed,
}

/// Counters produced by a normalization pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeReport {
    pub total_records: usize,
    pub kept_records: usize,
    pub missing_vessel_id: usize,
    pub unparseable_timestamp: usize,
    pub missing_coordinates: usize,
    pub out_of_range_coordinates: usize,
    pub missing_speed: usize,
    pub duplicates_replaced: usize,
}

impl NormalizeReport {
    pub fn dropped_records(&self) -> usize {
        self.missing_vessel_id
            + self.unparseable_timestamp
            + self.missing_coordinates
            + self.out_of_range_coordinates
            + self.missing_speed
    }

    fn count_drop(&mut self, reason: DropReason) {
        match reason {
            DropReason::MissingVesselId => self.missing_vessel_id += 1,
            DropReason::UnparseableTimestamp => self.unparseable_timestamp += 1,
            DropReason::MissingCoordinates => self.missing_coordinates += 1,
            DropReason::OutOfRangeCoordinates => self.out_of_range_coordinates += 1,
            DropReason::MissingSpeed => self.missing_speed += 1,
        }
    }
}

/// Time-sorted position series of one vessel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VesselSeries {
    pub vessel_id: String,
    pub records: Vec<PositionRecord>,
}

/// Normalizer for converting raw reports to per-vessel series
pub struct Normalizer;

impl Normalizer {
    /// Validate, group, sort and deduplicate raw reports
    ///
    /// Vessels come out in ascending vessel id order.
    pub fn normalize(raw: &[RawPositionRecord]) -> (Vec<VesselSeries>, NormalizeReport) {
        let mut report = NormalizeReport {
            total_records: raw.len(),
            ..Default::default()
        };

        // Keyed by timestamp so a later report at the same instant replaces the earlier one
        let mut by_vessel: BTreeMap<String, BTreeMap<DateTime<Utc>, PositionRecord>> =
            BTreeMap::new();

        for record in raw {
            match validate_record(record) {
                Ok(position) => {
                    let series = by_vessel.entry(position.vessel_id.clone()).or_default();
                    if series.insert(position.timestamp, position).is_some() {
                        report.duplicates_replaced += 1;
                    }
                }
                Err(reason) => report.count_drop(reason),
            }
        }

        let series: Vec<VesselSeries> = by_vessel
            .into_iter()
            .map(|(vessel_id, records)| VesselSeries {
                vessel_id,
                records: records.into_values().collect(),
            })
            .collect();

        report.kept_records = series.iter().map(|s| s.records.len()).sum();

        if report.dropped_records() > 0 {
            warn!(
                dropped = report.dropped_records(),
                total = report.total_records,
                "dropped malformed position records"
            );
        }
        debug!(
            vessels = series.len(),
            kept = report.kept_records,
            duplicates = report.duplicates_replaced,
            "normalized position stream"
        );

        (series, report)
    }
}

/// Validate a raw report, returning the reason it is unusable
pub fn validate_record(raw: &RawPositionRecord) -> Result<PositionRecord, DropReason> {
    let vessel_id = match raw.vessel_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(DropReason::MissingVesselId),
    };

    let timestamp = raw
        .timestamp
        .as_deref()
        .and_then(parse_timestamp)
        .ok_or(DropReason::UnparseableTimestamp)?;

    let (latitude, longitude) = match (raw.latitude, raw.longitude) {
        (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => (lat, lon),
        _ => return Err(DropReason::MissingCoordinates),
    };
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(DropReason::OutOfRangeCoordinates);
    }

    let speed_knots = match raw.speed {
        Some(speed) if speed.is_finite() => speed,
        _ => return Err(DropReason::MissingSpeed),
    };

    Ok(PositionRecord {
        vessel_id,
        timestamp,
        latitude,
        longitude,
        speed_knots,
        course: raw.course.filter(|c| c.is_finite()),
        nav_status: raw.nav_status,
    })
}

/// Parse a timestamp in RFC 3339 or naive `YYYY-MM-DD[ T]HH:MM:SS` form (naive is UTC)
///
/// Timestamps are truncated to millisecond precision.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc).trunc_subsecs(3));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc().trunc_subsecs(3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn raw(vessel: &str, ts: &str, lat: f64, lon: f64, speed: f64) -> RawPositionRecord {
        RawPositionRecord {
            vessel_id: Some(vessel.to_string()),
            timestamp: Some(ts.to_string()),
            latitude: Some(lat),
            longitude: Some(lon),
            speed: Some(speed),
            ..Default::default()
        }
    }

    #[test]
    fn test_sorts_and_groups_by_vessel() {
        let input = vec![
            raw("IMO2", "2024-03-01T02:00:00Z", -20.0, -40.0, 10.0),
            raw("IMO1", "2024-03-01T03:00:00Z", -20.0, -40.0, 9.0),
            raw("IMO1", "2024-03-01T01:00:00Z", -20.0, -40.0, 11.0),
        ];

        let (series, report) = Normalizer::normalize(&input);

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].vessel_id, "IMO1");
        assert_eq!(series[0].records[0].speed_knots, 11.0);
        assert_eq!(series[0].records[1].speed_knots, 9.0);
        assert_eq!(report.kept_records, 3);
        assert_eq!(report.dropped_records(), 0);
    }

    #[test]
    fn test_duplicate_keeps_later_arriving_record() {
        let input = vec![
            raw("IMO1", "2024-03-01T01:00:00Z", -20.0, -40.0, 5.0),
            raw("IMO1", "2024-03-01 01:00:00", -20.5, -40.5, 0.2),
        ];

        let (series, report) = Normalizer::normalize(&input);

        assert_eq!(series[0].records.len(), 1);
        assert_eq!(series[0].records[0].speed_knots, 0.2);
        assert_eq!(report.duplicates_replaced, 1);
    }

    #[test]
    fn test_malformed_records_are_counted_not_fatal() {
        let mut no_coords = raw("IMO1", "2024-03-01T04:00:00Z", 0.0, 0.0, 1.0);
        no_coords.latitude = None;
        let mut no_speed = raw("IMO1", "2024-03-01T05:00:00Z", -20.0, -40.0, 1.0);
        no_speed.speed = Some(f64::NAN);
        let mut no_vessel = raw("", "2024-03-01T06:00:00Z", -20.0, -40.0, 1.0);
        no_vessel.vessel_id = Some("  ".to_string());

        let input = vec![
            raw("IMO1", "not a time", -20.0, -40.0, 1.0),
            no_coords,
            raw("IMO1", "2024-03-01T05:00:00Z", 95.0, -40.0, 1.0),
            no_speed,
            no_vessel,
            raw("IMO1", "2024-03-01T07:00:00Z", -20.0, -40.0, 1.0),
        ];

        let (series, report) = Normalizer::normalize(&input);

        assert_eq!(series.len(), 1);
        assert_eq!(series[0].records.len(), 1);
        assert_eq!(
            report,
            NormalizeReport {
                total_records: 6,
                kept_records: 1,
                missing_vessel_id: 1,
                unparseable_timestamp: 1,
                missing_coordinates: 1,
                out_of_range_coordinates: 1,
                missing_speed: 1,
                duplicates_replaced: 0,
            }
        );
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-01T12:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T09:30:00-03:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01 12:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-01T12:30:00"), Some(expected));
        assert_eq!(parse_timestamp("01/03/2024"), None);
        assert_eq!(parse_timestamp(""), None);
    }
}
