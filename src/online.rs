//! Online feature queries
//!
//! Serves the historical feature vector for one live arrival. The lagged
//! aggregates come from the same [`HistoryIndex`] lookup the batch deriver uses,
//! and queue depth comes from the shared counting rule applied to a simulated
//! lineup. Outlier clipping never runs on this path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clipper::Grouped;
use crate::config::BerthConfig;
use crate::error::ComputeError;
use crate::history::HistoryIndex;
use crate::queue::{LineupVessel, SimulatedQueue};
use crate::types::{CargoProfile, HistoricalFeatures};

/// A vessel arriving now, for which features are requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveQuery {
    pub vessel_id: String,
    pub port_id: String,
    pub terminal_id: String,
    #[serde(default)]
    pub cargo_profile: CargoProfile,
    pub arrival_time: DateTime<Utc>,
}

impl Grouped for LiveQuery {
    fn port_id(&self) -> &str {
        &self.port_id
    }

    fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    fn cargo_profile(&self) -> CargoProfile {
        self.cargo_profile
    }
}

/// Online feature service
pub struct OnlineFeatures;

impl OnlineFeatures {
    /// Features for `query` given the terminal's current lineup
    ///
    /// If the querying vessel is on the lineup its own entry is excluded from the
    /// count, exactly as a batch row excludes itself.
    pub fn query(
        index: &HistoryIndex,
        lineup: &[LineupVessel],
        query: &LiveQuery,
        config: &BerthConfig,
    ) -> Result<HistoricalFeatures, ComputeError> {
        let terminal = config
            .terminal(&query.terminal_id)
            .ok_or_else(|| ComputeError::UnknownTerminal(query.terminal_id.clone()))?;

        let lagged = index.aggregates_at(query, query.arrival_time);
        let queue = SimulatedQueue::simulate(lineup, &config.service_hours, terminal.berths);

        let on_lineup = lineup
            .iter()
            .any(|v| v.vessel_id == query.vessel_id && v.arrival_time == query.arrival_time);
        let queue_depth = if on_lineup {
            queue
                .depth_for(&query.vessel_id)
                .unwrap_or_else(|| queue.depth_at(query.arrival_time))
        } else {
            queue.depth_at(query.arrival_time)
        };

        debug!(
            vessel = %query.vessel_id,
            terminal = %query.terminal_id,
            lineup = lineup.len(),
            queue_depth,
            "served online features"
        );

        Ok(HistoricalFeatures {
            port_mean_historical: lagged.port_mean_historical,
            terminal_ma5: lagged.terminal_ma,
            arrivals_7d: lagged.arrivals_in_window,
            queue_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServiceDurations, TerminalConfig};
    use crate::features::FeatureDeriver;
    use crate::history::AggregateKeys;
    use crate::types::{LabeledRow, WaitingTimeRecord};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn config(berths: Option<usize>) -> BerthConfig {
        BerthConfig {
            terminals: vec![TerminalConfig {
                id: "PDM".to_string(),
                port_id: "ITAQUI".to_string(),
                cargo_profile: CargoProfile::Mineral,
                lat_min: -2.60,
                lat_max: -2.50,
                lon_min: -44.40,
                lon_max: -44.30,
                stop_speed_knots: 1.0,
                berths,
            }],
            ..Default::default()
        }
    }

    fn labeled(i: i64) -> LabeledRow {
        let arrival = t0() + Duration::hours(i * 11);
        LabeledRow {
            label: WaitingTimeRecord::new(
                format!("V{}", i),
                "ITAQUI",
                arrival,
                arrival + Duration::minutes((i * 97) % 3000),
            )
            .unwrap(),
            terminal_id: "PDM".to_string(),
            cargo_profile: CargoProfile::Mineral,
        }
    }

    #[test]
    fn test_online_matches_batch_bit_for_bit() {
        let rows: Vec<LabeledRow> = (0..40).map(labeled).collect();
        let (derived, index) = FeatureDeriver::derive(
            rows.clone(),
            AggregateKeys::default(),
            &config(None).aggregates,
        );

        for row in &derived {
            let query = LiveQuery {
                vessel_id: row.row.label.vessel_id.clone(),
                port_id: row.row.label.port_id.clone(),
                terminal_id: row.row.terminal_id.clone(),
                cargo_profile: row.row.cargo_profile,
                arrival_time: row.row.arrival_time(),
            };
            let online = OnlineFeatures::query(&index, &[], &query, &config(None)).unwrap();

            assert_eq!(online.port_mean_historical.to_bits(), row.features.port_mean_historical.to_bits());
            assert_eq!(online.terminal_ma5.to_bits(), row.features.terminal_ma5.to_bits());
            assert_eq!(online.arrivals_7d, row.features.arrivals_7d);
        }
    }

    #[test]
    fn test_lineup_queue_depth() {
        let lineup: Vec<LineupVessel> = [0, 12, 24, 48, 96]
            .iter()
            .enumerate()
            .map(|(i, offset)| LineupVessel {
                vessel_id: format!("L{}", i + 1),
                arrival_time: t0() + Duration::hours(*offset),
                cargo_profile: CargoProfile::Mineral,
                berthing_time: None,
            })
            .collect();
        let index = HistoryIndex::from_rows(&[], AggregateKeys::default(), &Default::default());
        let config = config(Some(2));
        assert_eq!(config.service_hours, ServiceDurations::default());

        let depths: Vec<u32> = lineup
            .iter()
            .map(|v| {
                let query = LiveQuery {
                    vessel_id: v.vessel_id.clone(),
                    port_id: "ITAQUI".to_string(),
                    terminal_id: "PDM".to_string(),
                    cargo_profile: v.cargo_profile,
                    arrival_time: v.arrival_time,
                };
                OnlineFeatures::query(&index, &lineup, &query, &config)
                    .unwrap()
                    .queue_depth
            })
            .collect();
        assert_eq!(depths, vec![0, 1, 2, 2, 1]);

        // A newcomer not on the lineup counts everyone still queued
        let newcomer = LiveQuery {
            vessel_id: "NEW".to_string(),
            port_id: "ITAQUI".to_string(),
            terminal_id: "PDM".to_string(),
            cargo_profile: CargoProfile::Mineral,
            arrival_time: t0() + Duration::hours(100),
        };
        let features = OnlineFeatures::query(&index, &lineup, &newcomer, &config).unwrap();
        assert_eq!(features.queue_depth, 2);
        assert_eq!(features.port_mean_historical, 0.0);
        assert_eq!(features.arrivals_7d, 1);
    }

    #[test]
    fn test_unknown_terminal() {
        let index = HistoryIndex::from_rows(&[], AggregateKeys::default(), &Default::default());
        let query = LiveQuery {
            vessel_id: "X".to_string(),
            port_id: "ITAQUI".to_string(),
            terminal_id: "NOPE".to_string(),
            cargo_profile: CargoProfile::Generic,
            arrival_time: t0(),
        };
        let err = OnlineFeatures::query(&index, &[], &query, &config(None)).unwrap_err();
        assert!(matches!(err, ComputeError::UnknownTerminal(_)));
    }

    #[test]
    fn test_oversized_service_hours_are_clamped() {
        let mut config = config(None);
        config.service_hours.mineral = 1e10;
        let lineup: Vec<LineupVessel> = [0, 12]
            .iter()
            .map(|offset| LineupVessel {
                vessel_id: format!("L{}", offset),
                arrival_time: t0() + Duration::hours(*offset),
                cargo_profile: CargoProfile::Mineral,
                berthing_time: None,
            })
            .collect();
        let index = HistoryIndex::from_rows(&[], AggregateKeys::default(), &Default::default());
        let query = |hours: i64| LiveQuery {
            vessel_id: "NEW".to_string(),
            port_id: "ITAQUI".to_string(),
            terminal_id: "PDM".to_string(),
            cargo_profile: CargoProfile::Mineral,
            arrival_time: t0() + Duration::hours(hours),
        };

        let during = OnlineFeatures::query(&index, &lineup, &query(100), &config).unwrap();
        let after = OnlineFeatures::query(&index, &lineup, &query(800), &config).unwrap();
        assert_eq!(during.queue_depth, 2);
        assert_eq!(after.queue_depth, 0);
    }
}
