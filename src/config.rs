//! Typed configuration
//!
//! Terminals, geofences and every tunable of the pipeline live in one TOML file
//! deserialized into [`BerthConfig`]. Loaders always call [`BerthConfig::validate`]
//! so required fields and ranges are checked at load time, not at first use.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::clipper::GroupColumn;
use crate::error::ComputeError;
use crate::types::{CargoProfile, PortGeofence, DEFAULT_STOP_SPEED_KNOTS};

/// Longest service duration a cargo profile may assume
pub const MAX_SERVICE_HOURS: f64 = 720.0;

/// Longest minimum dwell the detector accepts
pub const MAX_MIN_DWELL_MINUTES: i64 = 720 * 60;

/// Longest gap between the train and validation sides of a fold
pub const MAX_GAP_DAYS: i64 = 36_500;

/// Complete pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BerthConfig {
    #[serde(default)]
    pub terminals: Vec<TerminalConfig>,
    #[serde(default)]
    pub service_hours: ServiceDurations,
    #[serde(default)]
    pub detector: DetectorSettings,
    #[serde(default)]
    pub aggregates: AggregateSettings,
    #[serde(default)]
    pub clipper: ClipperSettings,
    #[serde(default)]
    pub splitter: SplitterSettings,
    #[serde(default)]
    pub model: ModelSettings,
}

/// One terminal and its geofence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    pub id: String,
    pub port_id: String,
    #[serde(default)]
    pub cargo_profile: CargoProfile,
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    #[serde(default = "default_stop_speed")]
    pub stop_speed_knots: f64,
    /// Berth capacity used by the online queue simulation; unbounded when absent
    ///
    /// Without a capacity each vessel departs at arrival plus service. Five
    /// arrivals at 0, 12, 24, 48 and 96h with 48h service then see depths
    /// `[0, 1, 2, 2, 0]`. The same lineup gives `[0, 1, 2, 2, 1]` only with
    /// `berths = 2`, where vessels queue for a free berth.
    #[serde(default)]
    pub berths: Option<usize>,
}

impl TerminalConfig {
    pub fn geofence(&self) -> PortGeofence {
        PortGeofence {
            port_id: self.port_id.clone(),
            terminal_id: self.id.clone(),
            lat_min: self.lat_min,
            lat_max: self.lat_max,
            lon_min: self.lon_min,
            lon_max: self.lon_max,
            stop_speed_knots: self.stop_speed_knots,
        }
    }
}

/// Assumed service duration per cargo profile, in hours
///
/// These drive the simulated departures of the online queue. They are tunable
/// estimates, not measured constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDurations {
    #[serde(default = "default_generic_hours")]
    pub generic: f64,
    #[serde(default = "default_mineral_hours")]
    pub mineral: f64,
    #[serde(default = "default_fertilizer_hours")]
    pub fertilizer: f64,
    #[serde(default = "default_grain_hours")]
    pub grain: f64,
    #[serde(default = "default_liquid_hours")]
    pub liquid: f64,
}

impl Default for ServiceDurations {
    fn default() -> Self {
        Self {
            generic: default_generic_hours(),
            mineral: default_mineral_hours(),
            fertilizer: default_fertilizer_hours(),
            grain: default_grain_hours(),
            liquid: default_liquid_hours(),
        }
    }
}

impl ServiceDurations {
    pub fn hours_for(&self, profile: CargoProfile) -> f64 {
        match profile {
            CargoProfile::Generic => self.generic,
            CargoProfile::Mineral => self.mineral,
            CargoProfile::Fertilizer => self.fertilizer,
            CargoProfile::Grain => self.grain,
            CargoProfile::Liquid => self.liquid,
        }
    }

    /// Service duration, clamped to `[0, MAX_SERVICE_HOURS]`
    pub fn duration_for(&self, profile: CargoProfile) -> Duration {
        let hours = self.hours_for(profile);
        let hours = if hours.is_finite() {
            hours.clamp(0.0, MAX_SERVICE_HOURS)
        } else {
            0.0
        };
        Duration::milliseconds((hours * 3_600_000.0).round() as i64)
    }
}

/// Berthing detector settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorSettings {
    /// Minimum time stopped inside the geofence before an event counts; off when absent
    #[serde(default)]
    pub min_dwell_minutes: Option<i64>,
}

impl DetectorSettings {
    pub fn min_dwell(&self) -> Option<Duration> {
        self.min_dwell_minutes
            .map(|minutes| Duration::minutes(minutes.clamp(0, MAX_MIN_DWELL_MINUTES)))
    }
}

/// Value used for the port mean of the first row of a port
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstRowFallback {
    /// Dataset-wide median of waiting hours
    Median,
    Zero,
    Fixed(f64),
}

impl Default for FirstRowFallback {
    fn default() -> Self {
        FirstRowFallback::Median
    }
}

/// Historical aggregator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSettings {
    #[serde(default = "default_ma_window")]
    pub ma_window: usize,
    #[serde(default = "default_density_days")]
    pub density_days: i64,
    #[serde(default)]
    pub fallback: FirstRowFallback,
}

impl Default for AggregateSettings {
    fn default() -> Self {
        Self {
            ma_window: default_ma_window(),
            density_days: default_density_days(),
            fallback: FirstRowFallback::default(),
        }
    }
}

/// Outlier clipper settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipperSettings {
    #[serde(default = "default_percentile")]
    pub percentile: f64,
    #[serde(default)]
    pub group_by: GroupColumn,
}

impl Default for ClipperSettings {
    fn default() -> Self {
        Self {
            percentile: default_percentile(),
            group_by: GroupColumn::default(),
        }
    }
}

/// Temporal splitter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitterSettings {
    #[serde(default = "default_n_splits")]
    pub n_splits: usize,
    #[serde(default = "default_gap_days")]
    pub gap_days: i64,
}

impl Default for SplitterSettings {
    fn default() -> Self {
        Self {
            n_splits: default_n_splits(),
            gap_days: default_gap_days(),
        }
    }
}

/// Model selection and class thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Minimum feature coverage for the full feature-set model
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_short_wait_hours")]
    pub short_wait_hours: f64,
    #[serde(default = "default_long_wait_hours")]
    pub long_wait_hours: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
            short_wait_hours: default_short_wait_hours(),
            long_wait_hours: default_long_wait_hours(),
        }
    }
}

fn default_stop_speed() -> f64 {
    DEFAULT_STOP_SPEED_KNOTS
}

fn default_generic_hours() -> f64 {
    48.0
}

fn default_mineral_hours() -> f64 {
    48.0
}

fn default_fertilizer_hours() -> f64 {
    84.0
}

fn default_grain_hours() -> f64 {
    48.0
}

fn default_liquid_hours() -> f64 {
    36.0
}

fn default_ma_window() -> usize {
    5
}

fn default_density_days() -> i64 {
    7
}

fn default_percentile() -> f64 {
    0.95
}

fn default_n_splits() -> usize {
    5
}

fn default_gap_days() -> i64 {
    7
}

fn default_quality_threshold() -> f64 {
    0.8
}

fn default_short_wait_hours() -> f64 {
    48.0
}

fn default_long_wait_hours() -> f64 {
    168.0
}

impl BerthConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ComputeError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            ComputeError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ComputeError> {
        let config: BerthConfig = toml::from_str(content)
            .map_err(|e| ComputeError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field the pipeline relies on
    pub fn validate(&self) -> Result<(), ComputeError> {
        let mut seen = HashSet::new();
        for terminal in &self.terminals {
            if terminal.id.trim().is_empty() || terminal.port_id.trim().is_empty() {
                return Err(ComputeError::ConfigError(
                    "terminal id and port_id must be non-empty".to_string(),
                ));
            }
            if !seen.insert(terminal.id.as_str()) {
                return Err(ComputeError::ConfigError(format!(
                    "duplicate terminal id '{}'",
                    terminal.id
                )));
            }
            if !(terminal.lat_min < terminal.lat_max && terminal.lon_min < terminal.lon_max) {
                return Err(ComputeError::ConfigError(format!(
                    "terminal '{}' has an empty or inverted bounding box",
                    terminal.id
                )));
            }
            if terminal.lat_min < -90.0
                || terminal.lat_max > 90.0
                || terminal.lon_min < -180.0
                || terminal.lon_max > 180.0
            {
                return Err(ComputeError::ConfigError(format!(
                    "terminal '{}' bounding box is outside valid coordinates",
                    terminal.id
                )));
            }
            if !(terminal.stop_speed_knots > 0.0) {
                return Err(ComputeError::ConfigError(format!(
                    "terminal '{}' stop_speed_knots must be positive",
                    terminal.id
                )));
            }
            if terminal.berths == Some(0) {
                return Err(ComputeError::ConfigError(format!(
                    "terminal '{}' berths must be at least 1",
                    terminal.id
                )));
            }
        }

        for profile in CargoProfile::ALL {
            let hours = self.service_hours.hours_for(profile);
            if !(hours > 0.0 && hours <= MAX_SERVICE_HOURS) {
                return Err(ComputeError::ConfigError(format!(
                    "service_hours.{} must be in (0, {}]",
                    profile.as_str(),
                    MAX_SERVICE_HOURS
                )));
            }
        }

        if let Some(minutes) = self.detector.min_dwell_minutes {
            if !(0..=MAX_MIN_DWELL_MINUTES).contains(&minutes) {
                return Err(ComputeError::ConfigError(format!(
                    "detector.min_dwell_minutes must be in [0, {}]",
                    MAX_MIN_DWELL_MINUTES
                )));
            }
        }

        if self.aggregates.ma_window == 0 {
            return Err(ComputeError::ConfigError(
                "aggregates.ma_window must be at least 1".to_string(),
            ));
        }
        if self.aggregates.density_days <= 0 {
            return Err(ComputeError::ConfigError(
                "aggregates.density_days must be positive".to_string(),
            ));
        }

        if !(self.clipper.percentile > 0.0 && self.clipper.percentile <= 1.0) {
            return Err(ComputeError::ConfigError(
                "clipper.percentile must be in (0, 1]".to_string(),
            ));
        }

        if self.splitter.n_splits == 0 {
            return Err(ComputeError::ConfigError(
                "splitter.n_splits must be at least 1".to_string(),
            ));
        }
        if self.splitter.gap_days < self.aggregates.density_days {
            return Err(ComputeError::ConfigError(format!(
                "splitter.gap_days ({}) is shorter than the {}-day density lookback",
                self.splitter.gap_days, self.aggregates.density_days
            )));
        }
        if self.splitter.gap_days > MAX_GAP_DAYS {
            return Err(ComputeError::ConfigError(format!(
                "splitter.gap_days must not exceed {} days",
                MAX_GAP_DAYS
            )));
        }

        if !(0.0..=1.0).contains(&self.model.quality_threshold) {
            return Err(ComputeError::ConfigError(
                "model.quality_threshold must be in [0, 1]".to_string(),
            ));
        }
        if !(self.model.short_wait_hours < self.model.long_wait_hours) {
            return Err(ComputeError::ConfigError(
                "model.short_wait_hours must be below model.long_wait_hours".to_string(),
            ));
        }

        Ok(())
    }

    /// Geofences of every configured terminal
    pub fn geofences(&self) -> Vec<PortGeofence> {
        self.terminals.iter().map(TerminalConfig::geofence).collect()
    }

    pub fn terminal(&self, id: &str) -> Option<&TerminalConfig> {
        self.terminals.iter().find(|t| t.id == id)
    }
}
