//! Outlier clipping
//!
//! A one-time cleaning pass over the training corpus: per group, the percentile
//! threshold of waiting hours is computed over the whole dataset and rows above
//! it are dropped. It runs once before folds are drawn and is never part of the
//! online feature path.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::error::ComputeError;
use crate::types::{CargoProfile, FeatureRow, LabeledRow};

/// Anything that can be assigned to a port, terminal or cargo group
pub trait Grouped {
    fn port_id(&self) -> &str;
    fn terminal_id(&self) -> &str;
    fn cargo_profile(&self) -> CargoProfile;
}

impl Grouped for LabeledRow {
    fn port_id(&self) -> &str {
        &self.label.port_id
    }

    fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    fn cargo_profile(&self) -> CargoProfile {
        self.cargo_profile
    }
}

impl Grouped for FeatureRow {
    fn port_id(&self) -> &str {
        self.row.port_id()
    }

    fn terminal_id(&self) -> &str {
        self.row.terminal_id()
    }

    fn cargo_profile(&self) -> CargoProfile {
        self.row.cargo_profile
    }
}

/// Column used to group rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupColumn {
    CargoProfile,
    Port,
    Terminal,
}

impl Default for GroupColumn {
    fn default() -> Self {
        GroupColumn::CargoProfile
    }
}

impl GroupColumn {
    pub fn key<'a, G: Grouped>(&self, subject: &'a G) -> &'a str {
        match self {
            GroupColumn::CargoProfile => subject.cargo_profile().as_str(),
            GroupColumn::Port => subject.port_id(),
            GroupColumn::Terminal => subject.terminal_id(),
        }
    }
}

/// Threshold and counts for one group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupClip {
    pub group: String,
    pub threshold: f64,
    pub kept: usize,
    pub dropped: usize,
}

/// Outcome of a clipping pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipReport {
    pub percentile: f64,
    pub groups: Vec<GroupClip>,
}

impl ClipReport {
    pub fn total_dropped(&self) -> usize {
        self.groups.iter().map(|g| g.dropped).sum()
    }

    pub fn total_kept(&self) -> usize {
        self.groups.iter().map(|g| g.kept).sum()
    }
}

/// Drop labeled rows whose waiting hours exceed their group's percentile
pub fn clip_outliers(
    rows: Vec<LabeledRow>,
    group_by: GroupColumn,
    percentile: f64,
) -> Result<(Vec<LabeledRow>, ClipReport), ComputeError> {
    clip_outliers_by(
        rows,
        LabeledRow::waiting_hours,
        |row| group_by.key(row).to_string(),
        percentile,
    )
}

/// Drop rows whose `value` exceeds the `percentile` of their `group`
///
/// Row order is preserved. Thresholds use linear interpolation between closest ranks.
pub fn clip_outliers_by<T, V, G>(
    rows: Vec<T>,
    value: V,
    group: G,
    percentile: f64,
) -> Result<(Vec<T>, ClipReport), ComputeError>
where
    V: Fn(&T) -> f64,
    G: Fn(&T) -> String,
{
    if !(percentile > 0.0 && percentile <= 1.0) {
        return Err(ComputeError::InvalidParameter(format!(
            "percentile must be in (0, 1], got {}",
            percentile
        )));
    }

    let mut by_group: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for row in &rows {
        by_group.entry(group(row)).or_default().push(value(row));
    }

    let thresholds: BTreeMap<String, f64> = by_group
        .into_iter()
        .filter_map(|(key, mut values)| {
            values.sort_by(|a, b| a.total_cmp(b));
            percentile_of_sorted(&values, percentile).map(|threshold| (key, threshold))
        })
        .collect();

    let mut stats: BTreeMap<String, GroupClip> = thresholds
        .iter()
        .map(|(key, threshold)| {
            (
                key.clone(),
                GroupClip {
                    group: key.clone(),
                    threshold: *threshold,
                    kept: 0,
                    dropped: 0,
                },
            )
        })
        .collect();

    let mut kept = Vec::with_capacity(rows.len());
    for row in rows {
        let key = group(&row);
        let Some(entry) = stats.get_mut(&key) else {
            continue;
        };
        if value(&row) > entry.threshold {
            entry.dropped += 1;
        } else {
            entry.kept += 1;
            kept.push(row);
        }
    }

    let report = ClipReport {
        percentile,
        groups: stats.into_values().collect(),
    };
    info!(
        percentile,
        kept = report.total_kept(),
        dropped = report.total_dropped(),
        groups = report.groups.len(),
        "clipped outliers"
    );
    Ok((kept, report))
}

/// Percentile of ascending values with linear interpolation
pub fn percentile_of_sorted(sorted: &[f64], percentile: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = percentile.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}
