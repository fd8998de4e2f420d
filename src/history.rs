//! Historical waiting-time index
//!
//! The index holds, per port group and per terminal group, the labeled waiting
//! times sorted by arrival. Every query at instant `t` only reads samples whose
//! arrival is strictly earlier than `t`. The batch aggregator asks at each row's
//! own arrival and the online path asks at the live arrival time, so both see the
//! same arithmetic on the same prefix and return the same bits.
//!
//! The index round-trips through JSON so a training run can hand it to serving.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::clipper::{GroupColumn, Grouped};
use crate::config::{AggregateSettings, FirstRowFallback, MAX_GAP_DAYS};
use crate::types::LabeledRow;

/// Which columns define the port-level and terminal-level groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateKeys {
    pub port: GroupColumn,
    pub terminal: GroupColumn,
}

impl Default for AggregateKeys {
    fn default() -> Self {
        Self {
            port: GroupColumn::Port,
            terminal: GroupColumn::Terminal,
        }
    }
}

/// Lagged statistics for one instant, computed from strictly earlier samples
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LaggedAggregates {
    pub port_mean_historical: f64,
    pub terminal_ma: f64,
    pub arrivals_in_window: u32,
}

/// Waiting-time samples of one group, sorted by arrival
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "GroupSamples", into = "GroupSamples")]
pub struct GroupHistory {
    times: Vec<DateTime<Utc>>,
    values: Vec<f64>,
    /// `prefix[k]` is the sum of the first `k` values, accumulated in order
    prefix: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct GroupSamples {
    times: Vec<DateTime<Utc>>,
    values: Vec<f64>,
}

impl From<GroupSamples> for GroupHistory {
    fn from(samples: GroupSamples) -> Self {
        Self::from_sorted(samples.times, samples.values)
    }
}

impl From<GroupHistory> for GroupSamples {
    fn from(history: GroupHistory) -> Self {
        Self {
            times: history.times,
            values: history.values,
        }
    }
}

impl GroupHistory {
    fn from_sorted(times: Vec<DateTime<Utc>>, values: Vec<f64>) -> Self {
        let mut prefix = Vec::with_capacity(values.len() + 1);
        let mut running = 0.0;
        prefix.push(running);
        for value in &values {
            running += value;
            prefix.push(running);
        }
        Self {
            times,
            values,
            prefix,
        }
    }

    fn strictly_before(&self, t: DateTime<Utc>) -> usize {
        self.times.partition_point(|ts| *ts < t)
    }

    /// Expanding mean of samples strictly before `t`
    pub fn mean_before(&self, t: DateTime<Utc>) -> Option<f64> {
        let n = self.strictly_before(t);
        if n == 0 {
            return None;
        }
        Some(self.prefix[n] / n as f64)
    }

    /// Mean of the `window` most recent samples strictly before `t`
    pub fn recent_mean_before(&self, t: DateTime<Utc>, window: usize) -> Option<f64> {
        let n = self.strictly_before(t);
        let start = n.saturating_sub(window);
        if n == start {
            return None;
        }
        let sum: f64 = self.values[start..n].iter().sum();
        Some(sum / (n - start) as f64)
    }

    /// Samples in `(t - lookback, t)`
    pub fn count_in_window(&self, t: DateTime<Utc>, lookback: Duration) -> usize {
        let end = self.strictly_before(t);
        let start = match t.checked_sub_signed(lookback) {
            Some(from) => self.times.partition_point(|ts| *ts <= from),
            None => 0,
        };
        end.saturating_sub(start)
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

/// Per-group waiting-time history shared by batch and online feature paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryIndex {
    keys: AggregateKeys,
    settings: AggregateSettings,
    ports: BTreeMap<String, GroupHistory>,
    terminals: BTreeMap<String, GroupHistory>,
    /// Dataset-wide median of waiting hours
    global_median: Option<f64>,
}

impl HistoryIndex {
    /// Build the index from labeled rows
    pub fn from_rows(rows: &[LabeledRow], keys: AggregateKeys, settings: &AggregateSettings) -> Self {
        let mut ordered: Vec<&LabeledRow> = rows.iter().collect();
        ordered.sort_by(|a, b| sample_order(a, b));

        let ports = group_samples(&ordered, |row| keys.port.key(*row).to_string());
        let terminals = group_samples(&ordered, |row| keys.terminal.key(*row).to_string());
        let global_median = median(rows.iter().map(LabeledRow::waiting_hours).collect());

        Self {
            keys,
            settings: settings.clone(),
            ports,
            terminals,
            global_median,
        }
    }

    pub fn keys(&self) -> AggregateKeys {
        self.keys
    }

    pub fn settings(&self) -> &AggregateSettings {
        &self.settings
    }

    pub fn global_median(&self) -> Option<f64> {
        self.global_median
    }

    /// Port mean used when a port has no earlier samples
    pub fn fallback_value(&self) -> f64 {
        match self.settings.fallback {
            FirstRowFallback::Median => self.global_median.unwrap_or(0.0),
            FirstRowFallback::Zero => 0.0,
            FirstRowFallback::Fixed(value) => value,
        }
    }

    /// Lagged aggregates for a row or query arriving at `arrival`
    pub fn aggregates_at<G: Grouped>(&self, subject: &G, arrival: DateTime<Utc>) -> LaggedAggregates {
        let port = self.ports.get(self.keys.port.key(subject));
        let terminal = self.terminals.get(self.keys.terminal.key(subject));

        let port_mean_historical = port
            .and_then(|history| history.mean_before(arrival))
            .unwrap_or_else(|| self.fallback_value());
        let terminal_ma = terminal
            .and_then(|history| history.recent_mean_before(arrival, self.settings.ma_window))
            .unwrap_or(0.0);
        let earlier_in_window = terminal
            .map(|history| {
                let days = self.settings.density_days.clamp(0, MAX_GAP_DAYS);
                history.count_in_window(arrival, Duration::days(days))
            })
            .unwrap_or(0);

        LaggedAggregates {
            port_mean_historical,
            terminal_ma,
            arrivals_in_window: earlier_in_window as u32 + 1,
        }
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    /// Load an index from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize the index to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Order rows by arrival, then berthing, then vessel id
pub(crate) fn sample_order(a: &LabeledRow, b: &LabeledRow) -> std::cmp::Ordering {
    a.arrival_time()
        .cmp(&b.arrival_time())
        .then_with(|| a.berthing_time().cmp(&b.berthing_time()))
        .then_with(|| a.label.vessel_id.cmp(&b.label.vessel_id))
}

fn group_samples<F>(ordered: &[&LabeledRow], key: F) -> BTreeMap<String, GroupHistory>
where
    F: Fn(&&LabeledRow) -> String,
{
    let mut grouped: BTreeMap<String, (Vec<DateTime<Utc>>, Vec<f64>)> = BTreeMap::new();
    for row in ordered {
        let entry = grouped.entry(key(row)).or_default();
        entry.0.push(row.arrival_time());
        entry.1.push(row.waiting_hours());
    }
    grouped
        .into_iter()
        .map(|(key, (times, values))| (key, GroupHistory::from_sorted(times, values)))
        .collect()
}

/// Median with the two middle values averaged for even counts
pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
