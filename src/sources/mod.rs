//! Position sources
//!
//! Acquisition of position reports is delegated to providers behind the
//! [`PositionSource`] trait. Every call receives the caller's [`UsageTracker`]
//! by mutable reference, so credits and failures are counted per run and never
//! in process-wide state. Failures come back as typed [`SourceError`] values.

mod memory;

pub use memory::MemorySource;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::RawPositionRecord;

/// Errors a position provider can report
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Credits exhausted: {used} of {limit} used")]
    CreditsExhausted { used: u64, limit: u64 },

    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Half-open time window `[start, end)` to fetch positions for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window of `days` ending at `end`
    pub fn trailing(end: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }
}

/// Request and credit counters for one acquisition run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTracker {
    pub requests: u64,
    pub failures: u64,
    pub credits_used: u64,
    /// Credits available to this run, unbounded when absent
    #[serde(default)]
    pub credit_limit: Option<u64>,
}

impl UsageTracker {
    pub fn with_limit(limit: u64) -> Self {
        Self {
            credit_limit: Some(limit),
            ..Default::default()
        }
    }

    /// Credits left before the limit, if any
    pub fn remaining(&self) -> Option<u64> {
        self.credit_limit
            .map(|limit| limit.saturating_sub(self.credits_used))
    }

    /// Reserve `credits` for one request, failing if the limit would be exceeded
    pub fn charge(&mut self, credits: u64) -> Result<(), SourceError> {
        if let Some(limit) = self.credit_limit {
            if self.credits_used + credits > limit {
                return Err(SourceError::CreditsExhausted {
                    used: self.credits_used,
                    limit,
                });
            }
        }
        self.requests += 1;
        self.credits_used += credits;
        Ok(())
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }
}

/// A provider of raw position reports
pub trait PositionSource {
    /// Fetch reports for one vessel within `window`
    fn fetch(
        &self,
        vessel_id: &str,
        window: FetchWindow,
        usage: &mut UsageTracker,
    ) -> Result<Vec<RawPositionRecord>, SourceError>;
}

/// Records gathered for many vessels plus the per-vessel failures
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub records: Vec<RawPositionRecord>,
    pub failed: Vec<(String, SourceError)>,
}

/// Fetch every vessel in turn, stopping early once credits run out
pub fn fetch_all<S: PositionSource + ?Sized>(
    source: &S,
    vessel_ids: &[String],
    window: FetchWindow,
    usage: &mut UsageTracker,
) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();
    for vessel_id in vessel_ids {
        match source.fetch(vessel_id, window, usage) {
            Ok(records) => {
                debug!(vessel = %vessel_id, records = records.len(), "fetched positions");
                outcome.records.extend(records);
            }
            Err(err) => {
                usage.record_failure();
                warn!(vessel = %vessel_id, error = %err, "position fetch failed");
                let exhausted = matches!(err, SourceError::CreditsExhausted { .. });
                outcome.failed.push((vessel_id.clone(), err));
                if exhausted {
                    break;
                }
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Flaky;

    impl PositionSource for Flaky {
        fn fetch(
            &self,
            vessel_id: &str,
            _window: FetchWindow,
            usage: &mut UsageTracker,
        ) -> Result<Vec<RawPositionRecord>, SourceError> {
            if vessel_id == "DOWN" {
                return Err(SourceError::Unavailable("maintenance".to_string()));
            }
            usage.charge(1)?;
            Ok(vec![RawPositionRecord {
                vessel_id: Some(vessel_id.to_string()),
                ..Default::default()
            }])
        }
    }

    fn window() -> FetchWindow {
        FetchWindow::trailing(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(), 7)
    }

    #[test]
    fn test_tracker_charges_and_limits() {
        let mut usage = UsageTracker::with_limit(2);
        assert!(usage.charge(1).is_ok());
        assert!(usage.charge(1).is_ok());
        assert_eq!(usage.remaining(), Some(0));
        assert_eq!(
            usage.charge(1),
            Err(SourceError::CreditsExhausted { used: 2, limit: 2 })
        );
        assert_eq!(usage.requests, 2);
    }

    #[test]
    fn test_fetch_all_threads_usage() {
        let ids: Vec<String> = ["A", "DOWN", "B", "C", "D"].iter().map(|s| s.to_string()).collect();
        let mut usage = UsageTracker::with_limit(2);

        let outcome = fetch_all(&Flaky, &ids, window(), &mut usage);

        assert_eq!(outcome.records.len(), 2);
        let failed: Vec<&str> = outcome.failed.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(failed, vec!["DOWN", "C"]);
        assert_eq!(usage.failures, 2);
        assert_eq!(usage.credits_used, 2);
    }

    #[test]
    fn test_window_is_half_open() {
        let w = window();
        assert!(w.contains(w.start));
        assert!(!w.contains(w.end));
    }
}
