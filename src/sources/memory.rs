//! In-memory position source
//!
//! Serves reports loaded from a file or built in tests, filtered by vessel and window.

use std::collections::HashMap;

use super::{FetchWindow, PositionSource, SourceError, UsageTracker};
use crate::normalizer::parse_timestamp;
use crate::types::RawPositionRecord;

/// Position source backed by records held in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    by_vessel: HashMap<String, Vec<RawPositionRecord>>,
    credits_per_request: u64,
}

impl MemorySource {
    pub fn new(records: Vec<RawPositionRecord>) -> Self {
        let mut by_vessel: HashMap<String, Vec<RawPositionRecord>> = HashMap::new();
        for record in records {
            if let Some(id) = record.vessel_id.clone() {
                by_vessel.entry(id).or_default().push(record);
            }
        }
        Self {
            by_vessel,
            credits_per_request: 1,
        }
    }

    /// Credits charged per fetch
    pub fn with_credits_per_request(mut self, credits: u64) -> Self {
        self.credits_per_request = credits;
        self
    }

    pub fn vessel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.by_vessel.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl PositionSource for MemorySource {
    fn fetch(
        &self,
        vessel_id: &str,
        window: FetchWindow,
        usage: &mut UsageTracker,
    ) -> Result<Vec<RawPositionRecord>, SourceError> {
        usage.charge(self.credits_per_request)?;
        let records = self
            .by_vessel
            .get(vessel_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| {
                        r.timestamp
                            .as_deref()
                            .and_then(parse_timestamp)
                            .map(|ts| window.contains(ts))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(records)
    }
}
