//! Queue simulation
//!
//! Queue depth at instant `t` is the number of vessels that arrived at or before
//! `t` minus the number that departed (berthed) at or before `t`, with the
//! querying vessel's own entry removed from both sides. [`queue_depth_at`] is the
//! only place this rule is written down. The batch path (historical berthing
//! times) and the online path (simulated departures for a live lineup) both call it.
//!
//! Each query is two binary searches over sorted timestamp arrays.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ServiceDurations;
use crate::types::CargoProfile;

/// The querying vessel's own arrival and, when known, departure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnEntry {
    pub arrival: DateTime<Utc>,
    pub departure: Option<DateTime<Utc>>,
}

/// Vessels ahead and not yet departed at `reference_time`
///
/// `arrivals` and `departures` must be sorted ascending. `own`, when given, must be
/// an entry that is present in both arrays (its departure only if known).
pub fn queue_depth_at(
    arrivals: &[DateTime<Utc>],
    departures: &[DateTime<Utc>],
    reference_time: DateTime<Utc>,
    own: Option<OwnEntry>,
) -> u32 {
    let mut arrived = count_at_or_before(arrivals, reference_time);
    let mut departed = count_at_or_before(departures, reference_time);

    if let Some(own) = own {
        if own.arrival <= reference_time {
            arrived = arrived.saturating_sub(1);
        }
        if matches!(own.departure, Some(departure) if departure <= reference_time) {
            departed = departed.saturating_sub(1);
        }
    }

    arrived.saturating_sub(departed) as u32
}

fn count_at_or_before(sorted: &[DateTime<Utc>], t: DateTime<Utc>) -> usize {
    sorted.partition_point(|ts| *ts <= t)
}

/// Sorted arrival and departure instants of one terminal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueTimeline {
    arrivals: Vec<DateTime<Utc>>,
    departures: Vec<DateTime<Utc>>,
}

impl QueueTimeline {
    pub fn new(mut arrivals: Vec<DateTime<Utc>>, mut departures: Vec<DateTime<Utc>>) -> Self {
        arrivals.sort_unstable();
        departures.sort_unstable();
        Self {
            arrivals,
            departures,
        }
    }

    /// Build from `(arrival, departure)` pairs
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (DateTime<Utc>, DateTime<Utc>)>,
    {
        let (arrivals, departures) = pairs.into_iter().unzip();
        Self::new(arrivals, departures)
    }

    pub fn depth_at(&self, reference_time: DateTime<Utc>, own: Option<OwnEntry>) -> u32 {
        queue_depth_at(&self.arrivals, &self.departures, reference_time, own)
    }

    pub fn len(&self) -> usize {
        self.arrivals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }
}

/// A vessel on a terminal's live lineup, waiting or in service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineupVessel {
    pub vessel_id: String,
    pub arrival_time: DateTime<Utc>,
    #[serde(default)]
    pub cargo_profile: CargoProfile,
    /// Start of service, for vessels already at the berth
    #[serde(default)]
    pub berthing_time: Option<DateTime<Utc>>,
}

/// Lineup vessel with its simulated departure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedEntry {
    pub vessel_id: String,
    pub arrival: DateTime<Utc>,
    pub departure: DateTime<Utc>,
}

/// Live lineup with simulated departures, answering queue-depth queries
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedQueue {
    entries: Vec<SimulatedEntry>,
    timeline: QueueTimeline,
}

impl SimulatedQueue {
    /// Assign every lineup vessel a simulated departure
    ///
    /// Without a berth capacity a vessel departs at its arrival plus the assumed
    /// service duration of its cargo profile. With `berths = Some(c)` vessels are
    /// served first-come first-served across `c` berths and depart at the end of
    /// their service; a vessel with a known berthing time starts service then.
    pub fn simulate(
        lineup: &[LineupVessel],
        durations: &ServiceDurations,
        berths: Option<usize>,
    ) -> Self {
        let mut ordered: Vec<&LineupVessel> = lineup.iter().collect();
        ordered.sort_by(|a, b| {
            a.arrival_time
                .cmp(&b.arrival_time)
                .then_with(|| a.vessel_id.cmp(&b.vessel_id))
        });

        let entries: Vec<SimulatedEntry> = match berths {
            None => ordered
                .into_iter()
                .map(|vessel| SimulatedEntry {
                    vessel_id: vessel.vessel_id.clone(),
                    arrival: vessel.arrival_time,
                    departure: departure_after(vessel.arrival_time, durations.duration_for(vessel.cargo_profile)),
                })
                .collect(),
            Some(capacity) => {
                let mut berth_free: Vec<Option<DateTime<Utc>>> = vec![None; capacity.max(1)];
                ordered
                    .into_iter()
                    .map(|vessel| {
                        let (slot, free_at) = berth_free
                            .iter()
                            .copied()
                            .enumerate()
                            .min_by_key(|(_, free)| *free)
                            .unwrap_or((0, None));
                        let start = match (vessel.berthing_time, free_at) {
                            (Some(known), _) => known,
                            (None, Some(free)) => free.max(vessel.arrival_time),
                            (None, None) => vessel.arrival_time,
                        };
                        let departure = departure_after(start, durations.duration_for(vessel.cargo_profile));
                        berth_free[slot] = Some(departure);
                        SimulatedEntry {
                            vessel_id: vessel.vessel_id.clone(),
                            arrival: vessel.arrival_time,
                            departure,
                        }
                    })
                    .collect()
            }
        };

        let timeline = QueueTimeline::from_pairs(entries.iter().map(|e| (e.arrival, e.departure)));
        Self { entries, timeline }
    }

    pub fn entries(&self) -> &[SimulatedEntry] {
        &self.entries
    }

    /// Queue depth at a lineup vessel's own arrival
    pub fn depth_for(&self, vessel_id: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.vessel_id == vessel_id)
            .map(|e| {
                self.timeline.depth_at(
                    e.arrival,
                    Some(OwnEntry {
                        arrival: e.arrival,
                        departure: Some(e.departure),
                    }),
                )
            })
    }

    /// Queue depth for a vessel arriving at `reference_time` that is not on the lineup
    pub fn depth_at(&self, reference_time: DateTime<Utc>) -> u32 {
        self.timeline.depth_at(reference_time, None)
    }
}

/// Service end, saturating at the last representable instant
fn departure_after(start: DateTime<Utc>, service: Duration) -> DateTime<Utc> {
    start.checked_add_signed(service).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
