//! berthq - Causal queue state and waiting-time features for vessel berthing prediction
//!
//! berthq turns raw AIS position reports and port logs into leakage-free
//! training data through a deterministic pipeline: normalization → berthing
//! detection → waiting-time labels → outlier clipping → historical features
//! → temporal folds.
//!
//! ## Modules
//!
//! - **Labeling**: [`normalizer`], [`detector`] and [`waiting`] produce waiting-time labels
//! - **Features**: [`history`], [`queue`] and [`features`] append lagged columns in batch
//! - **Serving**: [`online`] answers the same features for a live arrival
//! - **Training**: [`clipper`] and [`splitter`] prepare the corpus; [`model`] fixes the model contract

pub mod clipper;
pub mod config;
pub mod detector;
pub mod error;
pub mod features;
pub mod history;
pub mod model;
pub mod normalizer;
pub mod online;
pub mod pipeline;
pub mod queue;
pub mod sources;
pub mod splitter;
pub mod types;
pub mod waiting;

pub use clipper::{clip_outliers, ClipReport, GroupColumn};
pub use config::BerthConfig;
pub use detector::{detect_events, BerthingDetector};
pub use error::ComputeError;
pub use features::{historical_aggregates, FeatureDeriver};
pub use history::{AggregateKeys, HistoryIndex};
pub use online::{LiveQuery, OnlineFeatures};
pub use pipeline::{label_positions, prepare_training_set, BerthProcessor, LabelingSummary, TrainingSet};
pub use queue::{queue_depth_at, LineupVessel, QueueTimeline, SimulatedQueue};
pub use splitter::{temporal_folds, TemporalFold};
pub use waiting::{compute_waiting_time, labels_from_port_log};

/// berthq version recorded alongside exported artifacts
pub const BERTHQ_VERSION: &str = env!("CARGO_PKG_VERSION");
