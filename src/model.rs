//! Model seam
//!
//! Training happens elsewhere. This module fixes the contract a trained model
//! must satisfy and the policy that chooses between a full and a light model:
//! - [`Regressor`] and [`Classifier`] over plain feature slices
//! - [`EnsembleRegressor`], a weighted composite of regressors
//! - [`WaitingTimeModel`], the `predict(features) -> (hours, class)` contract
//! - [`select_feature_set`], a pure function of the feature quality score

use serde::{Deserialize, Serialize};

use crate::config::ModelSettings;
use crate::error::ComputeError;
use crate::types::{HistoricalFeatures, MAX_WAITING_HOURS};

/// Predicts waiting hours from a feature slice
pub trait Regressor: Send + Sync {
    fn predict(&self, features: &[f64]) -> f64;
}

/// Predicts a waiting-time class from a feature slice
pub trait Classifier: Send + Sync {
    fn classify(&self, features: &[f64]) -> WaitClass;
}

/// Coarse waiting-time bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitClass {
    Short,
    Medium,
    Long,
}

impl WaitClass {
    /// Short below `short_wait_hours`, long from `long_wait_hours` on
    pub fn from_hours(hours: f64, settings: &ModelSettings) -> Self {
        if hours < settings.short_wait_hours {
            WaitClass::Short
        } else if hours >= settings.long_wait_hours {
            WaitClass::Long
        } else {
            WaitClass::Medium
        }
    }
}

/// Linear model with serialized coefficients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressor {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
}

impl Regressor for LinearRegressor {
    fn predict(&self, features: &[f64]) -> f64 {
        self.intercept
            + self
                .coefficients
                .iter()
                .zip(features)
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }
}

/// Weighted average of member regressors
pub struct EnsembleRegressor {
    members: Vec<(f64, Box<dyn Regressor>)>,
    total_weight: f64,
}

impl EnsembleRegressor {
    /// Weights must be positive and finite; at least one member is required
    pub fn new(members: Vec<(f64, Box<dyn Regressor>)>) -> Result<Self, ComputeError> {
        if members.is_empty() {
            return Err(ComputeError::InvalidParameter(
                "ensemble needs at least one member".to_string(),
            ));
        }
        if let Some((weight, _)) = members.iter().find(|(w, _)| !(*w > 0.0 && w.is_finite())) {
            return Err(ComputeError::InvalidParameter(format!(
                "ensemble weight must be positive, got {}",
                weight
            )));
        }
        let total_weight: f64 = members.iter().map(|(w, _)| w).sum();
        Ok(Self {
            members,
            total_weight,
        })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Regressor for EnsembleRegressor {
    fn predict(&self, features: &[f64]) -> f64 {
        let weighted: f64 = self
            .members
            .iter()
            .map(|(weight, member)| weight * member.predict(features))
            .sum();
        weighted / self.total_weight
    }
}

/// Signals that come from outside the port history and may be missing
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalSignals {
    #[serde(default)]
    pub wind_speed: Option<f64>,
    #[serde(default)]
    pub wave_height: Option<f64>,
    #[serde(default)]
    pub precipitation: Option<f64>,
    #[serde(default)]
    pub commodity_price: Option<f64>,
}

impl ExternalSignals {
    fn values(&self) -> [Option<f64>; 4] {
        [
            self.wind_speed,
            self.wave_height,
            self.precipitation,
            self.commodity_price,
        ]
    }
}

/// Model input: the historical features plus optional external signals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub historical: HistoricalFeatures,
    #[serde(default)]
    pub external: ExternalSignals,
}

impl FeatureVector {
    /// Fraction of external signals that are present and finite
    pub fn quality_score(&self) -> f64 {
        let values = self.external.values();
        let present = values
            .iter()
            .filter(|v| matches!(v, Some(x) if x.is_finite()))
            .count();
        present as f64 / values.len() as f64
    }
}

/// Which columns a model was trained on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSet {
    /// Historical features and external signals
    Full,
    /// Historical features only
    Light,
}

impl FeatureSet {
    /// Flatten a feature vector into this set's column order
    ///
    /// Missing external signals are passed as 0.0.
    pub fn values(&self, features: &FeatureVector) -> Vec<f64> {
        let h = &features.historical;
        let mut values = vec![
            h.port_mean_historical,
            h.terminal_ma5,
            h.arrivals_7d as f64,
            h.queue_depth as f64,
        ];
        if *self == FeatureSet::Full {
            values.extend(
                features
                    .external
                    .values()
                    .iter()
                    .map(|v| v.filter(|x| x.is_finite()).unwrap_or(0.0)),
            );
        }
        values
    }
}

/// Full model when the quality score reaches the threshold, light otherwise
pub fn select_feature_set(quality_score: f64, threshold: f64) -> FeatureSet {
    if quality_score >= threshold {
        FeatureSet::Full
    } else {
        FeatureSet::Light
    }
}

/// Model output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub hours: f64,
    pub class: WaitClass,
    pub feature_set: FeatureSet,
}

/// Contract shared by every waiting-time model
pub trait WaitingTimeModel: Send + Sync {
    fn feature_set(&self) -> FeatureSet;

    fn predict(&self, features: &FeatureVector) -> Prediction;
}

/// A regressor and optional classifier trained on one feature set
pub struct WaitingModel {
    feature_set: FeatureSet,
    regressor: Box<dyn Regressor>,
    classifier: Option<Box<dyn Classifier>>,
    settings: ModelSettings,
}

impl WaitingModel {
    pub fn new(feature_set: FeatureSet, regressor: Box<dyn Regressor>, settings: ModelSettings) -> Self {
        Self {
            feature_set,
            regressor,
            classifier: None,
            settings,
        }
    }

    /// Use a dedicated classifier instead of bucketing the regressed hours
    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }
}

impl WaitingTimeModel for WaitingModel {
    fn feature_set(&self) -> FeatureSet {
        self.feature_set
    }

    fn predict(&self, features: &FeatureVector) -> Prediction {
        let values = self.feature_set.values(features);
        let hours = self.regressor.predict(&values).clamp(0.0, MAX_WAITING_HOURS);
        let class = match &self.classifier {
            Some(classifier) => classifier.classify(&values),
            None => WaitClass::from_hours(hours, &self.settings),
        };
        Prediction {
            hours,
            class,
            feature_set: self.feature_set,
        }
    }
}

/// Routes each request to the full or the light model by quality score
pub struct ModelSelector {
    full: Box<dyn WaitingTimeModel>,
    light: Box<dyn WaitingTimeModel>,
    threshold: f64,
}

impl ModelSelector {
    pub fn new(
        full: Box<dyn WaitingTimeModel>,
        light: Box<dyn WaitingTimeModel>,
        threshold: f64,
    ) -> Result<Self, ComputeError> {
        if full.feature_set() != FeatureSet::Full || light.feature_set() != FeatureSet::Light {
            return Err(ComputeError::InvalidParameter(
                "selector needs one full and one light model".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ComputeError::InvalidParameter(format!(
                "quality threshold must be in [0, 1], got {}",
                threshold
            )));
        }
        Ok(Self {
            full,
            light,
            threshold,
        })
    }

    pub fn predict(&self, features: &FeatureVector) -> Prediction {
        match select_feature_set(features.quality_score(), self.threshold) {
            FeatureSet::Full => self.full.predict(features),
            FeatureSet::Light => self.light.predict(features),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant(f64);

    impl Regressor for Constant {
        fn predict(&self, _features: &[f64]) -> f64 {
            self.0
        }
    }

    struct AlwaysLong;

    impl Classifier for AlwaysLong {
        fn classify(&self, _features: &[f64]) -> WaitClass {
            WaitClass::Long
        }
    }

    fn vector(external: ExternalSignals) -> FeatureVector {
        FeatureVector {
            historical: HistoricalFeatures {
                port_mean_historical: 40.0,
                terminal_ma5: 30.0,
                arrivals_7d: 6,
                queue_depth: 3,
            },
            external,
        }
    }

    #[test]
    fn test_wait_class_thresholds() {
        let settings = ModelSettings::default();
        assert_eq!(WaitClass::from_hours(0.0, &settings), WaitClass::Short);
        assert_eq!(WaitClass::from_hours(48.0, &settings), WaitClass::Medium);
        assert_eq!(WaitClass::from_hours(167.9, &settings), WaitClass::Medium);
        assert_eq!(WaitClass::from_hours(168.0, &settings), WaitClass::Long);
    }

    #[test]
    fn test_ensemble_weighted_average() {
        let ensemble = EnsembleRegressor::new(vec![
            (3.0, Box::new(Constant(10.0)) as Box<dyn Regressor>),
            (1.0, Box::new(Constant(50.0)) as Box<dyn Regressor>),
        ])
        .unwrap();
        assert!((ensemble.predict(&[]) - 20.0).abs() < 1e-9);
        assert_eq!(ensemble.len(), 2);

        assert!(EnsembleRegressor::new(vec![]).is_err());
        assert!(EnsembleRegressor::new(vec![(0.0, Box::new(Constant(1.0)) as Box<dyn Regressor>)]).is_err());
    }

    #[test]
    fn test_linear_regressor_uses_feature_order() {
        let model = LinearRegressor {
            intercept: 1.0,
            coefficients: vec![0.5, 0.0, 1.0, 2.0],
        };
        let values = FeatureSet::Light.values(&vector(ExternalSignals::default()));
        assert_eq!(values, vec![40.0, 30.0, 6.0, 3.0]);
        assert!((model.predict(&values) - 33.0).abs() < 1e-9);
    }

    #[test]
    fn test_quality_score_and_selection() {
        let partial = vector(ExternalSignals {
            wind_speed: Some(12.0),
            wave_height: Some(1.5),
            precipitation: Some(f64::NAN),
            commodity_price: None,
        });
        assert!((partial.quality_score() - 0.5).abs() < 1e-9);
        assert_eq!(FeatureSet::Full.values(&partial).len(), 8);

        assert_eq!(select_feature_set(0.8, 0.8), FeatureSet::Full);
        assert_eq!(select_feature_set(0.79, 0.8), FeatureSet::Light);
        assert_eq!(select_feature_set(0.0, 0.0), FeatureSet::Full);
    }

    #[test]
    fn test_selector_routes_by_quality() {
        let settings = ModelSettings::default();
        let full = WaitingModel::new(FeatureSet::Full, Box::new(Constant(200.0)), settings.clone());
        let light = WaitingModel::new(FeatureSet::Light, Box::new(Constant(-5.0)), settings.clone())
            .with_classifier(Box::new(AlwaysLong));
        let selector = ModelSelector::new(Box::new(full), Box::new(light), 0.75).unwrap();

        let complete = vector(ExternalSignals {
            wind_speed: Some(8.0),
            wave_height: Some(0.7),
            precipitation: Some(0.0),
            commodity_price: Some(112.0),
        });
        let prediction = selector.predict(&complete);
        assert_eq!(prediction.feature_set, FeatureSet::Full);
        assert_eq!(prediction.class, WaitClass::Long);
        assert!((prediction.hours - 200.0).abs() < 1e-9);

        let sparse = selector.predict(&vector(ExternalSignals::default()));
        assert_eq!(sparse.feature_set, FeatureSet::Light);
        assert_eq!(sparse.hours, 0.0);
        assert_eq!(sparse.class, WaitClass::Long);
    }

    #[test]
    fn test_selector_rejects_swapped_models() {
        let settings = ModelSettings::default();
        let a = WaitingModel::new(FeatureSet::Light, Box::new(Constant(1.0)), settings.clone());
        let b = WaitingModel::new(FeatureSet::Full, Box::new(Constant(1.0)), settings);
        assert!(ModelSelector::new(Box::new(a), Box::new(b), 0.5).is_err());
    }
}
