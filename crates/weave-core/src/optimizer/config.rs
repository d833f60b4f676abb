//! Optimizer tunables.

use crate::error::OptimizerError;
use serde::{Deserialize, Serialize};
use weave_config::OptimizerSettings;

/// Tunables for one optimizer instance.
///
/// Built from the `[optimizer]` section of the configuration file or with the
/// `with_*` helpers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Share of the previous importance kept at each step
    pub learning_rate: f64,
    pub max_iterations: usize,
    /// Nodes below this importance are prune candidates
    pub min_importance: f64,
    /// L1 change between iterates below which a run has converged
    pub convergence_threshold: f64,
    pub damping_factor: f64,
    pub connectivity_weight: f64,
    pub content_weight: f64,
    pub redundancy_penalty: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::from(&OptimizerSettings::default())
    }
}

impl From<&OptimizerSettings> for OptimizerConfig {
    fn from(settings: &OptimizerSettings) -> Self {
        Self {
            learning_rate: settings.learning_rate,
            max_iterations: settings.max_iterations,
            min_importance: settings.min_importance,
            convergence_threshold: settings.convergence_threshold,
            damping_factor: settings.damping_factor,
            connectivity_weight: settings.connectivity_weight,
            content_weight: settings.content_weight,
            redundancy_penalty: settings.redundancy_penalty,
        }
    }
}

impl From<&OptimizerConfig> for OptimizerSettings {
    fn from(config: &OptimizerConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            max_iterations: config.max_iterations,
            min_importance: config.min_importance,
            convergence_threshold: config.convergence_threshold,
            damping_factor: config.damping_factor,
            connectivity_weight: config.connectivity_weight,
            content_weight: config.content_weight,
            redundancy_penalty: config.redundancy_penalty,
        }
    }
}

impl OptimizerConfig {
    /// Reject values outside their meaningful ranges
    pub fn validate(&self) -> Result<(), OptimizerError> {
        OptimizerSettings::from(self)
            .validate()
            .map_err(|e| OptimizerError::Validation(e.to_string()))
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_min_importance(mut self, min_importance: f64) -> Self {
        self.min_importance = min_importance;
        self
    }

    pub fn with_convergence_threshold(mut self, threshold: f64) -> Self {
        self.convergence_threshold = threshold;
        self
    }

    pub fn with_redundancy_penalty(mut self, penalty: f64) -> Self {
        self.redundancy_penalty = penalty;
        self
    }
}
