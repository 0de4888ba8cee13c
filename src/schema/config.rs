//! Configuration for batch runs of the `automata-gpu` binary.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{BoundaryPolicy, Distribution, RuleParser, RuleStringParser};

fn default_iterations() -> u64 {
    1
}

/// Top-level automaton configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomatonConfig {
    /// Grid extents, `[x, y]` or `[x, y, z]`.
    pub shape: Vec<usize>,
    /// Value every cell starts with before any fill.
    #[serde(default)]
    pub default_value: u8,
    /// Out-of-bound policy used by steps that do not override it.
    #[serde(default)]
    pub boundary: BoundaryPolicy,
    /// Optional weighted random fill applied after creation.
    #[serde(default)]
    pub distribution: Option<Distribution>,
    /// Seed for fills and stochastic rules; entropy when absent.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Rules applied in order.
    pub steps: Vec<StepConfig>,
}

/// One rule application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub rule: String,
    #[serde(default = "default_iterations")]
    pub iterations: u64,
    /// Policy switched to before this step runs.
    #[serde(default)]
    pub boundary: Option<BoundaryPolicy>,
}

impl StepConfig {
    pub fn new(rule: impl Into<String>, iterations: u64) -> Self {
        Self {
            rule: rule.into(),
            iterations,
            boundary: None,
        }
    }
}

impl Default for AutomatonConfig {
    fn default() -> Self {
        Self {
            shape: vec![128, 128],
            default_value: 0,
            boundary: BoundaryPolicy::Wrap,
            distribution: Some(Distribution::new(vec![(Some(0), 80.0), (Some(1), 20.0)])),
            seed: Some(42),
            steps: vec![StepConfig::new("23/3", 100)],
        }
    }
}

impl AutomatonConfig {
    /// Read and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(2..=3).contains(&self.shape.len()) {
            return Err(ConfigError::InvalidDimensions(self.shape.len()));
        }
        if self.shape.contains(&0) {
            return Err(ConfigError::EmptyExtent);
        }
        if let Some(distribution) = &self.distribution {
            if distribution
                .entries()
                .iter()
                .any(|(_, weight)| !weight.is_finite() || *weight < 0.0)
            {
                return Err(ConfigError::InvalidWeight);
            }
            if distribution.total_weight() <= 0.0 {
                return Err(ConfigError::InvalidWeight);
            }
        }
        let parser = RuleStringParser;
        for (index, step) in self.steps.iter().enumerate() {
            if parser.parse(&step.rule).is_none() {
                return Err(ConfigError::InvalidRule {
                    index,
                    rule: step.rule.clone(),
                });
            }
        }
        Ok(())
    }

    /// Total number of iterations over all steps.
    pub fn total_iterations(&self) -> u64 {
        self.steps.iter().map(|step| step.iterations).sum()
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Grid must have 2 or 3 dimensions, got {0}")]
    InvalidDimensions(usize),
    #[error("Grid extents must be non-zero")]
    EmptyExtent,
    #[error("Distribution weights must be finite, non-negative and not all zero")]
    InvalidWeight,
    #[error("Step {index} has an unparsable rule '{rule}'")]
    InvalidRule { index: usize, rule: String },
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}
