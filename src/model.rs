//! Value-function backends scoring `(state, action)` records.
//!
//! Agents only rely on the [`Model`] capability surface. Concrete regressors
//! are built from a serializable [`ModelConfig`].

pub mod linear;
pub mod mlp;

use std::fmt::Debug;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::{
    codec::StateActionRecord,
    error::{ModelError, QtradeResult},
    model::{linear::LinearModel, mlp::MlpModel},
};

/// Trainable point predictor over state-action records.
pub trait Model: Debug + Send {
    /// One prediction per record, in input order.
    fn predict(&self, records: &[StateActionRecord]) -> QtradeResult<Vec<f64>>;

    /// Fits the model on `records` against the matching `targets`.
    fn fit(&mut self, records: &[StateActionRecord], targets: &[f64]) -> QtradeResult<()>;

    /// `false` until the first successful [`fit`](Model::fit).
    fn is_trained(&self) -> bool;
}

impl Model for Box<dyn Model> {
    fn predict(&self, records: &[StateActionRecord]) -> QtradeResult<Vec<f64>> {
        (**self).predict(records)
    }

    fn fit(&mut self, records: &[StateActionRecord], targets: &[f64]) -> QtradeResult<()> {
        (**self).fit(records, targets)
    }

    fn is_trained(&self) -> bool {
        (**self).is_trained()
    }
}

// ================================================================================================
// Configuration
// ================================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelConfig {
    Linear {
        learning_rate: f64,
        passes: usize,
        #[serde(default)]
        l2_penalty: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
    NeuralNetwork {
        hidden_layers: Vec<usize>,
        learning_rate: f64,
        passes: usize,
        batch_size: usize,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::Linear {
            learning_rate: 0.01,
            passes: 50,
            l2_penalty: 1e-4,
            seed: None,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> QtradeResult<()> {
        let (learning_rate, passes) = match self {
            Self::Linear {
                learning_rate,
                passes,
                l2_penalty,
                ..
            } => {
                if !(l2_penalty.is_finite() && *l2_penalty >= 0.0) {
                    return Err(ModelError::InvalidConfig(format!(
                        "l2_penalty must be non-negative, got {l2_penalty}"
                    ))
                    .into());
                }
                (*learning_rate, *passes)
            }
            Self::NeuralNetwork {
                hidden_layers,
                learning_rate,
                passes,
                batch_size,
                ..
            } => {
                if hidden_layers.contains(&0) {
                    return Err(ModelError::InvalidConfig(
                        "hidden layers must have at least one unit".to_string(),
                    )
                    .into());
                }
                if *batch_size == 0 {
                    return Err(
                        ModelError::InvalidConfig("batch_size must be positive".to_string()).into(),
                    );
                }
                (*learning_rate, *passes)
            }
        };

        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(ModelError::InvalidConfig(format!(
                "learning_rate must be positive, got {learning_rate}"
            ))
            .into());
        }
        if passes == 0 {
            return Err(ModelError::InvalidConfig("passes must be positive".to_string()).into());
        }
        Ok(())
    }

    /// Builds an untrained model over `dim`-wide state-action records.
    pub fn build(&self, dim: usize) -> QtradeResult<Box<dyn Model>> {
        self.validate()?;
        let model: Box<dyn Model> = match self {
            Self::Linear {
                learning_rate,
                passes,
                l2_penalty,
                seed,
            } => Box::new(LinearModel::new(dim, *learning_rate, *passes, *l2_penalty, *seed)),
            Self::NeuralNetwork {
                hidden_layers,
                learning_rate,
                passes,
                batch_size,
                seed,
            } => Box::new(MlpModel::new(
                dim,
                hidden_layers,
                *learning_rate,
                *passes,
                *batch_size,
                *seed,
            )),
        };
        Ok(model)
    }
}

// ================================================================================================
// Shared helpers
// ================================================================================================

/// Stacks records into a `(rows, dim)` feature matrix.
pub(crate) fn to_matrix(records: &[StateActionRecord], dim: usize) -> QtradeResult<Array2<f64>> {
    let mut matrix = Array2::zeros((records.len(), dim));
    for (mut row, record) in matrix.rows_mut().into_iter().zip(records) {
        if record.len() != dim {
            return Err(ModelError::DimensionMismatch {
                expected: dim,
                got: record.len(),
            }
            .into());
        }
        row.assign(&Array1::from(record.values().to_vec()));
    }
    Ok(matrix)
}

pub(crate) fn check_targets(records: &[StateActionRecord], targets: &[f64]) -> QtradeResult<()> {
    if records.len() != targets.len() {
        return Err(ModelError::TargetMismatch {
            records: records.len(),
            targets: targets.len(),
        }
        .into());
    }
    if let Some(bad) = targets.iter().find(|t| !t.is_finite()) {
        return Err(ModelError::NonFinite(format!("training target {bad}")).into());
    }
    Ok(())
}

/// Per-feature mean and scale, fitted once so later batches share the same inputs space.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Standardizer {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl Standardizer {
    pub(crate) fn fit(features: &Array2<f64>) -> Self {
        let rows = features.nrows().max(1) as f64;
        let mean = features.sum_axis(ndarray::Axis(0)) / rows;
        let centered = features - &mean;
        let variance = (&centered * &centered).sum_axis(ndarray::Axis(0)) / rows;
        // constant columns (e.g. an always-zero holding) pass through unscaled
        let scale = variance.mapv(|v| if v > 1e-12 { v.sqrt() } else { 1.0 });
        Self { mean, scale }
    }

    pub(crate) fn transform(&self, features: &Array2<f64>) -> Array2<f64> {
        (features - &self.mean) / &self.scale
    }
}
