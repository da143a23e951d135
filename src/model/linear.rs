use ndarray::{Array1, ArrayView1};
use rand::{rngs::StdRng, seq::SliceRandom};
use tracing::debug;

use crate::{
    build_rng,
    codec::StateActionRecord,
    error::{ModelError, QtradeResult},
    model::{Model, Standardizer, check_targets, to_matrix},
};

/// Linear regressor trained by stochastic gradient descent with an L2 penalty.
///
/// Inputs are standardized with statistics taken from the first fitted batch.
/// Later fits continue from the current weights.
#[derive(Debug, Clone)]
pub struct LinearModel {
    dim: usize,
    learning_rate: f64,
    passes: usize,
    l2_penalty: f64,
    weights: Array1<f64>,
    bias: f64,
    scaler: Option<Standardizer>,
    rng: StdRng,
}

impl LinearModel {
    pub fn new(
        dim: usize,
        learning_rate: f64,
        passes: usize,
        l2_penalty: f64,
        seed: Option<u64>,
    ) -> Self {
        Self {
            dim,
            learning_rate,
            passes,
            l2_penalty,
            weights: Array1::zeros(dim),
            bias: 0.0,
            scaler: None,
            rng: build_rng(seed),
        }
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }
}

impl Model for LinearModel {
    fn predict(&self, records: &[StateActionRecord]) -> QtradeResult<Vec<f64>> {
        let Some(scaler) = &self.scaler else {
            return Ok(vec![0.0; records.len()]);
        };

        let features = scaler.transform(&to_matrix(records, self.dim)?);
        let predictions = features.dot(&self.weights) + self.bias;
        if predictions.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NonFinite("linear prediction".to_string()).into());
        }
        Ok(predictions.to_vec())
    }

    fn fit(&mut self, records: &[StateActionRecord], targets: &[f64]) -> QtradeResult<()> {
        check_targets(records, targets)?;
        if records.is_empty() {
            return Ok(());
        }

        let raw = to_matrix(records, self.dim)?;
        let scaler = self.scaler.get_or_insert_with(|| Standardizer::fit(&raw));
        let features = scaler.transform(&raw);

        let mut order = (0..records.len()).collect::<Vec<_>>();
        for _ in 0..self.passes {
            order.shuffle(&mut self.rng);
            for &i in &order {
                let row = features.row(i);
                let error = row.dot(&self.weights) + self.bias - targets[i];
                self.weights.zip_mut_with(&row, |w, x| {
                    *w -= self.learning_rate * (error * x + self.l2_penalty * *w)
                });
                self.bias -= self.learning_rate * error;
            }
        }

        if self.weights.iter().any(|w| !w.is_finite()) || !self.bias.is_finite() {
            return Err(ModelError::NonFinite("linear weights diverged".to_string()).into());
        }

        debug!(samples = records.len(), passes = self.passes, "Fitted linear model");
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.scaler.is_some()
    }
}
