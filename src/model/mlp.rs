use ndarray::{Array1, Array2, Axis};
use rand::{Rng, rngs::StdRng, seq::SliceRandom};
use tracing::debug;

use crate::{
    build_rng,
    codec::StateActionRecord,
    error::{ModelError, QtradeResult},
    model::{Model, Standardizer, check_targets, to_matrix},
};

#[derive(Debug, Clone)]
struct Layer {
    weights: Array2<f64>,
    bias: Array1<f64>,
}

impl Layer {
    fn new(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        // He initialisation for ReLU units
        let bound = (6.0 / inputs.max(1) as f64).sqrt();
        let weights = Array2::from_shape_simple_fn((inputs, outputs), || {
            rng.random_range(-bound..bound)
        });
        Self {
            weights,
            bias: Array1::zeros(outputs),
        }
    }

    fn forward(&self, input: &Array2<f64>) -> Array2<f64> {
        input.dot(&self.weights) + &self.bias
    }
}

/// Multi-layer perceptron regressor.
///
/// ReLU hidden layers, one linear output unit, mean squared error and
/// mini-batch gradient descent.
#[derive(Debug, Clone)]
pub struct MlpModel {
    dim: usize,
    layers: Vec<Layer>,
    learning_rate: f64,
    passes: usize,
    batch_size: usize,
    scaler: Option<Standardizer>,
    rng: StdRng,
}

impl MlpModel {
    pub fn new(
        dim: usize,
        hidden_layers: &[usize],
        learning_rate: f64,
        passes: usize,
        batch_size: usize,
        seed: Option<u64>,
    ) -> Self {
        let mut rng = build_rng(seed);
        let widths = std::iter::once(dim)
            .chain(hidden_layers.iter().copied())
            .chain(std::iter::once(1))
            .collect::<Vec<_>>();
        let layers = widths
            .windows(2)
            .map(|pair| Layer::new(pair[0], pair[1], &mut rng))
            .collect();

        Self {
            dim,
            layers,
            learning_rate,
            passes,
            batch_size: batch_size.max(1),
            scaler: None,
            rng,
        }
    }

    /// Activations of every layer, input first. The last entry is the linear output.
    fn forward(&self, input: Array2<f64>) -> Vec<Array2<f64>> {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input);
        let last = self.layers.len() - 1;
        for (idx, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&activations[idx]);
            activations.push(if idx == last { z } else { z.mapv(relu) });
        }
        activations
    }

    fn step(&mut self, input: Array2<f64>, targets: &Array1<f64>) {
        let rows = input.nrows() as f64;
        let activations = self.forward(input);

        let Some(output) = activations.last() else {
            return;
        };
        // d(MSE)/d(output), shape (rows, 1)
        let mut delta = (output - &targets.view().insert_axis(Axis(1))) * (2.0 / rows);

        for idx in (0..self.layers.len()).rev() {
            let input = &activations[idx];
            let grad_w = input.t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));

            if idx > 0 {
                let back = delta.dot(&self.layers[idx].weights.t());
                delta = back * &activations[idx].mapv(relu_grad);
            }

            let layer = &mut self.layers[idx];
            layer.weights.scaled_add(-self.learning_rate, &grad_w);
            layer.bias.scaled_add(-self.learning_rate, &grad_b);
        }
    }
}

fn relu(x: f64) -> f64 {
    x.max(0.0)
}

fn relu_grad(activation: f64) -> f64 {
    if activation > 0.0 { 1.0 } else { 0.0 }
}

impl Model for MlpModel {
    fn predict(&self, records: &[StateActionRecord]) -> QtradeResult<Vec<f64>> {
        let Some(scaler) = &self.scaler else {
            return Ok(vec![0.0; records.len()]);
        };

        let input = scaler.transform(&to_matrix(records, self.dim)?);
        let activations = self.forward(input);
        let predictions = activations
            .last()
            .map(|out| out.column(0).to_vec())
            .unwrap_or_default();

        if predictions.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NonFinite("network prediction".to_string()).into());
        }
        Ok(predictions)
    }

    fn fit(&mut self, records: &[StateActionRecord], targets: &[f64]) -> QtradeResult<()> {
        check_targets(records, targets)?;
        if records.is_empty() {
            return Ok(());
        }

        let raw = to_matrix(records, self.dim)?;
        let scaler = self.scaler.get_or_insert_with(|| Standardizer::fit(&raw));
        let features = scaler.transform(&raw);
        let targets = Array1::from(targets.to_vec());

        let mut order = (0..records.len()).collect::<Vec<_>>();
        for _ in 0..self.passes {
            order.shuffle(&mut self.rng);
            for chunk in order.chunks(self.batch_size) {
                let batch = features.select(Axis(0), chunk);
                let batch_targets = targets.select(Axis(0), chunk);
                self.step(batch, &batch_targets);
            }
        }

        let diverged = self.layers.iter().any(|layer| {
            layer.weights.iter().chain(layer.bias.iter()).any(|w| !w.is_finite())
        });
        if diverged {
            return Err(ModelError::NonFinite("network weights diverged".to_string()).into());
        }

        debug!(
            samples = records.len(),
            passes = self.passes,
            layers = self.layers.len(),
            "Fitted neural network"
        );
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.scaler.is_some()
    }
}
