//! Single-layer LSTM over the occupancy history with a linear head.
//!
//! The recurrent cell reads the seven occupancy values oldest first; the head
//! sees the final hidden state followed by the remaining feature entries.

use crate::features::{FEATURE_COUNT, FeatureVector, OCCUPANCY_BLOCK};
use crate::model::ModelLoadError;
use crate::model::forecast::{ForecastModel, InferenceError, Target};
use serde::Deserialize;
use std::path::Path;

const CONTEXT_SIZE: usize = FEATURE_COUNT - OCCUPANCY_BLOCK;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinearHead {
    pub weights: Vec<f64>,
    pub bias: f64,
}

/// Gate rows are stacked in input, forget, cell, output order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LstmModel {
    pub hidden_size: usize,
    pub target: Target,
    /// `4 * hidden_size` input weights (one scalar input per step).
    pub weight_ih: Vec<f64>,
    /// `4 * hidden_size` rows of `hidden_size` recurrent weights.
    pub weight_hh: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    pub head: LinearHead,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl LstmModel {
    pub fn from_json(json: &str) -> Result<Self, ModelLoadError> {
        let model: LstmModel = serde_json::from_str(json)?;
        model.validate()?;
        Ok(model)
    }

    pub fn from_path(path: &Path) -> Result<Self, ModelLoadError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    fn validate(&self) -> Result<(), ModelLoadError> {
        let gates = 4 * self.hidden_size;
        let invalid = |what: &str| Err(ModelLoadError::Invalid(format!("lstm {what}")));
        if self.hidden_size == 0 {
            return invalid("hidden_size must be positive");
        }
        if self.weight_ih.len() != gates || self.bias.len() != gates {
            return invalid("input weights or bias have the wrong length");
        }
        if self.weight_hh.len() != gates
            || self.weight_hh.iter().any(|row| row.len() != self.hidden_size)
        {
            return invalid("recurrent weights have the wrong shape");
        }
        if self.head.weights.len() != self.hidden_size + CONTEXT_SIZE {
            return invalid("head width does not match hidden state plus context");
        }
        Ok(())
    }

    fn final_hidden(&self, sequence: &[f64]) -> Vec<f64> {
        let n = self.hidden_size;
        let mut h = vec![0.0; n];
        let mut c = vec![0.0; n];
        for &x in sequence {
            let pre: Vec<f64> = (0..4 * n)
                .map(|row| {
                    let recurrent: f64 = self.weight_hh[row]
                        .iter()
                        .zip(&h)
                        .map(|(w, h)| w * h)
                        .sum();
                    self.weight_ih[row] * x + recurrent + self.bias[row]
                })
                .collect();
            for j in 0..n {
                let input = sigmoid(pre[j]);
                let forget = sigmoid(pre[n + j]);
                let cell = pre[2 * n + j].tanh();
                let output = sigmoid(pre[3 * n + j]);
                c[j] = forget * c[j] + input * cell;
                h[j] = output * c[j].tanh();
            }
        }
        h
    }
}

impl ForecastModel for LstmModel {
    fn predict_raw(&self, features: &FeatureVector) -> Result<f64, InferenceError> {
        let hidden = self.final_hidden(&features.occupancy_sequence());
        let raw = hidden
            .iter()
            .chain(features.context())
            .zip(&self.head.weights)
            .map(|(x, w)| x * w)
            .sum::<f64>()
            + self.head.bias;
        Ok(raw)
    }

    fn target(&self) -> Target {
        self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_model(hidden_size: usize, bias: f64) -> LstmModel {
        let gates = 4 * hidden_size;
        LstmModel {
            hidden_size,
            target: Target::OccupancyDelta,
            weight_ih: vec![0.0; gates],
            weight_hh: vec![vec![0.0; hidden_size]; gates],
            bias: vec![0.0; gates],
            head: LinearHead {
                weights: vec![0.0; hidden_size + CONTEXT_SIZE],
                bias,
            },
        }
    }

    #[test]
    fn zero_weights_return_head_bias() -> Result<(), InferenceError> {
        let model = zero_model(2, 0.125);
        let vector = FeatureVector::try_from(vec![0.5; FEATURE_COUNT])
            .map_err(|e| InferenceError::Corrupt(e.to_string()))?;
        assert_eq!(model.predict_raw(&vector)?, 0.125);
        Ok(())
    }

    #[test]
    fn head_reads_context_after_hidden_state() -> Result<(), InferenceError> {
        let mut model = zero_model(1, 0.0);
        // First context entry is ocu_trend_1.
        model.head.weights[1] = 2.0;
        let mut values = vec![0.0; FEATURE_COUNT];
        values[OCCUPANCY_BLOCK] = 0.25;
        let vector = FeatureVector::try_from(values)
            .map_err(|e| InferenceError::Corrupt(e.to_string()))?;
        assert_eq!(model.predict_raw(&vector)?, 0.5);
        Ok(())
    }

    #[test]
    fn cell_accumulates_over_sequence() {
        let mut model = zero_model(1, 0.0);
        // Input gate and output gate open, candidate follows the input.
        model.bias[0] = 10.0;
        model.bias[3] = 10.0;
        model.bias[1] = 10.0;
        model.weight_ih[2] = 1.0;
        let short = model.final_hidden(&[0.1]);
        let long = model.final_hidden(&[0.1, 0.1, 0.1]);
        assert!(long[0] > short[0]);
    }

    #[test]
    fn rejects_wrong_head_width() {
        let mut model = zero_model(2, 0.0);
        model.head.weights.pop();
        assert!(matches!(model.validate(), Err(ModelLoadError::Invalid(_))));
    }
}
