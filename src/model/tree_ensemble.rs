//! Gradient-boosted regression trees evaluated natively from a JSON dump.
//!
//! Artifact shape:
//!
//! ```json
//! {"base_score": 0.5, "num_features": 42, "target": "occupancy",
//!  "trees": [{"nodes": [
//!     {"feature": 0, "threshold": 0.4, "left": 1, "right": 2, "default_left": true},
//!     {"leaf": -0.1},
//!     {"leaf": 0.1}
//!  ]}]}
//! ```
//!
//! Splits follow XGBoost semantics: `x < threshold` goes left, a missing
//! (NaN) value takes the default branch.

use crate::features::{FEATURE_COUNT, FeatureVector};
use crate::model::ModelLoadError;
use crate::model::forecast::{ForecastModel, InferenceError, Target};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        #[serde(default)]
        default_left: bool,
    },
    Leaf {
        leaf: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    fn validate(&self, num_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= num_features {
                    return Err(format!("node {i} splits on feature {feature}"));
                }
                for child in [*left, *right] {
                    if child <= i || child >= self.nodes.len() {
                        return Err(format!("node {i} has invalid child {child}"));
                    }
                }
            }
        }
        Ok(())
    }

    fn leaf_value(&self, x: &[f64]) -> Result<f64, InferenceError> {
        let mut index = 0;
        loop {
            let node = self
                .nodes
                .get(index)
                .ok_or_else(|| InferenceError::Corrupt(format!("node {index} out of range")))?;
            match node {
                Node::Leaf { leaf } => return Ok(*leaf),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                } => {
                    let value = x.get(*feature).copied().unwrap_or(f64::NAN);
                    index = if value.is_nan() {
                        if *default_left { *left } else { *right }
                    } else if value < *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TreeEnsemble {
    pub base_score: f64,
    pub num_features: usize,
    pub target: Target,
    pub trees: Vec<Tree>,
}

impl TreeEnsemble {
    pub fn from_json(json: &str) -> Result<Self, ModelLoadError> {
        let ensemble: TreeEnsemble = serde_json::from_str(json)?;
        ensemble.validate()?;
        Ok(ensemble)
    }

    pub fn from_path(path: &Path) -> Result<Self, ModelLoadError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    fn validate(&self) -> Result<(), ModelLoadError> {
        if self.num_features != FEATURE_COUNT {
            return Err(ModelLoadError::Invalid(format!(
                "model expects {} features, vector has {FEATURE_COUNT}",
                self.num_features
            )));
        }
        if !self.base_score.is_finite() {
            return Err(ModelLoadError::Invalid("base_score is not finite".to_string()));
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.validate(self.num_features)
                .map_err(|e| ModelLoadError::Invalid(format!("tree {t}: {e}")))?;
        }
        Ok(())
    }
}

impl ForecastModel for TreeEnsemble {
    fn predict_raw(&self, features: &FeatureVector) -> Result<f64, InferenceError> {
        let x = features.as_slice();
        let mut sum = self.base_score;
        for tree in &self.trees {
            sum += tree.leaf_value(x)?;
        }
        Ok(sum)
    }

    fn target(&self) -> Target {
        self.target
    }
}
