// Tree ensemble model artifact
// Gradient-boosted or bagged decision trees exported to JSON by the training job

use serde::{Deserialize, Serialize};

use crate::events::backend::{ClassifierError, ModelSchema, ScoringModel};
use crate::events::vector::compute_layout_hash;

/// Artifact format understood by this loader
pub const ENSEMBLE_FORMAT_VERSION: u32 = 1;

/// How per-tree outputs become a probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Average of leaf probabilities (random forest)
    Mean,
    /// Logistic of base score plus summed leaf margins (boosting)
    Logistic,
}

/// Decision tree node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    /// Go left when `features[feature] <= threshold`
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Flattened tree, root at index 0
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Children must point forward, which also rules out cycles
    fn validate(&self, tree: usize, dimension: usize) -> Result<(), ClassifierError> {
        if self.nodes.is_empty() {
            return Err(ClassifierError::ModelLoad(format!("tree {} has no nodes", tree)));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } = node
            {
                if *feature >= dimension {
                    return Err(ClassifierError::ModelLoad(format!(
                        "tree {} node {} splits on feature {} of {}",
                        tree, i, feature, dimension
                    )));
                }
                if !threshold.is_finite() {
                    return Err(ClassifierError::ModelLoad(format!(
                        "tree {} node {} has a non-finite threshold",
                        tree, i
                    )));
                }
                for child in [*left, *right] {
                    if child <= i || child >= self.nodes.len() {
                        return Err(ClassifierError::ModelLoad(format!(
                            "tree {} node {} has invalid child {}",
                            tree, i, child
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn predict(&self, features: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes.get(index) {
                Some(TreeNode::Leaf { value }) => return *value,
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let x = features.get(*feature).copied().unwrap_or(0.0);
                    index = if x <= *threshold { *left } else { *right };
                }
                // Unreachable for validated trees
                None => return 0.0,
            }
        }
    }
}

/// Trained ensemble artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleModel {
    pub format_version: u32,

    pub name: String,

    /// Feature layout version the model was trained on
    pub feature_version: u8,

    /// Feature names in training order
    pub feature_layout: Vec<String>,

    pub aggregation: Aggregation,

    /// Initial margin for logistic aggregation
    #[serde(default)]
    pub base_score: f64,

    pub trees: Vec<DecisionTree>,
}

impl EnsembleModel {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.format_version != ENSEMBLE_FORMAT_VERSION {
            return Err(ClassifierError::ModelLoad(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }
        if self.trees.is_empty() {
            return Err(ClassifierError::ModelLoad("ensemble has no trees".to_string()));
        }
        let dimension = self.feature_layout.len();
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(i, dimension)?;
        }
        Ok(())
    }

    /// Deserialize and validate from JSON bytes
    pub fn from_json_bytes(data: &[u8]) -> Result<Self, ClassifierError> {
        let model: EnsembleModel =
            serde_json::from_slice(data).map_err(|e| ClassifierError::ModelLoad(e.to_string()))?;
        model.validate()?;
        Ok(model)
    }

    /// Serialize model to JSON bytes
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

impl ScoringModel for EnsembleModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> ModelSchema {
        ModelSchema {
            feature_version: self.feature_version,
            layout_hash: Some(compute_layout_hash(self.feature_version, &self.feature_layout)),
            dimension: self.feature_layout.len(),
        }
    }

    fn score(&self, features: &[f64]) -> f64 {
        let outputs = self.trees.iter().map(|t| t.predict(features));
        match self.aggregation {
            Aggregation::Mean => {
                let p = outputs.sum::<f64>() / self.trees.len() as f64;
                p.clamp(0.0, 1.0)
            }
            Aggregation::Logistic => {
                let margin = self.base_score + outputs.sum::<f64>();
                1.0 / (1.0 + (-margin).exp())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump(feature: usize, threshold: f64, low: f64, high: f64) -> DecisionTree {
        DecisionTree {
            nodes: vec![
                TreeNode::Split {
                    feature,
                    threshold,
                    left: 1,
                    right: 2,
                },
                TreeNode::Leaf { value: low },
                TreeNode::Leaf { value: high },
            ],
        }
    }

    fn model(aggregation: Aggregation) -> EnsembleModel {
        EnsembleModel {
            format_version: ENSEMBLE_FORMAT_VERSION,
            name: "test-forest".to_string(),
            feature_version: 1,
            feature_layout: vec!["duration_hours".to_string(), "signature_count".to_string()],
            aggregation,
            base_score: 0.0,
            trees: vec![stump(0, 6.0, 0.0, 1.0), stump(1, 1.5, 0.2, 0.8)],
        }
    }

    #[test]
    fn test_mean_aggregation() {
        let model = model(Aggregation::Mean);
        assert!((model.score(&[10.0, 2.0]) - 0.9).abs() < 1e-12);
        // Threshold is inclusive on the left branch
        assert!((model.score(&[6.0, 1.5]) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_logistic_aggregation() {
        let mut model = model(Aggregation::Logistic);
        model.trees = vec![stump(0, 6.0, -1.0, 1.0)];
        assert!((model.score(&[10.0, 0.0]) - 1.0 / (1.0 + (-1.0f64).exp())).abs() < 1e-12);
        assert!(model.score(&[0.0, 0.0]) < 0.5);
    }

    #[test]
    fn test_json_round_trip_and_shape() {
        let model = model(Aggregation::Mean);
        let bytes = model.to_json_bytes().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"threshold\""));
        assert!(text.contains("\"value\""));
        assert_eq!(EnsembleModel::from_json_bytes(&bytes).unwrap(), model);
    }

    #[test]
    fn test_backward_child_rejected() {
        let mut model = model(Aggregation::Mean);
        model.trees[0].nodes[0] = TreeNode::Split {
            feature: 0,
            threshold: 1.0,
            left: 0,
            right: 2,
        };
        assert!(matches!(model.validate(), Err(ClassifierError::ModelLoad(_))));
    }

    #[test]
    fn test_feature_out_of_range_rejected() {
        let mut model = model(Aggregation::Mean);
        model.trees[1] = stump(5, 1.0, 0.0, 1.0);
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_schema_hash_matches_layout_hash() {
        let model = model(Aggregation::Mean);
        let schema = model.schema();
        assert_eq!(schema.dimension, 2);
        assert_eq!(
            schema.layout_hash,
            Some(compute_layout_hash(1, &["duration_hours", "signature_count"]))
        );
    }
}
