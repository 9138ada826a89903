// Heuristic (rule-based) interval scorer
// Weighted signature coverage score used when no trained model is supplied

use serde::{Deserialize, Serialize};

use crate::events::backend::{ModelSchema, ScoringModel};
use crate::events::vector::{FeatureLayout, FEATURE_VERSION};

/// One weighted term of the heuristic score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicTerm {
    /// Feature name in the layout
    pub feature: String,

    /// Feature value that counts as full contribution
    pub scale: f64,

    pub weight: f64,
}

impl HeuristicTerm {
    pub fn new(feature: &str, scale: f64, weight: f64) -> Self {
        HeuristicTerm {
            feature: feature.to_string(),
            scale,
            weight,
        }
    }
}

/// Configuration for heuristic term weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicConfig {
    /// Weight of the triggered-signature fraction [0.0, 1.0]
    pub coverage_weight: f64,

    /// Additional terms, contributing `clamp(value / scale, 0, 1) * weight`
    pub terms: Vec<HeuristicTerm>,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        HeuristicConfig {
            coverage_weight: 0.4, // Coverage is the most discriminative
            terms: vec![
                HeuristicTerm::new("density_jump.max", 2.0, 0.2),
                HeuristicTerm::new("alpha_proton_ratio.mean", 0.15, 0.2),
                HeuristicTerm::new("duration_hours", 24.0, 0.2),
            ],
        }
    }
}

/// Term resolved against a concrete layout
#[derive(Debug, Clone)]
struct BoundTerm {
    index: usize,
    scale: f64,
    weight: f64,
}

/// Rule-based scorer bound to one feature layout
///
/// Terms naming features absent from the layout are dropped and the
/// remaining weights renormalized, so the score always spans [0, 1].
/// Unavailable features arrive as the 0.0 placeholder and contribute nothing.
#[derive(Debug, Clone)]
pub struct HeuristicModel {
    signature_index: Option<usize>,
    rule_count: usize,
    coverage_weight: f64,
    terms: Vec<BoundTerm>,
    dimension: usize,
    layout_hash: u32,
}

impl HeuristicModel {
    /// Create a scorer with default configuration
    pub fn new(layout: &FeatureLayout, rule_count: usize) -> Self {
        Self::with_config(layout, rule_count, &HeuristicConfig::default())
    }

    pub fn with_config(layout: &FeatureLayout, rule_count: usize, config: &HeuristicConfig) -> Self {
        let terms: Vec<BoundTerm> = config
            .terms
            .iter()
            .filter(|t| t.scale > 0.0 && t.weight > 0.0)
            .filter_map(|t| {
                let index = layout.index_of(&t.feature);
                if index.is_none() {
                    log::debug!("Heuristic term '{}' not in layout, skipped", t.feature);
                }
                Some(BoundTerm {
                    index: index?,
                    scale: t.scale,
                    weight: t.weight,
                })
            })
            .collect();

        HeuristicModel {
            signature_index: layout.index_of("signature_count"),
            rule_count,
            coverage_weight: config.coverage_weight.max(0.0),
            terms,
            dimension: layout.len(),
            layout_hash: layout.hash(),
        }
    }

    fn total_weight(&self) -> f64 {
        let coverage = if self.signature_index.is_some() && self.rule_count > 0 {
            self.coverage_weight
        } else {
            0.0
        };
        coverage + self.terms.iter().map(|t| t.weight).sum::<f64>()
    }
}

impl ScoringModel for HeuristicModel {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn schema(&self) -> ModelSchema {
        ModelSchema {
            feature_version: FEATURE_VERSION,
            layout_hash: Some(self.layout_hash),
            dimension: self.dimension,
        }
    }

    fn score(&self, features: &[f64]) -> f64 {
        let total = self.total_weight();
        if total <= 0.0 {
            return 0.0;
        }

        let mut score = 0.0;

        if let Some(index) = self.signature_index {
            if self.rule_count > 0 {
                let count = features.get(index).copied().unwrap_or(0.0);
                let coverage = (count / self.rule_count as f64).clamp(0.0, 1.0);
                score += coverage * self.coverage_weight;
            }
        }

        for term in &self.terms {
            let value = features.get(term.index).copied().unwrap_or(0.0);
            let contribution = (value / term.scale).clamp(0.0, 1.0);
            score += contribution * term.weight;
        }

        (score / total).clamp(0.0, 1.0)
    }
}
