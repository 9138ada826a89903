// Classifier backend abstraction
// Any scoring model sits behind one trait; the classifier checks its schema
// against the current feature layout before scoring anything

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::events::types::{CandidateInterval, ClassifiedEvent, EventLabel};
use crate::events::heuristic::HeuristicConfig;
use crate::events::vector::{aggregate, FeatureLayout};
use crate::samples::Sample;

/// Classification backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierBackend {
    /// Trained tree ensemble loaded from a model artifact
    Ensemble,

    /// Rule-weighted signature coverage score
    /// Needs no artifact
    Heuristic,
}

/// Feature schema a model was trained against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSchema {
    pub feature_version: u8,

    /// Layout hash, `None` when the model does not pin one
    pub layout_hash: Option<u32>,

    /// Expected feature vector length
    pub dimension: usize,
}

/// Opaque scoring capability: feature vector in, probability out
/// Implementations are read-only and shared across runs
pub trait ScoringModel: Send + Sync {
    fn name(&self) -> &str;

    fn schema(&self) -> ModelSchema;

    /// Probability in [0, 1]
    fn score(&self, features: &[f64]) -> f64;
}

/// Errors that can occur during classification
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Model input error: model expects {expected} features, layout has {actual}")]
    ModelInput { expected: usize, actual: usize },

    #[error("Schema mismatch: model trained on v{model_version} (hash {model_hash}), layout is v{layout_version} (hash {layout_hash:08x})")]
    SchemaMismatch {
        model_version: u8,
        model_hash: String,
        layout_version: u8,
        layout_hash: u32,
    },

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Model returned invalid score {score}")]
    InvalidScore { score: f64 },
}

/// Classification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Label Halo-CME when probability >= threshold
    pub decision_threshold: f64,

    pub backend: ClassifierBackend,

    /// Term weights for the heuristic backend
    pub heuristic: HeuristicConfig,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        ClassificationConfig {
            decision_threshold: 0.5,
            backend: ClassifierBackend::Ensemble,
            heuristic: HeuristicConfig::default(),
        }
    }
}

/// Interval classifier bound to one feature layout
#[derive(Clone)]
pub struct Classifier {
    model: Arc<dyn ScoringModel>,
    layout: FeatureLayout,
    decision_threshold: f64,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("model", &self.model.name())
            .field("features", &self.layout.len())
            .field("decision_threshold", &self.decision_threshold)
            .finish()
    }
}

impl Classifier {
    /// Bind a model to a layout
    /// Dimension is checked first, then version and hash
    pub fn new(
        model: Arc<dyn ScoringModel>,
        layout: FeatureLayout,
        decision_threshold: f64,
    ) -> Result<Self, ClassifierError> {
        let schema = model.schema();

        if schema.dimension != layout.len() {
            return Err(ClassifierError::ModelInput {
                expected: schema.dimension,
                actual: layout.len(),
            });
        }

        let hash_matches = schema.layout_hash.map_or(true, |h| h == layout.hash());
        if schema.feature_version != layout.version() || !hash_matches {
            return Err(ClassifierError::SchemaMismatch {
                model_version: schema.feature_version,
                model_hash: schema
                    .layout_hash
                    .map(|h| format!("{:08x}", h))
                    .unwrap_or_else(|| "unpinned".to_string()),
                layout_version: layout.version(),
                layout_hash: layout.hash(),
            });
        }

        log::info!(
            "Classifier '{}' bound to {} features (layout {:08x}, threshold {})",
            model.name(),
            layout.len(),
            layout.hash(),
            decision_threshold
        );

        Ok(Classifier {
            model,
            layout,
            decision_threshold,
        })
    }

    pub fn layout(&self) -> &FeatureLayout {
        &self.layout
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn decision_threshold(&self) -> f64 {
        self.decision_threshold
    }

    pub fn label_for(&self, probability: f64) -> EventLabel {
        if probability >= self.decision_threshold {
            EventLabel::HaloCme
        } else {
            EventLabel::NonEvent
        }
    }

    /// Score one interval against the samples it covers
    pub fn classify(
        &self,
        interval: &CandidateInterval,
        samples: &[Sample],
    ) -> Result<ClassifiedEvent, ClassifierError> {
        let features = aggregate(&self.layout, interval, samples);
        if features.len() != self.layout.len() {
            return Err(ClassifierError::ModelInput {
                expected: self.layout.len(),
                actual: features.len(),
            });
        }

        let probability = self.model.score(&features.values);
        if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
            return Err(ClassifierError::InvalidScore { score: probability });
        }

        let label = self.label_for(probability);
        Ok(ClassifiedEvent::new(
            interval.clone(),
            features,
            probability,
            label,
        ))
    }

    pub fn classify_all(
        &self,
        intervals: &[CandidateInterval],
        samples: &[Sample],
    ) -> Result<Vec<ClassifiedEvent>, ClassifierError> {
        let events = intervals
            .iter()
            .map(|interval| self.classify(interval, samples))
            .collect::<Result<Vec<_>, _>>()?;

        let halo = events.iter().filter(|e| e.is_halo_cme()).count();
        log::info!(
            "Classified {} intervals: {} Halo-CME, {} non-event",
            events.len(),
            halo,
            events.len() - halo
        );
        Ok(events)
    }
}
