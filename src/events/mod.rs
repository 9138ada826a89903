// Event detection module
// Threshold signatures, interval extraction, and interval classification

pub mod backend;
pub mod ensemble;
pub mod heuristic;
pub mod intervals;
pub mod threshold;
pub mod types;
pub mod vector;

pub use backend::{
    ClassificationConfig, Classifier, ClassifierBackend, ClassifierError, ModelSchema,
    ScoringModel,
};
pub use ensemble::{Aggregation, DecisionTree, EnsembleModel, TreeNode};
pub use heuristic::{HeuristicConfig, HeuristicModel, HeuristicTerm};
pub use intervals::{extract_intervals, ExtractorConfig};
pub use threshold::{default_rules, Comparator, Direction, RuleSet, ThresholdRule};
pub use types::{CandidateInterval, ClassifiedEvent, EventLabel, SignatureVector};
pub use vector::{
    aggregate, compute_layout_hash, FeatureLayout, FeatureVector, LayoutInfo, FEATURE_VERSION,
    UNAVAILABLE_PLACEHOLDER,
};
