// Event detection types
// Signature vectors, candidate intervals and classified events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use uuid::Uuid;

use crate::events::vector::FeatureVector;

/// Per-sample signature state
/// Derived from one sample and the configured rule set, never stored on its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureVector {
    /// Position of the source sample in the aligned stream
    pub index: usize,

    pub timestamp: DateTime<Utc>,

    /// Signature name -> whether the rule is satisfied
    pub signatures: BTreeMap<String, bool>,

    /// Signatures whose parameter was missing ("insufficient data")
    /// These are always false in `signatures`
    pub insufficient_data: BTreeSet<String>,

    /// Number of true signatures
    pub active_count: usize,
}

impl SignatureVector {
    pub fn is_active(&self, signature: &str) -> bool {
        self.signatures.get(signature).copied().unwrap_or(false)
    }

    /// Names of signatures that are true for this sample
    pub fn triggered(&self) -> impl Iterator<Item = &str> {
        self.signatures
            .iter()
            .filter(|(_, active)| **active)
            .map(|(name, _)| name.as_str())
    }
}

/// A confirmed span of persistent multi-signature activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateInterval {
    pub start_time: DateTime<Utc>,

    pub end_time: DateTime<Utc>,

    /// `end_time - start_time` in seconds
    pub duration_secs: i64,

    /// Union of signatures that were true on the qualifying samples of the merged runs
    pub triggered_signatures: BTreeSet<String>,

    /// First sample index (inclusive)
    pub first_index: usize,

    /// Last sample index (inclusive)
    pub last_index: usize,

    /// Closed at the end of input while still active
    pub truncated: bool,

    /// Signatures lacking data on every sample of the interval
    #[serde(default)]
    pub insufficient_data: BTreeSet<String>,
}

impl CandidateInterval {
    pub fn sample_indices(&self) -> RangeInclusive<usize> {
        self.first_index..=self.last_index
    }

    pub fn sample_count(&self) -> usize {
        self.last_index - self.first_index + 1
    }

    pub fn duration_hours(&self) -> f64 {
        self.duration_secs as f64 / 3600.0
    }
}

/// Classification label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventLabel {
    #[serde(rename = "Halo-CME")]
    HaloCme,

    #[serde(rename = "non-event")]
    NonEvent,
}

impl EventLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLabel::HaloCme => "Halo-CME",
            EventLabel::NonEvent => "non-event",
        }
    }
}

/// A candidate interval scored by the classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    /// Unique identifier, referenced by validation results
    pub id: Uuid,

    pub interval: CandidateInterval,

    pub features: FeatureVector,

    /// Model probability [0.0, 1.0]
    pub probability: f64,

    pub label: EventLabel,
}

impl ClassifiedEvent {
    /// Create a new event with generated UUID
    pub fn new(
        interval: CandidateInterval,
        features: FeatureVector,
        probability: f64,
        label: EventLabel,
    ) -> Self {
        ClassifiedEvent {
            id: Uuid::new_v4(),
            interval,
            features,
            probability,
            label,
        }
    }

    pub fn is_halo_cme(&self) -> bool {
        self.label == EventLabel::HaloCme
    }
}
