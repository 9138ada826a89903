// Interval feature vectors
// Fixed layout derived from the rule set, versioned and hashed so a scoring
// model can be checked against it before use

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::events::threshold::RuleSet;
use crate::events::types::CandidateInterval;
use crate::samples::{Parameter, Sample};

/// Current feature layout version
/// Increment when the statistics per parameter or their order change
pub const FEATURE_VERSION: u8 = 1;

/// Value written for statistics that cannot be computed
pub const UNAVAILABLE_PLACEHOLDER: f64 = 0.0;

/// Statistics computed per rule parameter, in layout order
const PARAMETER_STATS: [&str; 3] = ["mean", "max", "slope"];

/// Interval-level features appended after the per-parameter block
const INTERVAL_FEATURES: [&str; 2] = ["duration_hours", "signature_count"];

/// CRC32 over the version byte and the zero-separated feature names
pub fn compute_layout_hash<S: AsRef<str>>(version: u8, names: &[S]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[version]);
    for name in names {
        hasher.update(name.as_ref().as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize()
}

/// Feature layout for one rule set
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureLayout {
    parameters: Vec<Parameter>,
    names: Vec<String>,
    hash: u32,
}

impl FeatureLayout {
    /// Layout: `<param>.mean`, `<param>.max`, `<param>.slope` for each
    /// distinct rule parameter, then `duration_hours`, `signature_count`
    pub fn for_rules(rules: &RuleSet) -> Self {
        Self::for_parameters(rules.parameters())
    }

    pub fn for_parameters(parameters: Vec<Parameter>) -> Self {
        let mut names = Vec::with_capacity(parameters.len() * PARAMETER_STATS.len() + 2);
        for parameter in &parameters {
            for stat in PARAMETER_STATS {
                names.push(format!("{}.{}", parameter.name(), stat));
            }
        }
        names.extend(INTERVAL_FEATURES.iter().map(|s| s.to_string()));

        let hash = compute_layout_hash(FEATURE_VERSION, &names);
        FeatureLayout {
            parameters,
            names,
            hash,
        }
    }

    pub fn version(&self) -> u8 {
        FEATURE_VERSION
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn info(&self) -> LayoutInfo {
        LayoutInfo {
            version: FEATURE_VERSION,
            hash: self.hash,
            feature_count: self.names.len(),
            feature_names: self.names.clone(),
        }
    }
}

/// Layout description for reports and model artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub version: u8,
    pub hash: u32,
    pub feature_count: usize,
    pub feature_names: Vec<String>,
}

/// Aggregated features for one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Hash of the layout that produced `values`
    pub layout_hash: u32,

    pub values: Vec<f64>,

    /// Features set to the placeholder because no data supported them
    #[serde(default)]
    pub unavailable: BTreeSet<String>,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, layout: &FeatureLayout, name: &str) -> Option<f64> {
        layout.index_of(name).and_then(|i| self.values.get(i).copied())
    }

    pub fn is_available(&self, name: &str) -> bool {
        !self.unavailable.contains(name)
    }
}

/// Least-squares slope of value against hours since interval start
fn slope_per_hour(points: &[(f64, f64)]) -> Option<f64> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean_t = points.iter().map(|(t, _)| t).sum::<f64>() / n;
    let mean_v = points.iter().map(|(_, v)| v).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var = 0.0;
    for (t, v) in points {
        cov += (t - mean_t) * (v - mean_v);
        var += (t - mean_t) * (t - mean_t);
    }
    if var <= 0.0 {
        return None;
    }
    let slope = cov / var;
    slope.is_finite().then_some(slope)
}

/// Aggregate the samples under an interval into a feature vector
/// `samples` is the full aligned stream the interval indices point into
pub fn aggregate(
    layout: &FeatureLayout,
    interval: &CandidateInterval,
    samples: &[Sample],
) -> FeatureVector {
    let start = interval.first_index.min(samples.len());
    let end = (interval.last_index + 1).min(samples.len());
    let span = &samples[start..end];

    let mut values = Vec::with_capacity(layout.len());
    let mut unavailable = BTreeSet::new();

    let mut push = |name: &str, value: Option<f64>, values: &mut Vec<f64>| match value {
        Some(v) => values.push(v),
        None => {
            unavailable.insert(name.to_string());
            values.push(UNAVAILABLE_PLACEHOLDER);
        }
    };

    for parameter in layout.parameters() {
        let points: Vec<(f64, f64)> = span
            .iter()
            .filter_map(|s| {
                let value = s.get(*parameter)?;
                let hours = (s.timestamp - interval.start_time).num_milliseconds() as f64 / 3.6e6;
                Some((hours, value))
            })
            .collect();

        let mean = if points.is_empty() {
            None
        } else {
            Some(points.iter().map(|(_, v)| v).sum::<f64>() / points.len() as f64)
        };
        let max = points.iter().map(|(_, v)| *v).reduce(f64::max);
        let slope = slope_per_hour(&points);

        let name = parameter.name();
        push(&format!("{}.mean", name), mean, &mut values);
        push(&format!("{}.max", name), max, &mut values);
        push(&format!("{}.slope", name), slope, &mut values);
    }

    push("duration_hours", Some(interval.duration_hours()), &mut values);
    push(
        "signature_count",
        Some(interval.triggered_signatures.len() as f64),
        &mut values,
    );

    FeatureVector {
        layout_hash: layout.hash(),
        values,
        unavailable,
    }
}
