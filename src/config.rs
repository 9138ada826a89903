// Detector configuration
// One JSON document per run, validated once before any processing starts

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::events::backend::ClassificationConfig;
use crate::events::intervals::ExtractorConfig;
use crate::events::threshold::{default_rules, RuleSet, ThresholdRule};
use crate::pipeline::partition::PartitionConfig;
use crate::samples::{AlignConfig, FeatureConfig, IngestConfig, QualityConfig};
use crate::validation::ValidationConfig;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Rule '{rule}' references unknown parameter '{parameter}'")]
    UnknownParameter { rule: String, parameter: String },

    #[error("Rule '{rule}': comparator {comparator} contradicts direction {direction}")]
    DirectionMismatch {
        rule: String,
        comparator: String,
        direction: String,
    },

    #[error("Duplicate signature name: {0}")]
    DuplicateSignature(String),

    #[error("No threshold rules configured")]
    EmptyRuleSet,

    #[error("Invalid {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Partition overlap of {overlap} steps is below the required {required}")]
    PartitionOverlap { overlap: usize, required: usize },

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Complete run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub ingest: IngestConfig,

    pub quality: QualityConfig,

    pub alignment: AlignConfig,

    pub features: FeatureConfig,

    /// Threshold rules, evaluated in order
    pub thresholds: Vec<ThresholdRule>,

    pub extraction: ExtractorConfig,

    pub classification: ClassificationConfig,

    pub validation: ValidationConfig,

    /// Parallel partitioned execution; sequential when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<PartitionConfig>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            ingest: IngestConfig::default(),
            quality: QualityConfig::default(),
            alignment: AlignConfig::default(),
            features: FeatureConfig::default(),
            thresholds: default_rules(),
            extraction: ExtractorConfig::default(),
            classification: ClassificationConfig::default(),
            validation: ValidationConfig::default(),
            partitioning: None,
        }
    }
}

impl DetectorConfig {
    /// Compile the threshold rules
    pub fn rule_set(&self) -> Result<RuleSet, ConfigError> {
        RuleSet::compile(&self.thresholds)
    }

    /// Check every section, returning the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rules = self.rule_set()?;

        if self.ingest.missing_sentinel.trim().is_empty() {
            return Err(invalid("ingest.missing_sentinel", "must not be empty"));
        }

        if self.alignment.cadence_secs <= 0 {
            return Err(invalid("alignment.cadence_secs", "must be positive"));
        }
        if self.alignment.max_gap_secs < 0 {
            return Err(invalid("alignment.max_gap_secs", "must not be negative"));
        }

        let extraction = &self.extraction;
        if extraction.min_signatures == 0 {
            return Err(invalid("extraction.min_signatures", "must be at least 1"));
        }
        if extraction.min_signatures > rules.len() {
            return Err(ConfigError::Invalid {
                field: "extraction.min_signatures".to_string(),
                reason: format!(
                    "{} exceeds the {} configured rules",
                    extraction.min_signatures,
                    rules.len()
                ),
            });
        }
        if extraction.enter_min_duration == 0 {
            return Err(invalid("extraction.enter_min_duration", "must be at least 1"));
        }
        if extraction.exit_min_duration == 0 {
            return Err(invalid("extraction.exit_min_duration", "must be at least 1"));
        }

        let threshold = self.classification.decision_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(invalid(
                "classification.decision_threshold",
                "must lie within [0, 1]",
            ));
        }

        let heuristic = &self.classification.heuristic;
        if !heuristic.coverage_weight.is_finite() || heuristic.coverage_weight < 0.0 {
            return Err(invalid(
                "classification.heuristic.coverage_weight",
                "must be a non-negative number",
            ));
        }
        for term in &heuristic.terms {
            if !(term.scale.is_finite() && term.scale > 0.0) {
                return Err(ConfigError::Invalid {
                    field: "classification.heuristic.terms".to_string(),
                    reason: format!("term '{}' needs a positive scale", term.feature),
                });
            }
            if !term.weight.is_finite() || term.weight < 0.0 {
                return Err(ConfigError::Invalid {
                    field: "classification.heuristic.terms".to_string(),
                    reason: format!("term '{}' needs a non-negative weight", term.feature),
                });
            }
        }

        if self.validation.tolerance_secs < 0 {
            return Err(invalid("validation.tolerance_secs", "must not be negative"));
        }

        if let Some(partitioning) = &self.partitioning {
            partitioning.validate(extraction)?;
        }

        Ok(())
    }

    /// Parse and validate a JSON document
    pub fn from_json_bytes(data: &[u8]) -> Result<Self, ConfigError> {
        let config: DetectorConfig = serde_json::from_slice(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = std::fs::read(path.as_ref())?;
        let config = Self::from_json_bytes(&data)?;
        log::info!(
            "Loaded configuration from {} ({} rules)",
            path.as_ref().display(),
            config.thresholds.len()
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(DetectorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let json = br#"{"extraction": {"min_signatures": 3}}"#;
        let config = DetectorConfig::from_json_bytes(json).unwrap();
        assert_eq!(config.extraction.min_signatures, 3);
        assert_eq!(config.extraction.enter_min_duration, 6);
        assert_eq!(config.thresholds.len(), 6);
        assert!(config.partitioning.is_none());
    }

    #[test]
    fn test_unknown_parameter_fails_at_load() {
        let json = br#"{"thresholds": [
            {"parameter_name": "B_z", "comparator": "<", "value": -10.0, "direction": "below"}
        ]}"#;
        let err = DetectorConfig::from_json_bytes(json).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownParameter { .. }));
    }

    #[test]
    fn test_min_signatures_bounded_by_rules() {
        let mut config = DetectorConfig::default();
        config.extraction.min_signatures = 7;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_short_partition_overlap_rejected() {
        let mut config = DetectorConfig::default();
        config.partitioning = Some(PartitionConfig {
            partition_len: 1000,
            overlap: 5,
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PartitionOverlap { required: 15, .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"classification": {"decision_threshold": 0.7}}"#)
            .unwrap();

        let config = DetectorConfig::load(file.path()).unwrap();
        assert!((config.classification.decision_threshold - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_bad_threshold_rejected() {
        let json = br#"{"classification": {"decision_threshold": 1.5}}"#;
        assert!(DetectorConfig::from_json_bytes(json).is_err());
    }

    #[test]
    fn test_heuristic_weights_parsed_and_checked() {
        let json = br#"{"classification": {"backend": "heuristic",
            "heuristic": {"coverage_weight": 0.7, "terms": [
                {"feature": "duration_hours", "scale": 12.0, "weight": 0.3}]}}}"#;
        let config = DetectorConfig::from_json_bytes(json).unwrap();
        assert_eq!(config.classification.heuristic.terms.len(), 1);
        assert!((config.classification.heuristic.coverage_weight - 0.7).abs() < 1e-12);

        let bad = br#"{"classification": {"heuristic": {"terms": [
            {"feature": "duration_hours", "scale": 0.0, "weight": 0.3}]}}}"#;
        assert!(matches!(
            DetectorConfig::from_json_bytes(bad),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
