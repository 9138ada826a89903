// Threshold evaluation
// Applies configured per-parameter rules to samples, producing signature vectors

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use crate::config::ConfigError;
use crate::events::types::SignatureVector;
use crate::samples::{Parameter, Sample};

/// Comparison applied between a parameter value and the rule threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
}

impl Comparator {
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Lt => value < threshold,
            Comparator::Gt => value > threshold,
            Comparator::Le => value <= threshold,
            Comparator::Ge => value >= threshold,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Gt => ">",
            Comparator::Le => "<=",
            Comparator::Ge => ">=",
        }
    }

    /// Direction of excursion this comparator marks
    fn direction(&self) -> Direction {
        match self {
            Comparator::Lt | Comparator::Le => Direction::Below,
            Comparator::Gt | Comparator::Ge => Direction::Above,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Which side of the threshold marks the signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Below,
    Above,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Below => f.write_str("below"),
            Direction::Above => f.write_str("above"),
        }
    }
}

/// A single threshold rule as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    /// Signature name; defaults to the parameter name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub parameter_name: String,

    pub comparator: Comparator,

    #[serde(alias = "value")]
    pub threshold_value: f64,

    pub direction: Direction,
}

impl ThresholdRule {
    pub fn new(
        name: &str,
        parameter: Parameter,
        comparator: Comparator,
        threshold_value: f64,
        direction: Direction,
    ) -> Self {
        ThresholdRule {
            name: Some(name.to_string()),
            parameter_name: parameter.name().to_string(),
            comparator,
            threshold_value,
            direction,
        }
    }

    pub fn signature_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.parameter_name)
    }
}

/// Default ICME signature rules
pub fn default_rules() -> Vec<ThresholdRule> {
    vec![
        ThresholdRule::new("low_beta", Parameter::PlasmaBeta, Comparator::Lt, 0.5, Direction::Below),
        ThresholdRule::new("fast_wind", Parameter::SolarWindSpeed, Comparator::Gt, 450.0, Direction::Above),
        ThresholdRule::new(
            "alpha_enhancement",
            Parameter::AlphaProtonRatio,
            Comparator::Gt,
            0.08,
            Direction::Above,
        ),
        ThresholdRule::new(
            "cool_plasma",
            Parameter::TemperatureIndex,
            Comparator::Lt,
            0.5,
            Direction::Below,
        ),
        ThresholdRule::new(
            "high_charge_state",
            Parameter::ChargeStateRatio,
            Comparator::Gt,
            1.0,
            Direction::Above,
        ),
        ThresholdRule::new(
            "density_jump",
            Parameter::DensityJump,
            Comparator::Gt,
            1.3,
            Direction::Above,
        ),
    ]
}

#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    parameter: Parameter,
    comparator: Comparator,
    threshold: f64,
}

/// Validated, immutable rule set
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Validate rules against the known parameters
    /// Unknown parameters and contradictory direction settings are rejected
    pub fn compile(rules: &[ThresholdRule]) -> Result<Self, ConfigError> {
        if rules.is_empty() {
            return Err(ConfigError::EmptyRuleSet);
        }

        let mut seen = HashSet::new();
        let mut compiled = Vec::with_capacity(rules.len());

        for rule in rules {
            let name = rule.signature_name().to_string();

            let parameter = Parameter::from_name(&rule.parameter_name).ok_or_else(|| {
                ConfigError::UnknownParameter {
                    rule: name.clone(),
                    parameter: rule.parameter_name.clone(),
                }
            })?;

            if rule.comparator.direction() != rule.direction {
                return Err(ConfigError::DirectionMismatch {
                    rule: name,
                    comparator: rule.comparator.to_string(),
                    direction: rule.direction.to_string(),
                });
            }

            if !rule.threshold_value.is_finite() {
                return Err(ConfigError::Invalid {
                    field: format!("thresholds.{}.threshold_value", name),
                    reason: "must be a finite number".to_string(),
                });
            }

            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateSignature(name));
            }

            compiled.push(CompiledRule {
                name,
                parameter,
                comparator: rule.comparator,
                threshold: rule.threshold_value,
            });
        }

        Ok(RuleSet { rules: compiled })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Signature names in rule order
    pub fn signature_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }

    /// Distinct rule parameters in first-use order
    pub fn parameters(&self) -> Vec<Parameter> {
        let mut out: Vec<Parameter> = Vec::new();
        for rule in &self.rules {
            if !out.contains(&rule.parameter) {
                out.push(rule.parameter);
            }
        }
        out
    }

    pub fn parameter_of(&self, signature: &str) -> Option<Parameter> {
        self.rules
            .iter()
            .find(|r| r.name == signature)
            .map(|r| r.parameter)
    }

    /// Evaluate every rule against one sample
    pub fn evaluate(&self, index: usize, sample: &Sample) -> SignatureVector {
        let mut signatures = BTreeMap::new();
        let mut insufficient_data = BTreeSet::new();

        for rule in &self.rules {
            let active = match sample.get(rule.parameter) {
                Some(value) => rule.comparator.apply(value, rule.threshold),
                None => {
                    insufficient_data.insert(rule.name.clone());
                    false
                }
            };
            signatures.insert(rule.name.clone(), active);
        }

        let active_count = signatures.values().filter(|a| **a).count();

        SignatureVector {
            index,
            timestamp: sample.timestamp,
            signatures,
            insufficient_data,
            active_count,
        }
    }

    /// Evaluate a slice whose first sample sits at `offset` in the full stream
    pub fn evaluate_range(&self, samples: &[Sample], offset: usize) -> Vec<SignatureVector> {
        samples
            .iter()
            .enumerate()
            .map(|(i, s)| self.evaluate(offset + i, s))
            .collect()
    }

    pub fn evaluate_all(&self, samples: &[Sample]) -> Vec<SignatureVector> {
        self.evaluate_range(samples, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn rules() -> RuleSet {
        RuleSet::compile(&[
            ThresholdRule::new("low_beta", Parameter::PlasmaBeta, Comparator::Lt, 0.5, Direction::Below),
            ThresholdRule::new("fast_wind", Parameter::SolarWindSpeed, Comparator::Gt, 450.0, Direction::Above),
        ])
        .unwrap()
    }

    #[test]
    fn test_comparators() {
        assert!(Comparator::Lt.apply(0.4, 0.5));
        assert!(!Comparator::Lt.apply(0.5, 0.5));
        assert!(Comparator::Le.apply(0.5, 0.5));
        assert!(Comparator::Ge.apply(0.5, 0.5));
        assert!(!Comparator::Gt.apply(0.5, 0.5));
    }

    #[test]
    fn test_evaluate_counts_active_signatures() {
        let mut sample = Sample::empty(Utc.timestamp_opt(0, 0).unwrap());
        sample.beta = Some(0.3);
        sample.v_sw = Some(500.0);

        let sv = rules().evaluate(7, &sample);
        assert_eq!(sv.index, 7);
        assert_eq!(sv.active_count, 2);
        assert!(sv.insufficient_data.is_empty());
    }

    #[test]
    fn test_missing_parameter_is_false_and_flagged() {
        let mut sample = Sample::empty(Utc.timestamp_opt(0, 0).unwrap());
        sample.beta = Some(0.3);

        let sv = rules().evaluate(0, &sample);
        assert_eq!(sv.active_count, 1);
        assert!(!sv.is_active("fast_wind"));
        assert!(sv.insufficient_data.contains("fast_wind"));
        assert!(!sv.insufficient_data.contains("low_beta"));
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let rule = ThresholdRule {
            name: None,
            parameter_name: "proton_spin".to_string(),
            comparator: Comparator::Gt,
            threshold_value: 1.0,
            direction: Direction::Above,
        };
        let err = RuleSet::compile(&[rule]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownParameter { .. }));
    }

    #[test]
    fn test_direction_mismatch_rejected() {
        let rule = ThresholdRule::new("bad", Parameter::PlasmaBeta, Comparator::Gt, 0.5, Direction::Below);
        let err = RuleSet::compile(&[rule]).unwrap_err();
        assert!(matches!(err, ConfigError::DirectionMismatch { .. }));
    }

    #[test]
    fn test_duplicate_signature_rejected() {
        let rule = ThresholdRule::new("dup", Parameter::PlasmaBeta, Comparator::Lt, 0.5, Direction::Below);
        let err = RuleSet::compile(&[rule.clone(), rule]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSignature(_)));
    }

    #[test]
    fn test_rule_json_shape() {
        let json = r#"{"parameter_name":"V_sw","comparator":">=","value":450.0,"direction":"above"}"#;
        let rule: ThresholdRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.signature_name(), "V_sw");
        assert_eq!(rule.comparator, Comparator::Ge);
        assert!(RuleSet::compile(&[rule]).is_ok());
    }

    #[test]
    fn test_default_rules_compile() {
        let set = RuleSet::compile(&default_rules()).unwrap();
        assert_eq!(set.len(), 6);
        assert_eq!(set.parameter_of("low_beta"), Some(Parameter::PlasmaBeta));
    }
}
