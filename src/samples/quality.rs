// Physics-based sample cleaning
// Instrument fill values and physically impossible readings become missing

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::samples::types::{Parameter, Sample};

/// Inclusive range of physically plausible values for one parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalRange {
    pub parameter: Parameter,
    pub min: f64,
    pub max: f64,
}

impl PhysicalRange {
    pub fn new(parameter: Parameter, min: f64, max: f64) -> Self {
        PhysicalRange { parameter, min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Configuration for the cleaning pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Skip cleaning entirely when false
    pub enabled: bool,

    /// Instrument fill values, compared with a relative tolerance
    pub fill_values: Vec<f64>,

    /// Per-parameter plausibility ranges
    pub ranges: Vec<PhysicalRange>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        QualityConfig {
            enabled: true,
            fill_values: vec![-1.0e31, 1.0e31, -9999.0, -999.99, 999.99, 9999.0],
            ranges: vec![
                PhysicalRange::new(Parameter::ProtonDensity, 0.0, 100.0),
                PhysicalRange::new(Parameter::SolarWindSpeed, 100.0, 1000.0),
                PhysicalRange::new(Parameter::ProtonTemperature, 0.0, 1.0e7),
                PhysicalRange::new(Parameter::PlasmaBeta, 0.0, 1.0e3),
                PhysicalRange::new(Parameter::AlphaProtonRatio, 0.0, 1.0),
                PhysicalRange::new(Parameter::ChargeStateRatio, 0.0, 100.0),
                PhysicalRange::new(Parameter::ProtonFlux, 0.0, f64::MAX),
                PhysicalRange::new(Parameter::AlphaFlux, 0.0, f64::MAX),
                PhysicalRange::new(Parameter::MagneticField, 0.0, 1.0e3),
            ],
        }
    }
}

/// Counts of values removed by the cleaning pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub fill_values_removed: usize,
    pub out_of_range_removed: BTreeMap<Parameter, usize>,
}

impl QualityReport {
    pub fn total_removed(&self) -> usize {
        self.fill_values_removed + self.out_of_range_removed.values().sum::<usize>()
    }
}

fn is_fill_value(value: f64, fill_values: &[f64]) -> bool {
    fill_values
        .iter()
        .any(|fill| (value - fill).abs() <= fill.abs() * 1e-9)
}

/// Clean raw rows in place
/// Values are only ever removed (marked missing), never clipped or replaced
pub fn apply_quality(samples: &mut [Sample], config: &QualityConfig) -> QualityReport {
    let mut report = QualityReport::default();
    if !config.enabled {
        return report;
    }

    for sample in samples.iter_mut() {
        for parameter in Parameter::INPUTS {
            let Some(value) = sample.get(parameter) else {
                continue;
            };

            if is_fill_value(value, &config.fill_values) {
                sample.set(parameter, None);
                report.fill_values_removed += 1;
                continue;
            }

            let out_of_range = config
                .ranges
                .iter()
                .filter(|r| r.parameter == parameter)
                .any(|r| !r.contains(value));
            if out_of_range {
                sample.set(parameter, None);
                *report.out_of_range_removed.entry(parameter).or_insert(0) += 1;
            }
        }
    }

    if report.total_removed() > 0 {
        log::info!(
            "Quality filter removed {} fill values and {} out-of-range values",
            report.fill_values_removed,
            report.out_of_range_removed.values().sum::<usize>()
        );
    }

    report
}
