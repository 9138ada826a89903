// Solar-wind sample types
// Parameter identifiers, missing-aware measurements, and per-timestamp samples

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single measured or derived value
/// `None` marks a missing measurement; it is never replaced by zero
pub type Measurement = Option<f64>;

/// Wrap a computed value, rejecting NaN and infinities as missing
pub fn finite(value: f64) -> Measurement {
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// Physical parameters carried by a sample
/// Input parameters come from the tabular source; derived ones are filled
/// by the feature extractor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    /// Proton temperature (K)
    ProtonTemperature,
    /// Plasma beta (dimensionless)
    PlasmaBeta,
    /// Proton number density (cm^-3)
    ProtonDensity,
    /// Bulk solar wind speed (km/s)
    SolarWindSpeed,
    /// Integrated proton flux
    ProtonFlux,
    /// Integrated alpha flux
    AlphaFlux,
    /// Alpha to proton abundance ratio
    AlphaProtonRatio,
    /// Ion charge-state ratio (e.g. O7+/O6+)
    ChargeStateRatio,
    /// Magnetic field magnitude (nT), optional input column
    MagneticField,
    /// Observed over expected proton temperature
    TemperatureIndex,
    /// Dynamic pressure (nPa)
    DynamicPressure,
    /// Speed difference to the previous grid point (km/s)
    SpeedChange,
    /// Density over its trailing mean
    DensityJump,
}

impl Parameter {
    /// Columns every sample table must provide
    pub const REQUIRED_INPUTS: [Parameter; 8] = [
        Parameter::ProtonTemperature,
        Parameter::PlasmaBeta,
        Parameter::ProtonDensity,
        Parameter::SolarWindSpeed,
        Parameter::ProtonFlux,
        Parameter::AlphaFlux,
        Parameter::AlphaProtonRatio,
        Parameter::ChargeStateRatio,
    ];

    /// Columns read from the tabular source (required plus optional)
    pub const INPUTS: [Parameter; 9] = [
        Parameter::ProtonTemperature,
        Parameter::PlasmaBeta,
        Parameter::ProtonDensity,
        Parameter::SolarWindSpeed,
        Parameter::ProtonFlux,
        Parameter::AlphaFlux,
        Parameter::AlphaProtonRatio,
        Parameter::ChargeStateRatio,
        Parameter::MagneticField,
    ];

    pub const ALL: [Parameter; 13] = [
        Parameter::ProtonTemperature,
        Parameter::PlasmaBeta,
        Parameter::ProtonDensity,
        Parameter::SolarWindSpeed,
        Parameter::ProtonFlux,
        Parameter::AlphaFlux,
        Parameter::AlphaProtonRatio,
        Parameter::ChargeStateRatio,
        Parameter::MagneticField,
        Parameter::TemperatureIndex,
        Parameter::DynamicPressure,
        Parameter::SpeedChange,
        Parameter::DensityJump,
    ];

    /// Column / rule name for this parameter
    pub fn name(&self) -> &'static str {
        match self {
            Parameter::ProtonTemperature => "Tp",
            Parameter::PlasmaBeta => "beta",
            Parameter::ProtonDensity => "n_p",
            Parameter::SolarWindSpeed => "V_sw",
            Parameter::ProtonFlux => "flux_p",
            Parameter::AlphaFlux => "flux_alpha",
            Parameter::AlphaProtonRatio => "alpha_proton_ratio",
            Parameter::ChargeStateRatio => "charge_state_ratio",
            Parameter::MagneticField => "B",
            Parameter::TemperatureIndex => "temperature_index",
            Parameter::DynamicPressure => "dynamic_pressure",
            Parameter::SpeedChange => "speed_change",
            Parameter::DensityJump => "density_jump",
        }
    }

    /// Resolve a column / rule name
    /// Returns None for unknown names so callers can reject them
    pub fn from_name(name: &str) -> Option<Self> {
        Parameter::ALL.iter().copied().find(|p| p.name() == name)
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One solar-wind sample at a single timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,

    #[serde(rename = "Tp")]
    pub tp: Measurement,

    pub beta: Measurement,

    pub n_p: Measurement,

    #[serde(rename = "V_sw")]
    pub v_sw: Measurement,

    pub flux_p: Measurement,

    pub flux_alpha: Measurement,

    pub alpha_proton_ratio: Measurement,

    pub charge_state_ratio: Measurement,

    /// Magnetic field magnitude, only present when the source provides it
    #[serde(default, rename = "B")]
    pub b_field: Measurement,

    #[serde(default)]
    pub temperature_index: Measurement,

    #[serde(default)]
    pub dynamic_pressure: Measurement,

    #[serde(default)]
    pub speed_change: Measurement,

    #[serde(default)]
    pub density_jump: Measurement,
}

impl Sample {
    /// Create a sample with every parameter missing
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Sample {
            timestamp,
            tp: None,
            beta: None,
            n_p: None,
            v_sw: None,
            flux_p: None,
            flux_alpha: None,
            alpha_proton_ratio: None,
            charge_state_ratio: None,
            b_field: None,
            temperature_index: None,
            dynamic_pressure: None,
            speed_change: None,
            density_jump: None,
        }
    }

    pub fn get(&self, parameter: Parameter) -> Measurement {
        match parameter {
            Parameter::ProtonTemperature => self.tp,
            Parameter::PlasmaBeta => self.beta,
            Parameter::ProtonDensity => self.n_p,
            Parameter::SolarWindSpeed => self.v_sw,
            Parameter::ProtonFlux => self.flux_p,
            Parameter::AlphaFlux => self.flux_alpha,
            Parameter::AlphaProtonRatio => self.alpha_proton_ratio,
            Parameter::ChargeStateRatio => self.charge_state_ratio,
            Parameter::MagneticField => self.b_field,
            Parameter::TemperatureIndex => self.temperature_index,
            Parameter::DynamicPressure => self.dynamic_pressure,
            Parameter::SpeedChange => self.speed_change,
            Parameter::DensityJump => self.density_jump,
        }
    }

    /// Store a value; non-finite values are stored as missing
    pub fn set(&mut self, parameter: Parameter, value: Measurement) {
        let value = value.and_then(finite);
        let slot = match parameter {
            Parameter::ProtonTemperature => &mut self.tp,
            Parameter::PlasmaBeta => &mut self.beta,
            Parameter::ProtonDensity => &mut self.n_p,
            Parameter::SolarWindSpeed => &mut self.v_sw,
            Parameter::ProtonFlux => &mut self.flux_p,
            Parameter::AlphaFlux => &mut self.flux_alpha,
            Parameter::AlphaProtonRatio => &mut self.alpha_proton_ratio,
            Parameter::ChargeStateRatio => &mut self.charge_state_ratio,
            Parameter::MagneticField => &mut self.b_field,
            Parameter::TemperatureIndex => &mut self.temperature_index,
            Parameter::DynamicPressure => &mut self.dynamic_pressure,
            Parameter::SpeedChange => &mut self.speed_change,
            Parameter::DensityJump => &mut self.density_jump,
        };
        *slot = value;
    }

    /// Required input parameters that are missing in this sample
    pub fn missing_inputs(&self) -> Vec<Parameter> {
        Parameter::REQUIRED_INPUTS
            .iter()
            .copied()
            .filter(|p| self.get(*p).is_none())
            .collect()
    }
}

/// A single raw observation of one parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Raw per-parameter observations, each series with its own timestamps
/// Series keep their insertion order; duplicates are resolved by the aligner
#[derive(Debug, Clone, Default)]
pub struct RawObservations {
    series: BTreeMap<Parameter, Vec<Observation>>,
    span: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl RawObservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a timestamp as part of the observed span without a value
    pub fn mark_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.span = Some(match self.span {
            None => (timestamp, timestamp),
            Some((start, end)) => (start.min(timestamp), end.max(timestamp)),
        });
    }

    /// Append an observation; non-finite values are dropped
    pub fn push(&mut self, parameter: Parameter, timestamp: DateTime<Utc>, value: f64) {
        self.mark_timestamp(timestamp);
        if value.is_finite() {
            self.series
                .entry(parameter)
                .or_default()
                .push(Observation { timestamp, value });
        }
    }

    /// Observations recorded for a parameter, in insertion order
    pub fn series(&self, parameter: Parameter) -> &[Observation] {
        self.series.get(&parameter).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Earliest and latest timestamp seen across all series
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.span
    }

    pub fn is_empty(&self) -> bool {
        self.span.is_none()
    }

    /// Split tabular rows into per-parameter series
    /// Missing cells contribute no observation
    pub fn from_samples(samples: &[Sample]) -> Self {
        let mut raw = RawObservations::new();
        for sample in samples {
            raw.mark_timestamp(sample.timestamp);
            for parameter in Parameter::INPUTS {
                if let Some(value) = sample.get(parameter) {
                    raw.push(parameter, sample.timestamp, value);
                }
            }
        }
        raw
    }
}
