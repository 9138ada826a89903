// Physical signature extraction
// Derives plasma beta, composition ratios, temperature index and dynamic
// quantities from aligned samples, propagating missing inputs

use serde::{Deserialize, Serialize};

use crate::samples::types::{finite, Measurement, Sample};

/// Coefficient for proton beta with n in cm^-3, T in K and B in nT
/// (2 * mu0 * kB * 1e6 / 1e-18)
const BETA_COEFFICIENT: f64 = 3.468e-5;

/// Dynamic pressure coefficient for n in cm^-3 and V in km/s, result in nPa
const DYNAMIC_PRESSURE_COEFFICIENT: f64 = 1.67e-6;

/// Configuration for sequence-level features
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Trailing window (grid points) for the density-jump baseline
    pub density_window: usize,

    /// Minimum present points inside the window to form a baseline
    pub density_min_points: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            density_window: 30,
            density_min_points: 15,
        }
    }
}

/// Expected proton temperature (K) for a given bulk speed (km/s)
/// Lopez & Freeman (1986) piecewise relation
pub fn expected_temperature(v_sw: Measurement) -> Measurement {
    let v = v_sw?;
    let t_exp = if v < 500.0 {
        (0.031 * v - 5.1).powi(2) * 1.0e3
    } else {
        (0.51 * v - 142.0) * 1.0e3
    };
    if t_exp > 0.0 {
        finite(t_exp)
    } else {
        None
    }
}

/// Plasma beta from density, temperature and field magnitude
pub fn plasma_beta(n_p: Measurement, tp: Measurement, b_field: Measurement) -> Measurement {
    let (n, t, b) = (n_p?, tp?, b_field?);
    if b <= 0.0 {
        return None;
    }
    finite(BETA_COEFFICIENT * n * t / (b * b))
}

/// Ratio of two channels, missing when the denominator is not positive
fn ratio(numerator: Measurement, denominator: Measurement) -> Measurement {
    let (num, den) = (numerator?, denominator?);
    if den <= 0.0 {
        return None;
    }
    finite(num / den)
}

/// Per-sample derived quantities
/// Measured beta and alpha ratio win over their derived fallbacks
pub fn extract_sample_features(sample: &Sample) -> Sample {
    let mut out = sample.clone();

    if out.beta.is_none() {
        out.beta = plasma_beta(sample.n_p, sample.tp, sample.b_field);
    }

    if out.alpha_proton_ratio.is_none() {
        out.alpha_proton_ratio = ratio(sample.flux_alpha, sample.flux_p);
    }

    out.temperature_index = ratio(sample.tp, expected_temperature(sample.v_sw));

    out.dynamic_pressure = match (sample.n_p, sample.v_sw) {
        (Some(n), Some(v)) => finite(DYNAMIC_PRESSURE_COEFFICIENT * n * v * v),
        _ => None,
    };

    out
}

/// Derive all features for an aligned sequence
/// Sequence features (speed change, density jump) look only backwards
pub fn extract_features(samples: &[Sample], config: &FeatureConfig) -> Vec<Sample> {
    let mut out: Vec<Sample> = samples.iter().map(extract_sample_features).collect();

    for i in 0..out.len() {
        out[i].speed_change = if i == 0 {
            None
        } else {
            match (samples[i].v_sw, samples[i - 1].v_sw) {
                (Some(curr), Some(prev)) => finite(curr - prev),
                _ => None,
            }
        };

        out[i].density_jump = density_jump(samples, i, config);
    }

    let derived_missing = out.iter().filter(|s| s.temperature_index.is_none()).count();
    log::debug!(
        "Extracted features for {} samples ({} without temperature index)",
        out.len(),
        derived_missing
    );

    out
}

/// Density over the mean of the preceding window
fn density_jump(samples: &[Sample], i: usize, config: &FeatureConfig) -> Measurement {
    let current = samples[i].n_p?;
    if config.density_window == 0 || i == 0 {
        return None;
    }

    let from = i.saturating_sub(config.density_window);
    let window: Vec<f64> = samples[from..i].iter().filter_map(|s| s.n_p).collect();
    if window.len() < config.density_min_points.max(1) {
        return None;
    }

    let mean = window.iter().sum::<f64>() / window.len() as f64;
    ratio(Some(current), Some(mean))
}
