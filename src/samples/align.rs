// Sample alignment
// Resamples irregular per-parameter observations onto a uniform time grid

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::samples::types::{Observation, Parameter, RawObservations, Sample};

/// How multiple observations sharing one timestamp are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the observation that appears last in the input
    KeepLast,
    /// Keep the observation that appears first in the input
    KeepFirst,
    /// Average all observations at the timestamp
    Mean,
}

/// Configuration for grid alignment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    /// Grid cadence in seconds
    pub cadence_secs: i64,

    /// Largest gap between two observations that may be interpolated across
    pub max_gap_secs: i64,

    pub duplicate_policy: DuplicatePolicy,
}

impl Default for AlignConfig {
    fn default() -> Self {
        AlignConfig {
            cadence_secs: 60,
            max_gap_secs: 300,
            duplicate_policy: DuplicatePolicy::KeepLast,
        }
    }
}

/// Unrecoverable interpolation gaps
/// Recorded on the alignment; the affected samples are left missing and the
/// run continues
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataGapError {
    #[error("{parameter}: no observations, all samples marked missing")]
    NoObservations { parameter: Parameter },

    #[error("{parameter}: missing at both start and end of the sequence (observed {first_observed} to {last_observed})")]
    Unbounded {
        parameter: Parameter,
        first_observed: DateTime<Utc>,
        last_observed: DateTime<Utc>,
    },

    #[error("{parameter}: gap of {gap_secs}s from {from} to {to} exceeds the interpolation limit")]
    GapTooLarge {
        parameter: Parameter,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        gap_secs: i64,
    },
}

/// Result of aligning one input
#[derive(Debug, Clone, Default)]
pub struct Alignment {
    /// Samples on the uniform grid, strictly increasing timestamps
    pub samples: Vec<Sample>,

    pub gaps: Vec<DataGapError>,

    /// Number of observations dropped or folded by the duplicate policy
    pub duplicates_resolved: usize,
}

/// Order a series by timestamp and collapse duplicate timestamps
fn resolve_duplicates(
    series: &[Observation],
    policy: DuplicatePolicy,
    resolved: &mut usize,
) -> Vec<Observation> {
    let mut sorted = series.to_vec();
    // Stable sort keeps input order within one timestamp
    sorted.sort_by_key(|o| o.timestamp);

    let mut out: Vec<Observation> = Vec::with_capacity(sorted.len());
    let mut group_start = 0;

    while group_start < sorted.len() {
        let timestamp = sorted[group_start].timestamp;
        let mut group_end = group_start + 1;
        while group_end < sorted.len() && sorted[group_end].timestamp == timestamp {
            group_end += 1;
        }

        let group = &sorted[group_start..group_end];
        let value = match policy {
            DuplicatePolicy::KeepLast => group[group.len() - 1].value,
            DuplicatePolicy::KeepFirst => group[0].value,
            DuplicatePolicy::Mean => group.iter().map(|o| o.value).sum::<f64>() / group.len() as f64,
        };
        *resolved += group.len() - 1;
        out.push(Observation { timestamp, value });

        group_start = group_end;
    }

    out
}

/// Build the uniform grid spanning the observed time range
fn build_grid(start: DateTime<Utc>, end: DateTime<Utc>, cadence_ms: i64) -> Vec<DateTime<Utc>> {
    let span_ms = (end - start).num_milliseconds();
    let steps = span_ms / cadence_ms;
    (0..=steps)
        .map(|k| start + Duration::milliseconds(k * cadence_ms))
        .collect()
}

/// Align raw observations onto a uniform grid
///
/// Algorithm:
/// 1. Grid runs from the earliest to the latest observed timestamp at the
///    configured cadence
/// 2. Duplicate timestamps per parameter are resolved by the duplicate policy
/// 3. Each grid point takes the exact observation if one exists, otherwise
///    the linear interpolation of its two neighbours when they are no further
///    apart than `max_gap_secs`
/// 4. Grid points outside a parameter's observed range stay missing
pub fn align(raw: &RawObservations, config: &AlignConfig) -> Alignment {
    let Some((start, end)) = raw.span() else {
        return Alignment::default();
    };

    let cadence_ms = config.cadence_secs.max(1) * 1000;
    let max_gap_ms = config.max_gap_secs.max(0) * 1000;
    let grid = build_grid(start, end, cadence_ms);
    let mut samples: Vec<Sample> = grid.iter().map(|t| Sample::empty(*t)).collect();

    let mut gaps = Vec::new();
    let mut duplicates_resolved = 0;

    for parameter in Parameter::INPUTS {
        let series = resolve_duplicates(
            raw.series(parameter),
            config.duplicate_policy,
            &mut duplicates_resolved,
        );

        if series.is_empty() {
            // The magnetic field column is optional
            if parameter != Parameter::MagneticField {
                gaps.push(DataGapError::NoObservations { parameter });
            }
            continue;
        }

        let first = series[0].timestamp;
        let last = series[series.len() - 1].timestamp;
        let grid_end = grid.last().copied().unwrap_or(end);
        if first > start && last < grid_end {
            gaps.push(DataGapError::Unbounded {
                parameter,
                first_observed: first,
                last_observed: last,
            });
        }

        for pair in series.windows(2) {
            let gap_ms = (pair[1].timestamp - pair[0].timestamp).num_milliseconds();
            if gap_ms > max_gap_ms && gap_ms > cadence_ms {
                gaps.push(DataGapError::GapTooLarge {
                    parameter,
                    from: pair[0].timestamp,
                    to: pair[1].timestamp,
                    gap_secs: gap_ms / 1000,
                });
            }
        }

        let mut j = 0;
        for (sample, t) in samples.iter_mut().zip(grid.iter()) {
            while j + 1 < series.len() && series[j + 1].timestamp <= *t {
                j += 1;
            }

            let left = series[j];
            if left.timestamp > *t {
                continue;
            }
            if left.timestamp == *t {
                sample.set(parameter, Some(left.value));
                continue;
            }
            let Some(right) = series.get(j + 1) else {
                continue;
            };

            let span_ms = (right.timestamp - left.timestamp).num_milliseconds();
            if span_ms > max_gap_ms {
                continue;
            }
            let offset_ms = (*t - left.timestamp).num_milliseconds();
            let fraction = offset_ms as f64 / span_ms as f64;
            sample.set(
                parameter,
                Some(left.value + (right.value - left.value) * fraction),
            );
        }
    }

    for gap in &gaps {
        log::warn!("Data gap: {}", gap);
    }
    log::info!(
        "Aligned {} samples at {}s cadence ({} duplicates resolved, {} gaps)",
        samples.len(),
        config.cadence_secs,
        duplicates_resolved,
        gaps.len()
    );

    Alignment {
        samples,
        gaps,
        duplicates_resolved,
    }
}

/// Align tabular rows (convenience over `RawObservations::from_samples`)
pub fn align_samples(rows: &[Sample], config: &AlignConfig) -> Alignment {
    align(&RawObservations::from_samples(rows), config)
}
