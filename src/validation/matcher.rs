// Catalog matching
// Greedy temporal matching of detected Halo-CME events against the catalog

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::ClassifiedEvent;
use crate::validation::catalog::CatalogEvent;

/// Which catalog entry wins when several fall inside one event's window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Smallest absolute offset from the event start (ties: earlier onset)
    NearestToStart,
    /// Earliest onset inside the window
    EarliestOnset,
}

/// Validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Window extension before start and after end, in seconds
    pub tolerance_secs: i64,

    pub match_policy: MatchPolicy,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            tolerance_secs: 12 * 3600,
            match_policy: MatchPolicy::NearestToStart,
        }
    }
}

/// Match outcome for one detected event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub event_id: Uuid,

    pub matched_catalog_id: Option<String>,

    /// Catalog onset minus event start, in seconds
    pub time_offset_secs: Option<i64>,
}

impl ValidationResult {
    pub fn is_matched(&self) -> bool {
        self.matched_catalog_id.is_some()
    }
}

/// Aggregate detection metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Halo-CME events considered
    pub detected: usize,

    pub cataloged: usize,

    pub matched: usize,

    /// matched / detected, 0.0 when nothing was detected
    pub precision: f64,

    /// matched / cataloged, 0.0 when the catalog is empty
    pub recall: f64,

    pub f1: f64,

    /// Catalog entries no event claimed, in onset order
    pub unmatched_catalog_ids: Vec<String>,
}

/// Per-event results in input order plus the summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub results: Vec<ValidationResult>,
    pub summary: ValidationSummary,
}

impl Validation {
    pub fn result_for(&self, event_id: Uuid) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.event_id == event_id)
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Validate detected events against the catalog
///
/// Algorithm:
/// 1. Only Halo-CME events take part, visited in order of start time
/// 2. An event's window is `[start - tolerance, end + tolerance]`
/// 3. Among unconsumed catalog entries inside the window, the match policy
///    picks one; it is consumed and unavailable to later events
pub fn validate_events(
    events: &[ClassifiedEvent],
    catalog: &[CatalogEvent],
    config: &ValidationConfig,
) -> Validation {
    let tolerance = chrono::Duration::seconds(config.tolerance_secs.max(0));

    let detected: Vec<&ClassifiedEvent> = events.iter().filter(|e| e.is_halo_cme()).collect();

    let mut order: Vec<usize> = (0..detected.len()).collect();
    order.sort_by_key(|&i| {
        let interval = &detected[i].interval;
        (interval.start_time, interval.end_time, i)
    });

    let mut consumed = vec![false; catalog.len()];
    let mut results: Vec<Option<ValidationResult>> = vec![None; detected.len()];

    for i in order {
        let event = detected[i];
        let window_start = event.interval.start_time - tolerance;
        let window_end = event.interval.end_time + tolerance;

        let best = catalog
            .iter()
            .enumerate()
            .filter(|(j, c)| {
                !consumed[*j] && c.onset_time >= window_start && c.onset_time <= window_end
            })
            .min_by_key(|(j, c)| {
                let offset = (c.onset_time - event.interval.start_time).num_seconds();
                let primary = match config.match_policy {
                    MatchPolicy::NearestToStart => offset.abs(),
                    MatchPolicy::EarliestOnset => 0,
                };
                (primary, c.onset_time, *j)
            });

        let result = match best {
            Some((j, c)) => {
                consumed[j] = true;
                ValidationResult {
                    event_id: event.id,
                    matched_catalog_id: Some(c.catalog_id.clone()),
                    time_offset_secs: Some((c.onset_time - event.interval.start_time).num_seconds()),
                }
            }
            None => ValidationResult {
                event_id: event.id,
                matched_catalog_id: None,
                time_offset_secs: None,
            },
        };
        results[i] = Some(result);
    }

    let results: Vec<ValidationResult> = results.into_iter().flatten().collect();
    let matched = results.iter().filter(|r| r.is_matched()).count();

    let precision = ratio(matched, detected.len());
    let recall = ratio(matched, catalog.len());
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    let unmatched_catalog_ids = catalog
        .iter()
        .zip(consumed.iter())
        .filter(|(_, used)| !**used)
        .map(|(c, _)| c.catalog_id.clone())
        .collect();

    log::info!(
        "Validation: {}/{} detected events matched {} catalog entries (precision {:.3}, recall {:.3})",
        matched,
        detected.len(),
        catalog.len(),
        precision,
        recall
    );

    Validation {
        results,
        summary: ValidationSummary {
            detected: detected.len(),
            cataloged: catalog.len(),
            matched,
            precision,
            recall,
            f1,
            unmatched_catalog_ids,
        },
    }
}
