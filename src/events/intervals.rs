// Interval extraction
// Hysteresis state machine over signature vectors with gap merging

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::events::types::{CandidateInterval, SignatureVector};

/// Hysteresis parameters
/// Durations and the merge gap are counted in grid steps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Signatures that must be active at once (K of N)
    pub min_signatures: usize,

    /// Consecutive qualifying samples needed to confirm an interval
    pub enter_min_duration: usize,

    /// Consecutive non-qualifying samples needed to close an interval
    pub exit_min_duration: usize,

    /// Largest gap (steps strictly between two intervals) that is merged
    pub merge_gap: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig {
            min_signatures: 2,
            enter_min_duration: 6,
            exit_min_duration: 3,
            merge_gap: 6,
        }
    }
}

impl ExtractorConfig {
    /// Samples of context either side of a cut that can change the outcome
    pub fn seam_width(&self) -> usize {
        self.enter_min_duration + self.exit_min_duration + self.merge_gap
    }
}

/// Extractor state between samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,

    /// Qualifying run not yet confirmed
    Candidate { start: usize, run_len: usize },

    /// Confirmed interval, possibly in its exit debounce
    Active {
        start: usize,
        last_active: usize,
        below: usize,
    },
}

/// Closed run of sample indices, before merging
/// `signatures` holds what fired on the run's qualifying samples only
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct IndexRun {
    pub first: usize,
    pub last: usize,
    pub truncated: bool,
    pub signatures: BTreeSet<String>,
}

/// Confirmed run still open when its input ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpenRun {
    start: usize,
    last_active: usize,
    below: usize,
    signatures: BTreeSet<String>,
}

impl OpenRun {
    fn close(self, truncated: bool) -> IndexRun {
        IndexRun {
            first: self.start,
            last: self.last_active,
            truncated,
            signatures: self.signatures,
        }
    }
}

/// Runs closed inside a window plus the one left open at its end
#[derive(Debug, Clone)]
pub(crate) struct RunScan {
    pub closed: Vec<IndexRun>,
    pub open: Option<OpenRun>,
}

impl RunScan {
    /// Close out at end of input
    /// An open interval ends at its last qualifying sample, flagged truncated
    pub fn finish(mut self) -> Vec<IndexRun> {
        if let Some(open) = self.open.take() {
            self.closed.push(open.close(true));
        }
        self.closed
    }
}

struct Hysteresis<'a> {
    config: &'a ExtractorConfig,
    state: State,
    signatures: BTreeSet<String>,
    runs: Vec<IndexRun>,
}

impl<'a> Hysteresis<'a> {
    fn new(config: &'a ExtractorConfig) -> Self {
        Hysteresis {
            config,
            state: State::Idle,
            signatures: BTreeSet::new(),
            runs: Vec::new(),
        }
    }

    fn resume(config: &'a ExtractorConfig, open: OpenRun) -> Self {
        Hysteresis {
            config,
            state: State::Active {
                start: open.start,
                last_active: open.last_active,
                below: open.below,
            },
            signatures: open.signatures,
            runs: Vec::new(),
        }
    }

    fn step(&mut self, sv: &SignatureVector) {
        let index = sv.index;
        let qualifies = sv.active_count >= self.config.min_signatures;
        let enter = self.config.enter_min_duration.max(1);
        let exit = self.config.exit_min_duration.max(1);

        self.state = match (self.state, qualifies) {
            (State::Idle, false) => State::Idle,
            (State::Idle, true) if enter == 1 => State::Active {
                start: index,
                last_active: index,
                below: 0,
            },
            (State::Idle, true) => State::Candidate {
                start: index,
                run_len: 1,
            },
            (State::Candidate { start, run_len }, true) => {
                let run_len = run_len + 1;
                if run_len >= enter {
                    State::Active {
                        start,
                        last_active: index,
                        below: 0,
                    }
                } else {
                    State::Candidate { start, run_len }
                }
            }
            (State::Candidate { .. }, false) => {
                self.signatures.clear();
                State::Idle
            }
            (State::Active { start, .. }, true) => State::Active {
                start,
                last_active: index,
                below: 0,
            },
            (
                State::Active {
                    start,
                    last_active,
                    below,
                },
                false,
            ) => {
                let below = below + 1;
                if below >= exit {
                    self.runs.push(IndexRun {
                        first: start,
                        last: last_active,
                        truncated: false,
                        signatures: std::mem::take(&mut self.signatures),
                    });
                    State::Idle
                } else {
                    State::Active {
                        start,
                        last_active,
                        below,
                    }
                }
            }
        };

        if qualifies {
            self.signatures.extend(sv.triggered().map(str::to_string));
        }
    }

    fn into_scan(self) -> RunScan {
        let open = match self.state {
            State::Active {
                start,
                last_active,
                below,
            } => Some(OpenRun {
                start,
                last_active,
                below,
                signatures: self.signatures,
            }),
            _ => None,
        };
        RunScan {
            closed: self.runs,
            open,
        }
    }
}

/// Scan a signature sequence, indexed by `SignatureVector::index`
/// The sequence must be contiguous in index order
pub(crate) fn scan_runs(vectors: &[SignatureVector], config: &ExtractorConfig) -> RunScan {
    let mut machine = Hysteresis::new(config);
    for sv in vectors {
        machine.step(sv);
    }
    machine.into_scan()
}

/// Confirmed runs over a complete signature sequence
pub(crate) fn detect_runs(vectors: &[SignatureVector], config: &ExtractorConfig) -> Vec<IndexRun> {
    scan_runs(vectors, config).finish()
}

/// Continue an open run over the samples that follow its window, until it
/// closes or the input ends
/// `vectors` must start at the sample right after the window's last one
pub(crate) fn resume_run(
    open: OpenRun,
    vectors: &[SignatureVector],
    config: &ExtractorConfig,
) -> Vec<IndexRun> {
    let mut machine = Hysteresis::resume(config, open);
    for sv in vectors {
        machine.step(sv);
        if !machine.runs.is_empty() {
            break;
        }
    }
    machine.into_scan().finish()
}

/// Coalesce overlapping runs and runs separated by at most `merge_gap` steps
/// Merged runs carry the union of their signature sets
pub(crate) fn merge_runs(mut runs: Vec<IndexRun>, merge_gap: usize) -> Vec<IndexRun> {
    runs.sort();

    let mut merged: Vec<IndexRun> = Vec::with_capacity(runs.len());
    for run in runs {
        match merged.last_mut() {
            Some(prev) if run.first <= prev.last + merge_gap + 1 => {
                if run.last > prev.last {
                    prev.last = run.last;
                    prev.truncated = run.truncated;
                } else if run.last == prev.last {
                    prev.truncated |= run.truncated;
                }
                prev.signatures.extend(run.signatures);
            }
            _ => merged.push(run),
        }
    }
    merged
}

/// Materialize a run as an interval using the signature vectors that cover it
/// `vectors[i]` must carry index `offset + i`
pub(crate) fn build_interval(
    run: &IndexRun,
    vectors: &[SignatureVector],
    offset: usize,
) -> Option<CandidateInterval> {
    let span = vectors.get(run.first.checked_sub(offset)?..=run.last.checked_sub(offset)?)?;
    let first = span.first()?;
    let last = span.last()?;

    let mut insufficient_data = first.insufficient_data.clone();
    for sv in &span[1..] {
        insufficient_data.retain(|name| sv.insufficient_data.contains(name));
    }

    Some(CandidateInterval {
        start_time: first.timestamp,
        end_time: last.timestamp,
        duration_secs: (last.timestamp - first.timestamp).num_seconds(),
        triggered_signatures: run.signatures.clone(),
        first_index: run.first,
        last_index: run.last,
        truncated: run.truncated,
        insufficient_data,
    })
}

/// Extract ordered, non-overlapping candidate intervals
///
/// Algorithm:
/// 1. IDLE -> CANDIDATE on the first sample with enough active signatures
/// 2. CANDIDATE -> ACTIVE once the run lasts `enter_min_duration` samples,
///    CANDIDATE -> IDLE if the condition drops first
/// 3. ACTIVE closes after `exit_min_duration` non-qualifying samples, ending
///    at the last sample where the condition held
/// 4. Closed intervals no more than `merge_gap` steps apart are merged
pub fn extract_intervals(
    vectors: &[SignatureVector],
    config: &ExtractorConfig,
) -> Vec<CandidateInterval> {
    let Some(offset) = vectors.first().map(|sv| sv.index) else {
        return Vec::new();
    };

    let runs = merge_runs(detect_runs(vectors, config), config.merge_gap);
    let intervals: Vec<CandidateInterval> = runs
        .iter()
        .filter_map(|run| build_interval(run, vectors, offset))
        .collect();

    for interval in intervals.iter().filter(|i| i.truncated) {
        log::warn!(
            "Interval starting {} is still active at end of input, closed as truncated",
            interval.start_time
        );
    }
    log::info!("Extracted {} candidate intervals", intervals.len());

    intervals
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::BTreeMap;

    /// Signature vectors from per-sample active counts, two named signatures
    fn vectors(counts: &[usize]) -> Vec<SignatureVector> {
        let t0 = Utc.timestamp_opt(1_000_000, 0).unwrap();
        counts
            .iter()
            .enumerate()
            .map(|(i, &count)| {
                let mut signatures = BTreeMap::new();
                signatures.insert("a".to_string(), count >= 1);
                signatures.insert("b".to_string(), count >= 2);
                SignatureVector {
                    index: i,
                    timestamp: t0 + Duration::minutes(i as i64),
                    signatures,
                    insufficient_data: BTreeSet::new(),
                    active_count: count,
                }
            })
            .collect()
    }

    fn config() -> ExtractorConfig {
        ExtractorConfig {
            min_signatures: 2,
            enter_min_duration: 3,
            exit_min_duration: 2,
            merge_gap: 2,
        }
    }

    fn run(first: usize, last: usize, signatures: &[&str]) -> IndexRun {
        IndexRun {
            first,
            last,
            truncated: false,
            signatures: signatures.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Signature vectors from per-sample sets of active names among a, b, c
    fn named_vectors(active: &[&[&str]]) -> Vec<SignatureVector> {
        let t0 = Utc.timestamp_opt(1_000_000, 0).unwrap();
        active
            .iter()
            .enumerate()
            .map(|(i, names)| {
                let signatures: BTreeMap<String, bool> = ["a", "b", "c"]
                    .iter()
                    .map(|n| (n.to_string(), names.contains(n)))
                    .collect();
                SignatureVector {
                    index: i,
                    timestamp: t0 + Duration::minutes(i as i64),
                    signatures,
                    insufficient_data: BTreeSet::new(),
                    active_count: names.len(),
                }
            })
            .collect()
    }

    fn pattern(shape: &str) -> Vec<usize> {
        shape.chars().map(|c| if c == '#' { 2 } else { 0 }).collect()
    }

    #[test]
    fn test_exact_enter_duration_confirms() {
        let intervals = extract_intervals(&vectors(&pattern("..###....")), &config());
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].first_index, 2);
        assert_eq!(intervals[0].last_index, 4);
        assert_eq!(intervals[0].duration_secs, 120);
        assert!(!intervals[0].truncated);
    }

    #[test]
    fn test_one_short_does_not_confirm() {
        let intervals = extract_intervals(&vectors(&pattern("..##.....")), &config());
        assert!(intervals.is_empty());
    }

    #[test]
    fn test_short_dip_stays_open() {
        // One sample below is within the exit debounce
        let intervals = extract_intervals(&vectors(&pattern("###.###....")), &config());
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].first_index, 0);
        assert_eq!(intervals[0].last_index, 6);
    }

    #[test]
    fn test_gap_of_merge_gap_merges() {
        // Gap of exactly 2 steps between intervals
        let intervals = extract_intervals(&vectors(&pattern("###..###....")), &config());
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].first_index, 0);
        assert_eq!(intervals[0].last_index, 7);
    }

    #[test]
    fn test_gap_beyond_merge_gap_splits() {
        let intervals = extract_intervals(&vectors(&pattern("###...###....")), &config());
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].last_index, 2);
        assert_eq!(intervals[1].first_index, 6);
        assert!(intervals[0].end_time < intervals[1].start_time);
    }

    #[test]
    fn test_truncated_at_end_of_input() {
        let intervals = extract_intervals(&vectors(&pattern("....#####")), &config());
        assert_eq!(intervals.len(), 1);
        assert!(intervals[0].truncated);
        assert_eq!(intervals[0].last_index, 8);
    }

    #[test]
    fn test_pending_close_at_end_is_truncated() {
        let intervals = extract_intervals(&vectors(&pattern("..####.")), &config());
        assert_eq!(intervals.len(), 1);
        assert!(intervals[0].truncated);
        assert_eq!(intervals[0].last_index, 5);
    }

    #[test]
    fn test_single_signature_never_qualifies() {
        let counts = vec![1; 20];
        assert!(extract_intervals(&vectors(&counts), &config()).is_empty());
    }

    #[test]
    fn test_triggered_signatures_are_unioned() {
        let config = ExtractorConfig {
            min_signatures: 1,
            ..config()
        };
        let intervals = extract_intervals(&vectors(&[1, 1, 2, 1, 0, 0, 0]), &config);
        assert_eq!(intervals.len(), 1);
        let names: Vec<&str> = intervals[0]
            .triggered_signatures
            .iter()
            .map(String::as_str)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_gap_only_signature_not_in_merged_set() {
        let ab: &[&str] = &["a", "b"];
        let c: &[&str] = &["c"];
        let none: &[&str] = &[];
        let input = named_vectors(&[ab, ab, ab, c, none, ab, ab, ab, none, none, none]);

        let intervals = extract_intervals(&input, &config());
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].first_index, 0);
        assert_eq!(intervals[0].last_index, 7);
        assert!(!intervals[0].triggered_signatures.contains("c"));
        assert_eq!(intervals[0].triggered_signatures.len(), 2);
    }

    #[test]
    fn test_resumed_run_matches_full_scan() {
        // Confirms, then flickers on and off past the window end
        let shape: String = "###".chars().chain(".#".repeat(10).chars()).chain("...".chars()).collect();
        let input = vectors(&pattern(&shape));
        let full = detect_runs(&input, &config());

        let scan = scan_runs(&input[..8], &config());
        assert!(scan.closed.is_empty());
        let open = scan.open.unwrap();
        let resumed = resume_run(open, &input[8..], &config());

        assert_eq!(resumed, full);
        assert_eq!(resumed[0].last, 22);
        assert!(!resumed[0].truncated);
    }

    #[test]
    fn test_resumed_run_truncated_at_input_end() {
        let input = vectors(&pattern("######"));
        let open = scan_runs(&input[..4], &config()).open.unwrap();
        let resumed = resume_run(open, &input[4..], &config());
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].last, 5);
        assert!(resumed[0].truncated);
    }

    #[test]
    fn test_deterministic() {
        let input = vectors(&pattern(".###..####...#####.##..###"));
        let first = extract_intervals(&input, &config());
        for _ in 0..5 {
            assert_eq!(extract_intervals(&input, &config()), first);
        }
    }

    #[test]
    fn test_merge_runs_counts_steps_between() {
        let runs = vec![
            run(10, 12, &["a"]),
            run(0, 3, &["b"]),
        ];
        // Steps strictly between 3 and 10 are 4..=9, six of them
        let merged = merge_runs(runs.clone(), 6);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].signatures.len(), 2);
        assert_eq!(merge_runs(runs, 5).len(), 2);
    }

    #[test]
    fn test_empty_input() {
        assert!(extract_intervals(&[], &config()).is_empty());
    }
}
