// Partitioned extraction
// Splits the aligned stream into overlapping windows, extracts runs from each
// on a blocking task, continues runs left open at a window end, then
// coalesces them at the seams

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::config::ConfigError;
use crate::events::intervals::{build_interval, merge_runs, resume_run, scan_runs, IndexRun, OpenRun};
use crate::events::{CandidateInterval, ExtractorConfig, RuleSet, SignatureVector};
use crate::samples::Sample;

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("Partition task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Partition sizing, in grid steps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Samples owned by each partition
    pub partition_len: usize,

    /// Extra samples evaluated on each side of a partition
    pub overlap: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        PartitionConfig {
            partition_len: 10_080, // One week at 1-minute cadence
            overlap: 60,
        }
    }
}

/// One partition: the samples it owns and the samples it evaluates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub core: Range<usize>,
    pub extended: Range<usize>,
}

impl PartitionConfig {
    /// Overlap must cover confirmation, exit debounce and merge gap
    pub fn validate(&self, extraction: &ExtractorConfig) -> Result<(), ConfigError> {
        if self.partition_len == 0 {
            return Err(ConfigError::Invalid {
                field: "partitioning.partition_len".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let required = extraction.seam_width();
        if self.overlap < required {
            return Err(ConfigError::PartitionOverlap {
                overlap: self.overlap,
                required,
            });
        }
        Ok(())
    }

    /// Tile `[0, len)` into cores, each widened by `overlap` on both sides
    pub fn plan(&self, len: usize) -> Vec<Partition> {
        let step = self.partition_len.max(1);
        (0..len)
            .step_by(step)
            .enumerate()
            .map(|(index, start)| {
                let end = (start + step).min(len);
                Partition {
                    index,
                    core: start..end,
                    extended: start.saturating_sub(self.overlap)..(end + self.overlap).min(len),
                }
            })
            .collect()
    }
}

struct PartitionOutput {
    index: usize,
    core_vectors: Vec<SignatureVector>,
    runs: Vec<IndexRun>,
    /// Run still active where the extended window stops short of the stream end
    open: Option<OpenRun>,
    window_end: usize,
}

fn process_partition(
    partition: &Partition,
    samples: &[Sample],
    rules: &RuleSet,
    extraction: &ExtractorConfig,
) -> PartitionOutput {
    let extended = partition.extended.clone();
    let total = samples.len();

    let vectors = rules.evaluate_range(&samples[extended.clone()], extended.start);
    let scan = scan_runs(&vectors, extraction);

    // Only the end of the whole stream truncates
    let (runs, open) = if extended.end < total {
        (scan.closed, scan.open)
    } else {
        (scan.finish(), None)
    };

    let from = partition.core.start - extended.start;
    let to = partition.core.end - extended.start;
    let core_vectors = vectors[from..to].to_vec();

    log::debug!(
        "Partition {} [{}, {}) evaluated over [{}, {}): {} runs, {} open",
        partition.index,
        partition.core.start,
        partition.core.end,
        extended.start,
        extended.end,
        runs.len(),
        usize::from(open.is_some())
    );

    PartitionOutput {
        index: partition.index,
        core_vectors,
        runs,
        open,
        window_end: extended.end,
    }
}

/// Extract intervals with one blocking task per partition
/// A run still open at a window end is continued over the assembled stream
/// until it closes. Runs from all partitions are then coalesced with the same
/// merge rule as the sequential extractor, so seam duplicates collapse into
/// one interval
pub async fn extract_partitioned(
    samples: Arc<Vec<Sample>>,
    rules: Arc<RuleSet>,
    extraction: ExtractorConfig,
    partitioning: &PartitionConfig,
) -> Result<(Vec<SignatureVector>, Vec<CandidateInterval>), PartitionError> {
    let plan = partitioning.plan(samples.len());
    let partition_count = plan.len();
    let extraction = Arc::new(extraction);

    let mut tasks = JoinSet::new();
    for partition in plan {
        let samples = Arc::clone(&samples);
        let rules = Arc::clone(&rules);
        let extraction = Arc::clone(&extraction);
        tasks.spawn_blocking(move || process_partition(&partition, &samples, &rules, &extraction));
    }

    let mut outputs = Vec::with_capacity(partition_count);
    while let Some(joined) = tasks.join_next().await {
        outputs.push(joined?);
    }
    outputs.sort_by_key(|o| o.index);

    let mut vectors = Vec::with_capacity(samples.len());
    let mut runs = Vec::new();
    let mut open_runs = Vec::new();
    for output in outputs {
        vectors.extend(output.core_vectors);
        runs.extend(output.runs);
        if let Some(open) = output.open {
            open_runs.push((open, output.window_end));
        }
    }

    for (open, window_end) in open_runs {
        let rest = vectors.get(window_end..).unwrap_or_default();
        runs.extend(resume_run(open, rest, &extraction));
    }

    let merged = merge_runs(runs, extraction.merge_gap);
    let intervals: Vec<CandidateInterval> = merged
        .iter()
        .filter_map(|run| build_interval(run, &vectors, 0))
        .collect();

    for interval in intervals.iter().filter(|i| i.truncated) {
        log::warn!(
            "Interval starting {} is still active at end of input, closed as truncated",
            interval.start_time
        );
    }
    log::info!(
        "Extracted {} candidate intervals from {} partitions",
        intervals.len(),
        partition_count
    );

    Ok((vectors, intervals))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_tiles_stream() {
        let config = PartitionConfig {
            partition_len: 10,
            overlap: 3,
        };
        let plan = config.plan(25);

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].core, 0..10);
        assert_eq!(plan[0].extended, 0..13);
        assert_eq!(plan[1].extended, 7..23);
        assert_eq!(plan[2].core, 20..25);
        assert_eq!(plan[2].extended, 17..25);
    }

    #[test]
    fn test_plan_empty_stream() {
        assert!(PartitionConfig::default().plan(0).is_empty());
    }

    #[test]
    fn test_overlap_must_cover_seam() {
        let extraction = ExtractorConfig::default();
        let short = PartitionConfig {
            partition_len: 100,
            overlap: extraction.seam_width() - 1,
        };
        assert!(short.validate(&extraction).is_err());

        let exact = PartitionConfig {
            partition_len: 100,
            overlap: extraction.seam_width(),
        };
        assert!(exact.validate(&extraction).is_ok());
    }
}
