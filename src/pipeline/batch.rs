// Batch processing
// Runs a directory of inputs one file at a time, cancellable between files

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::pipeline::run::{DetectionRun, PipelineError};
use crate::pipeline::trace::Stage;
use crate::validation::Catalog;

/// Shared flag checked before each file starts
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one batch input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Completed {
        #[serde(skip_serializing_if = "Option::is_none")]
        report_path: Option<PathBuf>,
        candidate_count: usize,
        halo_cme_count: usize,
    },
    Failed {
        stage: Stage,
        error: String,
    },
    /// Never started because the batch was cancelled
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub input: PathBuf,
    pub outcome: BatchOutcome,
}

/// CSV inputs in a directory, sorted by name
pub fn collect_inputs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut inputs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"))
        })
        .collect();
    inputs.sort();
    Ok(inputs)
}

fn input_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn report_path(output_dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string());
    output_dir.join(format!("{}.report.json", stem))
}

/// Run every input in order
/// A fatal error on one file is recorded and the batch moves on; once the
/// flag is set no further file is started
pub async fn run_batch(
    run: Arc<DetectionRun>,
    inputs: Vec<PathBuf>,
    catalog: Option<Arc<Catalog>>,
    output_dir: Option<PathBuf>,
    cancel: CancellationFlag,
) -> Vec<BatchEntry> {
    let total = inputs.len();
    let mut entries = Vec::with_capacity(total);

    for (i, input) in inputs.into_iter().enumerate() {
        if cancel.is_cancelled() {
            log::warn!("Batch cancelled, skipping {}", input.display());
            entries.push(BatchEntry {
                input,
                outcome: BatchOutcome::Skipped,
            });
            continue;
        }

        log::info!("Batch [{}/{}] {}", i + 1, total, input.display());
        let name = input_name(&input);

        let data = match tokio::fs::read(&input).await {
            Ok(data) => data,
            Err(e) => {
                entries.push(BatchEntry {
                    input,
                    outcome: BatchOutcome::Failed {
                        stage: Stage::Ingest,
                        error: format!("{}: {}", name, e),
                    },
                });
                continue;
            }
        };

        let target = output_dir.as_ref().map(|dir| report_path(dir, &input));
        let task_run = Arc::clone(&run);
        let task_catalog = catalog.clone();
        let task_target = target.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let report = task_run.run(&name, &data, task_catalog.as_deref())?;
            if let Some(path) = &task_target {
                report.write_to(path).map_err(|source| PipelineError::Report {
                    input: name.clone(),
                    source,
                })?;
            }
            Ok::<_, PipelineError>(report)
        })
        .await;

        let outcome = match joined {
            Ok(Ok(report)) => BatchOutcome::Completed {
                report_path: target,
                candidate_count: report.statistics.candidate_count,
                halo_cme_count: report.statistics.halo_cme_count,
            },
            Ok(Err(e)) => BatchOutcome::Failed {
                stage: e.stage(),
                error: e.to_string(),
            },
            // Panicked or aborted task
            Err(e) => BatchOutcome::Failed {
                stage: Stage::Report,
                error: format!("{}: run task failed: {}", input_name(&input), e),
            },
        };
        entries.push(BatchEntry { input, outcome });
    }

    let completed = entries
        .iter()
        .filter(|e| matches!(e.outcome, BatchOutcome::Completed { .. }))
        .count();
    log::info!("Batch finished: {}/{} inputs completed", completed, total);

    entries
}
