// HaloCME - Halo CME Interval Detection
// Module declarations and command-line entry

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod config;
pub mod events;
pub mod pipeline;
pub mod samples;
pub mod validation;

use config::DetectorConfig;
use events::{ClassifierBackend, EnsembleModel, FeatureLayout};
use pipeline::{
    calculate_sha256, collect_inputs, run_batch, BatchOutcome, CancellationFlag, DetectionRun,
    RunReport, TraceWriter,
};
use validation::Catalog;

/// Halo CME detection from solar-wind particle data
#[derive(Parser)]
#[command(name = "halocme", version)]
#[command(about = "Detect, classify and validate Halo CME intervals in solar-wind samples")]
struct Cli {
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run detection on one input file
    Detect {
        /// Solar-wind sample CSV
        #[arg(short, long)]
        input: PathBuf,

        /// Reference catalog (CSV or JSON) for validation
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Tree-ensemble model artifact
        #[arg(long)]
        model: Option<PathBuf>,

        /// Detector configuration JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Report path
        #[arg(short, long, default_value = "halocme_report.json")]
        output: PathBuf,

        /// JSONL trace of pipeline stages
        #[arg(long)]
        trace: Option<PathBuf>,

        /// Evaluate thresholds and extract intervals across partitions
        #[arg(long)]
        partitioned: bool,
    },

    /// Run detection on every CSV in a directory
    Batch {
        #[arg(long)]
        input_dir: PathBuf,

        /// Directory for per-input reports
        #[arg(long)]
        output_dir: PathBuf,

        #[arg(long)]
        catalog: Option<PathBuf>,

        #[arg(long)]
        model: Option<PathBuf>,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the feature layout the configured rules produce
    Layout {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<DetectorConfig> {
    match path {
        Some(path) => DetectorConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None => Ok(DetectorConfig::default()),
    }
}

fn load_catalog(path: Option<&Path>) -> Result<Option<Catalog>> {
    path.map(|path| {
        Catalog::load(path).with_context(|| format!("Failed to load catalog {}", path.display()))
    })
    .transpose()
}

/// Bind the configured backend; the heuristic is only used when asked for
fn build_run(config: DetectorConfig, model: Option<&Path>) -> Result<DetectionRun> {
    match (model, config.classification.backend) {
        (Some(path), _) => {
            let data = std::fs::read(path)
                .with_context(|| format!("Failed to read model {}", path.display()))?;
            let ensemble = EnsembleModel::from_json_bytes(&data)
                .with_context(|| format!("Failed to load model {}", path.display()))?;
            log::info!(
                "Loaded ensemble '{}' ({} trees) from {}",
                ensemble.name,
                ensemble.trees.len(),
                path.display()
            );
            let run = DetectionRun::new(config, Arc::new(ensemble))?;
            Ok(run.with_model_digest(calculate_sha256(&data)))
        }
        (None, ClassifierBackend::Heuristic) => Ok(DetectionRun::with_heuristic(config)?),
        (None, ClassifierBackend::Ensemble) => {
            bail!("The ensemble backend needs --model; set classification.backend to \"heuristic\" to run without one")
        }
    }
}

fn print_summary(report: &RunReport) {
    let stats = &report.statistics;
    println!(
        "{}: {} candidates, {} Halo CME, {} truncated",
        report.provenance.input_name,
        stats.candidate_count,
        stats.halo_cme_count,
        stats.truncated_count
    );
    for reported in report.halo_cme_events() {
        let interval = &reported.event.interval;
        let matched = reported
            .validation
            .as_ref()
            .and_then(|v| v.matched_catalog_id.as_deref())
            .unwrap_or("-");
        println!(
            "  {} -> {}  p={:.3}  catalog={}",
            interval.start_time.to_rfc3339(),
            interval.end_time.to_rfc3339(),
            reported.event.probability,
            matched
        );
    }
    if let Some(summary) = &report.validation {
        println!(
            "  precision={:.3} recall={:.3} f1={:.3} ({} of {} catalog events matched)",
            summary.precision, summary.recall, summary.f1, summary.matched, summary.cataloged
        );
    }
}

#[allow(clippy::too_many_arguments)]
async fn detect(
    input: PathBuf,
    catalog: Option<PathBuf>,
    model: Option<PathBuf>,
    config: Option<PathBuf>,
    output: PathBuf,
    trace: Option<PathBuf>,
    partitioned: bool,
) -> Result<()> {
    let config = load_config(config.as_deref())?;
    let catalog = load_catalog(catalog.as_deref())?;
    let mut run = build_run(config, model.as_deref())?;
    if let Some(trace) = trace {
        run = run.with_trace(TraceWriter::new(trace));
    }

    let data = tokio::fs::read(&input)
        .await
        .with_context(|| format!("Failed to read input {}", input.display()))?;
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());

    let report = if partitioned {
        run.run_partitioned(&name, &data, catalog.as_ref()).await?
    } else {
        run.run(&name, &data, catalog.as_ref())?
    };

    report
        .write_to(&output)
        .with_context(|| format!("Failed to write report {}", output.display()))?;
    print_summary(&report);
    Ok(())
}

async fn batch(
    input_dir: PathBuf,
    output_dir: PathBuf,
    catalog: Option<PathBuf>,
    model: Option<PathBuf>,
    config: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config.as_deref())?;
    let catalog = load_catalog(catalog.as_deref())?.map(Arc::new);
    let run = Arc::new(build_run(config, model.as_deref())?);

    let inputs = collect_inputs(&input_dir)
        .with_context(|| format!("Failed to list {}", input_dir.display()))?;
    if inputs.is_empty() {
        log::warn!("No CSV inputs in {}", input_dir.display());
    }
    tokio::fs::create_dir_all(&output_dir)
        .await
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let cancel = CancellationFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, finishing current input");
            on_signal.cancel();
        }
    });

    let entries = run_batch(run, inputs, catalog, Some(output_dir), cancel).await;
    let mut failed = 0;
    for entry in &entries {
        match &entry.outcome {
            BatchOutcome::Completed {
                candidate_count,
                halo_cme_count,
                ..
            } => println!(
                "{}: {} candidates, {} Halo CME",
                entry.input.display(),
                candidate_count,
                halo_cme_count
            ),
            BatchOutcome::Failed { stage, error } => {
                failed += 1;
                println!("{}: failed at {}: {}", entry.input.display(), stage, error);
            }
            BatchOutcome::Skipped => println!("{}: skipped", entry.input.display()),
        }
    }

    if failed > 0 {
        bail!("{} of {} inputs failed", failed, entries.len());
    }
    Ok(())
}

fn layout(config: Option<PathBuf>) -> Result<()> {
    let config = load_config(config.as_deref())?;
    config.validate()?;
    let rules = config.rule_set()?;
    let info = FeatureLayout::for_rules(&rules).info();
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Detect {
            input,
            catalog,
            model,
            config,
            output,
            trace,
            partitioned,
        } => detect(input, catalog, model, config, output, trace, partitioned).await,
        Command::Batch {
            input_dir,
            output_dir,
            catalog,
            model,
            config,
        } => batch(input_dir, output_dir, catalog, model, config).await,
        Command::Layout { config } => layout(config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::ensemble::ENSEMBLE_FORMAT_VERSION;
    use events::{Aggregation, DecisionTree, TreeNode, FEATURE_VERSION};
    use tempfile::TempDir;

    fn model_bytes(config: &DetectorConfig) -> Vec<u8> {
        let layout = FeatureLayout::for_rules(&config.rule_set().unwrap());
        let model = EnsembleModel {
            format_version: ENSEMBLE_FORMAT_VERSION,
            name: "constant".to_string(),
            feature_version: FEATURE_VERSION,
            feature_layout: layout.names().to_vec(),
            aggregation: Aggregation::Mean,
            base_score: 0.0,
            trees: vec![DecisionTree {
                nodes: vec![TreeNode::Leaf { value: 0.8 }],
            }],
        };
        model.to_json_bytes().unwrap()
    }

    #[test]
    fn test_model_digest_matches_artifact_bytes() {
        let config = DetectorConfig::default();
        let bytes = model_bytes(&config);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, &bytes).unwrap();

        let run = build_run(config, Some(&path)).unwrap();
        let csv = "timestamp,Tp,beta,n_p,V_sw,flux_p,flux_alpha,alpha_proton_ratio,charge_state_ratio\n\
                   2025-07-01T00:00:00Z,8.0e4,1.2,5.0,380,1.0e8,4.0e6,0.04,0.5\n\
                   2025-07-01T00:01:00Z,8.0e4,1.2,5.0,380,1.0e8,4.0e6,0.04,0.5\n";
        let report = run.run("input.csv", csv.as_bytes(), None).unwrap();

        assert_eq!(report.provenance.model_name, "constant");
        assert_eq!(report.provenance.model_sha256, Some(calculate_sha256(&bytes)));
    }

    #[test]
    fn test_ensemble_backend_requires_model() {
        assert!(build_run(DetectorConfig::default(), None).is_err());
    }
}
