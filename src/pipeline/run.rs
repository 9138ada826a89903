// Detection run
// Ingest -> quality -> align -> features -> thresholds -> intervals ->
// classify -> validate, with a fatal error aborting before any output

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{ConfigError, DetectorConfig};
use crate::events::{
    extract_intervals, CandidateInterval, Classifier, ClassifierError, FeatureLayout,
    HeuristicModel, RuleSet, ScoringModel, SignatureVector,
};
use crate::pipeline::partition::{extract_partitioned, PartitionError};
use crate::pipeline::report::{
    calculate_sha256, AlignmentSummary, Provenance, ReportError, RunReport,
};
use crate::pipeline::trace::{Stage, TraceBuilder, TraceEntry, TraceWriter};
use crate::samples::{
    align_samples, apply_quality, extract_features, ingest_samples, IngestError, Sample,
};
use crate::validation::{validate_events, Catalog};

/// Fatal run errors, each naming the stage and input that failed
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("[ingest] {input}: {source}")]
    Ingest { input: String, source: IngestError },

    #[error("[config] {0}")]
    Config(#[from] ConfigError),

    #[error("[classification] {input}: {source}")]
    Classifier {
        input: String,
        source: ClassifierError,
    },

    #[error("[extraction] {input}: {source}")]
    Partition {
        input: String,
        source: PartitionError,
    },

    #[error("[report] {input}: {source}")]
    Report { input: String, source: ReportError },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Ingest { .. } => Stage::Ingest,
            PipelineError::Config(_) => Stage::Config,
            PipelineError::Classifier { .. } => Stage::Classification,
            PipelineError::Partition { .. } => Stage::Extraction,
            PipelineError::Report { .. } => Stage::Report,
        }
    }
}

/// Aligned, feature-enriched samples for one input
#[derive(Debug, Clone)]
pub struct PreparedInput {
    pub input_name: String,
    pub input_sha256: String,
    pub samples: Vec<Sample>,
    pub alignment: AlignmentSummary,
}

/// Everything a run needs, validated once and shared read-only
pub struct DetectionRun {
    config: Arc<DetectorConfig>,
    rules: Arc<RuleSet>,
    classifier: Classifier,
    model_sha256: Option<String>,
    trace: Option<TraceWriter>,
}

impl DetectionRun {
    /// Validate configuration and bind the model to the feature layout
    pub fn new(config: DetectorConfig, model: Arc<dyn ScoringModel>) -> Result<Self, PipelineError> {
        config.validate()?;
        let rules = config.rule_set()?;
        let layout = FeatureLayout::for_rules(&rules);

        let model_name = model.name().to_string();
        let classifier =
            Classifier::new(model, layout, config.classification.decision_threshold).map_err(
                |source| PipelineError::Classifier {
                    input: model_name,
                    source,
                },
            )?;

        Ok(DetectionRun {
            config: Arc::new(config),
            rules: Arc::new(rules),
            classifier,
            model_sha256: None,
            trace: None,
        })
    }

    /// Run with the rule-weighted heuristic scorer
    pub fn with_heuristic(config: DetectorConfig) -> Result<Self, PipelineError> {
        let rules = config.rule_set()?;
        let layout = FeatureLayout::for_rules(&rules);
        let model = HeuristicModel::with_config(&layout, rules.len(), &config.classification.heuristic);
        Self::new(config, Arc::new(model))
    }

    pub fn with_trace(mut self, trace: TraceWriter) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Record the SHA-256 of the model artifact in reports
    pub fn with_model_digest(mut self, sha256: String) -> Self {
        self.model_sha256 = Some(sha256);
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    fn trace(&self, entry: TraceEntry) {
        if let Some(writer) = &self.trace {
            if let Err(e) = writer.write(&entry) {
                log::warn!("Failed to write trace entry to {}: {}", writer.path().display(), e);
            }
        }
    }

    fn fail<T>(&self, tracer: &TraceBuilder, error: PipelineError) -> Result<T, PipelineError> {
        log::error!("Run failed at {}: {}", error.stage(), error);
        self.trace(tracer.failed(error.stage(), error.to_string()));
        Err(error)
    }

    /// Ingest, clean, align and derive features
    pub fn prepare(&self, input_name: &str, data: &[u8]) -> Result<PreparedInput, PipelineError> {
        let tracer = TraceBuilder::new(Uuid::new_v4(), input_name);
        self.prepare_traced(&tracer, input_name, data)
    }

    fn prepare_traced(
        &self,
        tracer: &TraceBuilder,
        input_name: &str,
        data: &[u8],
    ) -> Result<PreparedInput, PipelineError> {
        let config = &self.config;

        self.trace(tracer.start(Stage::Ingest, "Reading samples"));
        let mut rows = match ingest_samples(data, &config.ingest) {
            Ok(rows) => rows,
            Err(source) => {
                return self.fail(
                    tracer,
                    PipelineError::Ingest {
                        input: input_name.to_string(),
                        source,
                    },
                )
            }
        };
        let raw_rows = rows.len();
        log::info!("Ingested {} rows from {}", raw_rows, input_name);

        let quality = apply_quality(&mut rows, &config.quality);
        self.trace(tracer.complete_with(
            Stage::Quality,
            "Cleaned samples",
            serde_json::json!({ "removed": quality.total_removed() }),
        ));

        let alignment = align_samples(&rows, &config.alignment);
        for gap in &alignment.gaps {
            log::warn!("{}: {}", input_name, gap);
        }
        self.trace(tracer.complete_with(
            Stage::Alignment,
            "Aligned to uniform grid",
            serde_json::json!({
                "samples": alignment.samples.len(),
                "gaps": alignment.gaps.len(),
            }),
        ));

        let samples = extract_features(&alignment.samples, &config.features);
        self.trace(tracer.complete(Stage::Features, "Derived features"));

        let summary = AlignmentSummary {
            raw_rows,
            sample_count: samples.len(),
            cadence_secs: config.alignment.cadence_secs,
            start_time: samples.first().map(|s| s.timestamp),
            end_time: samples.last().map(|s| s.timestamp),
            duplicates_resolved: alignment.duplicates_resolved,
            gaps: alignment.gaps,
            quality,
        };

        Ok(PreparedInput {
            input_name: input_name.to_string(),
            input_sha256: calculate_sha256(data),
            samples,
            alignment: summary,
        })
    }

    fn trace_thresholds(&self, tracer: &TraceBuilder, vectors: &[SignatureVector]) {
        let min_signatures = self.config.extraction.min_signatures;
        let qualifying = vectors
            .iter()
            .filter(|sv| sv.active_count >= min_signatures)
            .count();
        self.trace(tracer.complete_with(
            Stage::Thresholds,
            "Evaluated threshold rules",
            serde_json::json!({
                "samples": vectors.len(),
                "qualifying": qualifying,
            }),
        ));
    }

    /// Threshold evaluation and sequential interval extraction
    fn extract(&self, tracer: &TraceBuilder, samples: &[Sample]) -> Vec<CandidateInterval> {
        let vectors = self.rules.evaluate_all(samples);
        self.trace_thresholds(tracer, &vectors);
        extract_intervals(&vectors, &self.config.extraction)
    }

    fn finalize(
        &self,
        tracer: &TraceBuilder,
        run_id: Uuid,
        prepared: PreparedInput,
        intervals: Vec<CandidateInterval>,
        catalog: Option<&Catalog>,
    ) -> Result<RunReport, PipelineError> {
        self.trace(tracer.complete_with(
            Stage::Extraction,
            "Extracted candidate intervals",
            serde_json::json!({ "intervals": intervals.len() }),
        ));

        let events = match self.classifier.classify_all(&intervals, &prepared.samples) {
            Ok(events) => events,
            Err(source) => {
                return self.fail(
                    tracer,
                    PipelineError::Classifier {
                        input: prepared.input_name.clone(),
                        source,
                    },
                )
            }
        };
        self.trace(tracer.complete(Stage::Classification, "Classified intervals"));

        let validation = catalog.map(|c| validate_events(&events, &c.events, &self.config.validation));
        if validation.is_some() {
            self.trace(tracer.complete(Stage::Validation, "Validated against catalog"));
        }

        let provenance = Provenance {
            input_name: prepared.input_name.clone(),
            input_sha256: prepared.input_sha256.clone(),
            model_name: self.classifier.model_name().to_string(),
            model_sha256: self.model_sha256.clone(),
            layout: self.classifier.layout().info(),
            catalog_name: catalog.map(|c| c.name.clone()),
        };

        let report = RunReport::new(
            run_id,
            provenance,
            prepared.alignment,
            events,
            validation,
            &prepared.samples,
        );
        self.trace(tracer.complete(Stage::Report, "Run complete"));
        Ok(report)
    }

    /// Run the whole pipeline sequentially on one input
    pub fn run(
        &self,
        input_name: &str,
        data: &[u8],
        catalog: Option<&Catalog>,
    ) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let tracer = TraceBuilder::new(run_id, input_name);

        let prepared = self.prepare_traced(&tracer, input_name, data)?;
        let intervals = self.extract(&tracer, &prepared.samples);
        self.finalize(&tracer, run_id, prepared, intervals, catalog)
    }

    /// Run with threshold evaluation and extraction split across partitions
    pub async fn run_partitioned(
        &self,
        input_name: &str,
        data: &[u8],
        catalog: Option<&Catalog>,
    ) -> Result<RunReport, PipelineError> {
        let partitioning = self.config.partitioning.clone().unwrap_or_default();
        partitioning.validate(&self.config.extraction)?;

        let run_id = Uuid::new_v4();
        let tracer = TraceBuilder::new(run_id, input_name);

        let mut prepared = self.prepare_traced(&tracer, input_name, data)?;
        let samples = Arc::new(std::mem::take(&mut prepared.samples));

        let extracted = extract_partitioned(
            Arc::clone(&samples),
            Arc::clone(&self.rules),
            self.config.extraction.clone(),
            &partitioning,
        )
        .await;
        let intervals = match extracted {
            Ok((vectors, intervals)) => {
                self.trace_thresholds(&tracer, &vectors);
                intervals
            }
            Err(source) => {
                return self.fail(
                    &tracer,
                    PipelineError::Partition {
                        input: input_name.to_string(),
                        source,
                    },
                )
            }
        };

        prepared.samples = Arc::try_unwrap(samples).unwrap_or_else(|shared| (*shared).clone());
        self.finalize(&tracer, run_id, prepared, intervals, catalog)
    }
}
