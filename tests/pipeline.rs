// End-to-end detection runs through the public API

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use halocme_lib::config::DetectorConfig;
use halocme_lib::events::{
    ClassifierError, Comparator, Direction, EventLabel, FeatureLayout, ModelSchema, ScoringModel,
    ThresholdRule,
};
use halocme_lib::pipeline::{
    run_batch, BatchOutcome, CancellationFlag, DetectionRun, PartitionConfig, PipelineError,
    RunReport, Stage,
};
use halocme_lib::samples::Parameter;
use halocme_lib::validation::{Catalog, CatalogEvent};

const HEADER: &str =
    "timestamp,Tp,beta,n_p,V_sw,flux_p,flux_alpha,alpha_proton_ratio,charge_state_ratio";

struct StubModel {
    score: f64,
    schema: ModelSchema,
}

impl ScoringModel for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    fn schema(&self) -> ModelSchema {
        self.schema
    }

    fn score(&self, _features: &[f64]) -> f64 {
        self.score
    }
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()
}

fn time_at(i: usize) -> DateTime<Utc> {
    base_time() + Duration::minutes(i as i64)
}

fn rules() -> Vec<ThresholdRule> {
    vec![
        ThresholdRule::new("low_beta", Parameter::PlasmaBeta, Comparator::Lt, 0.5, Direction::Below),
        ThresholdRule::new("fast_wind", Parameter::SolarWindSpeed, Comparator::Gt, 450.0, Direction::Above),
    ]
}

fn config() -> DetectorConfig {
    let mut config = DetectorConfig::default();
    config.thresholds = rules();
    config.extraction.min_signatures = 2;
    config.extraction.enter_min_duration = 3;
    config.extraction.exit_min_duration = 2;
    config.extraction.merge_gap = 2;
    config
}

/// One row per minute; rows inside any event range carry low beta and fast wind
fn csv(rows: usize, events: &[std::ops::Range<usize>], charge_state: &str) -> String {
    let mut out = format!("{}\n", HEADER);
    for i in 0..rows {
        let active = events.iter().any(|r| r.contains(&i));
        let (beta, v) = if active { (0.3, 520.0) } else { (1.2, 380.0) };
        out.push_str(&format!(
            "{},8.0e4,{},5.0,{},1.0e8,4.0e6,0.04,{}\n",
            time_at(i).format("%Y-%m-%dT%H:%M:%SZ"),
            beta,
            v,
            charge_state
        ));
    }
    out
}

fn stub_run(config: DetectorConfig, score: f64) -> DetectionRun {
    let layout = FeatureLayout::for_rules(&config.rule_set().unwrap());
    let model = StubModel {
        score,
        schema: ModelSchema {
            feature_version: layout.version(),
            layout_hash: Some(layout.hash()),
            dimension: layout.len(),
        },
    };
    DetectionRun::new(config, Arc::new(model)).unwrap()
}

fn catalog(entries: &[(DateTime<Utc>, &str)]) -> Catalog {
    Catalog {
        name: "reference.csv".to_string(),
        events: entries
            .iter()
            .map(|(onset, id)| CatalogEvent::new(*onset, id))
            .collect(),
    }
}

fn interval_bounds(report: &RunReport) -> Vec<(usize, usize, bool)> {
    report
        .events
        .iter()
        .map(|e| {
            let i = &e.event.interval;
            (i.first_index, i.last_index, i.truncated)
        })
        .collect()
}

#[test]
fn test_single_event_detected_classified_and_validated() {
    let run = stub_run(config(), 0.9);
    let reference = catalog(&[(time_at(6), "CME-2025-07-01")]);

    let report = run
        .run("swis.csv", csv(30, &[5..11], "0.5").as_bytes(), Some(&reference))
        .unwrap();

    assert_eq!(report.events.len(), 1);
    let event = &report.events[0].event;
    assert_eq!(event.interval.first_index, 5);
    assert_eq!(event.interval.last_index, 10);
    assert_eq!(event.interval.start_time, time_at(5));
    assert_eq!(event.interval.end_time, time_at(10));
    assert_eq!(event.label, EventLabel::HaloCme);
    let triggered: Vec<&str> = event
        .interval
        .triggered_signatures
        .iter()
        .map(String::as_str)
        .collect();
    assert_eq!(triggered, vec!["fast_wind", "low_beta"]);

    let result = report.events[0].validation.as_ref().unwrap();
    assert_eq!(result.matched_catalog_id.as_deref(), Some("CME-2025-07-01"));
    assert_eq!(result.time_offset_secs, Some(60));

    let summary = report.validation.as_ref().unwrap();
    assert_eq!(summary.precision, 1.0);
    assert_eq!(summary.recall, 1.0);
    assert_eq!(report.provenance.model_name, "stub");
    assert_eq!(report.provenance.catalog_name.as_deref(), Some("reference.csv"));
}

#[test]
fn test_low_score_is_non_event_and_not_validated() {
    let run = stub_run(config(), 0.2);
    let reference = catalog(&[(time_at(6), "CME-1")]);

    let report = run
        .run("swis.csv", csv(30, &[5..11], "0.5").as_bytes(), Some(&reference))
        .unwrap();

    assert_eq!(report.events.len(), 1);
    assert_eq!(report.events[0].event.label, EventLabel::NonEvent);
    assert!(report.events[0].validation.is_none());

    let summary = report.validation.as_ref().unwrap();
    assert_eq!(summary.detected, 0);
    assert_eq!(summary.precision, 0.0);
    assert_eq!(summary.recall, 0.0);
    assert_eq!(summary.unmatched_catalog_ids, vec!["CME-1".to_string()]);
}

#[test]
fn test_parameter_missing_for_whole_interval() {
    let mut config = config();
    config.thresholds.push(ThresholdRule::new(
        "high_charge_state",
        Parameter::ChargeStateRatio,
        Comparator::Gt,
        0.8,
        Direction::Above,
    ));
    let run = stub_run(config, 0.9);

    let report = run
        .run("swis.csv", csv(30, &[5..11], "NA").as_bytes(), None)
        .unwrap();

    assert_eq!(report.events.len(), 1);
    let event = &report.events[0].event;
    assert!(!event.interval.triggered_signatures.contains("high_charge_state"));
    assert!(event.interval.insufficient_data.contains("high_charge_state"));

    let layout = run.classifier().layout();
    let mean = layout.index_of("charge_state_ratio.mean").unwrap();
    assert_eq!(event.features.values[mean], 0.0);
    assert!(!event.features.is_available("charge_state_ratio.mean"));
    assert!(event.features.is_available("beta.mean"));
}

#[test]
fn test_equidistant_onsets_match_earlier() {
    let run = stub_run(config(), 0.9);
    let reference = catalog(&[(time_at(7), "after"), (time_at(3), "before")]);

    let report = run
        .run("swis.csv", csv(30, &[5..11], "0.5").as_bytes(), Some(&reference))
        .unwrap();

    let result = report.events[0].validation.as_ref().unwrap();
    assert_eq!(result.matched_catalog_id.as_deref(), Some("before"));
    assert_eq!(result.time_offset_secs, Some(-120));
}

#[test]
fn test_model_dimension_mismatch_is_fatal() {
    let config = config();
    let layout = FeatureLayout::for_rules(&config.rule_set().unwrap());
    let model = StubModel {
        score: 0.9,
        schema: ModelSchema {
            feature_version: layout.version(),
            layout_hash: None,
            dimension: layout.len() + 1,
        },
    };

    let Err(err) = DetectionRun::new(config, Arc::new(model)) else {
        panic!("dimension mismatch accepted");
    };
    assert_eq!(err.stage(), Stage::Classification);
    assert!(matches!(
        err,
        PipelineError::Classifier {
            source: ClassifierError::ModelInput { .. },
            ..
        }
    ));
}

#[test]
fn test_event_running_to_end_is_truncated() {
    let run = stub_run(config(), 0.9);
    let report = run
        .run("swis.csv", csv(20, &[15..20], "0.5").as_bytes(), None)
        .unwrap();

    assert_eq!(interval_bounds(&report), vec![(15, 19, true)]);
    assert_eq!(report.statistics.truncated_count, 1);
}

#[tokio::test]
async fn test_partitioned_matches_sequential() {
    let mut config = config();
    config.partitioning = Some(PartitionConfig {
        partition_len: 25,
        overlap: 10,
    });
    let run = stub_run(config, 0.9);

    // Events inside cores, straddling seams, and running to the end
    let events = [3..9, 22..30, 48..53, 55..60, 74..80, 96..100];
    let data = csv(100, &events, "0.5");

    let sequential = run.run("swis.csv", data.as_bytes(), None).unwrap();
    let partitioned = run
        .run_partitioned("swis.csv", data.as_bytes(), None)
        .await
        .unwrap();

    assert!(!sequential.events.is_empty());
    assert_eq!(interval_bounds(&partitioned), interval_bounds(&sequential));
    assert_eq!(partitioned.statistics, sequential.statistics);
}

/// Confirmed at 0..3, then one sample on, one off through `until`
fn flicker_events(until: usize) -> Vec<std::ops::Range<usize>> {
    std::iter::once(0..3)
        .chain((4..until).step_by(2).map(|i| i..i + 1))
        .collect()
}

#[tokio::test]
async fn test_partitioned_flicker_across_seams_matches_sequential() {
    let mut config = config();
    config.partitioning = Some(PartitionConfig {
        partition_len: 25,
        overlap: 10,
    });
    let run = stub_run(config, 0.9);

    for (rows, until) in [(120, 90), (80, 80)] {
        let data = csv(rows, &flicker_events(until), "0.5");

        let sequential = run.run("swis.csv", data.as_bytes(), None).unwrap();
        let partitioned = run
            .run_partitioned("swis.csv", data.as_bytes(), None)
            .await
            .unwrap();

        assert_eq!(interval_bounds(&sequential).len(), 1);
        assert_eq!(interval_bounds(&partitioned), interval_bounds(&sequential));
        assert_eq!(
            partitioned.events[0].event.interval.triggered_signatures,
            sequential.events[0].event.interval.triggered_signatures
        );
    }

    let data = csv(120, &flicker_events(90), "0.5");
    let sequential = run.run("swis.csv", data.as_bytes(), None).unwrap();
    assert_eq!(interval_bounds(&sequential), vec![(0, 88, false)]);
}

#[test]
fn test_partition_overlap_too_small_rejected() {
    let mut config = config();
    config.partitioning = Some(PartitionConfig {
        partition_len: 25,
        overlap: 1,
    });
    // Construction validates the partition settings too
    assert!(matches!(
        DetectionRun::with_heuristic(config),
        Err(PipelineError::Config(_))
    ));
}

#[tokio::test]
async fn test_cancelled_batch_skips_every_input() {
    let run = Arc::new(stub_run(config(), 0.9));
    let inputs = vec![PathBuf::from("a.csv"), PathBuf::from("b.csv")];
    let cancel = CancellationFlag::new();
    cancel.cancel();

    let entries = run_batch(run, inputs, None, None, cancel).await;

    assert_eq!(entries.len(), 2);
    assert!(entries
        .iter()
        .all(|e| matches!(e.outcome, BatchOutcome::Skipped)));
}

#[tokio::test]
async fn test_batch_records_failure_and_continues() {
    let dir = TempDir::new().unwrap();
    let good = dir.path().join("good.csv");
    let bad = dir.path().join("bad.csv");
    std::fs::write(&good, csv(30, &[5..11], "0.5")).unwrap();
    std::fs::write(&bad, "timestamp,Tp\n2025-07-01T00:00:00Z,1\n").unwrap();
    let out = dir.path().join("reports");
    std::fs::create_dir_all(&out).unwrap();

    let run = Arc::new(stub_run(config(), 0.9));
    let entries = run_batch(
        run,
        vec![bad.clone(), good.clone()],
        None,
        Some(out.clone()),
        CancellationFlag::new(),
    )
    .await;

    assert!(matches!(
        entries[0].outcome,
        BatchOutcome::Failed {
            stage: Stage::Ingest,
            ..
        }
    ));
    match &entries[1].outcome {
        BatchOutcome::Completed {
            report_path,
            halo_cme_count,
            ..
        } => {
            assert_eq!(*halo_cme_count, 1);
            let path = report_path.as_ref().unwrap();
            assert_eq!(path, &out.join("good.report.json"));
            let report = RunReport::from_json_bytes(&std::fs::read(path).unwrap()).unwrap();
            assert_eq!(report.events.len(), 1);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(!out.join("bad.report.json").exists());
}
