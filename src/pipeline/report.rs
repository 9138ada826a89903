// Run report
// Serializable outcome of one detection run with provenance hashes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::events::{ClassifiedEvent, LayoutInfo};
use crate::samples::{DataGapError, QualityReport, Sample};
use crate::validation::{Validation, ValidationResult, ValidationSummary};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Calculate SHA256 hash of data
pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Where the run's inputs came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub input_name: String,

    pub input_sha256: String,

    pub model_name: String,

    /// Absent for models without an artifact (heuristic)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_sha256: Option<String>,

    pub layout: LayoutInfo,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_name: Option<String>,
}

/// Aligned stream summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlignmentSummary {
    pub raw_rows: usize,

    pub sample_count: usize,

    pub cadence_secs: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    pub duplicates_resolved: usize,

    pub gaps: Vec<DataGapError>,

    pub quality: QualityReport,
}

/// Statistics over the Halo-CME detections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub candidate_count: usize,

    pub halo_cme_count: usize,

    pub truncated_count: usize,

    /// Mean Halo-CME interval duration
    pub mean_duration_hours: Option<f64>,

    /// Peak V_sw inside Halo-CME intervals
    pub max_speed: Option<f64>,

    /// Peak n_p inside Halo-CME intervals
    pub max_density: Option<f64>,
}

/// Samples under the given events' intervals
fn covered<'a>(
    events: &'a [&'a ClassifiedEvent],
    samples: &'a [Sample],
) -> impl Iterator<Item = &'a Sample> + 'a {
    events.iter().flat_map(move |e| {
        let end = (e.interval.last_index + 1).min(samples.len());
        let start = e.interval.first_index.min(end);
        samples[start..end].iter()
    })
}

impl RunStatistics {
    pub fn compute(events: &[ClassifiedEvent], samples: &[Sample]) -> Self {
        let halo: Vec<&ClassifiedEvent> = events.iter().filter(|e| e.is_halo_cme()).collect();

        let mean_duration_hours = if halo.is_empty() {
            None
        } else {
            Some(halo.iter().map(|e| e.interval.duration_hours()).sum::<f64>() / halo.len() as f64)
        };

        RunStatistics {
            candidate_count: events.len(),
            halo_cme_count: halo.len(),
            truncated_count: events.iter().filter(|e| e.interval.truncated).count(),
            mean_duration_hours,
            max_speed: covered(&halo, samples).filter_map(|s| s.v_sw).reduce(f64::max),
            max_density: covered(&halo, samples).filter_map(|s| s.n_p).reduce(f64::max),
        }
    }
}

/// Classified event with its validation outcome attached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedEvent {
    #[serde(flatten)]
    pub event: ClassifiedEvent,

    /// Present for Halo-CME events when a catalog was supplied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

/// Complete run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,

    pub generated_at: DateTime<Utc>,

    pub provenance: Provenance,

    pub alignment: AlignmentSummary,

    /// Events in interval order
    pub events: Vec<ReportedEvent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationSummary>,

    pub statistics: RunStatistics,
}

impl RunReport {
    pub fn new(
        run_id: Uuid,
        provenance: Provenance,
        alignment: AlignmentSummary,
        events: Vec<ClassifiedEvent>,
        validation: Option<Validation>,
        samples: &[Sample],
    ) -> Self {
        let statistics = RunStatistics::compute(&events, samples);

        let events = events
            .into_iter()
            .map(|event| {
                let result = validation
                    .as_ref()
                    .and_then(|v| v.result_for(event.id))
                    .cloned();
                ReportedEvent {
                    event,
                    validation: result,
                }
            })
            .collect();

        RunReport {
            run_id,
            generated_at: Utc::now(),
            provenance,
            alignment,
            events,
            validation: validation.map(|v| v.summary),
            statistics,
        }
    }

    pub fn halo_cme_events(&self) -> impl Iterator<Item = &ReportedEvent> {
        self.events.iter().filter(|e| e.event.is_halo_cme())
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Write atomically: a temp file next to the target, then rename
    pub fn write_to(&self, path: &Path) -> Result<(), ReportError> {
        let bytes = self.to_json_bytes()?;

        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);

        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;

        log::info!("Wrote report {} ({} events)", path.display(), self.events.len());
        Ok(())
    }
}
