// Pipeline progress tracing
// Append-only JSONL trace file, one line per stage transition of a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during trace operations
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Config,
    Ingest,
    Quality,
    Alignment,
    Features,
    Thresholds,
    Extraction,
    Classification,
    Validation,
    Report,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Ingest => "ingest",
            Stage::Quality => "quality",
            Stage::Alignment => "alignment",
            Stage::Features => "features",
            Stage::Thresholds => "thresholds",
            Stage::Extraction => "extraction",
            Stage::Classification => "classification",
            Stage::Validation => "validation",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single trace entry in the pipeline execution log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,

    /// Run this entry belongs to
    pub run_id: Uuid,

    /// Input name (file name for file runs)
    pub input: String,

    pub stage: Stage,

    /// Progress percentage [0.0, 1.0]
    pub progress: f32,

    /// Human-readable message describing current operation
    pub message: String,

    /// Optional structured data (e.g., sample counts, interval counts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TraceEntry {
    /// Serialize to JSON line (with newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Pipeline trace writer
/// Manages append-only JSONL trace file
#[derive(Debug, Clone)]
pub struct TraceWriter {
    file_path: PathBuf,
}

impl TraceWriter {
    pub fn new(file_path: PathBuf) -> Self {
        TraceWriter { file_path }
    }

    /// Append a trace entry to the file
    /// Creates file if it doesn't exist
    pub fn write(&self, entry: &TraceEntry) -> Result<(), TraceError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        let json_line = entry.to_json_line()?;
        file.write_all(json_line.as_bytes())?;
        file.flush()?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Builder for the entries of one run
#[derive(Debug, Clone)]
pub struct TraceBuilder {
    run_id: Uuid,
    input: String,
}

impl TraceBuilder {
    pub fn new(run_id: Uuid, input: impl Into<String>) -> Self {
        TraceBuilder {
            run_id,
            input: input.into(),
        }
    }

    fn entry(&self, stage: Stage, progress: f32, message: String, data: Option<serde_json::Value>) -> TraceEntry {
        TraceEntry {
            timestamp: Utc::now(),
            run_id: self.run_id,
            input: self.input.clone(),
            stage,
            progress: progress.clamp(0.0, 1.0),
            message,
            data,
        }
    }

    /// Create a start entry (progress = 0.0)
    pub fn start(&self, stage: Stage, message: impl Into<String>) -> TraceEntry {
        self.entry(stage, 0.0, message.into(), None)
    }

    /// Create a complete entry (progress = 1.0)
    pub fn complete(&self, stage: Stage, message: impl Into<String>) -> TraceEntry {
        self.entry(stage, 1.0, message.into(), None)
    }

    /// Create a complete entry with data
    pub fn complete_with(
        &self,
        stage: Stage,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> TraceEntry {
        self.entry(stage, 1.0, message.into(), Some(data))
    }

    /// Entry for a failed stage; progress stays at 0.0
    pub fn failed(&self, stage: Stage, message: impl Into<String>) -> TraceEntry {
        self.entry(stage, 0.0, message.into(), None)
    }
}

/// Read trace entries from a JSONL file
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let contents = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let entry: TraceEntry = serde_json::from_str(line)?;
        entries.push(entry);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_entries() {
        let builder = TraceBuilder::new(Uuid::new_v4(), "swis_l2.csv");
        let start = builder.start(Stage::Alignment, "Aligning");
        assert_eq!(start.progress, 0.0);
        assert_eq!(start.input, "swis_l2.csv");

        let done = builder.complete_with(
            Stage::Extraction,
            "Extracted",
            serde_json::json!({ "intervals": 3 }),
        );
        assert_eq!(done.progress, 1.0);
        assert_eq!(done.data.unwrap()["intervals"], 3);
    }

    #[test]
    fn test_stage_serialization() {
        assert_eq!(serde_json::to_string(&Stage::Classification).unwrap(), "\"classification\"");
        assert_eq!(Stage::Ingest.to_string(), "ingest");
        assert!(Stage::Ingest < Stage::Report);
    }

    #[test]
    fn test_trace_writer() {
        let temp_dir = TempDir::new().unwrap();
        let trace_path = temp_dir.path().join("trace.jsonl");

        let writer = TraceWriter::new(trace_path.clone());
        let builder = TraceBuilder::new(Uuid::new_v4(), "input.csv");

        writer.write(&builder.start(Stage::Ingest, "Start")).unwrap();
        writer.write(&builder.complete(Stage::Ingest, "Done")).unwrap();

        // Read back and verify
        let entries = read_trace_file(&trace_path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stage, Stage::Ingest);
        assert_eq!(entries[0].run_id, entries[1].run_id);
        assert_eq!(entries[1].progress, 1.0);
    }

    #[test]
    fn test_json_line_format() {
        let entry = TraceBuilder::new(Uuid::new_v4(), "x").start(Stage::Report, "Testing");
        let json_line = entry.to_json_line().unwrap();

        // Should end with newline
        assert!(json_line.ends_with('\n'));

        let parsed: TraceEntry = serde_json::from_str(json_line.trim()).unwrap();
        assert_eq!(parsed.stage, Stage::Report);
    }
}
