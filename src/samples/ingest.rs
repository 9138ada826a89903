// Sample table ingestion
// Reads comma-separated sample tables, validates the schema, and maps the
// reserved missing-value sentinel to explicit missing measurements

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::samples::types::{Parameter, Sample};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Schema error: required column(s) absent: {}", .0.join(", "))]
    Schema(Vec<String>),

    #[error("Line {line}: invalid timestamp '{value}'")]
    InvalidTimestamp { line: usize, value: String },

    #[error("Line {line}: invalid value '{value}' in column {column}")]
    InvalidValue {
        line: usize,
        column: String,
        value: String,
    },

    #[error("Line {line}: expected {expected} fields, found {found}")]
    RaggedRow {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Input contains no header row")]
    Empty,

    #[error("Input is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Settings for reading sample tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Cell content that marks a missing value
    /// Must not parse as a number
    pub missing_sentinel: String,

    /// Field delimiter
    pub delimiter: char,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            missing_sentinel: "NA".to_string(),
            delimiter: ',',
        }
    }
}

/// Header names accepted for the timestamp column
const TIMESTAMP_COLUMNS: [&str; 2] = ["timestamp", "time"];

/// Parse a timestamp in RFC 3339, naive ISO-8601 (assumed UTC) or
/// numeric epoch-seconds form
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    let epoch: f64 = value.parse().ok()?;
    if !epoch.is_finite() {
        return None;
    }
    let millis = (epoch * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis).single()
}

/// Ingest a sample table from raw bytes
/// Returns rows in file order; duplicates and irregular spacing are kept
/// for the aligner to resolve
pub fn ingest_samples(data: &[u8], config: &IngestConfig) -> Result<Vec<Sample>, IngestError> {
    let text = std::str::from_utf8(data)?;
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header_line) = lines.next().ok_or(IngestError::Empty)?;
    let header: Vec<&str> = header_line
        .split(config.delimiter)
        .map(|h| h.trim())
        .collect();
    let index: HashMap<&str, usize> = header.iter().enumerate().map(|(i, h)| (*h, i)).collect();

    let timestamp_col = TIMESTAMP_COLUMNS.iter().find_map(|name| index.get(name).copied());

    let mut absent = Vec::new();
    if timestamp_col.is_none() {
        absent.push(TIMESTAMP_COLUMNS[0].to_string());
    }
    for parameter in Parameter::REQUIRED_INPUTS {
        if !index.contains_key(parameter.name()) {
            absent.push(parameter.name().to_string());
        }
    }
    let timestamp_col = match timestamp_col {
        Some(col) if absent.is_empty() => col,
        _ => return Err(IngestError::Schema(absent)),
    };

    let columns: Vec<(Parameter, usize)> = Parameter::INPUTS
        .iter()
        .filter_map(|p| index.get(p.name()).map(|i| (*p, *i)))
        .collect();

    let mut samples = Vec::new();

    for (line_no, line) in lines {
        let fields: Vec<&str> = line.split(config.delimiter).map(|f| f.trim()).collect();
        if fields.len() != header.len() {
            return Err(IngestError::RaggedRow {
                line: line_no,
                expected: header.len(),
                found: fields.len(),
            });
        }

        let raw_ts = fields[timestamp_col];
        let timestamp = parse_timestamp(raw_ts).ok_or_else(|| IngestError::InvalidTimestamp {
            line: line_no,
            value: raw_ts.to_string(),
        })?;

        let mut sample = Sample::empty(timestamp);
        for (parameter, col) in columns.iter() {
            let cell = fields[*col];
            if cell == config.missing_sentinel {
                continue;
            }

            let value: f64 = cell
                .parse()
                .ok()
                .filter(|v: &f64| v.is_finite())
                .ok_or_else(|| IngestError::InvalidValue {
                    line: line_no,
                    column: parameter.name().to_string(),
                    value: cell.to_string(),
                })?;
            sample.set(*parameter, Some(value));
        }

        samples.push(sample);
    }

    log::debug!("Ingested {} sample rows ({} columns)", samples.len(), header.len());

    Ok(samples)
}
