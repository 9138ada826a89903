// Reference catalog input
// Known CME onset times used as ground truth

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::samples::parse_timestamp;

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEvent {
    pub onset_time: DateTime<Utc>,
    pub catalog_id: String,
}

impl CatalogEvent {
    pub fn new(onset_time: DateTime<Utc>, catalog_id: &str) -> Self {
        CatalogEvent {
            onset_time,
            catalog_id: catalog_id.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog header must contain onset_time and catalog_id, found: {0}")]
    Header(String),

    #[error("Catalog line {line}: {reason}")]
    Row { line: usize, reason: String },

    #[error("Duplicate catalog id: {0}")]
    DuplicateId(String),

    #[error("Catalog JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Catalog encoding error: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn read_csv(text: &str) -> Result<Vec<CatalogEvent>, CatalogError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

    let Some((_, header)) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<&str> = header.split(',').map(str::trim).collect();
    let onset_col = columns.iter().position(|c| *c == "onset_time");
    let id_col = columns.iter().position(|c| *c == "catalog_id");
    let (Some(onset_col), Some(id_col)) = (onset_col, id_col) else {
        return Err(CatalogError::Header(header.to_string()));
    };

    let mut events = Vec::new();
    for (line, row) in lines {
        let fields: Vec<&str> = row.split(',').map(str::trim).collect();
        if fields.len() != columns.len() {
            return Err(CatalogError::Row {
                line,
                reason: format!("expected {} fields, found {}", columns.len(), fields.len()),
            });
        }

        let onset_time = parse_timestamp(fields[onset_col]).ok_or_else(|| CatalogError::Row {
            line,
            reason: format!("invalid onset_time '{}'", fields[onset_col]),
        })?;
        let catalog_id = fields[id_col];
        if catalog_id.is_empty() {
            return Err(CatalogError::Row {
                line,
                reason: "empty catalog_id".to_string(),
            });
        }

        events.push(CatalogEvent::new(onset_time, catalog_id));
    }
    Ok(events)
}

/// Read a catalog from a JSON array or an `onset_time,catalog_id` CSV table
/// Entries are returned ordered by onset time
pub fn read_catalog(data: &[u8]) -> Result<Vec<CatalogEvent>, CatalogError> {
    let text = std::str::from_utf8(data)?;

    let mut events = if text.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<CatalogEvent>>(text)?
    } else {
        read_csv(text)?
    };

    let mut ids: Vec<&str> = events.iter().map(|e| e.catalog_id.as_str()).collect();
    ids.sort_unstable();
    if let Some(pair) = ids.windows(2).find(|w| w[0] == w[1]) {
        return Err(CatalogError::DuplicateId(pair[0].to_string()));
    }

    events.sort_by(|a, b| {
        a.onset_time
            .cmp(&b.onset_time)
            .then_with(|| a.catalog_id.cmp(&b.catalog_id))
    });
    Ok(events)
}

/// Named, onset-ordered catalog shared read-only across runs
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub name: String,
    pub events: Vec<CatalogEvent>,
}

impl Catalog {
    pub fn from_bytes(name: &str, data: &[u8]) -> Result<Self, CatalogError> {
        Ok(Catalog {
            name: name.to_string(),
            events: read_catalog(data)?,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let catalog = Self::from_bytes(&name, &data)?;
        log::info!("Loaded {} catalog events from {}", catalog.events.len(), path.display());
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_csv_catalog_sorted() {
        let csv = "onset_time,catalog_id\n\
                   2025-07-02T10:00:00Z,CME-2\n\
                   2025-07-01T08:30:00Z,CME-1\n";
        let events = read_catalog(csv.as_bytes()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].catalog_id, "CME-1");
        assert!(events[0].onset_time < events[1].onset_time);
    }

    #[test]
    fn test_read_json_catalog() {
        let json = r#"[{"onset_time": "2025-07-01T08:30:00Z", "catalog_id": "CACTUS-17"}]"#;
        let events = read_catalog(json.as_bytes()).unwrap();
        assert_eq!(events[0].catalog_id, "CACTUS-17");
    }

    #[test]
    fn test_bad_header_rejected() {
        let csv = "time,id\n2025-07-01T08:30:00Z,CME-1\n";
        assert!(matches!(
            read_catalog(csv.as_bytes()),
            Err(CatalogError::Header(_))
        ));
    }

    #[test]
    fn test_bad_onset_reports_line() {
        let csv = "onset_time,catalog_id\nsoon,CME-1\n";
        assert!(matches!(
            read_catalog(csv.as_bytes()),
            Err(CatalogError::Row { line: 2, .. })
        ));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let csv = "onset_time,catalog_id\n\
                   2025-07-01T08:30:00Z,CME-1\n\
                   2025-07-03T08:30:00Z,CME-1\n";
        assert!(matches!(
            read_catalog(csv.as_bytes()),
            Err(CatalogError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_empty_catalog() {
        assert!(read_catalog(b"").unwrap().is_empty());
    }

    #[test]
    fn test_load_catalog_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cactus.csv");
        std::fs::write(&path, "onset_time,catalog_id\n2025-07-01T08:30:00Z,CME-1\n").unwrap();

        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.name, "cactus.csv");
        assert_eq!(catalog.len(), 1);
    }
}
