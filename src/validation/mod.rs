// Validation module
// Catalog input and temporal matching of detections against it

pub mod catalog;
pub mod matcher;

pub use catalog::{read_catalog, Catalog, CatalogError, CatalogEvent};
pub use matcher::{
    validate_events, MatchPolicy, Validation, ValidationConfig, ValidationResult,
    ValidationSummary,
};
