// Sample processing module
// Ingestion, cleaning, grid alignment and physical feature extraction

pub mod align;
pub mod features;
pub mod ingest;
pub mod quality;
pub mod types;

pub use align::{align, align_samples, AlignConfig, Alignment, DataGapError, DuplicatePolicy};
pub use features::{extract_features, extract_sample_features, FeatureConfig};
pub use ingest::{ingest_samples, parse_timestamp, IngestConfig, IngestError};
pub use quality::{apply_quality, PhysicalRange, QualityConfig, QualityReport};
pub use types::{finite, Measurement, Observation, Parameter, RawObservations, Sample};
