// Pipeline execution and monitoring module
// Orchestrates detection runs over single files, partitions and batches

pub mod batch;
pub mod partition;
pub mod report;
pub mod run;
pub mod trace;

pub use batch::{collect_inputs, run_batch, BatchEntry, BatchOutcome, CancellationFlag};
pub use partition::{extract_partitioned, Partition, PartitionConfig, PartitionError};
pub use report::{
    calculate_sha256, AlignmentSummary, Provenance, ReportError, ReportedEvent, RunReport,
    RunStatistics,
};
pub use run::{DetectionRun, PipelineError, PreparedInput};
pub use trace::{read_trace_file, Stage, TraceBuilder, TraceEntry, TraceError, TraceWriter};
