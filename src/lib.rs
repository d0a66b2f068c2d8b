//! organelle-batch - resumable batch driver for per-accession assembly pipelines.
//!
//! ## Architecture
//!
//! For every dataset row, in order and one at a time:
//! - **Step pipeline**: stale cleanup → fetch → split → cleanup → mkdir →
//!   extract per target type → cleanup, each an external command
//! - **Checkpoint**: the index of the next item is written atomically after
//!   every attempted item, so an interrupted run resumes where it stopped
//!
//! ## Failure handling
//!
//! - Mandatory step fails: the item stops there and is written to the failure
//!   log; the batch continues or aborts per `FailurePolicy`
//! - Cleanup step fails: logged, never escalated

pub mod checkpoint;
pub mod exec;
pub mod models;
pub mod pipeline;

// Re-exports for convenience
pub use checkpoint::{CheckpointManager, FailureLog, FailureRecord};
pub use exec::{CommandRunner, CommandSpec, OutputSink, ProcessExecutor};
pub use models::{
    BatchError, Config, ExecError, FailurePolicy, ItemRecord, Result, StepFailure, load_dataset,
};
pub use pipeline::{BatchRunner, BatchState, ConsoleProgress, ItemPipeline, RunSummary};
