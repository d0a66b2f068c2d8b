//! Checkpoint module for resumable batch execution.
//!
//! Provides:
//! - `CheckpointManager`: Persistence and loading of the resume index
//! - `FailureLog`: Side log of items that failed, for manual retry

mod failures;
mod state;

pub use failures::*;
pub use state::*;
