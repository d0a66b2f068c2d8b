//! Batch orchestrator.
//!
//! Pipeline flow:
//! Dataset → resume index → setup → for each item: pipeline → failure policy → checkpoint
//!
//! Items run strictly one at a time, in dataset order. The checkpoint is
//! written after every attempted item, before the next one starts.

use super::{ItemPipeline, ProgressReporter};
use crate::checkpoint::{CheckpointManager, FailureLog, FailureRecord};
use crate::exec::{CommandRunner, OutputSink};
use crate::models::{BatchError, FailurePolicy, ItemRecord, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Process-wide state of a batch run.
#[derive(Debug, Clone)]
pub struct BatchState {
    items: Vec<ItemRecord>,
    /// Index of the next item to process
    index: usize,
    /// One past the last index this run may process
    stop: usize,
}

impl BatchState {
    /// `end` is an inclusive ceiling; `None` means all remaining items.
    pub fn new(items: Vec<ItemRecord>, start: usize, end: Option<usize>) -> Self {
        let stop = match end {
            Some(end) => end.saturating_add(1).min(items.len()),
            None => items.len(),
        };
        Self {
            items,
            index: start,
            stop,
        }
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Items left in this run.
    pub fn remaining(&self) -> usize {
        self.stop.saturating_sub(self.index)
    }

    /// The item at the current index, if still within bounds.
    pub fn current(&self) -> Option<&ItemRecord> {
        if self.index < self.stop {
            self.items.get(self.index)
        } else {
            None
        }
    }

    pub fn items(&self) -> &[ItemRecord] {
        &self.items
    }

    fn advance(&mut self) {
        self.index += 1;
    }
}

/// Aggregate result of a run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Items in the dataset
    pub total: usize,
    /// Index the run started from
    pub start: usize,
    /// Checkpoint value at the end of the run
    pub next_index: usize,
    pub attempted: usize,
    pub succeeded: usize,
    /// Identifiers of items whose pipeline failed
    pub failed: Vec<String>,
    pub runtime_secs: f64,
}

/// Drives the item pipeline over a batch.
pub struct BatchRunner {
    pipeline: ItemPipeline,
    runner: Arc<dyn CommandRunner>,
    checkpoint: CheckpointManager,
    failures: FailureLog,
    policy: FailurePolicy,
    run_setup: bool,
    allow_skip: bool,
    run_id: Uuid,
}

impl BatchRunner {
    pub fn new(
        pipeline: ItemPipeline,
        runner: Arc<dyn CommandRunner>,
        checkpoint: CheckpointManager,
        failures: FailureLog,
    ) -> Self {
        let policy = pipeline.config().execution.failure_policy;
        Self {
            pipeline,
            runner,
            checkpoint,
            failures,
            policy,
            run_setup: true,
            allow_skip: false,
            run_id: Uuid::new_v4(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Skip the run-level setup command.
    pub fn skip_setup(mut self, skip: bool) -> Self {
        self.run_setup = !skip;
        self
    }

    /// Allow a start index past the stored checkpoint.
    ///
    /// The items in between are then counted as done without being attempted.
    pub fn allow_skip(mut self, allow: bool) -> Self {
        self.allow_skip = allow;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Run every remaining item of `state`.
    ///
    /// Under `FailurePolicy::Abort` the first item failure is returned as an
    /// error and the checkpoint stays on that item.
    ///
    /// The stored checkpoint never moves backwards: re-running earlier items
    /// leaves it where it was. A start past the stored checkpoint is refused
    /// unless `allow_skip` is set.
    pub async fn run(
        &self,
        state: &mut BatchState,
        progress: &dyn ProgressReporter,
        sink: &dyn OutputSink,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let total = state.total();
        let stored = self.checkpoint.load();

        if state.index() > stored && state.remaining() > 0 {
            if !self.allow_skip {
                return Err(BatchError::SkipsItems {
                    checkpoint: stored,
                    start: state.index(),
                });
            }
            warn!(
                checkpoint = stored,
                start = state.index(),
                "Skipping items that were never attempted"
            );
        }

        let mut summary = RunSummary {
            run_id: self.run_id,
            total,
            start: state.index(),
            next_index: state.index().max(stored),
            ..Default::default()
        };

        if state.remaining() == 0 {
            info!(index = state.index(), total, "Nothing to do");
            progress.finish(&summary);
            return Ok(summary);
        }

        info!(
            run_id = %self.run_id,
            start = state.index(),
            remaining = state.remaining(),
            total,
            policy = ?self.policy,
            "Starting batch"
        );

        if self.run_setup {
            if let Some(setup) = self.pipeline.setup_command() {
                info!(command = %setup, "Running setup");
                if let Err(e) = self.runner.run(&setup, sink).await {
                    progress.abandon(&summary);
                    return Err(BatchError::Setup(e));
                }
            }
        }

        while let Some(item) = state.current().cloned() {
            let index = state.index();
            progress.report(index, total, &format!("{} ({}/{})", item.id, index + 1, total));
            summary.attempted += 1;

            match self.pipeline.run(&item, self.runner.as_ref(), sink).await {
                Ok(report) => {
                    summary.succeeded += 1;
                    info!(
                        item = %report.item_id,
                        output = %report.output_dir.display(),
                        cleanup_failures = report.cleanup_failures,
                        elapsed_secs = format!("{:.1}", report.elapsed.as_secs_f64()),
                        "Item complete"
                    );
                }
                Err(failure) => {
                    error!(
                        item = %failure.item_id,
                        step = %failure.step,
                        error = %failure.source,
                        "Item failed"
                    );
                    summary.failed.push(item.id.clone());
                    self.failures
                        .record(&FailureRecord::from_failure(self.run_id, index, &failure))
                        .await?;

                    if self.policy == FailurePolicy::Abort {
                        summary.runtime_secs = started.elapsed().as_secs_f64();
                        progress.abandon(&summary);
                        return Err(failure.into());
                    }
                }
            }

            state.advance();
            let next_index = state.index().max(stored);
            self.checkpoint.save(next_index).await?;
            summary.next_index = next_index;
        }

        summary.runtime_secs = started.elapsed().as_secs_f64();
        progress.finish(&summary);

        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed.len(),
            next_index = summary.next_index,
            "Batch complete"
        );

        Ok(summary)
    }
}
