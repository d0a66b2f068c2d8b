//! Side log of failed items for manual retry.
//!
//! One JSON object per line, appended and fsynced per failure so the log
//! survives the same crashes the checkpoint does.

use crate::models::{BatchError, Result, StepFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt as _;
use tracing::debug;
use uuid::Uuid;

/// A failed item, as written to the failure log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Run that attempted the item
    pub run_id: Uuid,
    /// Dataset index of the item
    pub index: usize,
    /// Item identifier
    pub item_id: String,
    /// Step that failed
    pub step: String,
    /// Exit code, if the tool ran to completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Human-readable cause
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn from_failure(run_id: Uuid, index: usize, failure: &StepFailure) -> Self {
        Self {
            run_id,
            index,
            item_id: failure.item_id.clone(),
            step: failure.step.clone(),
            exit_code: failure.source.exit_code(),
            error: failure.source.to_string(),
            failed_at: Utc::now(),
        }
    }
}

/// Append-only JSONL failure log.
#[derive(Debug, Clone)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one record.
    pub async fn record(&self, record: &FailureRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| BatchError::Internal(format!("Serializing failure record: {e}")))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| BatchError::io("opening failure log", e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| BatchError::io("appending to failure log", e))?;
        file.sync_all()
            .await
            .map_err(|e| BatchError::io("syncing failure log", e))?;

        debug!(item = %record.item_id, "Failure recorded");
        Ok(())
    }

    /// Read every record; a missing log is empty.
    pub fn read_all(&self) -> Result<Vec<FailureRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BatchError::io("reading failure log", e)),
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    BatchError::Internal(format!("failure log line {}: {e}", n + 1))
                })
            })
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecError;
    use tempfile::TempDir;

    fn failure(item: &str) -> StepFailure {
        StepFailure {
            item_id: item.to_string(),
            step: "fetch".to_string(),
            source: ExecError::Exit {
                program: "prefetch".to_string(),
                code: Some(1),
            },
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let log = FailureLog::new(temp_dir.path().join("failed.jsonl"));
        let run_id = Uuid::new_v4();

        log.record(&FailureRecord::from_failure(run_id, 0, &failure("SRR1")))
            .await
            .unwrap();
        log.record(&FailureRecord::from_failure(run_id, 4, &failure("SRR5")))
            .await
            .unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].item_id, "SRR1");
        assert_eq!(records[0].exit_code, Some(1));
        assert_eq!(records[1].index, 4);
        assert!(records.iter().all(|r| r.run_id == run_id));
    }

    #[test]
    fn test_missing_log_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let log = FailureLog::new(temp_dir.path().join("failed.jsonl"));
        assert!(log.read_all().unwrap().is_empty());
    }
}
