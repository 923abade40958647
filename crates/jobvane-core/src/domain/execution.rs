//! Execution record and status rollup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::ExecutionId;
use super::status::Status;
use super::task::ExtraAttrs;

/// A logical group of tasks, e.g. one replication run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    /// Job type the tasks of this execution run (the workflow name).
    pub vendor_type: String,
    pub extra_attrs: ExtraAttrs,
    pub start_time: DateTime<Utc>,
}

/// Number of tasks of an execution in one status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: Status,
    pub count: u64,
}

/// Execution status implied by its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Running,
    Error,
    Stopped,
    Finished,
}

impl ExecutionStatus {
    /// Roll task status counts up into an execution status.
    ///
    /// - any non-final task -> Running
    /// - otherwise any Error -> Error
    /// - otherwise any Stopped -> Stopped
    /// - otherwise Finished (also for an execution without tasks)
    pub fn from_counts(counts: &[StatusCount]) -> Self {
        let has = |pred: fn(Status) -> bool| counts.iter().any(|c| c.count > 0 && pred(c.status));

        if has(|s| !s.is_final()) {
            ExecutionStatus::Running
        } else if has(|s| s == Status::Error) {
            ExecutionStatus::Error
        } else if has(|s| s == Status::Stopped) {
            ExecutionStatus::Stopped
        } else {
            ExecutionStatus::Finished
        }
    }
}
