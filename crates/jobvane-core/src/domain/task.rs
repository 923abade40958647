//! Task record: the durable state of one schedulable unit of work.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ExecutionId, JobId, TaskId};
use super::status::Status;

/// Open key/value payload for job-type parameters. The core never interprets it.
pub type ExtraAttrs = serde_json::Map<String, serde_json::Value>;

/// Persisted task row.
///
/// Status fields (`status`, `status_code`, `status_revision`, `run_count`,
/// `start_time`, `end_time`) only change through `TaskStore::update_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub execution_id: ExecutionId,
    pub job_id: Option<JobId>,
    pub status: Status,
    pub status_code: i32,
    /// Start time (unix millis) of the attempt that last wrote the status.
    pub status_revision: i64,
    pub status_message: String,
    pub run_count: u32,
    pub extra_attrs: ExtraAttrs,
    pub creation_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub update_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Input for `TaskStore::create`. New tasks always start Pending at revision 0.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub execution_id: ExecutionId,
    pub job_id: Option<JobId>,
    pub extra_attrs: ExtraAttrs,
}

impl NewTask {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            job_id: None,
            extra_attrs: ExtraAttrs::new(),
        }
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_extra_attrs(mut self, extra_attrs: ExtraAttrs) -> Self {
        self.extra_attrs = extra_attrs;
        self
    }
}

impl Task {
    pub(crate) fn pending(id: TaskId, new: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            execution_id: new.execution_id,
            job_id: new.job_id,
            status: Status::Pending,
            status_code: Status::Pending.code(),
            status_revision: 0,
            status_message: String::new(),
            run_count: 0,
            extra_attrs: new.extra_attrs,
            creation_time: now,
            start_time: None,
            update_time: now,
            end_time: None,
        }
    }

    /// Would a write of `(revision, status)` advance this row?
    ///
    /// A newer attempt always wins. Within the same attempt only a strictly
    /// higher status code wins.
    pub fn accepts(&self, revision: i64, status: Status) -> bool {
        (self.status_revision == revision && self.status_code < status.code())
            || self.status_revision < revision
    }
}

/// Fields `TaskStore::update` may rewrite. Status fields are not among them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskField {
    JobId,
    StatusMessage,
    ExtraAttrs,
}

impl TaskField {
    pub const ALL: [TaskField; 3] = [
        TaskField::JobId,
        TaskField::StatusMessage,
        TaskField::ExtraAttrs,
    ];
}

/// Convert a status revision back into the attempt start time.
pub fn revision_to_time(revision: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(revision).single()
}

/// Revision for a new attempt: the current time, but never behind the last one.
pub fn next_revision(now: DateTime<Utc>, previous: i64) -> i64 {
    now.timestamp_millis().max(previous.saturating_add(1))
}
