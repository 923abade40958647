//! JobService port - ジョブの投入・参照・操作
//!
//! HTTP などの外側の面はこの trait の向こう側にあります。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{JobId, Result, Status, Task};

/// Actions accepted by `JobService::post_action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Stop,
}

impl std::str::FromStr for JobAction {
    type Err = crate::domain::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "stop" => Ok(JobAction::Stop),
            other => Err(crate::domain::Error::UnsupportedAction(other.to_string())),
        }
    }
}

/// One run of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub job_id: JobId,
    /// 1-based run number.
    pub run: u32,
    pub status_revision: i64,
    pub status: Status,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    /// Snapshot of the task's current attempt.
    pub fn from_task(job_id: JobId, task: &Task) -> Self {
        Self {
            job_id,
            run: task.run_count,
            status_revision: task.status_revision,
            status: task.status,
            start_time: task.start_time,
            end_time: task.end_time,
        }
    }
}

#[async_trait]
pub trait JobService: Send + Sync {
    /// Submit a job of type `name`. `metadata` must be a JSON object.
    async fn submit_job(&self, name: &str, metadata: serde_json::Value) -> Result<JobId>;

    /// Accumulated log text of the job.
    async fn get_job_log(&self, job_id: JobId) -> Result<String>;

    /// One record per run, oldest first.
    async fn get_executions(&self, job_id: JobId) -> Result<Vec<AttemptRecord>>;

    /// Apply `action` ("stop" is the only one). Stopping a finished job is Ok.
    async fn post_action(&self, job_id: JobId, action: &str) -> Result<()>;
}
