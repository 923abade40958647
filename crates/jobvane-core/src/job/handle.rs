//! Job - ステートマシンが操作する実行中ジョブのハンドル

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::log::JobLog;
use crate::domain::{ExtraAttrs, JobId, Result, Status, TaskId};
use crate::ports::{Ctx, StatusWrite, TaskStore};

/// Live handle a state machine drives. Exactly one machine owns a job run.
#[async_trait]
pub trait Job: Send + Sync + fmt::Debug {
    fn id(&self) -> JobId;

    /// Job type, i.e. the workflow name.
    fn name(&self) -> &str;

    fn task_id(&self) -> TaskId;

    /// Revision of this run attempt (start time in unix millis).
    fn status_revision(&self) -> i64;

    fn metadata(&self) -> &ExtraAttrs;

    fn log(&self) -> &JobLog;

    /// Persist `status` for this attempt.
    async fn update_status(&self, status: Status) -> Result<StatusWrite>;
}

/// `Job` backed by a task row in a `TaskStore`.
pub struct TaskJob {
    id: JobId,
    name: String,
    task_id: TaskId,
    revision: i64,
    metadata: ExtraAttrs,
    log: JobLog,
    store: Arc<dyn TaskStore>,
    ctx: Ctx,
}

impl TaskJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: JobId,
        name: impl Into<String>,
        task_id: TaskId,
        revision: i64,
        metadata: ExtraAttrs,
        log: JobLog,
        store: Arc<dyn TaskStore>,
        ctx: Ctx,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            task_id,
            revision,
            metadata,
            log,
            store,
            ctx,
        }
    }
}

impl fmt::Debug for TaskJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskJob")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("task_id", &self.task_id)
            .field("revision", &self.revision)
            .finish()
    }
}

#[async_trait]
impl Job for TaskJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn task_id(&self) -> TaskId {
        self.task_id
    }

    fn status_revision(&self) -> i64 {
        self.revision
    }

    fn metadata(&self) -> &ExtraAttrs {
        &self.metadata
    }

    fn log(&self) -> &JobLog {
        &self.log
    }

    async fn update_status(&self, status: Status) -> Result<StatusWrite> {
        self.store
            .update_status(&self.ctx, self.task_id, status, self.revision)
            .await
    }
}
