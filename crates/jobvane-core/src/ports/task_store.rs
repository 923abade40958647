//! TaskStore port - タスク状態の正本（source of truth）
//!
//! ステータスの変更は `update_status` の条件付き書き込みだけで行います。
//! `(status_revision, status_code)` を辞書順の単調キーとして扱うので、
//! 複数のワーカーが同じ行に書き込んでもロックなしで収束します。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Execution, ExecutionId, ExtraAttrs, NewTask, Result, Status, StatusCount, Task, TaskField,
    TaskId,
};
use crate::ports::Ctx;

/// Outcome of a guarded status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWrite {
    /// The write advanced the row.
    Applied,
    /// A newer or equal `(revision, code)` was already stored; the write was
    /// dropped. Carries what the row holds instead.
    Superseded { status: Status, revision: i64 },
}

impl StatusWrite {
    pub fn is_applied(self) -> bool {
        self == StatusWrite::Applied
    }

    /// Did another writer take the row away from the attempt at `revision`?
    ///
    /// True when a newer attempt owns the row or this attempt already ended
    /// (e.g. stopped by someone else).
    pub fn is_overtaken(self, revision: i64) -> bool {
        match self {
            StatusWrite::Applied => false,
            StatusWrite::Superseded {
                status,
                revision: stored,
            } => stored > revision || status.is_final(),
        }
    }
}

/// Filter for `TaskStore::list` and `TaskStore::count`.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub execution_id: Option<ExecutionId>,
    pub status: Option<Status>,
    /// Equality filters on top-level keys of `Task::extra_attrs`.
    pub extra_attrs: Vec<(String, serde_json::Value)>,
    /// 1-based page number; ignored when `page_size` is None.
    pub page_number: usize,
    pub page_size: Option<usize>,
}

impl TaskQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn execution(mut self, execution_id: ExecutionId) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn extra_attr(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra_attrs.push((key.into(), value.into()));
        self
    }

    pub fn page(mut self, page_number: usize, page_size: usize) -> Self {
        self.page_number = page_number;
        self.page_size = Some(page_size);
        self
    }

    /// Does `task` pass every filter (paging aside)?
    pub fn matches(&self, task: &Task) -> bool {
        if self.execution_id.is_some_and(|id| id != task.execution_id) {
            return false;
        }
        if self.status.is_some_and(|status| status != task.status) {
            return false;
        }
        self.extra_attrs
            .iter()
            .all(|(key, value)| task.extra_attrs.get(key) == Some(value))
    }
}

/// TaskStore は task 行の作成・参照・条件付き更新を提供
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new Pending task. Fails with `Error::ForeignKey` when the
    /// referenced execution does not exist.
    async fn create(&self, ctx: &Ctx, task: NewTask) -> Result<TaskId>;

    async fn get(&self, ctx: &Ctx, id: TaskId) -> Result<Task>;

    /// Tasks matching `query`, newest start time first.
    async fn list(&self, ctx: &Ctx, query: &TaskQuery) -> Result<Vec<Task>>;

    /// Number of tasks matching `query`, paging ignored.
    async fn count(&self, ctx: &Ctx, query: &TaskQuery) -> Result<u64>;

    /// Rewrite the given non-status fields (all of them when `fields` is empty).
    async fn update(&self, ctx: &Ctx, task: &Task, fields: &[TaskField]) -> Result<()>;

    /// Revision-guarded status transition.
    ///
    /// 1. `revision` newer than stored: bump `run_count`, set `start_time`.
    /// 2. Write status, code, revision, update time and end time when the
    ///    stored revision is older, or equal with a lower status code.
    ///
    /// Both steps happen atomically. A dropped write is `Ok(Superseded)` carrying the stored row.
    async fn update_status(
        &self,
        ctx: &Ctx,
        id: TaskId,
        status: Status,
        revision: i64,
    ) -> Result<StatusWrite>;

    async fn delete(&self, ctx: &Ctx, id: TaskId) -> Result<()>;

    async fn list_status_count(&self, ctx: &Ctx, execution_id: ExecutionId)
    -> Result<Vec<StatusCount>>;

    /// Latest end time among the execution's tasks, None if none has ended.
    async fn get_max_end_time(
        &self,
        ctx: &Ctx,
        execution_id: ExecutionId,
    ) -> Result<Option<DateTime<Utc>>>;
}

/// ExecutionStore は task をまとめる execution 行を管理
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(
        &self,
        ctx: &Ctx,
        vendor_type: &str,
        extra_attrs: ExtraAttrs,
    ) -> Result<ExecutionId>;

    async fn get_execution(&self, ctx: &Ctx, id: ExecutionId) -> Result<Execution>;

    /// Fails with `Error::Conflict` while tasks still reference the execution.
    async fn delete_execution(&self, ctx: &Ctx, id: ExecutionId) -> Result<()>;
}
