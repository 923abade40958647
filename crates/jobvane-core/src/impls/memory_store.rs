//! In-memory task and execution store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{Instrument, debug};

use crate::domain::{
    Error, Execution, ExecutionId, ExtraAttrs, NewTask, Result, Status, StatusCount, Task,
    TaskField, TaskId, revision_to_time,
};
use crate::ports::{
    Clock, Ctx, ExecutionStore, IdGenerator, StatusWrite, SystemClock, TaskQuery, TaskStore,
    UlidGenerator,
};

/// Rows of the store.
#[derive(Default)]
struct StoreState {
    tasks: HashMap<TaskId, Task>,
    executions: HashMap<ExecutionId, Execution>,
}

impl StoreState {
    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("task", id))
    }

    fn tasks_of(&self, execution_id: ExecutionId) -> impl Iterator<Item = &Task> {
        self.tasks
            .values()
            .filter(move |task| task.execution_id == execution_id)
    }
}

/// In-memory `TaskStore` + `ExecutionStore`.
///
/// Every operation runs under one mutex, so the attempt bump and the guarded
/// status write of `update_status` land together or not at all.
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self {
            state: Mutex::new(StoreState::default()),
            clock,
            ids,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate an outage: while set, every call fails with `Error::Storage`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Storage("in-memory store marked unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create(&self, ctx: &Ctx, new: NewTask) -> Result<TaskId> {
        async move {
            self.check_available()?;
            let mut state = self.state.lock().await;
            if !state.executions.contains_key(&new.execution_id) {
                return Err(Error::ForeignKey(new.execution_id.to_string()));
            }
            let id = self.ids.generate_task_id();
            let task = Task::pending(id, new, self.clock.now());
            debug!(task_id = %id, execution_id = %task.execution_id, "task created");
            state.tasks.insert(id, task);
            Ok(id)
        }
        .instrument(ctx.span().clone())
        .await
    }

    async fn get(&self, _ctx: &Ctx, id: TaskId) -> Result<Task> {
        self.check_available()?;
        let state = self.state.lock().await;
        state
            .tasks
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("task", id))
    }

    async fn list(&self, _ctx: &Ctx, query: &TaskQuery) -> Result<Vec<Task>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| query.matches(task))
            .cloned()
            .collect();
        // newest start first, never-started last
        tasks.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(a.id.cmp(&b.id)));

        if let Some(size) = query.page_size {
            let skip = query.page_number.saturating_sub(1).saturating_mul(size);
            tasks = tasks.into_iter().skip(skip).take(size).collect();
        }
        Ok(tasks)
    }

    async fn count(&self, _ctx: &Ctx, query: &TaskQuery) -> Result<u64> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.tasks.values().filter(|task| query.matches(task)).count() as u64)
    }

    async fn update(&self, _ctx: &Ctx, task: &Task, fields: &[TaskField]) -> Result<()> {
        self.check_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let stored = state.task_mut(task.id)?;
        let fields = if fields.is_empty() {
            &TaskField::ALL[..]
        } else {
            fields
        };
        for field in fields {
            match field {
                TaskField::JobId => stored.job_id = task.job_id,
                TaskField::StatusMessage => stored.status_message = task.status_message.clone(),
                TaskField::ExtraAttrs => stored.extra_attrs = task.extra_attrs.clone(),
            }
        }
        stored.update_time = now;
        Ok(())
    }

    async fn update_status(
        &self,
        ctx: &Ctx,
        id: TaskId,
        status: Status,
        revision: i64,
    ) -> Result<StatusWrite> {
        async move {
            self.check_available()?;
            let now = self.clock.now();
            let mut state = self.state.lock().await;
            let task = state.task_mut(id)?;

            if task.status_revision < revision {
                task.run_count += 1;
                task.start_time = revision_to_time(revision);
            }

            if !task.accepts(revision, status) {
                debug!(
                    task_id = %id,
                    %status,
                    revision,
                    stored_status = %task.status,
                    stored_revision = task.status_revision,
                    "status write superseded"
                );
                return Ok(StatusWrite::Superseded {
                    status: task.status,
                    revision: task.status_revision,
                });
            }

            task.status = status;
            task.status_code = status.code();
            task.status_revision = revision;
            task.update_time = now;
            task.end_time = status.is_final().then_some(now);
            debug!(task_id = %id, %status, revision, run_count = task.run_count, "status updated");
            Ok(StatusWrite::Applied)
        }
        .instrument(ctx.span().clone())
        .await
    }

    async fn delete(&self, _ctx: &Ctx, id: TaskId) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state
            .tasks
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("task", id))
    }

    async fn list_status_count(
        &self,
        _ctx: &Ctx,
        execution_id: ExecutionId,
    ) -> Result<Vec<StatusCount>> {
        self.check_available()?;
        let state = self.state.lock().await;
        let mut counts: HashMap<Status, u64> = HashMap::new();
        for task in state.tasks_of(execution_id) {
            *counts.entry(task.status).or_default() += 1;
        }
        Ok(Status::ALL
            .into_iter()
            .filter_map(|status| {
                counts
                    .get(&status)
                    .map(|&count| StatusCount { status, count })
            })
            .collect())
    }

    async fn get_max_end_time(
        &self,
        _ctx: &Ctx,
        execution_id: ExecutionId,
    ) -> Result<Option<DateTime<Utc>>> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .tasks_of(execution_id)
            .filter_map(|task| task.end_time)
            .max())
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn create_execution(
        &self,
        _ctx: &Ctx,
        vendor_type: &str,
        extra_attrs: ExtraAttrs,
    ) -> Result<ExecutionId> {
        self.check_available()?;
        let id = self.ids.generate_execution_id();
        let execution = Execution {
            id,
            vendor_type: vendor_type.to_string(),
            extra_attrs,
            start_time: self.clock.now(),
        };
        self.state.lock().await.executions.insert(id, execution);
        Ok(id)
    }

    async fn get_execution(&self, _ctx: &Ctx, id: ExecutionId) -> Result<Execution> {
        self.check_available()?;
        let state = self.state.lock().await;
        state
            .executions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("execution", id))
    }

    async fn delete_execution(&self, _ctx: &Ctx, id: ExecutionId) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if !state.executions.contains_key(&id) {
            return Err(Error::not_found("execution", id));
        }
        let referenced = state.tasks_of(id).count();
        if referenced > 0 {
            return Err(Error::Conflict(format!(
                "execution {id} is still referenced by {referenced} task(s)"
            )));
        }
        state.executions.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;
    use crate::ports::FixedClock;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    struct Fixture {
        store: InMemoryStore,
        clock: Arc<FixedClock>,
        ctx: Ctx,
        execution_id: ExecutionId,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        ));
        let store = InMemoryStore::with_clock(clock.clone());
        let ctx = Ctx::background();
        let execution_id = store
            .create_execution(&ctx, "replication", ExtraAttrs::new())
            .await
            .unwrap();
        Fixture {
            store,
            clock,
            ctx,
            execution_id,
        }
    }

    impl Fixture {
        async fn task(&self) -> TaskId {
            self.store
                .create(&self.ctx, NewTask::new(self.execution_id))
                .await
                .unwrap()
        }

        async fn write(&self, id: TaskId, status: Status, revision: i64) -> StatusWrite {
            self.store
                .update_status(&self.ctx, id, status, revision)
                .await
                .unwrap()
        }

        async fn get(&self, id: TaskId) -> Task {
            self.store.get(&self.ctx, id).await.unwrap()
        }
    }

    #[tokio::test]
    async fn create_starts_pending() {
        let f = fixture().await;
        let task = f.get(f.task().await).await;
        assert_eq!(task.status, Status::Pending);
        assert_eq!(task.status_revision, 0);
        assert_eq!(task.run_count, 0);
        assert!(task.end_time.is_none());
    }

    #[tokio::test]
    async fn create_against_missing_execution_is_foreign_key_error() {
        let f = fixture().await;
        let missing = ExecutionId::from_ulid(ulid::Ulid::new());
        let err = f.store.create(&f.ctx, NewTask::new(missing)).await.unwrap_err();
        assert!(matches!(err, Error::ForeignKey(_)));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn out_of_order_writes_within_an_attempt_converge_to_highest_code() {
        let f = fixture().await;
        let id = f.task().await;

        assert!(f.write(id, Status::Scheduled, 100).await.is_applied());
        assert!(f.write(id, Status::Retrying, 100).await.is_applied());
        assert!(!f.write(id, Status::Running, 100).await.is_applied());

        let task = f.get(id).await;
        assert_eq!(task.status, Status::Retrying);
        assert_eq!(task.status_code, 3);
        assert_eq!(task.run_count, 1);
    }

    #[tokio::test]
    async fn new_revision_bumps_run_count_and_clears_end_time() {
        let f = fixture().await;
        let id = f.task().await;

        f.write(id, Status::Running, 100).await;
        f.write(id, Status::Error, 100).await;
        assert!(f.get(id).await.end_time.is_some());

        assert!(f.write(id, Status::Pending, 200).await.is_applied());
        let task = f.get(id).await;
        assert_eq!(task.run_count, 2);
        assert_eq!(task.status, Status::Pending);
        assert_eq!(task.status_revision, 200);
        assert_eq!(task.start_time, revision_to_time(200));
        assert!(task.end_time.is_none());
    }

    #[tokio::test]
    async fn stale_revision_is_discarded() {
        let f = fixture().await;
        let id = f.task().await;

        f.write(id, Status::Running, 200).await;
        assert!(!f.write(id, Status::Finished, 100).await.is_applied());

        let task = f.get(id).await;
        assert_eq!(task.status, Status::Running);
        assert_eq!(task.status_revision, 200);
        assert_eq!(task.run_count, 1);
    }

    #[tokio::test]
    async fn duplicate_running_after_stop_is_discarded() {
        let f = fixture().await;
        let id = f.task().await;

        f.write(id, Status::Running, 100).await;
        assert!(f.write(id, Status::Stopped, 100).await.is_applied());
        assert!(!f.write(id, Status::Running, 100).await.is_applied());

        let task = f.get(id).await;
        assert_eq!(task.status, Status::Stopped);
        assert!(task.end_time.is_some());
    }

    #[tokio::test]
    async fn final_status_stamps_end_time_with_clock() {
        let f = fixture().await;
        let id = f.task().await;
        f.write(id, Status::Running, 100).await;

        f.clock.advance(Duration::minutes(5));
        f.write(id, Status::Finished, 100).await;

        let task = f.get(id).await;
        assert_eq!(task.end_time, Some(f.clock.now()));
        assert_eq!(task.update_time, f.clock.now());
    }

    #[tokio::test]
    async fn update_status_on_missing_task_is_not_found() {
        let f = fixture().await;
        let err = f
            .store
            .update_status(&f.ctx, TaskId::from_ulid(ulid::Ulid::new()), Status::Running, 1)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn update_rewrites_only_requested_fields() {
        let f = fixture().await;
        let id = f.task().await;
        let mut task = f.get(id).await;
        task.status_message = "pulling layers".to_string();
        task.extra_attrs.insert("artifact".into(), json!("library/redis"));
        task.status = Status::Finished;

        f.store
            .update(&f.ctx, &task, &[TaskField::StatusMessage])
            .await
            .unwrap();

        let stored = f.get(id).await;
        assert_eq!(stored.status_message, "pulling layers");
        assert!(stored.extra_attrs.is_empty());
        assert_eq!(stored.status, Status::Pending);
    }

    #[tokio::test]
    async fn update_and_delete_missing_task_are_not_found() {
        let f = fixture().await;
        let id = f.task().await;
        let task = f.get(id).await;
        f.store.delete(&f.ctx, id).await.unwrap();

        assert!(f.store.update(&f.ctx, &task, &[]).await.unwrap_err().is_not_found());
        assert!(f.store.delete(&f.ctx, id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_filters_on_extra_attrs_and_orders_by_start_time() {
        let f = fixture().await;
        let mut ids = Vec::new();
        for (i, artifact) in ["a", "b", "a"].iter().enumerate() {
            let mut attrs = ExtraAttrs::new();
            attrs.insert("artifact".into(), json!(artifact));
            let id = f
                .store
                .create(&f.ctx, NewTask::new(f.execution_id).with_extra_attrs(attrs))
                .await
                .unwrap();
            f.write(id, Status::Running, 1_000 + i as i64).await;
            ids.push(id);
        }

        let query = TaskQuery::new().extra_attr("artifact", "a");
        let listed: Vec<TaskId> = f
            .store
            .list(&f.ctx, &query)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(listed, vec![ids[2], ids[0]]);
        assert_eq!(f.store.count(&f.ctx, &query).await.unwrap(), 2);

        let page = f
            .store
            .list(&f.ctx, &TaskQuery::new().execution(f.execution_id).page(2, 2))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, ids[0]);
    }

    #[tokio::test]
    async fn page_far_past_the_end_is_empty() {
        let f = fixture().await;
        f.task().await;

        let page = f
            .store
            .list(&f.ctx, &TaskQuery::new().page(usize::MAX, 2))
            .await
            .unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn status_count_and_max_end_time_are_per_execution() {
        let f = fixture().await;
        let first = f.task().await;
        let second = f.task().await;
        let third = f.task().await;

        f.write(first, Status::Finished, 10).await;
        f.clock.advance(Duration::seconds(42));
        f.write(second, Status::Finished, 10).await;
        f.write(third, Status::Running, 10).await;

        let counts = f.store.list_status_count(&f.ctx, f.execution_id).await.unwrap();
        assert_eq!(
            counts,
            vec![
                StatusCount { status: Status::Running, count: 1 },
                StatusCount { status: Status::Finished, count: 2 },
            ]
        );

        let max_end = f.store.get_max_end_time(&f.ctx, f.execution_id).await.unwrap();
        assert_eq!(max_end, Some(f.clock.now()));

        let other = f
            .store
            .create_execution(&f.ctx, "replication", ExtraAttrs::new())
            .await
            .unwrap();
        assert_eq!(f.store.get_max_end_time(&f.ctx, other).await.unwrap(), None);
    }

    #[tokio::test]
    async fn referenced_execution_cannot_be_deleted() {
        let f = fixture().await;
        let id = f.task().await;

        let err = f.store.delete_execution(&f.ctx, f.execution_id).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        f.store.delete(&f.ctx, id).await.unwrap();
        f.store.delete_execution(&f.ctx, f.execution_id).await.unwrap();
        assert!(
            f.store
                .get_execution(&f.ctx, f.execution_id)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn outage_surfaces_as_transient_error() {
        let f = fixture().await;
        let id = f.task().await;
        f.store.set_unavailable(true);

        let err = f
            .store
            .update_status(&f.ctx, id, Status::Running, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);

        f.store.set_unavailable(false);
        assert!(f.write(id, Status::Running, 1).await.is_applied());
    }
}
