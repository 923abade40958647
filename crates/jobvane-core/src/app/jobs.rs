//! JobTable - サービスとワーカーが共有するジョブ単位の状態
//!
//! 正本はあくまで TaskStore です。ここに置くのはストアに載らないもの
//! （ジョブログ、実行中マシンの StopHandle、run ごとの記録）だけです。

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::domain::{Error, JobId, Result, TaskId};
use crate::job::{JobLog, StopHandle};
use crate::ports::AttemptRecord;

#[derive(Debug, Clone)]
pub(crate) struct JobEntry {
    pub task_id: TaskId,
    pub log: JobLog,
    stop_requested: bool,
    running: Option<StopHandle>,
    attempts: Vec<AttemptRecord>,
    load_failures: u32,
}

impl JobEntry {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            log: JobLog::new(),
            stop_requested: false,
            running: None,
            attempts: Vec::new(),
            load_failures: 0,
        }
    }
}

#[derive(Default)]
pub(crate) struct JobTable {
    entries: Mutex<HashMap<JobId, JobEntry>>,
}

impl JobTable {
    pub async fn insert(&self, job_id: JobId, entry: JobEntry) {
        self.entries.lock().await.insert(job_id, entry);
    }

    pub async fn get(&self, job_id: JobId) -> Result<JobEntry> {
        self.entries
            .lock()
            .await
            .get(&job_id)
            .cloned()
            .ok_or_else(|| Error::not_found("job", job_id))
    }

    /// Attach `stop` to the job's run. None when a stop was already requested.
    pub async fn begin_run(&self, job_id: JobId, stop: &StopHandle) -> Result<Option<JobLog>> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&job_id)
            .ok_or_else(|| Error::not_found("job", job_id))?;
        if entry.stop_requested {
            return Ok(None);
        }
        entry.running = Some(stop.clone());
        Ok(Some(entry.log.clone()))
    }

    /// Detach `stop`, unless a later run has replaced it already.
    pub async fn end_run(&self, job_id: JobId, stop: &StopHandle) {
        if let Some(entry) = self.entries.lock().await.get_mut(&job_id) {
            if entry.running.as_ref().is_some_and(|running| running.same_as(stop)) {
                entry.running = None;
            }
        }
    }

    /// Mark the job as stopped and hand back the running machine's handle, if any.
    ///
    /// Runs that have not attached yet see the mark in `begin_run` and skip.
    pub async fn request_stop(&self, job_id: JobId) -> Result<(TaskId, Option<StopHandle>)> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&job_id)
            .ok_or_else(|| Error::not_found("job", job_id))?;
        entry.stop_requested = true;
        Ok((entry.task_id, entry.running.clone()))
    }

    /// Record a finished run, replacing an earlier record of the same revision.
    pub async fn record_attempt(&self, job_id: JobId, record: AttemptRecord) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&job_id) else {
            return;
        };
        match entry
            .attempts
            .iter_mut()
            .find(|a| a.status_revision == record.status_revision)
        {
            Some(existing) => *existing = record,
            None => entry.attempts.push(record),
        }
    }

    /// Count a dispatch that could not load its task. Returns the streak length.
    pub async fn note_load_failure(&self, job_id: JobId) -> u32 {
        match self.entries.lock().await.get_mut(&job_id) {
            Some(entry) => {
                entry.load_failures = entry.load_failures.saturating_add(1);
                entry.load_failures
            }
            None => 1,
        }
    }

    pub async fn clear_load_failures(&self, job_id: JobId) {
        if let Some(entry) = self.entries.lock().await.get_mut(&job_id) {
            entry.load_failures = 0;
        }
    }

    pub async fn attempts(&self, job_id: JobId) -> Result<Vec<AttemptRecord>> {
        self.entries
            .lock()
            .await
            .get(&job_id)
            .map(|entry| entry.attempts.clone())
            .ok_or_else(|| Error::not_found("job", job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Status;
    use ulid::Ulid;

    fn entry() -> JobEntry {
        JobEntry::new(TaskId::from_ulid(Ulid::new()))
    }

    fn record(job_id: JobId, run: u32, revision: i64, status: Status) -> AttemptRecord {
        AttemptRecord {
            job_id,
            run,
            status_revision: revision,
            status,
            start_time: None,
            end_time: None,
        }
    }

    #[tokio::test]
    async fn stop_before_run_blocks_the_run() {
        let table = JobTable::default();
        let job_id = JobId::from_ulid(Ulid::new());
        table.insert(job_id, entry()).await;

        let (_, running) = table.request_stop(job_id).await.unwrap();
        assert!(running.is_none());
        assert!(table.begin_run(job_id, &StopHandle::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stop_during_run_returns_the_handle() {
        let table = JobTable::default();
        let job_id = JobId::from_ulid(Ulid::new());
        table.insert(job_id, entry()).await;

        let stop = StopHandle::new();
        assert!(table.begin_run(job_id, &stop).await.unwrap().is_some());
        let (_, running) = table.request_stop(job_id).await.unwrap();
        running.unwrap().stop();
        assert!(stop.is_stopped());

        table.end_run(job_id, &StopHandle::new()).await;
        let (_, running) = table.request_stop(job_id).await.unwrap();
        assert!(running.is_some());

        table.end_run(job_id, &stop).await;
        let (_, running) = table.request_stop(job_id).await.unwrap();
        assert!(running.is_none());
    }

    #[tokio::test]
    async fn attempts_are_keyed_by_revision() {
        let table = JobTable::default();
        let job_id = JobId::from_ulid(Ulid::new());
        table.insert(job_id, entry()).await;

        table.record_attempt(job_id, record(job_id, 1, 10, Status::Running)).await;
        table.record_attempt(job_id, record(job_id, 1, 10, Status::Retrying)).await;
        table.record_attempt(job_id, record(job_id, 2, 20, Status::Finished)).await;

        let attempts = table.attempts(job_id).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].status, Status::Retrying);
        assert_eq!(attempts[1].run, 2);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let table = JobTable::default();
        let err = table.get(JobId::from_ulid(Ulid::new())).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn load_failures_count_until_cleared() {
        let table = JobTable::default();
        let job_id = JobId::from_ulid(Ulid::new());
        table.insert(job_id, entry()).await;

        assert_eq!(table.note_load_failure(job_id).await, 1);
        assert_eq!(table.note_load_failure(job_id).await, 2);
        table.clear_load_failures(job_id).await;
        assert_eq!(table.note_load_failure(job_id).await, 1);
    }
}
