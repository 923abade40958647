//! Test doubles for jobs, handlers and reschedulers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ulid::Ulid;

use super::handle::Job;
use super::handler::{Entered, Next, StateHandler};
use super::log::JobLog;
use super::machine::StopHandle;
use crate::domain::{Error, ExtraAttrs, JobId, Result, Status, TaskId};
use super::rescheduler::Rescheduler;
use crate::ports::StatusWrite;

/// Job that records every status it is asked to persist.
#[derive(Debug)]
pub struct RecordingJob {
    id: JobId,
    task_id: TaskId,
    metadata: ExtraAttrs,
    log: JobLog,
    statuses: Mutex<Vec<Status>>,
    fail_writes: AtomicBool,
    superseded_by: Mutex<Option<(Status, i64)>>,
}

impl RecordingJob {
    pub fn new() -> Self {
        Self {
            id: JobId::from_ulid(Ulid::new()),
            task_id: TaskId::from_ulid(Ulid::new()),
            metadata: ExtraAttrs::new(),
            log: JobLog::new(),
            statuses: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            superseded_by: Mutex::new(None),
        }
    }

    /// From now on every write is dropped in favour of `status` at `revision`.
    pub fn superseded_by(&self, status: Status, revision: i64) {
        *self.superseded_by.lock().unwrap() = Some((status, revision));
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.statuses.lock().unwrap().clone()
    }
}

#[async_trait]
impl Job for RecordingJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn name(&self) -> &str {
        "recording"
    }

    fn task_id(&self) -> TaskId {
        self.task_id
    }

    fn status_revision(&self) -> i64 {
        100
    }

    fn metadata(&self) -> &ExtraAttrs {
        &self.metadata
    }

    fn log(&self) -> &JobLog {
        &self.log
    }

    async fn update_status(&self, status: Status) -> Result<StatusWrite> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("write refused".to_string()));
        }
        if let Some((status, revision)) = *self.superseded_by.lock().unwrap() {
            return Ok(StatusWrite::Superseded { status, revision });
        }
        self.statuses.lock().unwrap().push(status);
        Ok(StatusWrite::Applied)
    }
}

#[derive(Default)]
pub struct RecordingRescheduler {
    jobs: Mutex<Vec<JobId>>,
}

impl RecordingRescheduler {
    pub fn count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

impl Rescheduler for RecordingRescheduler {
    fn reschedule(&self, job: Arc<dyn Job>) {
        self.jobs.lock().unwrap().push(job.id());
    }
}

/// Handler returning a fixed answer on its first enter and `Halt` afterwards.
pub struct ScriptedHandler {
    answer: Mutex<Option<Entered>>,
    stop: Option<StopHandle>,
    enters: AtomicUsize,
    exits: AtomicUsize,
}

impl ScriptedHandler {
    pub fn new(answer: Entered) -> Self {
        Self {
            answer: Mutex::new(Some(answer)),
            stop: None,
            enters: AtomicUsize::new(0),
            exits: AtomicUsize::new(0),
        }
    }

    /// Trigger `stop` while entering, as an external caller would mid-step.
    pub fn stop_on_enter(mut self, stop: StopHandle) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn enters(&self) -> usize {
        self.enters.load(Ordering::SeqCst)
    }

    pub fn exits(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateHandler for ScriptedHandler {
    async fn enter(&self) -> Entered {
        self.enters.fetch_add(1, Ordering::SeqCst);
        if let Some(stop) = &self.stop {
            stop.stop();
        }
        self.answer
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Entered::ok(Next::Halt))
    }

    async fn exit(&self) -> Result<()> {
        self.exits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
