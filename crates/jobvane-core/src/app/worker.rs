use std::cmp::Ordering;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::jobs::JobTable;
use crate::domain::{Error, ErrorKind, Result, Status, next_revision, revision_to_time};
use crate::impls::{Dispatch, DispatchQueue};
use crate::job::{Job, JobLog, Rescheduler, StopHandle, TaskJob, WorkflowRegistry};
use crate::ports::{AttemptRecord, Clock, Ctx, TaskStore};

/// Everything a worker needs to run one dispatched job.
pub(crate) struct Runner {
    pub store: Arc<dyn TaskStore>,
    pub workflows: Arc<WorkflowRegistry>,
    pub rescheduler: Arc<dyn Rescheduler>,
    pub jobs: Arc<JobTable>,
    pub clock: Arc<dyn Clock>,
    pub queue: DispatchQueue,
    pub max_attempts: u32,
}

impl Runner {
    /// Run one attempt of the dispatched job to completion.
    pub async fn run(&self, dispatch: &Dispatch) -> Result<()> {
        let stop = StopHandle::new();
        let Some(log) = self.jobs.begin_run(dispatch.job_id, &stop).await? else {
            debug!(job_id = %dispatch.job_id, "stop requested, dispatch dropped");
            return Ok(());
        };
        let result = self.run_attempt(dispatch, &stop, log).await;
        self.jobs.end_run(dispatch.job_id, &stop).await;
        result
    }

    async fn run_attempt(
        &self,
        dispatch: &Dispatch,
        stop: &StopHandle,
        log: JobLog,
    ) -> Result<()> {
        let workflow = self
            .workflows
            .get(&dispatch.name)
            .ok_or_else(|| Error::UnknownJobType(dispatch.name.clone()))?;

        let ctx = Ctx::with_request_id(dispatch.job_id.to_string());
        let task = match self.store.get(&ctx, dispatch.task_id).await {
            Ok(task) => task,
            Err(err) if err.kind() == ErrorKind::Transient => {
                // ストアが戻るまで同じ dispatch をバックオフ付きで回し続ける
                let failures = self.jobs.note_load_failure(dispatch.job_id).await;
                warn!(job_id = %dispatch.job_id, failures, error = %err, "cannot load task, dispatch requeued");
                log.append(format!("task load failed ({err}), requeued"));
                self.queue.send_after(dispatch.clone(), failures);
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        self.jobs.clear_load_failures(dispatch.job_id).await;
        if task.status.is_final() {
            debug!(job_id = %dispatch.job_id, status = %task.status, "task already final, dispatch dropped");
            return Ok(());
        }

        if task.status == Status::Retrying && task.run_count >= self.max_attempts {
            let job = TaskJob::new(
                dispatch.job_id,
                dispatch.name.as_str(),
                task.id,
                task.status_revision,
                task.extra_attrs.clone(),
                log,
                Arc::clone(&self.store),
                ctx,
            );
            info!(job_id = %dispatch.job_id, runs = task.run_count, "retry budget exhausted");
            job.log().append(format!(
                "giving up after {} of {} runs",
                task.run_count, self.max_attempts
            ));
            job.update_status(Status::Error).await?;
            return Ok(());
        }

        let revision = next_revision(self.clock.now(), task.status_revision);
        let job: Arc<dyn Job> = Arc::new(TaskJob::new(
            dispatch.job_id,
            dispatch.name.as_str(),
            task.id,
            revision,
            task.extra_attrs.clone(),
            log,
            Arc::clone(&self.store),
            ctx.clone(),
        ));
        job.log().append(format!("run started at revision {revision}"));

        let report = workflow
            .machine(Arc::clone(&job), Arc::clone(&self.rescheduler), stop)
            .run(Status::Pending.as_str())
            .await;
        info!(
            job_id = %dispatch.job_id,
            revision,
            last_state = %report.last_state,
            steps = report.steps,
            stopped = report.stopped,
            errors = report.errors.len(),
            "run finished"
        );

        // 次の run がすでに行を進めていれば、この run の分はレポートから組み立てる
        let current = self.store.get(&ctx, dispatch.task_id).await?;
        let record = match current.status_revision.cmp(&revision) {
            Ordering::Equal => AttemptRecord::from_task(dispatch.job_id, &current),
            Ordering::Greater => AttemptRecord {
                job_id: dispatch.job_id,
                run: task.run_count + 1,
                status_revision: revision,
                status: report.last_state.parse().unwrap_or(Status::Running),
                start_time: revision_to_time(revision),
                end_time: None,
            },
            // nothing of this run reached the store
            Ordering::Less => return Ok(()),
        };
        self.jobs.record_attempt(dispatch.job_id, record).await;
        Ok(())
    }
}

/// Worker group handle.
/// - `request_shutdown()` でワーカー全体が新しい dispatch を取らなくなる
/// - `shutdown_and_join()` で実行中のマシンの完了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one dispatch receiver.
    pub(crate) fn spawn(
        n: usize,
        rx: mpsc::UnboundedReceiver<Dispatch>,
        runner: Arc<Runner>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let rx = Arc::new(Mutex::new(rx));

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let rx = Arc::clone(&rx);
            let runner = Arc::clone(&runner);
            let mut shutdown_rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker_loop(worker_id, rx, runner, &mut shutdown_rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new dispatches. In-flight machines run to completion.
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(err) = join.await {
                warn!(error = %err, "worker task panicked");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Dispatch>>>,
    runner: Arc<Runner>,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // 受信待ちは shutdown と競合させる（recv はキャンセルしても取りこぼさない）
        let dispatch = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            dispatch = async { rx.lock().await.recv().await } => dispatch,
        };

        let Some(dispatch) = dispatch else {
            // 送信側がすべて drop された
            break;
        };

        if let Err(err) = runner.run(&dispatch).await {
            warn!(worker_id, job_id = %dispatch.job_id, error = %err, "dispatch failed");
        }
    }
    debug!(worker_id, "worker stopped");
}
