//! QueueRescheduler - バックオフ後にジョブを再投入する Rescheduler
//!
//! `reschedule` は tokio タスクを切り離して即座に戻ります。
//! タスク側で実行回数を確認し、上限内ならバックオフだけ待って
//! `Dispatch` をワーカーのキューに送ります。上限に達していれば
//! 現在の attempt を Error で確定させます。
//! ストアが読めないときも Dispatch は捨てず、待ってから送ります
//! （上限の判定はワーカー側でもう一度行います）。

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::domain::{Error, JobId, Result, RetryPolicy, Status, TaskId};
use crate::job::{Job, Rescheduler};
use crate::ports::{Ctx, TaskStore};

/// Work item sent to the worker pool: "run this job's task once more".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub job_id: JobId,
    pub task_id: TaskId,
    /// Job type, i.e. workflow name.
    pub name: String,
}

impl Dispatch {
    pub fn for_job(job: &dyn Job) -> Self {
        Self {
            job_id: job.id(),
            task_id: job.task_id(),
            name: job.name().to_string(),
        }
    }
}

/// Sending side of the worker queue, with backoff-delayed delivery.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<Dispatch>,
    policy: RetryPolicy,
}

impl DispatchQueue {
    pub fn new(tx: mpsc::UnboundedSender<Dispatch>, policy: RetryPolicy) -> Self {
        Self { tx, policy }
    }

    pub fn send(&self, dispatch: Dispatch) -> Result<()> {
        self.tx.send(dispatch).map_err(|_| Error::QueueClosed)
    }

    /// Wait the backoff for `attempts`, then send.
    pub async fn deliver_after(&self, dispatch: Dispatch, attempts: u32) {
        let delay = self.policy.jittered_delay(attempts);
        debug!(job_id = %dispatch.job_id, attempts, delay_ms = delay.as_millis() as u64, "delayed dispatch");
        tokio::time::sleep(delay).await;
        let job_id = dispatch.job_id;
        if self.send(dispatch).is_err() {
            warn!(%job_id, "dispatch queue closed, job not rescheduled");
        }
    }

    /// `deliver_after` on a detached task.
    pub fn send_after(&self, dispatch: Dispatch, attempts: u32) {
        let queue = self.clone();
        tokio::spawn(async move { queue.deliver_after(dispatch, attempts).await });
    }
}

pub struct QueueRescheduler {
    queue: DispatchQueue,
    store: Arc<dyn TaskStore>,
    max_attempts: u32,
}

impl QueueRescheduler {
    pub fn new(queue: DispatchQueue, store: Arc<dyn TaskStore>, max_attempts: u32) -> Self {
        Self {
            queue,
            store,
            max_attempts,
        }
    }
}

impl Rescheduler for QueueRescheduler {
    fn reschedule(&self, job: Arc<dyn Job>) {
        let queue = self.queue.clone();
        let store = Arc::clone(&self.store);
        let max_attempts = self.max_attempts;

        tokio::spawn(async move {
            let ctx = Ctx::background();
            let dispatch = Dispatch::for_job(job.as_ref());
            let runs = match store.get(&ctx, job.task_id()).await {
                Ok(task) => task.run_count,
                Err(err) => {
                    warn!(job_id = %job.id(), error = %err, "cannot load task for reschedule, dispatching anyway");
                    job.log().append(format!("reschedule without run count: {err}"));
                    queue.deliver_after(dispatch, 1).await;
                    return;
                }
            };

            if runs >= max_attempts {
                info!(job_id = %job.id(), runs, "retry budget exhausted");
                job.log()
                    .append(format!("giving up after {runs} of {max_attempts} runs"));
                if let Err(err) = job.update_status(Status::Error).await {
                    error!(job_id = %job.id(), error = %err, "failed to mark job as Error");
                }
                return;
            }

            job.log().append(format!("run {} scheduled", runs + 1));
            queue.deliver_after(dispatch, runs).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExtraAttrs, NewTask};
    use crate::impls::InMemoryStore;
    use crate::job::{JobLog, TaskJob};
    use crate::ports::ExecutionStore;
    use std::time::Duration;
    use ulid::Ulid;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        }
    }

    /// A task that has completed one run and now sits in Retrying.
    async fn retrying_job(store: &Arc<InMemoryStore>) -> Arc<dyn Job> {
        let ctx = Ctx::background();
        let execution_id = store
            .create_execution(&ctx, "replication", ExtraAttrs::new())
            .await
            .unwrap();
        let task_id = store.create(&ctx, NewTask::new(execution_id)).await.unwrap();
        let job = TaskJob::new(
            JobId::from_ulid(Ulid::new()),
            "replication",
            task_id,
            1_000,
            ExtraAttrs::new(),
            JobLog::new(),
            store.clone(),
            ctx,
        );
        job.update_status(Status::Running).await.unwrap();
        job.update_status(Status::Retrying).await.unwrap();
        Arc::new(job)
    }

    #[tokio::test]
    async fn sends_dispatch_after_backoff() {
        let store = Arc::new(InMemoryStore::new());
        let job = retrying_job(&store).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        QueueRescheduler::new(DispatchQueue::new(tx, fast_policy()), store.clone(), 3)
            .reschedule(Arc::clone(&job));

        let dispatch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dispatch, Dispatch::for_job(job.as_ref()));
        assert!(job.log().text().contains("run 2 scheduled"));
    }

    #[tokio::test]
    async fn exhausted_budget_marks_error() {
        let store = Arc::new(InMemoryStore::new());
        let job = retrying_job(&store).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        QueueRescheduler::new(DispatchQueue::new(tx, fast_policy()), store.clone(), 1)
            .reschedule(Arc::clone(&job));

        let ctx = Ctx::background();
        let status = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let task = store.get(&ctx, job.task_id()).await.unwrap();
                if task.status.is_final() {
                    return task.status;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(status, Status::Error);
        assert!(rx.try_recv().is_err());
        assert!(job.log().text().contains("giving up after 1 of 1 runs"));
    }

    #[tokio::test]
    async fn store_outage_still_dispatches() {
        let store = Arc::new(InMemoryStore::new());
        let job = retrying_job(&store).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        store.set_unavailable(true);
        QueueRescheduler::new(DispatchQueue::new(tx, fast_policy()), store.clone(), 3)
            .reschedule(Arc::clone(&job));

        let dispatch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dispatch, Dispatch::for_job(job.as_ref()));
        assert!(job.log().text().contains("reschedule without run count"));
    }

    #[tokio::test]
    async fn send_on_closed_queue_is_an_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let queue = DispatchQueue::new(tx, fast_policy());
        let dispatch = Dispatch {
            job_id: JobId::from_ulid(Ulid::new()),
            task_id: TaskId::from_ulid(Ulid::new()),
            name: "replication".to_string(),
        };
        assert!(matches!(queue.send(dispatch), Err(Error::QueueClosed)));
    }
}
