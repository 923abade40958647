//! StatusUpdater - 状態に入ったときにステータスを永続化する既定のハンドラ

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::handle::Job;
use super::handler::{Entered, Next, StateHandler};
use crate::domain::{Result, Status};

/// Persists `status` on enter, then lets the machine decide where to go.
///
/// Returns `Next::Halt` for a final status and `Next::Continue` otherwise.
/// A failed write is reported but does not change the returned next state.
/// A write superseded by a newer attempt or a final status (an external
/// stop) halts the run.
pub struct StatusUpdater {
    job: Arc<dyn Job>,
    status: Status,
}

impl StatusUpdater {
    pub fn new(job: Arc<dyn Job>, status: Status) -> Self {
        Self { job, status }
    }
}

#[async_trait]
impl StateHandler for StatusUpdater {
    async fn enter(&self) -> Entered {
        let next = if self.status.is_final() {
            Next::Halt
        } else {
            Next::Continue
        };

        match self.job.update_status(self.status).await {
            Ok(write) if write.is_overtaken(self.job.status_revision()) => {
                info!(
                    job_id = %self.job.id(),
                    status = %self.status,
                    ?write,
                    "task moved on without this run, halting"
                );
                self.job
                    .log()
                    .append(format!("{} superseded ({write:?}), run halted", self.status));
                Entered::ok(Next::Halt)
            }
            Ok(_) => Entered::ok(next),
            Err(err) => {
                warn!(
                    job_id = %self.job.id(),
                    task_id = %self.job.task_id(),
                    status = %self.status,
                    error = %err,
                    "failed to update status of job"
                );
                self.job
                    .log()
                    .append(format!("failed to update status to {}: {err}", self.status));
                Entered::with_error(next, err)
            }
        }
    }

    async fn exit(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Error;
    use crate::job::testing::RecordingJob;

    #[tokio::test]
    async fn non_final_status_continues() {
        let job = Arc::new(RecordingJob::new());
        let entered = StatusUpdater::new(job.clone(), Status::Running).enter().await;
        assert_eq!(entered.next, Next::Continue);
        assert!(entered.error.is_none());
        assert_eq!(job.statuses(), vec![Status::Running]);
    }

    #[tokio::test]
    async fn final_status_halts() {
        let job = Arc::new(RecordingJob::new());
        let entered = StatusUpdater::new(job, Status::Stopped).enter().await;
        assert_eq!(entered.next, Next::Halt);
    }

    #[tokio::test]
    async fn write_failure_is_reported_with_the_next_state() {
        let job = Arc::new(RecordingJob::new());
        job.fail_writes(true);
        let entered = StatusUpdater::new(job.clone(), Status::Running).enter().await;
        assert_eq!(entered.next, Next::Continue);
        assert!(matches!(entered.error, Some(Error::Storage(_))));
        assert!(job.log().text().contains("failed to update status to Running"));
    }

    #[tokio::test]
    async fn superseded_by_external_stop_halts() {
        let job = Arc::new(RecordingJob::new());
        job.superseded_by(Status::Stopped, job.status_revision());
        let entered = StatusUpdater::new(job.clone(), Status::Running).enter().await;
        assert_eq!(entered.next, Next::Halt);
        assert!(entered.error.is_none());
        assert!(job.log().text().contains("run halted"));
    }

    #[tokio::test]
    async fn superseded_by_newer_attempt_halts() {
        let job = Arc::new(RecordingJob::new());
        job.superseded_by(Status::Pending, job.status_revision() + 1);
        let entered = StatusUpdater::new(job, Status::Running).enter().await;
        assert_eq!(entered.next, Next::Halt);
    }

    #[tokio::test]
    async fn superseded_within_the_attempt_keeps_going() {
        let job = Arc::new(RecordingJob::new());
        job.superseded_by(Status::Retrying, job.status_revision());
        let entered = StatusUpdater::new(job, Status::Running).enter().await;
        assert_eq!(entered.next, Next::Continue);
    }

    #[tokio::test]
    async fn exit_twice_is_harmless() {
        let job = Arc::new(RecordingJob::new());
        let handler = StatusUpdater::new(job.clone(), Status::Running);
        handler.exit().await.unwrap();
        handler.exit().await.unwrap();
        assert!(job.statuses().is_empty());
    }
}
