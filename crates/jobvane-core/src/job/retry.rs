//! Retry - Retrying を永続化して再スケジュールを依頼するハンドラ

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use super::handle::Job;
use super::handler::{Entered, Next, StateHandler};
use crate::domain::{Result, Status};
use super::rescheduler::Rescheduler;

/// Persists Retrying, hands the job to the rescheduler and halts this run.
///
/// The hand-off is fire-and-forget; a new run is started by whoever
/// consumes the rescheduled job.
pub struct Retry {
    job: Arc<dyn Job>,
    rescheduler: Arc<dyn Rescheduler>,
}

impl Retry {
    pub fn new(job: Arc<dyn Job>, rescheduler: Arc<dyn Rescheduler>) -> Self {
        Self { job, rescheduler }
    }
}

#[async_trait]
impl StateHandler for Retry {
    async fn enter(&self) -> Entered {
        let result = match self.job.update_status(Status::Retrying).await {
            Ok(write) if write.is_overtaken(self.job.status_revision()) => {
                info!(job_id = %self.job.id(), ?write, "task moved on, not rescheduling");
                self.job
                    .log()
                    .append(format!("Retrying superseded ({write:?}), not rescheduled"));
                return Entered::ok(Next::Halt);
            }
            Ok(_) => Ok(()),
            Err(err) => {
                error!(
                    job_id = %self.job.id(),
                    task_id = %self.job.task_id(),
                    error = %err,
                    "failed to update state of job to Retrying"
                );
                Err(err)
            }
        };

        info!(job_id = %self.job.id(), revision = self.job.status_revision(), "rescheduling job");
        self.job.log().append("job will be retried");
        self.rescheduler.reschedule(Arc::clone(&self.job));

        Entered::from_result(Next::Halt, result)
    }

    async fn exit(&self) -> Result<()> {
        Ok(())
    }
}
