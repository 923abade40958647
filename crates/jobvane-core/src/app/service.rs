//! LocalJobService - プロセス内の JobService 実装
//!
//! 投入されたジョブは execution 1 件 + task 1 件として保存され、
//! `Dispatch` としてワーカーのキューに送られます。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use super::jobs::{JobEntry, JobTable};
use crate::domain::{Error, JobId, NewTask, Result, Status};
use crate::impls::{Dispatch, DispatchQueue};
use crate::job::WorkflowRegistry;
use crate::ports::{
    AttemptRecord, Ctx, ExecutionStore, IdGenerator, JobAction, JobService, TaskStore,
};

pub struct LocalJobService {
    pub(crate) tasks: Arc<dyn TaskStore>,
    pub(crate) executions: Arc<dyn ExecutionStore>,
    pub(crate) workflows: Arc<WorkflowRegistry>,
    pub(crate) jobs: Arc<JobTable>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) queue: DispatchQueue,
}

impl LocalJobService {
    async fn stop(&self, job_id: JobId) -> Result<()> {
        let (task_id, running) = self.jobs.request_stop(job_id).await?;
        let ctx = Ctx::with_request_id(job_id.to_string());
        let task = self.tasks.get(&ctx, task_id).await?;
        if task.status.is_final() {
            info!(%job_id, status = %task.status, "stop ignored, job already final");
            return Ok(());
        }

        if let Some(stop) = running {
            stop.stop();
        }
        let write = self
            .tasks
            .update_status(&ctx, task_id, Status::Stopped, task.status_revision)
            .await?;
        let entry = self.jobs.get(job_id).await?;
        entry.log.append("stop requested");
        info!(%job_id, applied = write.is_applied(), "job stopped");
        Ok(())
    }
}

#[async_trait]
impl JobService for LocalJobService {
    #[instrument(skip(self, metadata))]
    async fn submit_job(&self, name: &str, metadata: serde_json::Value) -> Result<JobId> {
        if self.workflows.get(name).is_none() {
            return Err(Error::UnknownJobType(name.to_string()));
        }
        let serde_json::Value::Object(attrs) = metadata else {
            return Err(Error::InvalidMetadata(format!(
                "expected a JSON object, got {metadata}"
            )));
        };

        let job_id = self.ids.generate_job_id();
        let ctx = Ctx::with_request_id(job_id.to_string());
        let execution_id = self
            .executions
            .create_execution(&ctx, name, attrs.clone())
            .await?;
        let task_id = self
            .tasks
            .create(
                &ctx,
                NewTask::new(execution_id)
                    .with_job_id(job_id)
                    .with_extra_attrs(attrs),
            )
            .await?;

        let entry = JobEntry::new(task_id);
        entry.log.append(format!("job {name} submitted"));
        self.jobs.insert(job_id, entry).await;

        self.queue.send(Dispatch {
            job_id,
            task_id,
            name: name.to_string(),
        })?;
        info!(%job_id, %task_id, %execution_id, "job submitted");
        Ok(job_id)
    }

    async fn get_job_log(&self, job_id: JobId) -> Result<String> {
        Ok(self.jobs.get(job_id).await?.log.text())
    }

    async fn get_executions(&self, job_id: JobId) -> Result<Vec<AttemptRecord>> {
        let entry = self.jobs.get(job_id).await?;
        let mut attempts = self.jobs.attempts(job_id).await?;

        // 最新の run はストアの行が正本（一度も走らずに止められたジョブは run 0）
        let task = self.tasks.get(&Ctx::background(), entry.task_id).await?;
        if task.run_count > 0 || task.status.is_final() {
            let current = AttemptRecord::from_task(job_id, &task);
            match attempts
                .iter_mut()
                .find(|a| a.status_revision == current.status_revision)
            {
                Some(existing) => *existing = current,
                None => attempts.push(current),
            }
        }
        attempts.sort_by_key(|a| a.status_revision);
        Ok(attempts)
    }

    async fn post_action(&self, job_id: JobId, action: &str) -> Result<()> {
        match action.parse::<JobAction>()? {
            JobAction::Stop => self.stop(job_id).await,
        }
    }
}
