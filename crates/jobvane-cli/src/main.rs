use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Notify;
use tokio::time::{Duration, sleep};
use tracing::info;

use jobvane_core::app::{EngineBuilder, EngineConfig, LocalJobService};
use jobvane_core::domain::JobId;
use jobvane_core::job::{Job, Step, StepError, Workflow};
use jobvane_core::ports::{AttemptRecord, JobService};

#[derive(Debug, Deserialize)]
struct ReplicationMetadata {
    artifact: String,
    destination: String,
}

fn metadata(job: &dyn Job) -> Result<ReplicationMetadata, StepError> {
    serde_json::from_value(serde_json::Value::Object(job.metadata().clone()))
        .map_err(|e| StepError::Fatal(format!("metadata decode: {e}")))
}

/// Pulls the artifact; fails retryably the first `n` times.
struct PullStep {
    remaining_failures: AtomicU32,
}

impl PullStep {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Step for PullStep {
    async fn run(&self, job: &dyn Job) -> Result<(), StepError> {
        let m = metadata(job)?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(StepError::Retryable(format!(
                "registry busy while pulling {} (left={left})",
                m.artifact
            )));
        }

        job.log().append(format!("pulled {}", m.artifact));
        Ok(())
    }
}

/// Pushes the artifact. Waits on `gate` when one is set so the demo can stop it mid-flight.
struct PushStep {
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl Step for PushStep {
    async fn run(&self, job: &dyn Job) -> Result<(), StepError> {
        let m = metadata(job)?;
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        job.log()
            .append(format!("pushed {} to {}", m.artifact, m.destination));
        Ok(())
    }
}

/// 完了（Finished / Error / Stopped のどれか）をポーリングで待つ
async fn wait_final(service: &LocalJobService, job_id: JobId) -> Result<Vec<AttemptRecord>, jobvane_core::domain::Error> {
    loop {
        let attempts = service.get_executions(job_id).await?;
        if attempts.last().is_some_and(|a| a.status.is_final()) {
            return Ok(attempts);
        }
        sleep(Duration::from_millis(50)).await;
    }
}

async fn report(service: &LocalJobService, job_id: JobId) -> Result<(), jobvane_core::domain::Error> {
    let attempts = wait_final(service, job_id).await?;
    for a in &attempts {
        println!(
            "  run={} revision={} status={} start={:?} end={:?}",
            a.run, a.status_revision, a.status, a.start_time, a.end_time
        );
    }
    println!("--- log of {job_id} ---");
    print!("{}", service.get_job_log(job_id).await?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // (A) ログ: JOBVANE_LOG > RUST_LOG > info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("JOBVANE_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // (B) 設定とワークフローを用意してエンジンを起動
    let mut config = EngineConfig::from_env()?;
    if std::env::var("JOBVANE_RETRY_BASE_MS").is_err() {
        // デモなので待ちは短く
        config.retry.base_delay = Duration::from_millis(200);
    }
    let gate = Arc::new(Notify::new());
    let engine = EngineBuilder::new(config)
        .register(
            Workflow::new("replication")
                .step("pull", PullStep::new(2))
                .step("push", PushStep { gate: None }),
        )?
        .register(
            Workflow::new("replication-gated")
                .step("pull", PullStep::new(0))
                .step("push", PushStep { gate: Some(gate.clone()) }),
        )?
        .expect_workflows(&["replication", "replication-gated"])
        .build()?;
    let service = engine.service();

    // (C) リトライしてから完了するジョブ
    let job_id = service
        .submit_job(
            "replication",
            serde_json::json!({ "artifact": "library/nginx:1.27", "destination": "harbor.local" }),
        )
        .await?;
    info!(%job_id, "submitted replication job");
    println!("job {job_id}:");
    report(&service, job_id).await?;

    // (D) push の途中で stop するジョブ
    let job_id = service
        .submit_job(
            "replication-gated",
            serde_json::json!({ "artifact": "library/redis:7", "destination": "harbor.local" }),
        )
        .await?;
    sleep(Duration::from_millis(200)).await;
    service.post_action(job_id, "stop").await?;
    gate.notify_one();
    println!("job {job_id} (stopped):");
    report(&service, job_id).await?;

    // (E) 実行中のマシンを待ってから終了
    engine.shutdown().await;
    Ok(())
}
