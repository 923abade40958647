//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - `expect_workflows()` で期待されるジョブ種別を登録
//! - `build()` 時に設定の検証と「期待集合 ⊆ 登録済み集合」をチェック
//! - 不足があれば BuildError を返す

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use super::config::EngineConfig;
use super::jobs::JobTable;
use super::service::LocalJobService;
use super::worker::{Runner, WorkerGroup};
use crate::domain::Error;
use crate::impls::{DispatchQueue, InMemoryStore, QueueRescheduler};
use crate::job::{Workflow, WorkflowRegistry};
use crate::ports::{Clock, ExecutionStore, SystemClock, TaskStore, UlidGenerator};

/// EngineBuilder はエンジンを構築
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new(EngineConfig::from_env()?)
///     .register(Workflow::new("replication").step("push", PushStep))?
///     .expect_workflows(&["replication"])
///     .build()?;
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    workflows: WorkflowRegistry,
    expected: Option<Vec<String>>,
    clock: Arc<dyn Clock>,
    stores: Option<(Arc<dyn TaskStore>, Arc<dyn ExecutionStore>)>,
}

/// BuildError はエンジン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing workflows: {0:?}. These job types were expected but not registered.")]
    MissingWorkflows(Vec<String>),

    #[error(transparent)]
    Invalid(#[from] Error),
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            workflows: WorkflowRegistry::new(),
            expected: None,
            clock: Arc::new(SystemClock),
            stores: None,
        }
    }

    /// Register a workflow. A second workflow with the same name is rejected.
    pub fn register(mut self, workflow: Workflow) -> Result<Self, Error> {
        self.workflows.register(workflow)?;
        Ok(self)
    }

    pub fn expect_workflows(mut self, names: &[&str]) -> Self {
        self.expected = Some(names.iter().map(|name| name.to_string()).collect());
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use `store` instead of a fresh `InMemoryStore`.
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: TaskStore + ExecutionStore + 'static,
    {
        let tasks: Arc<dyn TaskStore> = store.clone();
        let executions: Arc<dyn ExecutionStore> = store;
        self.stores = Some((tasks, executions));
        self
    }

    /// Validate and start the engine. Spawns the workers, so it must be
    /// called from inside a tokio runtime.
    pub fn build(self) -> Result<Engine, BuildError> {
        self.config.validate()?;
        if let Some(expected) = &self.expected {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| self.workflows.get(name).is_none())
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingWorkflows(missing));
            }
        }

        let (tasks, executions) = match self.stores {
            Some(stores) => stores,
            None => {
                let store = Arc::new(InMemoryStore::with_clock(Arc::clone(&self.clock)));
                let tasks: Arc<dyn TaskStore> = store.clone();
                let executions: Arc<dyn ExecutionStore> = store;
                (tasks, executions)
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let workflows = Arc::new(self.workflows);
        let jobs = Arc::new(JobTable::default());
        let queue = DispatchQueue::new(tx, self.config.retry.clone());
        let rescheduler = Arc::new(QueueRescheduler::new(
            queue.clone(),
            Arc::clone(&tasks),
            self.config.max_attempts,
        ));
        let runner = Arc::new(Runner {
            store: Arc::clone(&tasks),
            workflows: Arc::clone(&workflows),
            rescheduler,
            jobs: Arc::clone(&jobs),
            clock: Arc::clone(&self.clock),
            queue: queue.clone(),
            max_attempts: self.config.max_attempts,
        });
        let workers = WorkerGroup::spawn(self.config.workers, rx, runner);
        let service = Arc::new(LocalJobService {
            tasks: Arc::clone(&tasks),
            executions,
            workflows,
            jobs,
            ids: Arc::new(UlidGenerator::new(Arc::clone(&self.clock))),
            queue,
        });

        info!(
            workers = self.config.workers,
            max_attempts = self.config.max_attempts,
            "engine started"
        );
        Ok(Engine {
            service,
            tasks,
            workers,
        })
    }
}

/// Running engine: job service, task store and worker pool.
pub struct Engine {
    service: Arc<LocalJobService>,
    tasks: Arc<dyn TaskStore>,
    workers: WorkerGroup,
}

impl Engine {
    pub fn service(&self) -> Arc<LocalJobService> {
        Arc::clone(&self.service)
    }

    pub fn tasks(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.tasks)
    }

    /// Stop taking dispatches and wait for in-flight runs.
    pub async fn shutdown(self) {
        self.workers.shutdown_and_join().await;
        info!("engine stopped");
    }
}
