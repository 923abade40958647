//! Workflow - ジョブ種別ごとのステップ列とその登録
//!
//! ワークフローは Running の後に通るステップ状態の並びです。
//! 各ステップは `Step` を実装し、`StepHandler` が StateHandler に変換します。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::warn;

use super::handle::Job;
use super::handler::{Entered, Next, StateHandler};
use super::machine::{StateMachine, StopHandle};
use crate::domain::{Error, Result, Status};
use super::rescheduler::Rescheduler;

/// Why a step could not complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    /// Worth another attempt (network hiccup, busy registry, ...).
    #[error("retryable: {0}")]
    Retryable(String),
    /// Will fail the same way again.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Unit of domain work performed while the job sits in one step state.
///
/// Steps are shared by every run of a workflow; per-run state belongs in the job.
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, job: &dyn Job) -> std::result::Result<(), StepError>;

    /// Release whatever `run` acquired. Called at most once per run.
    async fn cleanup(&self, _job: &dyn Job) -> Result<()> {
        Ok(())
    }
}

/// Adapts a `Step` to the `StateHandler` contract for one run.
///
/// - success -> `Next::Continue`
/// - retryable failure -> Retrying
/// - fatal failure -> Error
pub struct StepHandler {
    name: String,
    step: Arc<dyn Step>,
    job: Arc<dyn Job>,
    cleaned_up: AtomicBool,
}

impl StepHandler {
    pub fn new(name: impl Into<String>, step: Arc<dyn Step>, job: Arc<dyn Job>) -> Self {
        Self {
            name: name.into(),
            step,
            job,
            cleaned_up: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StateHandler for StepHandler {
    async fn enter(&self) -> Entered {
        match self.step.run(self.job.as_ref()).await {
            Ok(()) => Entered::ok(Next::Continue),
            Err(err) => {
                warn!(job_id = %self.job.id(), step = %self.name, error = %err, "step failed");
                let next = match err {
                    StepError::Retryable(_) => Next::status(Status::Retrying),
                    StepError::Fatal(_) => Next::status(Status::Error),
                };
                Entered::with_error(next, Error::handler(&self.name, err.to_string()))
            }
        }
    }

    async fn exit(&self) -> Result<()> {
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.step.cleanup(self.job.as_ref()).await
    }
}

/// Named, ordered list of steps.
pub struct Workflow {
    name: String,
    steps: Vec<(String, Arc<dyn Step>)>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, name: impl Into<String>, step: impl Step + 'static) -> Self {
        self.steps.push((name.into(), Arc::new(step)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|(name, _)| name.as_str())
    }

    /// Build the machine for one run of `job`:
    /// Pending -> Running -> step 1 -> ... -> step n -> Finished.
    pub fn machine(
        &self,
        job: Arc<dyn Job>,
        rescheduler: Arc<dyn Rescheduler>,
        stop: &StopHandle,
    ) -> StateMachine {
        let mut sm = StateMachine::with_status_handlers(Arc::clone(&job), rescheduler, stop);
        let mut from = Status::Running.as_str().to_string();
        for (name, step) in &self.steps {
            sm.add_handler(
                name.clone(),
                Arc::new(StepHandler::new(name.clone(), Arc::clone(step), Arc::clone(&job))),
            );
            sm.add_transition(from, name.clone());
            from = name.clone();
        }
        sm.add_transition(from, Status::Finished.as_str());
        sm
    }
}

/// Registry of workflows (job name -> workflow).
///
/// Built during initialization, read-only afterwards.
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, Arc<Workflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, workflow: Workflow) -> Result<()> {
        if self.workflows.contains_key(workflow.name()) {
            return Err(Error::DuplicateWorkflow(workflow.name().to_string()));
        }
        self.workflows
            .insert(workflow.name().to_string(), Arc::new(workflow));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Workflow>> {
        self.workflows.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.workflows.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}
