//! StateMachine - ジョブを終端状態まで進める実行器
//!
//! 1 つのジョブの run を 1 つの StateMachine が逐次的に駆動します。
//! enter → exit → 次の状態、を halt まで繰り返します。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::handle::Job;
use super::handler::{Next, StateHandler};
use super::retry::Retry;
use super::status_updater::StatusUpdater;
use crate::domain::{Error, Status};
use super::rescheduler::Rescheduler;

/// External stop switch for a running machine.
///
/// Stopping is cooperative: the machine checks the flag between the `exit`
/// of one state and the `enter` of the next.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Do both handles control the same machine?
    pub fn same_as(&self, other: &StopHandle) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for StopHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of one machine run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Last state whose handler was entered.
    pub last_state: String,
    /// Number of `enter` calls.
    pub steps: usize,
    /// Whether an external stop redirected the run.
    pub stopped: bool,
    /// Errors reported by handlers or by the machine itself, in order.
    pub errors: Vec<Error>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct StateMachine {
    job: Arc<dyn Job>,
    handlers: HashMap<String, Arc<dyn StateHandler>>,
    /// state -> allowed next states; the first one is the `Continue` target.
    transitions: HashMap<String, Vec<String>>,
    /// States reachable from anywhere.
    forced: HashSet<String>,
    stop_rx: watch::Receiver<bool>,
}

impl StateMachine {
    /// Empty machine: no handlers, no transitions.
    pub fn new(job: Arc<dyn Job>, stop: &StopHandle) -> Self {
        Self {
            job,
            handlers: HashMap::new(),
            transitions: HashMap::new(),
            forced: HashSet::new(),
            stop_rx: stop.subscribe(),
        }
    }

    /// Machine with a `StatusUpdater` for every status and `Retry` for Retrying.
    ///
    /// Stopped, Error and Retrying are forced states. The default path is
    /// Pending -> Running and Scheduled -> Running; callers add what follows
    /// Running.
    pub fn with_status_handlers(
        job: Arc<dyn Job>,
        rescheduler: Arc<dyn Rescheduler>,
        stop: &StopHandle,
    ) -> Self {
        let mut sm = Self::new(Arc::clone(&job), stop);
        for status in Status::ALL {
            let handler: Arc<dyn StateHandler> = match status {
                Status::Retrying => Arc::new(Retry::new(Arc::clone(&job), Arc::clone(&rescheduler))),
                _ => Arc::new(StatusUpdater::new(Arc::clone(&job), status)),
            };
            sm.add_handler(status.as_str(), handler);
        }
        for status in [Status::Stopped, Status::Error, Status::Retrying] {
            sm.force_state(status.as_str());
        }
        sm.add_transition(Status::Pending.as_str(), Status::Running.as_str());
        sm.add_transition(Status::Scheduled.as_str(), Status::Running.as_str());
        sm
    }

    pub fn add_handler(&mut self, state: impl Into<String>, handler: Arc<dyn StateHandler>) {
        self.handlers.insert(state.into(), handler);
    }

    /// Allow `from -> to`. The first transition added for `from` is its
    /// `Continue` target.
    pub fn add_transition(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.transitions.entry(from.into()).or_default().push(to.into());
    }

    pub fn force_state(&mut self, state: impl Into<String>) {
        self.forced.insert(state.into());
    }

    fn allowed(&self, from: &str, to: &str) -> bool {
        self.forced.contains(to)
            || self
                .transitions
                .get(from)
                .is_some_and(|next| next.iter().any(|s| s == to))
    }

    fn stop_requested(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Resolve a handler's answer into the next state, recording machine errors.
    fn resolve(&self, from: &str, next: Next, report: &mut RunReport) -> Option<String> {
        match next {
            Next::Halt => None,
            Next::Continue => match self.transitions.get(from).and_then(|next| next.first()) {
                Some(to) => Some(to.clone()),
                None => {
                    report.errors.push(Error::NoTransition(from.to_string()));
                    None
                }
            },
            Next::State(to) if self.allowed(from, &to) => Some(to),
            Next::State(to) => {
                warn!(job_id = %self.job.id(), from, to = %to, "illegal transition, moving to Error");
                report.errors.push(Error::IllegalTransition {
                    from: from.to_string(),
                    to,
                });
                Some(Status::Error.as_str().to_string())
            }
        }
    }

    /// Drive the job from `initial` until a handler halts.
    pub async fn run(self, initial: &str) -> RunReport {
        let mut report = RunReport::default();
        let mut state = initial.to_string();
        let job_id = self.job.id();

        loop {
            let Some(handler) = self.handlers.get(&state).cloned() else {
                warn!(%job_id, state = %state, "no handler for state");
                report.errors.push(Error::NoHandler(state));
                break;
            };

            info!(%job_id, from = %report.last_state, to = %state, "entering state");
            self.job.log().append(format!("entering {state}"));
            report.last_state = state.clone();
            report.steps += 1;

            let entered = handler.enter().await;
            if let Some(err) = entered.error {
                warn!(%job_id, state = %state, error = %err, "handler reported an error");
                self.job.log().append(format!("{state}: {err}"));
                report.errors.push(err);
            }
            let next = self.resolve(&state, entered.next, &mut report);

            if let Err(err) = handler.exit().await {
                warn!(%job_id, state = %state, error = %err, "exit failed");
                report.errors.push(err);
            }

            let Some(mut next) = next else {
                debug!(%job_id, state = %state, "machine halted");
                break;
            };

            let stopped = Status::Stopped.as_str();
            if self.stop_requested() && next != stopped {
                info!(%job_id, state = %state, "stop requested");
                self.job.log().append("stop requested");
                report.stopped = true;
                next = stopped.to_string();
            }
            state = next;
        }

        report
    }
}
