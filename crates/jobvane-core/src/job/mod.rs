//! Job execution: the job handle, state handlers and the state machine.
//!
//! 制御の流れ:
//! 1. StateMachine が現在の状態のハンドラの `enter` を呼ぶ
//! 2. ハンドラは Job 経由でステータスを永続化し、次の状態を返す
//! 3. StateMachine が `exit` を呼び、次の状態へ進む（halt まで繰り返す）

pub mod handle;
pub mod handler;
pub mod log;
pub mod machine;
pub mod rescheduler;
pub mod retry;
pub mod status_updater;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use self::handle::{Job, TaskJob};
pub use self::handler::{Entered, Next, StateHandler};
pub use self::log::JobLog;
pub use self::machine::{RunReport, StateMachine, StopHandle};
pub use self::rescheduler::Rescheduler;
pub use self::retry::Retry;
pub use self::status_updater::StatusUpdater;
pub use self::workflow::{Step, StepError, StepHandler, Workflow, WorkflowRegistry};
