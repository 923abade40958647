//! StateHandler - 状態ごとの enter / exit の振る舞い

use async_trait::async_trait;

use crate::domain::{Error, Result, Status};

/// What the machine should do after a handler's `enter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next {
    /// Follow the machine's own transition table.
    Continue,
    /// Stop this run. The job is final, stopped, or handed off for a retry.
    Halt,
    /// Move to the named state.
    State(String),
}

impl Next {
    pub fn state(name: impl Into<String>) -> Self {
        Next::State(name.into())
    }

    pub fn status(status: Status) -> Self {
        Next::State(status.as_str().to_string())
    }
}

/// Result of `StateHandler::enter`.
///
/// A handler may report a next state together with a non-fatal error, e.g.
/// when the status write failed but the run should still move on.
#[derive(Debug)]
pub struct Entered {
    pub next: Next,
    pub error: Option<Error>,
}

impl Entered {
    pub fn ok(next: Next) -> Self {
        Self { next, error: None }
    }

    pub fn with_error(next: Next, error: Error) -> Self {
        Self {
            next,
            error: Some(error),
        }
    }

    pub fn from_result(next: Next, result: Result<()>) -> Self {
        Self {
            next,
            error: result.err(),
        }
    }
}

/// Behaviour attached to one state.
///
/// `exit` must be idempotent: the machine may call it more than once for
/// the same state.
#[async_trait]
pub trait StateHandler: Send + Sync {
    async fn enter(&self) -> Entered;

    async fn exit(&self) -> Result<()>;
}
