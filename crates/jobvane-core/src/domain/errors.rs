//! Errors - エラー型と分類
//!
//! `ErrorKind` は運用上の分類です。呼び出し側は variant ではなく
//! kind を見てリトライ可否などを判断します。

use thiserror::Error as ThisError;

/// ErrorKind は実行エラーの分類
///
/// - NotFound: id が存在しない（内部でリトライしない）
/// - Conflict: 参照整合性違反など（リトライしない）
/// - Transient: ストアの一時的な障害（ログに残して先へ進む）
/// - Invalid: 呼び出し側の入力が不正
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Transient,
    Invalid,
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("the task tries to reference a non existing execution {0}")]
    ForeignKey(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Storage(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("unknown job type: {0}")]
    UnknownJobType(String),

    #[error("duplicate workflow for job type: {0}")]
    DuplicateWorkflow(String),

    #[error("no handler registered for state {0}")]
    NoHandler(String),

    #[error("no transition defined from state {0}")]
    NoTransition(String),

    #[error("transition from {from} to {to} is not allowed")]
    IllegalTransition { from: String, to: String },

    #[error("handler failed in state {state}: {message}")]
    Handler { state: String, message: String },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("dispatch queue closed")]
    QueueClosed,
}

impl Error {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn handler(state: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Handler {
            state: state.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::ForeignKey(_) | Error::Conflict(_) | Error::DuplicateWorkflow(_) => {
                ErrorKind::Conflict
            }
            Error::Storage(_) | Error::Handler { .. } | Error::QueueClosed => ErrorKind::Transient,
            Error::InvalidStatus(_)
            | Error::InvalidMetadata(_)
            | Error::UnsupportedAction(_)
            | Error::UnknownJobType(_)
            | Error::NoHandler(_)
            | Error::NoTransition(_)
            | Error::IllegalTransition { .. }
            | Error::Config(_) => ErrorKind::Invalid,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, Error>;
