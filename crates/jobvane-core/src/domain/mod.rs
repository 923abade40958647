//! Domain model (ids, status codes, task and execution records, retry policy, errors).

pub mod errors;
pub mod execution;
pub mod ids;
pub mod retry;
pub mod status;
pub mod task;

pub use self::errors::{Error, ErrorKind, Result};
pub use self::execution::{Execution, ExecutionStatus, StatusCount};
pub use self::ids::{ExecutionId, JobId, ParseIdError, TaskId};
pub use self::retry::RetryPolicy;
pub use self::status::Status;
pub use self::task::{ExtraAttrs, NewTask, Task, TaskField, next_revision, revision_to_time};
