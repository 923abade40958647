//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（永続化、キュー、外側の API）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//! 実装は `impls` と `app` にあります。

pub mod clock;
pub mod context;
pub mod id_generator;
pub mod job_service;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::context::Ctx;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_service::{AttemptRecord, JobAction, JobService};
pub use self::task_store::{ExecutionStore, StatusWrite, TaskQuery, TaskStore};
