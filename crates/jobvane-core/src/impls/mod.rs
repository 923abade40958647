//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: TaskStore + ExecutionStore（開発用・テスト用の正本）
//! - **QueueRescheduler**: バックオフ後にワーカーキューへ再投入する Rescheduler
//!
//! 永続化ストアは同じ trait を別クレートで実装する想定です。

pub mod memory_store;
pub mod queue_rescheduler;

pub use self::memory_store::InMemoryStore;
pub use self::queue_rescheduler::{Dispatch, DispatchQueue, QueueRescheduler};
