//! jobvane-core
//!
//! Core building blocks for the jobvane job engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, task, execution, retry, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, ExecutionStore, JobService, Clock, など）
//! - **impls**: ports の実装（InMemoryStore, QueueRescheduler）
//! - **job**: ジョブハンドル、ステートハンドラ、ステートマシン、ワークフロー、Rescheduler
//! - **app**: エンジンの組み立て（EngineBuilder, WorkerGroup, LocalJobService）

pub mod app;
pub mod domain;
pub mod impls;
pub mod job;
pub mod ports;
