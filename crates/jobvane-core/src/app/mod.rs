//! App - アプリケーション層
//!
//! ports と job を組み合わせてエンジンを組み立てます。
//!
//! # 主要コンポーネント
//! - **EngineBuilder / Engine**: 構築とワイヤリング、起動時検証
//! - **EngineConfig**: 環境変数からの設定
//! - **WorkerGroup**: dispatch を受けてステートマシンを回すワーカー
//! - **LocalJobService**: プロセス内の JobService

pub mod builder;
pub mod config;
mod jobs;
pub mod service;
pub mod worker;

pub use self::builder::{BuildError, Engine, EngineBuilder};
pub use self::config::EngineConfig;
pub use self::service::LocalJobService;
pub use self::worker::WorkerGroup;
