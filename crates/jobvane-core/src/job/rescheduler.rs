//! Rescheduler - 再実行の依頼
//!
//! Retry ハンドラから呼ばれる fire-and-forget の口です。
//! 呼び出し側は結果を待たず、戻り値もありません。

use std::sync::Arc;

use super::handle::Job;

pub trait Rescheduler: Send + Sync {
    /// Hand `job` off for another attempt. Must not block the caller.
    fn reschedule(&self, job: Arc<dyn Job>);
}
