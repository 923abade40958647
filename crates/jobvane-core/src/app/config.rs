//! EngineConfig - エンジン設定
//!
//! デフォルト値 → 環境変数の順で上書きし、最後に `validate()` で検証します。
//!
//! | 変数 | 項目 |
//! |---|---|
//! | `JOBVANE_WORKERS` | ワーカー数 |
//! | `JOBVANE_MAX_ATTEMPTS` | 1 ジョブあたりの最大実行回数 |
//! | `JOBVANE_RETRY_BASE_MS` | 最初のリトライまでの待ち（ミリ秒） |
//! | `JOBVANE_RETRY_MULTIPLIER` | 指数バックオフの倍率 |
//! | `JOBVANE_RETRY_JITTER` | ジッタ（0〜1） |

use std::str::FromStr;
use std::time::Duration;

use crate::domain::{Error, Result, RetryPolicy};

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `JOBVANE_*` environment variables, validated.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(workers) = parse_var(&lookup, "JOBVANE_WORKERS")? {
            config.workers = workers;
        }
        if let Some(max_attempts) = parse_var(&lookup, "JOBVANE_MAX_ATTEMPTS")? {
            config.max_attempts = max_attempts;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "JOBVANE_RETRY_BASE_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(multiplier) = parse_var(&lookup, "JOBVANE_RETRY_MULTIPLIER")? {
            config.retry.multiplier = multiplier;
        }
        if let Some(jitter) = parse_var(&lookup, "JOBVANE_RETRY_JITTER")? {
            config.retry.jitter = jitter;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(Error::Config(format!(
                "retry multiplier must be >= 1, got {}",
                self.retry.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(Error::Config(format!(
                "retry jitter must be within [0, 1], got {}",
                self.retry.jitter
            )));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| Error::Config(format!("invalid {key} value: {raw}")))
}
