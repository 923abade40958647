//! Per-job append-only log.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};

/// Shared text sink for one job. Clones append to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct JobLog {
    inner: Arc<Mutex<String>>,
}

impl JobLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one timestamped line.
    pub fn append(&self, line: impl AsRef<str>) {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut buf = self.lock();
        buf.push_str(&stamp);
        buf.push(' ');
        buf.push_str(line.as_ref());
        buf.push('\n');
    }

    pub fn text(&self) -> String {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, String> {
        // a panicked writer leaves at worst a truncated line
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
