use crate::sources::SourceKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// How a single source call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallResult {
    Success { items: usize },
    Failure,
    Timeout,
}

/// Reliability counters for one source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceHealth {
    pub successes: u32,
    pub failures: u32,
    pub timeouts: u32,
    pub items_returned: u64,
    pub last_latency_ms: Option<u64>,
    pub last_error: Option<String>,
    pub last_called: Option<DateTime<Utc>>,
}

impl SourceHealth {
    pub fn total_calls(&self) -> u32 {
        self.successes + self.failures + self.timeouts
    }

    /// Fraction of calls that succeeded, `None` before the first call.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.total_calls();
        (total > 0).then(|| f64::from(self.successes) / f64::from(total))
    }
}

/// Shared per-source reliability table, updated after every fan-out call.
#[derive(Debug, Default)]
pub struct SourceStats {
    inner: Mutex<BTreeMap<SourceKind, SourceHealth>>,
}

impl SourceStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: SourceKind, result: CallResult, latency_ms: u64, error: Option<String>) {
        let Ok(mut table) = self.inner.lock() else {
            return;
        };
        let health = table.entry(kind).or_default();
        match result {
            CallResult::Success { items } => {
                health.successes += 1;
                health.items_returned += items as u64;
            }
            CallResult::Failure => health.failures += 1,
            CallResult::Timeout => health.timeouts += 1,
        }
        if error.is_some() {
            health.last_error = error;
        }
        health.last_latency_ms = Some(latency_ms);
        health.last_called = Some(Utc::now());
    }

    pub fn get(&self, kind: SourceKind) -> SourceHealth {
        self.inner
            .lock()
            .ok()
            .and_then(|t| t.get(&kind).cloned())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> BTreeMap<SourceKind, SourceHealth> {
        self.inner.lock().map(|t| t.clone()).unwrap_or_default()
    }
}
