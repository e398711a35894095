//! Fragment processing seam.
//!
//! DESIGN
//! ======
//! The reconstruction backend lives behind `FragmentProcessor`. The handler
//! awaits `process` to completion before reading the next message on the same
//! connection, so a processor never sees overlapping calls from one client.
//!
//! `RecordingProcessor` wraps any processor and keeps a bounded history of
//! what came through, for the diagnostics endpoint. Oldest entries are
//! evicted first; memory never grows with traffic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::fragment::{Fragment, FragmentSummary, ProcessResult, Status};

#[async_trait::async_trait]
pub trait FragmentProcessor: Send + Sync {
    async fn process(&self, fragment: Fragment) -> ProcessResult;
}

/// Placeholder backend: accepts everything.
pub struct StubProcessor;

#[async_trait::async_trait]
impl FragmentProcessor for StubProcessor {
    async fn process(&self, _fragment: Fragment) -> ProcessResult {
        ProcessResult::success()
    }
}

// =============================================================================
// HISTORY
// =============================================================================

/// One processed fragment as kept in the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedFragment {
    /// Milliseconds since Unix epoch.
    pub ts: i64,
    #[serde(flatten)]
    pub summary: FragmentSummary,
    pub status: Status,
}

/// Bounded ring of recently processed fragments. Cheap to clone; clones share
/// the same ring.
#[derive(Clone)]
pub struct FragmentHistory {
    inner: Arc<Mutex<VecDeque<RecordedFragment>>>,
    capacity: usize,
}

impl FragmentHistory {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))), capacity }
    }

    pub fn record(&self, summary: FragmentSummary, status: Status) {
        if self.capacity == 0 {
            return;
        }
        let mut ring = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        while ring.len() >= self.capacity {
            ring.pop_front();
        }
        ring.push_back(RecordedFragment { ts: now_ms(), summary, status });
    }

    /// Oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RecordedFragment> {
        let ring = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        ring.iter().cloned().collect()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Records every fragment into a [`FragmentHistory`], then delegates.
pub struct RecordingProcessor {
    inner: Arc<dyn FragmentProcessor>,
    history: FragmentHistory,
}

impl RecordingProcessor {
    #[must_use]
    pub fn new(inner: Arc<dyn FragmentProcessor>, history: FragmentHistory) -> Self {
        Self { inner, history }
    }
}

#[async_trait::async_trait]
impl FragmentProcessor for RecordingProcessor {
    async fn process(&self, fragment: Fragment) -> ProcessResult {
        let summary = fragment.summary();
        let result = self.inner.process(fragment).await;
        self.history.record(summary, result.status);
        result
    }
}

/// Current time as milliseconds since Unix epoch.
pub(crate) fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

#[cfg(test)]
#[path = "processor_test.rs"]
mod tests;
