use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe recorder counters.
///
/// All counters use `Ordering::Relaxed`: they are statistics and never guard
/// other data.
#[derive(Debug, Default)]
pub struct RecorderMetrics {
    /// Spans handed to `record_span`
    pub spans_recorded: AtomicU64,
    /// Spans skipped because they were not sampled
    pub spans_unsampled: AtomicU64,
    /// Records accepted by the bundler
    pub records_enqueued: AtomicU64,
    /// Enqueues rejected by the buffered-weight limit
    pub overflows: AtomicU64,
    /// Bundles handed to the sink
    pub bundles_flushed: AtomicU64,
    /// Traces the sink acknowledged
    pub traces_uploaded: AtomicU64,
    /// Failed uploads (bundles and fallbacks)
    pub upload_errors: AtomicU64,
    /// Synchronous single-record uploads after an overflow
    pub fallback_uploads: AtomicU64,
}

impl RecorderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans_recorded(&self) -> u64 {
        self.spans_recorded.load(Ordering::Relaxed)
    }

    pub fn spans_unsampled(&self) -> u64 {
        self.spans_unsampled.load(Ordering::Relaxed)
    }

    pub fn records_enqueued(&self) -> u64 {
        self.records_enqueued.load(Ordering::Relaxed)
    }

    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    pub fn bundles_flushed(&self) -> u64 {
        self.bundles_flushed.load(Ordering::Relaxed)
    }

    pub fn traces_uploaded(&self) -> u64 {
        self.traces_uploaded.load(Ordering::Relaxed)
    }

    pub fn upload_errors(&self) -> u64 {
        self.upload_errors.load(Ordering::Relaxed)
    }

    pub fn fallback_uploads(&self) -> u64 {
        self.fallback_uploads.load(Ordering::Relaxed)
    }

    pub(crate) fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upload(&self, trace_count: u64) {
        self.traces_uploaded.fetch_add(trace_count, Ordering::Relaxed);
    }
}
