//! Span recorder: translate, bundle, upload.
//!
//! `record_span` never waits on the network. Translated records go into a
//! [`Bundler`]; full bundles are uploaded on spawned tasks. When the bundler
//! refuses a record (buffer full) the recorder uploads that single record
//! synchronously instead of dropping it.

use crate::bundler::Bundler;
use crate::cloud_trace::CloudTraceSink;
use crate::config::RecorderConfig;
use crate::error::ConfigError;
use crate::labels::LogLabelStyle;
use crate::logger::{Logger, TracingLogger};
use crate::metrics::RecorderMetrics;
use crate::record::Trace;
use crate::sink::{TraceSink, TraceSinkBoxed};
use crate::span::RawSpan;
use crate::translate::{translate, TRACE_WEIGHT};
use std::sync::Arc;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Inbound capability: accepts finished spans from a tracer.
pub trait SpanRecorder: Send + Sync {
    /// Records a finished span. Never fails and never blocks on uploads,
    /// except for the overflow fallback.
    fn record_span(&self, span: &RawSpan);
}

/// Records finished spans to a [`TraceSink`] in bundles.
pub struct Recorder {
    project_id: String,
    label_style: LogLabelStyle,
    logger: Arc<dyn Logger>,
    sink: Arc<dyn TraceSinkBoxed>,
    bundler: Bundler<Trace>,
    metrics: Arc<RecorderMetrics>,
    runtime: Handle,
}

impl Recorder {
    /// Creates a recorder that uploads to `sink`.
    ///
    /// Must be called inside a tokio runtime; the bundler timer and upload
    /// tasks run on it.
    pub fn new<S: TraceSink + 'static>(config: RecorderConfig, sink: S) -> Result<Self, ConfigError> {
        Self::with_boxed_sink(config, Arc::new(sink))
    }

    /// Creates a recorder that uploads to Cloud Trace using the configured
    /// service-account credentials.
    pub fn cloud_trace(config: RecorderConfig) -> Result<Self, ConfigError> {
        let sink = CloudTraceSink::from_config(&config)?;
        Self::new(config, sink)
    }

    pub fn with_boxed_sink(
        config: RecorderConfig,
        sink: Arc<dyn TraceSinkBoxed>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        let logger = config
            .logger
            .clone()
            .unwrap_or_else(|| Arc::new(TracingLogger));
        let metrics = Arc::new(RecorderMetrics::new());

        let handler = {
            let sink = Arc::clone(&sink);
            let logger = Arc::clone(&logger);
            let metrics = Arc::clone(&metrics);
            move |traces: Vec<Trace>| {
                let sink = Arc::clone(&sink);
                let logger = Arc::clone(&logger);
                let metrics = Arc::clone(&metrics);
                async move { upload_bundle(sink, logger, metrics, traces).await }
            }
        };
        let bundler = Bundler::new(config.bundler.clone(), handler)?;

        tracing::debug!(
            target: "cloudtrace_recorder",
            project = %config.project_id,
            sink = sink.name(),
            "recorder started"
        );

        Ok(Self {
            project_id: config.project_id,
            label_style: config.log_label_style,
            logger,
            sink,
            bundler,
            metrics,
            runtime,
        })
    }

    pub fn metrics(&self) -> &RecorderMetrics {
        &self.metrics
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// The underlying bundler, for introspection
    pub fn bundler(&self) -> &Bundler<Trace> {
        &self.bundler
    }

    /// Uploads the pending bundle and waits for in-flight uploads.
    pub async fn flush(&self) {
        self.bundler.flush().await;
    }

    /// Drains everything and stops the bundler.
    pub async fn shutdown(self) {
        self.bundler.shutdown().await;
        tracing::debug!(
            target: "cloudtrace_recorder",
            uploaded = self.metrics.traces_uploaded(),
            errors = self.metrics.upload_errors(),
            "recorder shut down"
        );
    }

    /// Uploads one record outside the bundler, on the caller's thread when
    /// the runtime allows blocking.
    fn upload_now(&self, trace: Trace) {
        let upload = upload_single(
            Arc::clone(&self.sink),
            Arc::clone(&self.logger),
            Arc::clone(&self.metrics),
            trace,
        );

        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => {
                tracing::warn!(
                    target: "cloudtrace_recorder",
                    "current-thread runtime cannot block; uploading overflowed trace in the background"
                );
                handle.spawn(upload);
            }
            Ok(handle) => tokio::task::block_in_place(|| handle.block_on(upload)),
            Err(_) if self.runtime.runtime_flavor() == RuntimeFlavor::CurrentThread => {
                self.runtime.spawn(upload);
            }
            Err(_) => self.runtime.block_on(upload),
        }
    }
}

impl SpanRecorder for Recorder {
    fn record_span(&self, span: &RawSpan) {
        RecorderMetrics::inc(&self.metrics.spans_recorded);

        let Some(trace) = translate(span, &self.project_id, self.label_style) else {
            RecorderMetrics::inc(&self.metrics.spans_unsampled);
            return;
        };

        match self.bundler.add(trace, TRACE_WEIGHT) {
            Ok(()) => RecorderMetrics::inc(&self.metrics.records_enqueued),
            Err(err) => {
                RecorderMetrics::inc(&self.metrics.overflows);
                self.logger
                    .error("trace upload bundle too full. uploading immediately");
                self.upload_now(err.into_inner());
            }
        }
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("project_id", &self.project_id)
            .field("label_style", &self.label_style)
            .field("sink", &self.sink.name())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

async fn upload_bundle(
    sink: Arc<dyn TraceSinkBoxed>,
    logger: Arc<dyn Logger>,
    metrics: Arc<RecorderMetrics>,
    traces: Vec<Trace>,
) {
    let count = traces.len();
    RecorderMetrics::inc(&metrics.bundles_flushed);

    match sink.upload_boxed(traces).await {
        Ok(()) => metrics.record_upload(count as u64),
        Err(e) => {
            RecorderMetrics::inc(&metrics.upload_errors);
            logger.error(&format!(
                "failed to upload {count} traces to the Cloud Trace server. (err = {e})"
            ));
        }
    }
}

async fn upload_single(
    sink: Arc<dyn TraceSinkBoxed>,
    logger: Arc<dyn Logger>,
    metrics: Arc<RecorderMetrics>,
    trace: Trace,
) {
    RecorderMetrics::inc(&metrics.fallback_uploads);

    match sink.upload_boxed(vec![trace]).await {
        Ok(()) => metrics.record_upload(1),
        Err(e) => {
            RecorderMetrics::inc(&metrics.upload_errors);
            logger.error(&format!("error uploading trace: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BundlerConfig;
    use crate::error::UploadError;
    use crate::logger::CapturingLogger;
    use crate::sink::{FailingSink, RecordingSink};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Holds multi-record bundles until released; single records pass.
    struct BlockingSink {
        gate: Semaphore,
        inner: RecordingSink,
    }

    impl BlockingSink {
        fn new() -> Self {
            Self {
                gate: Semaphore::new(0),
                inner: RecordingSink::new(),
            }
        }

        fn release(&self) {
            self.gate.add_permits(1024);
        }
    }

    impl TraceSink for BlockingSink {
        async fn upload(&self, traces: Vec<Trace>) -> Result<(), UploadError> {
            if traces.len() > 1 {
                let _permit = self.gate.acquire().await;
            }
            self.inner.upload(traces).await
        }

        fn name(&self) -> &str {
            "blocking"
        }
    }

    /// Sink whose upload panics.
    struct PanickingSink;

    impl TraceSink for PanickingSink {
        async fn upload(&self, traces: Vec<Trace>) -> Result<(), UploadError> {
            assert!(traces.is_empty(), "sink failed on {} traces", traces.len());
            Ok(())
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    fn span(id: u64) -> RawSpan {
        RawSpan::new(id, id, 0, format!("op-{id}")).with_duration(Duration::from_millis(5))
    }

    fn config() -> RecorderConfig {
        RecorderConfig::new("test-project")
            .with_bundler(BundlerConfig::default().with_delay_threshold(Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn test_unsampled_span_is_never_uploaded() {
        let sink = Arc::new(RecordingSink::new());
        let recorder = Recorder::with_boxed_sink(config(), sink.clone()).unwrap();

        recorder.record_span(&span(1).with_sampled(false));
        recorder.flush().await;

        assert_eq!(sink.batch_count(), 0);
        assert_eq!(recorder.bundler().pending_len(), 0);
        assert_eq!(recorder.metrics().spans_recorded(), 1);
        assert_eq!(recorder.metrics().spans_unsampled(), 1);
        assert_eq!(recorder.metrics().records_enqueued(), 0);
    }

    #[tokio::test]
    async fn test_sampled_span_enqueues_one_record_of_weight_two() {
        let sink = Arc::new(RecordingSink::new());
        let recorder = Recorder::with_boxed_sink(config(), sink.clone()).unwrap();

        recorder.record_span(&span(7));

        assert_eq!(recorder.bundler().pending_len(), 1);
        assert_eq!(recorder.bundler().pending_weight(), TRACE_WEIGHT);

        recorder.flush().await;
        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].project_id, "test-project");
        assert_eq!(batches[0][0].spans[0].name, "op-7");
        assert_eq!(recorder.metrics().traces_uploaded(), 1);
    }

    #[tokio::test]
    async fn test_count_threshold_uploads_one_bundle() {
        let sink = Arc::new(RecordingSink::new());
        let recorder = Recorder::with_boxed_sink(config(), sink.clone()).unwrap();

        for id in 1..=100 {
            recorder.record_span(&span(id));
        }
        assert_eq!(recorder.bundler().pending_len(), 0);

        recorder.flush().await;
        assert_eq!(sink.batch_count(), 1);
        assert_eq!(sink.trace_count(), 100);
        assert_eq!(recorder.metrics().bundles_flushed(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_overflow_uploads_the_record_synchronously() {
        let bundler = BundlerConfig::default()
            .with_delay_threshold(Duration::from_secs(3600))
            .with_bundle_weight_threshold(4)
            .with_bundle_weight_limit(4)
            .with_buffered_weight_limit(4);
        let logger = Arc::new(CapturingLogger::new());
        let sink = Arc::new(BlockingSink::new());
        let recorder = Recorder::with_boxed_sink(
            config().with_bundler(bundler).with_logger(logger.clone()),
            sink.clone(),
        )
        .unwrap();

        // Two records reach the weight threshold; the bundle stays in flight.
        recorder.record_span(&span(1));
        recorder.record_span(&span(2));
        assert_eq!(recorder.bundler().buffered_weight(), 4);

        recorder.record_span(&span(3));

        let batches = sink.inner.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].spans[0].name, "op-3");
        assert_eq!(recorder.metrics().overflows(), 1);
        assert_eq!(recorder.metrics().fallback_uploads(), 1);
        assert_eq!(
            logger.messages(),
            vec!["trace upload bundle too full. uploading immediately".to_string()]
        );

        sink.release();
        recorder.flush().await;
        assert_eq!(sink.inner.batch_count(), 2);
        assert_eq!(sink.inner.trace_count(), 3);
    }

    #[tokio::test]
    async fn test_overflow_on_current_thread_runtime_uploads_in_background() {
        let bundler = BundlerConfig::default()
            .with_delay_threshold(Duration::from_secs(3600))
            .with_bundle_weight_threshold(4)
            .with_bundle_weight_limit(4)
            .with_buffered_weight_limit(4);
        let sink = Arc::new(RecordingSink::new());
        let recorder =
            Recorder::with_boxed_sink(config().with_bundler(bundler), sink.clone()).unwrap();

        // Spawned uploads cannot run until this task yields.
        for id in 1..=3 {
            recorder.record_span(&span(id));
        }
        assert_eq!(recorder.metrics().overflows(), 1);

        recorder.flush().await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let mut sizes: Vec<usize> = sink.batches().iter().map(Vec::len).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failed_upload_is_logged_once_and_not_retried() {
        let logger = Arc::new(CapturingLogger::new());
        let sink = Arc::new(FailingSink::new());
        let recorder =
            Recorder::with_boxed_sink(config().with_logger(logger.clone()), sink.clone()).unwrap();

        recorder.record_span(&span(1));
        recorder.flush().await;

        assert_eq!(sink.attempts(), 1);
        assert_eq!(
            logger.messages(),
            vec![
                "failed to upload 1 traces to the Cloud Trace server. (err = transport error: simulated failure)"
                    .to_string()
            ]
        );
        assert_eq!(recorder.metrics().upload_errors(), 1);

        // Later spans are still accepted.
        recorder.record_span(&span(2));
        assert_eq!(recorder.bundler().pending_len(), 1);
        recorder.flush().await;
        assert_eq!(sink.attempts(), 2);
    }

    #[tokio::test]
    async fn test_panicking_sink_does_not_wedge_flush_or_shutdown() {
        let recorder = Recorder::new(config(), PanickingSink).unwrap();

        recorder.record_span(&span(1));
        tokio::time::timeout(Duration::from_secs(2), recorder.flush())
            .await
            .expect("flush returns after a sink panic");
        assert_eq!(recorder.bundler().buffered_weight(), 0);
        assert_eq!(recorder.bundler().in_flight(), 0);

        recorder.record_span(&span(2));
        assert_eq!(recorder.metrics().records_enqueued(), 2);
        tokio::time::timeout(Duration::from_secs(2), recorder.shutdown())
            .await
            .expect("shutdown returns after a sink panic");
    }

    #[tokio::test]
    async fn test_shutdown_drains_pending_bundle() {
        let sink = Arc::new(RecordingSink::new());
        let recorder = Recorder::with_boxed_sink(config(), sink.clone()).unwrap();

        for id in 1..=5 {
            recorder.record_span(&span(id));
        }
        recorder.shutdown().await;

        assert_eq!(sink.trace_count(), 5);
    }

    #[tokio::test]
    async fn test_empty_project_rejected() {
        let err = Recorder::new(RecorderConfig::new(""), RecordingSink::new()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProjectId));
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let err = Recorder::new(config(), RecordingSink::new()).unwrap_err();
        assert!(matches!(err, ConfigError::NoRuntime));
    }
}
