//! Cloud Trace span recorder
//!
//! Receives finished spans from a tracer, translates each sampled span into a
//! Google Cloud Trace v1 record, batches the records with a weighted bundler
//! and uploads full bundles asynchronously through a [`TraceSink`].
//!
//! ```no_run
//! use cloudtrace_recorder::{JsonFileSink, RawSpan, Recorder, RecorderConfig, SpanRecorder};
//!
//! # async fn run() -> Result<(), cloudtrace_recorder::ConfigError> {
//! let recorder = Recorder::new(RecorderConfig::new("my-project"), JsonFileSink::new("traces.json"))?;
//! recorder.record_span(&RawSpan::new(1, 2, 0, "GET /users").with_tag("http.method", "GET"));
//! recorder.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! Sinks use native async fn in traits (Rust 2024 edition); [`TraceSinkBoxed`]
//! is the object-safe form used for dynamic dispatch.

pub mod bundler;
pub mod cloud_trace;
pub mod config;
pub mod error;
pub mod labels;
pub mod logger;
pub mod metrics;
pub mod record;
pub mod recorder;
pub mod sink;
pub mod span;
pub mod translate;

// Re-export main types
pub use bundler::{Bundler, FlushTrigger};
pub use cloud_trace::{CloudTraceSink, ServiceAccountTokenSource, StaticTokenSource, TokenSource};
pub use config::{BundlerConfig, Credentials, RecorderConfig};
pub use error::{ConfigError, EnqueueError, UploadError};
pub use labels::{Labels, LogLabelStyle};
pub use logger::{Logger, TracingLogger};
pub use metrics::RecorderMetrics;
pub use record::{SpanKind, Trace, TraceSpan, Traces};
pub use recorder::{Recorder, SpanRecorder};
pub use sink::{JsonFileSink, NullSink, TraceSink, TraceSinkBoxed};
pub use span::{LogField, LogRecord, RawSpan, SpanContext, TagValue};
pub use translate::{translate, TRACE_WEIGHT};
