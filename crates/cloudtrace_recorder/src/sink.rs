use crate::error::UploadError;
use crate::record::{Trace, Traces};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Destination for bundles of trace records.
///
/// Each call is all-or-nothing: either the whole batch was accepted or a
/// single error is returned. Calls may arrive concurrently from the bundler's
/// background tasks and from the overflow fallback path.
///
/// Uses native async fn in traits instead of `#[async_trait]`. For dynamic
/// dispatch, use [`TraceSinkBoxed`].
pub trait TraceSink: Send + Sync {
    /// Uploads a batch of traces.
    fn upload(&self, traces: Vec<Trace>) -> impl Future<Output = Result<(), UploadError>> + Send;

    /// Returns the sink name for logs.
    fn name(&self) -> &str;
}

/// Object-safe version of [`TraceSink`].
pub trait TraceSinkBoxed: Send + Sync {
    /// Uploads a batch of traces (boxed future for object safety).
    fn upload_boxed(
        &self,
        traces: Vec<Trace>,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + '_>>;

    /// Returns the sink name for logs.
    fn name(&self) -> &str;
}

/// Blanket implementation: any TraceSink can be used as TraceSinkBoxed
impl<T: TraceSink> TraceSinkBoxed for T {
    fn upload_boxed(
        &self,
        traces: Vec<Trace>,
    ) -> Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + '_>> {
        Box::pin(self.upload(traces))
    }

    fn name(&self) -> &str {
        TraceSink::name(self)
    }
}

/// Appends each batch as one line holding a `patchTraces` request body, for
/// local development.
///
/// Bundles are uploaded from concurrent tasks; writes are serialized so every
/// line is a complete JSON document.
pub struct JsonFileSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileSink {
    /// Appends to `path`, creating it on first upload.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Truncates `path` and appends to it from then on.
    pub fn create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        std::fs::File::create(&path)?;
        Ok(Self::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TraceSink for JsonFileSink {
    async fn upload(&self, traces: Vec<Trace>) -> Result<(), UploadError> {
        let mut line = serde_json::to_vec(&Traces::new(traces))?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| UploadError::Io(e.to_string()))?;
        file.write_all(&line)
            .await
            .map_err(|e| UploadError::Io(e.to_string()))?;
        file.flush().await.map_err(|e| UploadError::Io(e.to_string()))
    }

    fn name(&self) -> &str {
        "json_file"
    }
}

/// Discards every batch
#[derive(Debug, Default)]
pub struct NullSink;

impl NullSink {
    pub fn new() -> Self {
        Self
    }
}

impl TraceSink for NullSink {
    async fn upload(&self, _traces: Vec<Trace>) -> Result<(), UploadError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Test sink that records every uploaded batch
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    batches: std::sync::Mutex<Vec<Vec<Trace>>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<Vec<Trace>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn trace_count(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
impl TraceSink for RecordingSink {
    async fn upload(&self, traces: Vec<Trace>) -> Result<(), UploadError> {
        self.batches.lock().unwrap().push(traces);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Test sink that fails every upload and counts attempts
#[cfg(test)]
#[derive(Default)]
pub struct FailingSink {
    attempts: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FailingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
impl TraceSink for FailingSink {
    async fn upload(&self, _traces: Vec<Trace>) -> Result<(), UploadError> {
        self.attempts
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Err(UploadError::Transport("simulated failure".into()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}
