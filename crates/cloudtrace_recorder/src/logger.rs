//! Logger collaborator.
//!
//! Upload failures never reach `record_span` callers; they are reported here.

/// Receives error reports from the recorder.
pub trait Logger: Send + Sync {
    /// Reports an error message.
    fn error(&self, message: &str);
}

/// Default logger: forwards to `tracing::error!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn error(&self, message: &str) {
        tracing::error!(target: "cloudtrace_recorder", "{}", message);
    }
}

/// Logger that keeps every message, for assertions in tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct CapturingLogger {
    messages: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl CapturingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Logger for CapturingLogger {
    fn error(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
