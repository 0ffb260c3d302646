//! Panic capture around resource callbacks.
//!
//! A panic inside a CRUD callback is turned into a [`PanicReport`], handed
//! to an [`ErrorSink`] and then resumed, so the host still sees the plugin
//! fail.

use std::any::Any;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tracing::error;

use crate::context::Operation;

/// Build tag attached to every report.
pub const BUILD_TAG: &str = env!("CARGO_PKG_VERSION");

/// What is known about a panic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanicReport {
    /// The operation that panicked.
    pub operation: String,
    /// The resource kind or data source.
    pub resource_kind: String,
    /// The panic message, when it was a string.
    pub message: String,
    /// Provider version.
    pub build: String,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl PanicReport {
    fn new(operation: Operation, resource_kind: &str, payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self {
            operation: operation.to_string(),
            resource_kind: resource_kind.to_string(),
            message,
            build: BUILD_TAG.to_string(),
            at: Utc::now(),
        }
    }
}

/// Receives panic reports.
pub trait ErrorSink: Send + Sync {
    /// Record one report.
    fn report(&self, report: &PanicReport);
}

/// Writes reports to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, report: &PanicReport) {
        let json = serde_json::to_string(report).unwrap_or_default();
        error!(
            operation = %report.operation,
            kind = %report.resource_kind,
            build = %report.build,
            report = %json,
            "provider panicked: {}",
            report.message
        );
    }
}

/// Keeps reports in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<PanicReport>>,
}

impl RecordingSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every report received so far.
    pub fn reports(&self) -> Vec<PanicReport> {
        self.reports
            .lock()
            .map(|reports| reports.clone())
            .unwrap_or_default()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, report: &PanicReport) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report.clone());
        }
    }
}

/// Run `callback`, reporting a panic to `sink` before resuming it.
pub async fn capture_panics<F, T>(
    sink: &dyn ErrorSink,
    operation: Operation,
    resource_kind: &str,
    callback: F,
) -> T
where
    F: Future<Output = T>,
{
    match AssertUnwindSafe(callback).catch_unwind().await {
        Ok(value) => value,
        Err(payload) => {
            sink.report(&PanicReport::new(operation, resource_kind, payload.as_ref()));
            resume_unwind(payload)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_value_passes_through() {
        let sink = RecordingSink::new();
        let value = capture_panics(&sink, Operation::Read, "scaleway_instance_ip", async { 42 }).await;
        assert_eq!(value, 42);
        assert!(sink.reports().is_empty());
    }

    #[tokio::test]
    async fn test_panic_is_reported_then_resumed() {
        let sink = RecordingSink::new();
        let result = AssertUnwindSafe(capture_panics(
            &sink,
            Operation::Create,
            "scaleway_instance_server",
            async {
                if sink.reports().is_empty() {
                    panic!("boom at {}", 3);
                }
            },
        ))
        .catch_unwind()
        .await;
        assert!(result.is_err());

        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].message, "boom at 3");
        assert_eq!(reports[0].operation, Operation::Create.to_string());
        assert_eq!(reports[0].resource_kind, "scaleway_instance_server");
        assert_eq!(reports[0].build, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_report_serializes_with_timestamp() {
        let report = PanicReport::new(Operation::Delete, "scaleway_block_volume", &"gone");
        let encoded = serde_json::to_value(&report).unwrap();
        assert_eq!(encoded["resource_kind"], "scaleway_block_volume");
        assert_eq!(encoded["message"], "gone");
        let at = encoded["at"].as_str().unwrap();
        assert_eq!(DateTime::parse_from_rfc3339(at).unwrap(), report.at);
    }
}
