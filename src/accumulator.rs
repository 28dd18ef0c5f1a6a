//! Error accumulation
//!
//! The same failure usually repeats once per API call. [`ErrorAccumulator`]
//! counts errors per (scope, resource kind, signature) so that each distinct
//! failure is reported once, with its occurrence count.

use crate::error::find_api_error;
use crate::feedback::CoreFeedback;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;

/// Maximum length of an error message kept as signature
const MAX_SIGNATURE_LENGTH: usize = 200;

/// How an error was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Resource kind skipped for lack of permission
    PermissionDenied,
    /// Anything else; the region or node was skipped
    Unexpected,
}

/// One distinct error of a collection run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub scope: String,
    pub kind: String,
    pub category: ErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    pub count: u64,
}

impl ErrorRecord {
    fn feedback_message(&self, count: u64) -> String {
        match self.category {
            ErrorCategory::PermissionDenied => format!(
                "Not authorized to collect {} resources in {} ({} time(s)): {}",
                self.kind, self.scope, count, self.message
            ),
            ErrorCategory::Unexpected => format!(
                "Error collecting {} resources in {} ({} time(s)): {}",
                self.kind, self.scope, count, self.message
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ErrorKey {
    scope: String,
    kind: String,
    category: ErrorCategory,
    signature: String,
}

#[derive(Default)]
struct Inner {
    /// Totals of the whole run
    totals: BTreeMap<ErrorKey, ErrorRecord>,
    /// Occurrences not yet reported
    pending: BTreeMap<ErrorKey, u64>,
}

/// Deduplicating error counter shared by all collector tasks
#[derive(Default)]
pub struct ErrorAccumulator {
    inner: Mutex<Inner>,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of `error` while collecting `kind` in `scope`.
    ///
    /// Returns `true` for the first occurrence of this distinct error.
    pub fn record(&self, scope: &str, kind: &str, error: &anyhow::Error) -> bool {
        let api_error = find_api_error(error);
        let category = match api_error {
            Some(e) if e.is_permission_denied() => ErrorCategory::PermissionDenied,
            _ => ErrorCategory::Unexpected,
        };
        let code = api_error.and_then(|e| e.code.clone());
        let message = normalize_message(&error.root_cause().to_string());
        let signature = code.clone().unwrap_or_else(|| message.clone());

        let key = ErrorKey {
            scope: scope.to_string(),
            kind: kind.to_string(),
            category,
            signature,
        };

        let mut inner = self.inner.lock();
        let record = inner.totals.entry(key.clone()).or_insert_with(|| ErrorRecord {
            scope: scope.to_string(),
            kind: kind.to_string(),
            category,
            code,
            message,
            count: 0,
        });
        record.count += 1;
        let first = record.count == 1;
        *inner.pending.entry(key).or_insert(0) += 1;
        first
    }

    /// Report and clear the pending errors of `region`. Returns the number of messages.
    pub fn report_region(&self, feedback: &CoreFeedback, region: &str) -> usize {
        self.report(feedback, |key| key.scope == region)
    }

    /// Report and clear every pending error. Returns the number of messages.
    pub fn report_all(&self, feedback: &CoreFeedback) -> usize {
        self.report(feedback, |_| true)
    }

    fn report(&self, feedback: &CoreFeedback, select: impl Fn(&ErrorKey) -> bool) -> usize {
        // Build the messages under the lock, publish after releasing it
        let messages: Vec<String> = {
            let mut inner = self.inner.lock();
            let keys: Vec<ErrorKey> = inner.pending.keys().filter(|k| select(k)).cloned().collect();
            keys.into_iter()
                .filter_map(|key| {
                    let count = inner.pending.remove(&key)?;
                    inner
                        .totals
                        .get(&key)
                        .map(|record| record.feedback_message(count))
                })
                .collect()
        };

        for message in &messages {
            feedback.error(message);
        }
        messages.len()
    }

    /// Every distinct error of the run with its total count
    pub fn summary(&self) -> Vec<ErrorRecord> {
        self.inner.lock().totals.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().totals.is_empty()
    }
}

/// First line of the message, truncated, without control characters
fn normalize_message(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or_default().trim();
    let cleaned: String = first_line
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_SIGNATURE_LENGTH)
        .collect();
    if cleaned.is_empty() {
        "unknown error".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify_api_error;
    use crate::feedback::RecordingFeedback;
    use std::sync::Arc;

    fn denied() -> anyhow::Error {
        classify_api_error(Some("AccessDenied"), Some("not allowed")).into()
    }

    fn feedback() -> (Arc<RecordingFeedback>, CoreFeedback) {
        let sink = Arc::new(RecordingFeedback::new());
        (sink.clone(), CoreFeedback::new(sink))
    }

    #[test]
    fn test_repeated_errors_are_counted_once() {
        let acc = ErrorAccumulator::new();
        assert!(acc.record("eu-west-1", "bucket", &denied()));
        for _ in 0..4 {
            assert!(!acc.record("eu-west-1", "bucket", &denied()));
        }
        acc.record("eu-west-1", "queue", &anyhow::anyhow!("socket closed"));

        let summary = acc.summary();
        assert_eq!(summary.len(), 2);
        let bucket = summary.iter().find(|r| r.kind == "bucket").unwrap();
        assert_eq!(bucket.count, 5);
        assert_eq!(bucket.category, ErrorCategory::PermissionDenied);
        assert_eq!(bucket.code.as_deref(), Some("AccessDenied"));
        let queue = summary.iter().find(|r| r.kind == "queue").unwrap();
        assert_eq!(queue.category, ErrorCategory::Unexpected);
        assert_eq!(queue.message, "socket closed");
    }

    #[test]
    fn test_report_region_only_reports_that_region() {
        let acc = ErrorAccumulator::new();
        acc.record("eu-west-1", "bucket", &denied());
        acc.record("eu-west-1", "bucket", &denied());
        acc.record("us-east-1", "bucket", &denied());
        let (sink, feedback) = feedback();

        assert_eq!(acc.report_region(&feedback, "eu-west-1"), 1);
        let errors = sink.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("eu-west-1"));
        assert!(errors[0].contains("2 time(s)"));

        // Already reported
        assert_eq!(acc.report_region(&feedback, "eu-west-1"), 0);
        // The rest is flushed at the end
        assert_eq!(acc.report_all(&feedback), 1);
        assert_eq!(acc.report_all(&feedback), 0);
        assert_eq!(sink.errors().len(), 2);
    }

    #[test]
    fn test_summary_keeps_reported_errors() {
        let acc = ErrorAccumulator::new();
        acc.record("global", "user", &denied());
        let (_, feedback) = feedback();
        acc.report_all(&feedback);
        acc.record("global", "user", &denied());

        let summary = acc.summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].count, 2);
    }

    #[test]
    fn test_message_normalization() {
        assert_eq!(normalize_message("first\nsecond"), "first");
        assert_eq!(normalize_message(""), "unknown error");
        assert_eq!(normalize_message(&"x".repeat(500)).len(), MAX_SIGNATURE_LENGTH);
    }

    #[test]
    fn test_messages_with_distinct_signatures_are_kept_apart() {
        let acc = ErrorAccumulator::new();
        acc.record("global", "user", &anyhow::anyhow!("timeout"));
        acc.record("global", "user", &anyhow::anyhow!("connection refused"));
        assert_eq!(acc.summary().len(), 2);
    }
}
