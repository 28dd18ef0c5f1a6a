//! Feedback sink
//!
//! Progress and human-readable errors of a collection run are published to a
//! [`FeedbackSink`]. Collectors talk to it through [`CoreFeedback`], which
//! carries the context path (cloud, account, region) of the current scope.

use crate::progress::ProgressTree;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Receiver of progress and error messages
pub trait FeedbackSink: Send + Sync {
    /// Publish a full progress snapshot
    fn progress(&self, tree: &ProgressTree);

    /// Publish completion of one scope
    fn progress_done(&self, name: &str, done: u64, total: u64, context: &[String]);

    /// Publish a human-readable error
    fn error(&self, message: &str, context: &[String]);
}

/// Scoped handle to a feedback sink
#[derive(Clone)]
pub struct CoreFeedback {
    sink: Arc<dyn FeedbackSink>,
    context: Vec<String>,
}

impl CoreFeedback {
    pub fn new(sink: Arc<dyn FeedbackSink>) -> Self {
        Self {
            sink,
            context: Vec::new(),
        }
    }

    /// Derive a handle with `parts` appended to the context path
    pub fn with_context(&self, parts: &[&str]) -> Self {
        let mut context = self.context.clone();
        context.extend(parts.iter().map(|p| p.to_string()));
        Self {
            sink: self.sink.clone(),
            context,
        }
    }

    pub fn context(&self) -> &[String] {
        &self.context
    }

    pub fn progress(&self, tree: &ProgressTree) {
        self.sink.progress(tree);
    }

    pub fn progress_done(&self, name: &str, done: u64, total: u64) {
        self.sink.progress_done(name, done, total, &self.context);
    }

    /// Publish completion with an explicit context
    pub fn progress_done_in(&self, name: &str, done: u64, total: u64, context: &[String]) {
        self.sink.progress_done(name, done, total, context);
    }

    /// Log the error and publish it
    pub fn error(&self, message: &str) {
        tracing::error!(context = %self.context.join("/"), "{}", message);
        self.sink.error(message, &self.context);
    }
}

/// Sink that only writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFeedback;

impl FeedbackSink for LogFeedback {
    fn progress(&self, tree: &ProgressTree) {
        tracing::info!(
            "Progress {}: {}/{} scopes done",
            tree.name,
            tree.current(),
            tree.total()
        );
    }

    fn progress_done(&self, name: &str, done: u64, total: u64, context: &[String]) {
        tracing::info!(context = %context.join("/"), "Progress {}: {}/{}", name, done, total);
    }

    fn error(&self, _message: &str, _context: &[String]) {
        // CoreFeedback already logged it
    }
}

/// Kind of recorded feedback event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedbackKind {
    Progress,
    ProgressDone { name: String, done: u64, total: u64 },
    Error(String),
}

/// A single recorded feedback event
#[derive(Debug, Clone)]
pub struct FeedbackEvent {
    pub kind: FeedbackKind,
    pub context: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// In-memory sink keeping the latest progress tree and a bounded event history
pub struct RecordingFeedback {
    events: Mutex<VecDeque<FeedbackEvent>>,
    tree: Mutex<Option<ProgressTree>>,
    max_history: usize,
}

impl Default for RecordingFeedback {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingFeedback {
    pub fn new() -> Self {
        Self::with_max_history(10_000)
    }

    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            tree: Mutex::new(None),
            max_history: max_history.max(1),
        }
    }

    fn push(&self, kind: FeedbackKind, context: &[String]) {
        let mut events = self.events.lock();
        events.push_back(FeedbackEvent {
            kind,
            context: context.to_vec(),
            created_at: Utc::now(),
        });
        while events.len() > self.max_history {
            events.pop_front();
        }
    }

    pub fn events(&self) -> Vec<FeedbackEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// All published error messages, oldest first
    pub fn errors(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match &e.kind {
                FeedbackKind::Error(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Latest progress tree with every later `progress_done` applied
    pub fn progress_tree(&self) -> Option<ProgressTree> {
        self.tree.lock().clone()
    }

    /// Whether `progress_done(name, done, ...)` was published
    pub fn was_marked_done(&self, name: &str) -> bool {
        self.events.lock().iter().any(|e| {
            matches!(&e.kind, FeedbackKind::ProgressDone { name: n, done, total } if n == name && done >= total)
        })
    }
}

impl FeedbackSink for RecordingFeedback {
    fn progress(&self, tree: &ProgressTree) {
        *self.tree.lock() = Some(tree.clone());
        self.push(FeedbackKind::Progress, &tree.path);
    }

    fn progress_done(&self, name: &str, done: u64, total: u64, context: &[String]) {
        if let Some(tree) = self.tree.lock().as_mut() {
            if tree.get(name).is_some() {
                tree.update(name, done, total);
            }
        }
        self.push(
            FeedbackKind::ProgressDone {
                name: name.to_string(),
                done,
                total,
            },
            context,
        );
    }

    fn error(&self, message: &str, context: &[String]) {
        self.push(FeedbackKind::Error(message.to_string()), context);
    }
}
