//! Host-side contracts
//!
//! The engine never renders anything itself. Run progress goes to a
//! [`TestRun`], diagnostics go to an [`OutputChannel`], and requests arrive
//! as [`TestRunRequest`]s naming tree nodes by [`NodeRef`].

use crate::tree::NodeRef;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

pub use tokio_util::sync::CancellationToken;

/// Line-oriented diagnostic sink
pub trait OutputChannel: Send + Sync {
    fn append_line(&self, line: &str);
}

/// A run session reported to the host
///
/// `started` precedes any result for the same node; `end` is called exactly
/// once per request.
pub trait TestRun {
    fn started(&mut self, node: &NodeRef);
    fn passed(&mut self, node: &NodeRef, duration: Duration);
    fn failed(&mut self, node: &NodeRef, message: TestMessage, duration: Duration);
    /// Append text to the run's log
    fn append_output(&mut self, output: &str);
    fn end(&mut self);
}

/// Message attached to a failed node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestMessage {
    pub message: String,
}

impl TestMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Which nodes a run should execute
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestRunRequest {
    /// Nodes to run; `None` runs every top-level node
    pub include: Option<Vec<NodeRef>>,
    /// Nodes to skip
    pub exclude: Vec<NodeRef>,
}

impl TestRunRequest {
    /// Request running every top-level node
    pub fn all() -> Self {
        Self::default()
    }

    pub fn including(nodes: impl IntoIterator<Item = NodeRef>) -> Self {
        Self {
            include: Some(nodes.into_iter().collect()),
            exclude: Vec::new(),
        }
    }

    pub fn excluding(mut self, nodes: impl IntoIterator<Item = NodeRef>) -> Self {
        self.exclude.extend(nodes);
        self
    }

    pub fn is_excluded(&self, node: &NodeRef) -> bool {
        self.exclude.contains(node)
    }
}

/// An open document with its live text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextDocument {
    pub uri: Url,
    pub text: String,
}

impl TextDocument {
    pub fn new(uri: Url, text: impl Into<String>) -> Self {
        Self {
            uri,
            text: text.into(),
        }
    }
}

/// Output channel keeping every line in memory
#[derive(Debug, Default)]
pub struct BufferedOutput {
    lines: Mutex<Vec<String>>,
}

impl BufferedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines appended so far
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Whether any line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl OutputChannel for BufferedOutput {
    fn append_line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

/// One event reported to a [`RecordingRun`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Started(NodeRef),
    Passed(NodeRef, Duration),
    Failed(NodeRef, TestMessage, Duration),
    Output(String),
    Ended,
}

/// Run session that records every event in order
#[derive(Debug, Default)]
pub struct RecordingRun {
    pub events: Vec<RunEvent>,
}

impl RecordingRun {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started_nodes(&self) -> Vec<&NodeRef> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Started(node) => Some(node),
                _ => None,
            })
            .collect()
    }

    pub fn passed_nodes(&self) -> Vec<&NodeRef> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Passed(node, _) => Some(node),
                _ => None,
            })
            .collect()
    }

    pub fn failed_nodes(&self) -> Vec<&NodeRef> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Failed(node, _, _) => Some(node),
                _ => None,
            })
            .collect()
    }

    /// Everything appended to the run log, in order
    pub fn output(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Output(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn end_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, RunEvent::Ended))
            .count()
    }
}

impl TestRun for RecordingRun {
    fn started(&mut self, node: &NodeRef) {
        self.events.push(RunEvent::Started(node.clone()));
    }

    fn passed(&mut self, node: &NodeRef, duration: Duration) {
        self.events.push(RunEvent::Passed(node.clone(), duration));
    }

    fn failed(&mut self, node: &NodeRef, message: TestMessage, duration: Duration) {
        self.events
            .push(RunEvent::Failed(node.clone(), message, duration));
    }

    fn append_output(&mut self, output: &str) {
        self.events.push(RunEvent::Output(output.to_string()));
    }

    fn end(&mut self) {
        self.events.push(RunEvent::Ended);
    }
}
