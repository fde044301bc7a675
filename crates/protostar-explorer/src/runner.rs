//! Execution engine - run nodes through protostar and map results back
//!
//! One external process is spawned per requested node. Its stdout is read in
//! complete-line batches; each batch is ANSI-stripped and scanned for result
//! lines of the form `[PASS] <file> <case>` / `[FAIL] <file> <case>`, which
//! are attributed to the nearest matching node below the run scope.

use crate::config::{ProgressNumbering, RunnerConfig};
use crate::error::ExplorerError;
use crate::formatter::{Formatter, NEW_LINE, TAB};
use crate::host::{CancellationToken, OutputChannel, TestMessage, TestRun, TestRunRequest};
use crate::process::{BoxedReader, CommandSpec, ProcessSpawner, TokioSpawner};
use crate::tree::{NodeRef, TestNode, TestTree, ID_SEPARATOR};
use crate::workspace::WorkspaceProvider;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

const READ_CHUNK: usize = 8 * 1024;

/// Message attached to every failed node
pub const FAILURE_MESSAGE: &str = "Test failed";

/// Shortest duration reported for a result
const MIN_DURATION: Duration = Duration::from_millis(1);

static RESULT_LINE: OnceLock<Regex> = OnceLock::new();
static FAILURE_DETAIL: OnceLock<Regex> = OnceLock::new();
static ANSI_ESCAPE: OnceLock<Regex> = OnceLock::new();

fn result_line_regex() -> &'static Regex {
    RESULT_LINE.get_or_init(|| {
        Regex::new(r"^\[(PASS|FAIL)\] (\S+) (.*)$").expect("result line pattern is valid")
    })
}

fn failure_detail_regex() -> &'static Regex {
    FAILURE_DETAIL.get_or_init(|| {
        Regex::new(r"\[details\]:(\n.*)+\*").expect("failure detail pattern is valid")
    })
}

fn ansi_escape_regex() -> &'static Regex {
    ANSI_ESCAPE.get_or_init(|| {
        Regex::new(r"[\x1b\x{9b}][\[()#;?]*(?:[0-9]{1,4}(?:;[0-9]{0,4})*)?[0-9A-ORZcf-nqry=><]")
            .expect("ANSI escape pattern is valid")
    })
}

/// Remove ANSI escape sequences
pub fn strip_ansi(text: &str) -> String {
    ansi_escape_regex().replace_all(text, "").into_owned()
}

/// Outcome reported by a result line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Pass,
    Fail,
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultStatus::Pass => write!(f, "PASS"),
            ResultStatus::Fail => write!(f, "FAIL"),
        }
    }
}

/// One `[STATUS] FILE CASE` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultLine {
    pub status: ResultStatus,
    /// Root-relative file id
    pub file: String,
    /// Case label; everything after the file token
    pub case: String,
}

impl ResultLine {
    /// Id of the case node this line names (`<file>::<case>`)
    pub fn case_id(&self) -> String {
        format!("{}{}{}", self.file, ID_SEPARATOR, self.case)
    }
}

/// Every result line in `text`, in order
pub fn parse_result_lines(text: &str) -> Vec<ResultLine> {
    text.split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter_map(|line| {
            let caps = result_line_regex().captures(line)?;
            let status = match &caps[1] {
                "PASS" => ResultStatus::Pass,
                _ => ResultStatus::Fail,
            };
            Some(ResultLine {
                status,
                file: caps[2].to_string(),
                case: caps[3].to_string(),
            })
        })
        .collect()
}

/// The `[details]:` block of a failure, up to its closing `*`
pub fn extract_failure_detail(text: &str) -> Option<&str> {
    failure_detail_regex().find(text).map(|m| m.as_str())
}

/// Node a result line is attributed to
///
/// Looks the file up among the scope's children, falling back to the scope
/// itself; then looks `<file>::<case>` up among that parent's children,
/// falling back to the parent.
pub fn resolve_result_target(
    scope_ref: &NodeRef,
    scope: &TestNode,
    file: &str,
    case: &str,
) -> NodeRef {
    let parent = scope.child(file).unwrap_or(scope);
    let case_id = format!("{}{}{}", file, ID_SEPARATOR, case);
    let target = parent.child(&case_id).unwrap_or(parent);

    if std::ptr::eq(target, scope) {
        scope_ref.clone()
    } else {
        NodeRef::new(&scope_ref.root, target.id())
    }
}

/// `n/total` counters for one node's execution
#[derive(Debug, Clone, Default)]
pub struct Progress {
    numbering: ProgressNumbering,
    seen: usize,
    passed: usize,
    total: usize,
    chunk_seen: usize,
    chunk_passed: usize,
    chunk_total: usize,
}

impl Progress {
    pub fn new(numbering: ProgressNumbering) -> Self {
        Self {
            numbering,
            ..Self::default()
        }
    }

    /// Start a batch holding `results` result lines
    pub fn begin_chunk(&mut self, results: usize) {
        self.chunk_seen = 0;
        self.chunk_passed = 0;
        self.chunk_total = results;
        self.total += results;
    }

    /// Count one result; returns the `(n, total)` to print for it
    pub fn record(&mut self, status: ResultStatus) -> (usize, usize) {
        self.seen += 1;
        self.chunk_seen += 1;
        if status == ResultStatus::Pass {
            self.passed += 1;
            self.chunk_passed += 1;
        }
        match self.numbering {
            ProgressNumbering::PerChunk => (self.chunk_seen, self.chunk_total),
            ProgressNumbering::Cumulative => (self.seen, self.total),
        }
    }

    /// `(passed, total)` for the results summary
    pub fn summary(&self) -> (usize, usize) {
        match self.numbering {
            ProgressNumbering::PerChunk => (self.chunk_passed, self.chunk_total),
            ProgressNumbering::Cumulative => (self.passed, self.total),
        }
    }
}

/// Runs tree nodes through the external test runner
pub struct RunHandler<S: ProcessSpawner = TokioSpawner> {
    workspace: Arc<dyn WorkspaceProvider>,
    output: Arc<dyn OutputChannel>,
    spawner: S,
    program: String,
    base_args: Vec<String>,
    numbering: ProgressNumbering,
    formatter: Formatter,
    active: Mutex<HashMap<u64, CancellationToken>>,
    next_process: AtomicU64,
}

impl RunHandler<TokioSpawner> {
    pub fn new(workspace: Arc<dyn WorkspaceProvider>, output: Arc<dyn OutputChannel>) -> Self {
        Self::with_spawner(workspace, output, TokioSpawner)
    }
}

impl<S: ProcessSpawner> RunHandler<S> {
    pub fn with_spawner(
        workspace: Arc<dyn WorkspaceProvider>,
        output: Arc<dyn OutputChannel>,
        spawner: S,
    ) -> Self {
        let defaults = RunnerConfig::default();
        Self {
            workspace,
            output,
            spawner,
            program: defaults.program,
            base_args: defaults.base_args,
            numbering: defaults.numbering,
            formatter: Formatter::new(),
            active: Mutex::new(HashMap::new()),
            next_process: AtomicU64::new(0),
        }
    }

    /// Apply program, base arguments and numbering from `config`
    pub fn with_config(mut self, config: &RunnerConfig) -> Self {
        self.program = config.program.clone();
        self.base_args = config.base_args.clone();
        self.numbering = config.numbering;
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_numbering(mut self, numbering: ProgressNumbering) -> Self {
        self.numbering = numbering;
        self
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    /// Number of runner processes currently alive
    pub fn active_processes(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }

    /// Execute every node named by `request`
    ///
    /// Nodes run one at a time, last requested first. Cancellation is checked
    /// before each node; a node already running is left to finish. `run` is
    /// ended exactly once.
    pub async fn handle_request(
        &self,
        tree: &TestTree,
        request: &TestRunRequest,
        token: &CancellationToken,
        run: &mut dyn TestRun,
    ) {
        let mut queue: Vec<NodeRef> = match &request.include {
            Some(include) => include.clone(),
            None => tree.root_refs(),
        };

        while !token.is_cancelled() {
            let Some(node) = queue.pop() else {
                break;
            };

            if request.is_excluded(&node) {
                debug!(node = %node, "excluded");
                continue;
            }

            self.execute_test(tree, &node, run).await;
        }

        run.end();
    }

    /// Run one node and stream its results into `run`
    pub async fn execute_test(&self, tree: &TestTree, node: &NodeRef, run: &mut dyn TestRun) {
        let Some(scope) = tree.get(node) else {
            debug!(node = %node, "node not in tree; skipping");
            return;
        };
        let Some(path) = scope.path() else {
            debug!(node = %node, "node has no location; skipping");
            return;
        };
        let Some(folder) = self.workspace.folder_for(path) else {
            debug!(node = %node, path = %path.display(), "no workspace root; skipping");
            return;
        };

        let start = Instant::now();
        run.started(node);
        run.append_output(
            &self
                .formatter
                .format_in_bold(&format!("************ Run Started *********{}", NEW_LINE)),
        );

        let is_root = folder.path.as_path() == path;
        let mut args = self.base_args.clone();
        if !is_root {
            args.push(scope.id().to_string());
        }
        let command = CommandSpec::new(&self.program, args, &folder.path);
        self.output.append_line(&command.to_string());

        let process_id = self.next_process.fetch_add(1, Ordering::Relaxed);
        let kill = CancellationToken::new();
        if let Ok(mut active) = self.active.lock() {
            active.insert(process_id, kill.clone());
        }

        let process = match self.spawner.spawn(&command, kill.clone()) {
            Ok(process) => process,
            Err(source) => {
                self.unregister(process_id);
                let err = ExplorerError::Spawn {
                    program: self.program.clone(),
                    source,
                };
                warn!(node = %node, error = %err, "runner did not start");
                self.output.append_line(&err.to_string());
                return;
            }
        };

        let stdout = self.stream_stdout(process.stdout, run, node, scope, start);
        let stderr = self.stream_stderr(process.stderr);
        // Descendants of a killed runner may still hold its pipes open
        tokio::select! {
            _ = async { tokio::join!(stdout, stderr) } => {}
            () = kill.cancelled() => {
                debug!(node = %node, "runner killed; abandoning its output");
            }
        }

        match process.exit.await {
            Ok(code) => {
                let code = code.map_or_else(|| "null".to_string(), |c| c.to_string());
                self.output
                    .append_line(&format!("Test ended with return code: {}", code));
            }
            Err(err) => {
                warn!(node = %node, error = %err, "failed to wait for runner");
                self.output
                    .append_line(&format!("Test ended with error: {}", err));
            }
        }

        self.unregister(process_id);
    }

    /// Kill every runner process still alive
    pub fn cancel(&self) {
        if let Ok(active) = self.active.lock() {
            for kill in active.values() {
                kill.cancel();
            }
            debug!(count = active.len(), "killed active runners");
        }
    }

    fn unregister(&self, process_id: u64) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&process_id);
        }
    }

    async fn stream_stdout(
        &self,
        mut stdout: BoxedReader,
        run: &mut dyn TestRun,
        scope_ref: &NodeRef,
        scope: &TestNode,
        start: Instant,
    ) {
        let mut progress = Progress::new(self.numbering);
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            let n = match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    warn!(node = %scope_ref, error = %err, "failed to read runner stdout");
                    break;
                }
            };
            pending.extend_from_slice(&buf[..n]);

            if let Some(last_newline) = pending.iter().rposition(|b| *b == b'\n') {
                let batch: Vec<u8> = pending.drain(..=last_newline).collect();
                self.process_chunk(&batch, run, scope_ref, scope, start, &mut progress);
            }
        }

        if !pending.is_empty() {
            self.process_chunk(&pending, run, scope_ref, scope, start, &mut progress);
        }
    }

    async fn stream_stderr(&self, mut stderr: BoxedReader) {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => self
                    .output
                    .append_line(&String::from_utf8_lossy(&buf[..n])),
                Err(err) => {
                    warn!(error = %err, "failed to read runner stderr");
                    break;
                }
            }
        }
    }

    fn process_chunk(
        &self,
        chunk: &[u8],
        run: &mut dyn TestRun,
        scope_ref: &NodeRef,
        scope: &TestNode,
        start: Instant,
        progress: &mut Progress,
    ) {
        let raw = String::from_utf8_lossy(chunk);
        self.output.append_line(raw.trim_end_matches(['\r', '\n']));
        self.parse_test_command_output(run, scope_ref, scope, start, &strip_ansi(&raw), progress);
    }

    /// Apply every result line of one ANSI-free output batch
    pub fn parse_test_command_output(
        &self,
        run: &mut dyn TestRun,
        scope_ref: &NodeRef,
        scope: &TestNode,
        start: Instant,
        output: &str,
        progress: &mut Progress,
    ) {
        let text = output.replace("\r\n", "\n");
        let results = parse_result_lines(&text);
        if results.is_empty() {
            return;
        }

        let detail = extract_failure_detail(&text)
            .map(|detail| detail.replace('\n', &format!("{}{}", NEW_LINE, TAB)));
        let f = &self.formatter;
        progress.begin_chunk(results.len());

        for result in &results {
            let target = resolve_result_target(scope_ref, scope, &result.file, &result.case);
            let duration = start.elapsed().max(MIN_DURATION);
            let (n, total) = progress.record(result.status);
            let line = format!(
                "{}/{} {}: {} {}",
                n, total, result.status, result.file, result.case
            );

            match result.status {
                ResultStatus::Pass => {
                    run.passed(&target, duration);
                    run.append_output(&f.format_in_bold(&f.format_in_green(&line)));
                }
                ResultStatus::Fail => {
                    run.failed(&target, TestMessage::new(FAILURE_MESSAGE), duration);
                    run.append_output(&f.format_in_bold(&f.format_in_red(&line)));
                    if let Some(detail) = &detail {
                        run.append_output(&f.format_with_tab(&f.format_in_red(detail)));
                    }
                }
            }
        }

        let (passed, total) = progress.summary();
        run.append_output(&f.format_in_bold(&format!(
            "************ Results : {}/{} succeeded ************",
            passed, total
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn file_scope() -> TestNode {
        let mut file = TestNode::file("suite.cairo", "suite.cairo", "/ws/suite.cairo");
        file.replace_children([TestNode::case(
            "suite.cairo::test_alpha",
            "test_alpha",
            "/ws/suite.cairo",
            0,
        )]);
        file
    }

    fn root_scope() -> TestNode {
        let mut root = TestNode::root("ws", "/ws");
        root.add_child(file_scope());
        root
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(
            strip_ansi("\u{1b}[32m[PASS]\u{1b}[0m suite.cairo test_alpha"),
            "[PASS] suite.cairo test_alpha"
        );
        assert_eq!(strip_ansi("\u{1b}[1;31mred\u{1b}[39;49m"), "red");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_parse_result_lines() {
        let text = "Collected 2 suites\n[PASS] tests/test_a.cairo test_one\r\nnoise\n[FAIL] tests/test_b.cairo test_two (time=0.01s)\n[SKIP] x y";
        let results = parse_result_lines(text);
        assert_eq!(
            results,
            vec![
                ResultLine {
                    status: ResultStatus::Pass,
                    file: "tests/test_a.cairo".to_string(),
                    case: "test_one".to_string(),
                },
                ResultLine {
                    status: ResultStatus::Fail,
                    file: "tests/test_b.cairo".to_string(),
                    case: "test_two (time=0.01s)".to_string(),
                },
            ]
        );
        assert_eq!(results[0].case_id(), "tests/test_a.cairo::test_one");
    }

    #[rstest]
    #[case("[PASS]")]
    #[case("[PASS] only_file")]
    #[case(" [PASS] a b")]
    #[case("[OK] a b")]
    fn test_non_result_lines(#[case] line: &str) {
        assert!(parse_result_lines(line).is_empty());
    }

    #[test]
    fn test_extract_failure_detail() {
        let text = "[FAIL] suite.cairo test_alpha\n[details]:\nassert failed\nexpected 1*\ntrailing";
        assert_eq!(
            extract_failure_detail(text),
            Some("[details]:\nassert failed\nexpected 1*")
        );
        assert_eq!(extract_failure_detail("[details]: nothing after"), None);
    }

    #[rstest]
    #[case::case_found_under_file("suite.cairo", "test_alpha", "ws::suite.cairo::test_alpha")]
    #[case::unknown_case_falls_back_to_file("suite.cairo", "test_zeta", "ws::suite.cairo")]
    #[case::unknown_file_falls_back_to_root("other.cairo", "test_alpha", "ws")]
    fn test_resolve_from_root(#[case] file: &str, #[case] case: &str, #[case] expected: &str) {
        let scope_ref = NodeRef::root("ws");
        let target = resolve_result_target(&scope_ref, &root_scope(), file, case);
        assert_eq!(target.to_string(), expected);
    }

    #[test]
    fn test_resolve_from_file_scope() {
        let scope_ref = NodeRef::new("ws", "suite.cairo");
        let scope = file_scope();

        let case = resolve_result_target(&scope_ref, &scope, "suite.cairo", "test_alpha");
        assert_eq!(case, NodeRef::new("ws", "suite.cairo::test_alpha"));

        let fallback = resolve_result_target(&scope_ref, &scope, "suite.cairo", "missing");
        assert_eq!(fallback, scope_ref);
    }

    #[test]
    fn test_progress_per_chunk() {
        let mut progress = Progress::new(ProgressNumbering::PerChunk);
        progress.begin_chunk(2);
        assert_eq!(progress.record(ResultStatus::Pass), (1, 2));
        assert_eq!(progress.record(ResultStatus::Fail), (2, 2));
        assert_eq!(progress.summary(), (1, 2));

        progress.begin_chunk(1);
        assert_eq!(progress.record(ResultStatus::Pass), (1, 1));
        assert_eq!(progress.summary(), (1, 1));
    }

    #[test]
    fn test_progress_cumulative() {
        let mut progress = Progress::new(ProgressNumbering::Cumulative);
        progress.begin_chunk(2);
        assert_eq!(progress.record(ResultStatus::Pass), (1, 2));
        assert_eq!(progress.record(ResultStatus::Fail), (2, 2));

        progress.begin_chunk(1);
        assert_eq!(progress.record(ResultStatus::Pass), (3, 3));
        assert_eq!(progress.summary(), (2, 3));
    }
}
