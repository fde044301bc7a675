//! Terminal renderings of the explorer host contracts

use colored::*;
use protostar_explorer::runner::strip_ansi;
use protostar_explorer::{
    NodeKind, NodeRef, OutputChannel, TestMessage, TestNode, TestRun, TestTree,
};
use serde_json::json;
use std::time::{Duration, Instant};

/// Flags shared by every command
#[derive(Debug, Clone, Copy)]
pub struct ConsoleOptions {
    pub quiet: bool,
    pub color: bool,
}

/// Output channel echoing explorer diagnostics to stderr
#[derive(Debug)]
pub struct ConsoleOutput {
    options: ConsoleOptions,
}

impl ConsoleOutput {
    pub fn new(options: ConsoleOptions) -> Self {
        Self { options }
    }
}

impl OutputChannel for ConsoleOutput {
    fn append_line(&self, line: &str) {
        if self.options.quiet {
            return;
        }
        let line = strip_ansi(line);
        eprintln!("{}", line.trim_end_matches(['\r', '\n']).dimmed());
    }
}

/// Failed node with the message the engine attached
#[derive(Debug)]
struct Failure {
    node: NodeRef,
    message: String,
}

/// Test run printing progress to stdout and a summary at the end
#[derive(Debug)]
pub struct ConsoleRun {
    options: ConsoleOptions,
    json: bool,
    started_at: Instant,
    started: Vec<NodeRef>,
    passed: Vec<(NodeRef, Duration)>,
    failures: Vec<Failure>,
}

impl ConsoleRun {
    pub fn new(options: ConsoleOptions, json: bool) -> Self {
        Self {
            options,
            json,
            started_at: Instant::now(),
            started: Vec::new(),
            passed: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn print_summary(&self) {
        let passed = self.passed.len();
        let failed = self.failures.len();
        let total = passed + failed;

        if !self.failures.is_empty() {
            println!();
            println!("{}", "Failures:".red().bold());
            for failure in &self.failures {
                println!("  {} {}", "✗".red(), failure.node);
                println!("    {}", failure.message.dimmed());
            }
        }

        println!();
        let status = if failed > 0 {
            "FAILED".red().bold()
        } else {
            "PASSED".green().bold()
        };
        println!(
            "Test result: {} | {} total, {} passed, {} failed",
            status,
            total.to_string().bold(),
            passed.to_string().green().bold(),
            if failed > 0 {
                failed.to_string().red().bold()
            } else {
                failed.to_string().normal()
            }
        );
        println!("Time: {:.2?}", self.started_at.elapsed());
    }

    fn print_json(&self) {
        let started: Vec<String> = self.started.iter().map(NodeRef::to_string).collect();
        let passed: Vec<_> = self
            .passed
            .iter()
            .map(|(node, duration)| {
                json!({
                    "node": node.to_string(),
                    "duration_ms": duration.as_millis() as u64,
                })
            })
            .collect();
        let failed: Vec<_> = self
            .failures
            .iter()
            .map(|failure| {
                json!({
                    "node": failure.node.to_string(),
                    "message": failure.message,
                })
            })
            .collect();

        let output = json!({
            "started": started,
            "passed": passed,
            "failed": failed,
            "success": self.failures.is_empty(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
        );
    }
}

impl TestRun for ConsoleRun {
    fn started(&mut self, node: &NodeRef) {
        self.started.push(node.clone());
    }

    fn passed(&mut self, node: &NodeRef, duration: Duration) {
        self.passed.push((node.clone(), duration));
    }

    fn failed(&mut self, node: &NodeRef, message: TestMessage, _duration: Duration) {
        self.failures.push(Failure {
            node: node.clone(),
            message: message.message,
        });
    }

    fn append_output(&mut self, output: &str) {
        if self.json {
            return;
        }
        let text = if self.options.color {
            output.to_string()
        } else {
            strip_ansi(output)
        };
        print!("{}", text.replace("\r\n", "\n"));
    }

    fn end(&mut self) {
        if self.json {
            self.print_json();
        } else {
            self.print_summary();
        }
    }
}

/// Print the tree as an indented outline
pub fn print_tree(tree: &TestTree) {
    if tree.is_empty() {
        println!("{}", "No workspace folders".yellow());
        return;
    }
    for root in tree.roots() {
        print_node(root, 0);
    }
}

fn print_node(node: &TestNode, depth: usize) {
    let indent = "  ".repeat(depth);
    match node.kind() {
        NodeKind::Root => println!("{}{}", indent, node.label().bold()),
        NodeKind::File => {
            let pending = if node.can_resolve_children() {
                " (not parsed)".dimmed().to_string()
            } else {
                format!(" ({} cases)", node.child_count()).dimmed().to_string()
            };
            println!("{}{}{}", indent, node.id().cyan(), pending);
        }
        NodeKind::Case => {
            let line = node
                .location()
                .and_then(|location| location.line)
                .map(|line| format!(":{}", line + 1))
                .unwrap_or_default();
            println!("{}{}{}", indent, node.label(), line.dimmed());
        }
    }
    for child in node.children() {
        print_node(child, depth + 1);
    }
}
