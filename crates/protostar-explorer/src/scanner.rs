//! Source scanner - find test functions in Cairo source text
//!
//! Purely lexical: a line declares a case when it starts with the declaration
//! keyword followed by an identifier prefixed with `test_`. No I/O happens
//! here; callers hand in text they already loaded.

use crate::error::ExplorerResult;
use crate::host::OutputChannel;
use crate::tree::{TestNode, ID_SEPARATOR};
use regex::Regex;
use std::path::Path;

/// Declaration keyword of Cairo functions
pub const DEFAULT_CASE_KEYWORD: &str = "func";

/// A test function found in source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseDescriptor {
    /// Function name, including the `test_` prefix
    pub label: String,
    /// Zero-based line of the declaration
    pub line: usize,
}

/// Extracts test cases from source text
#[derive(Debug, Clone)]
pub struct Scanner {
    pattern: Regex,
}

impl Scanner {
    /// Scanner for functions declared with `keyword`
    pub fn new(keyword: &str) -> ExplorerResult<Self> {
        let pattern = Regex::new(&format!(
            r"^{} (test_[A-Za-z0-9_]*).*$",
            regex::escape(keyword)
        ))?;
        Ok(Self { pattern })
    }

    /// Every test declaration in `text`, in order of appearance
    pub fn extract_cases(&self, text: &str) -> Vec<CaseDescriptor> {
        text.split('\n')
            .enumerate()
            .filter_map(|(line, content)| {
                self.pattern.captures(content).map(|caps| CaseDescriptor {
                    label: caps[1].to_string(),
                    line,
                })
            })
            .collect()
    }

    /// Case nodes for `file`, reporting each one to `output`
    ///
    /// Case ids are `<file id>::<label>`; each case points at the file's path
    /// and its declaration line.
    pub fn scan_file(
        &self,
        workspace: &str,
        file_id: &str,
        path: &Path,
        text: &str,
        output: &dyn OutputChannel,
    ) -> Vec<TestNode> {
        self.extract_cases(text)
            .into_iter()
            .map(|case| {
                let id = format!("{}{}{}", file_id, ID_SEPARATOR, case.label);
                output.append_line(&format!("[{}] Found new test: {}", workspace, id));
                TestNode::case(id, case.label, path, case.line)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BufferedOutput;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn scanner() -> Scanner {
        Scanner::new(DEFAULT_CASE_KEYWORD).unwrap()
    }

    fn labels(text: &str) -> Vec<String> {
        scanner()
            .extract_cases(text)
            .into_iter()
            .map(|c| c.label)
            .collect()
    }

    #[test]
    fn test_extracts_cases_in_order() {
        let text = "func test_alpha():\nend\nfunc helper():\nend\nfunc test_beta():\nend";
        let cases = scanner().extract_cases(text);
        assert_eq!(
            cases,
            vec![
                CaseDescriptor {
                    label: "test_alpha".to_string(),
                    line: 0
                },
                CaseDescriptor {
                    label: "test_beta".to_string(),
                    line: 4
                },
            ]
        );
    }

    #[rstest]
    #[case("")]
    #[case("   \n\t\n")]
    #[case("func helper():\nend")]
    #[case("  func test_indented():")]
    #[case("@external\nfunc_test_alpha():")]
    #[case("// func test_commented():")]
    fn test_ignores_non_matching_input(#[case] text: &str) {
        assert!(labels(text).is_empty());
    }

    #[test]
    fn test_keeps_trailing_signature() {
        let text = "func test_transfer{syscall_ptr : felt*, range_check_ptr}():";
        assert_eq!(labels(text), vec!["test_transfer"]);
    }

    #[test]
    fn test_accepts_crlf_lines() {
        let text = "func test_a():\r\nend\r\nfunc test_b():\r\n";
        assert_eq!(labels(text), vec!["test_a", "test_b"]);
    }

    #[test]
    fn test_custom_keyword() {
        let scanner = Scanner::new("fn").unwrap();
        let cases = scanner.extract_cases("fn test_one() {\n}\nfunc test_two():");
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].label, "test_one");
    }

    #[test]
    fn test_rescan_is_stable() {
        let text = "func test_a():\nend\nfunc test_b():\nend";
        assert_eq!(scanner().extract_cases(text), scanner().extract_cases(text));
    }

    #[test]
    fn test_scan_file_builds_case_nodes() {
        let output = BufferedOutput::new();
        let nodes = scanner().scan_file(
            "starklings",
            "tests/test_main.cairo",
            Path::new("/ws/tests/test_main.cairo"),
            "func test_alpha():\nend",
            &output,
        );

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id(), "tests/test_main.cairo::test_alpha");
        assert_eq!(nodes[0].label(), "test_alpha");
        assert_eq!(nodes[0].location().unwrap().line, Some(0));
        assert_eq!(
            output.lines(),
            vec!["[starklings] Found new test: tests/test_main.cairo::test_alpha"]
        );
    }
}
