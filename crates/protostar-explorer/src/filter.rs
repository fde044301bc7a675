//! Admission filter - decide which paths become file nodes

use crate::error::ExplorerResult;
use regex::Regex;
use std::fmt;
use std::path::{Component, Path};
use url::Url;

/// Top-level directories that never hold project tests
pub const DEFAULT_DENIED_SEGMENTS: &[&str] = &[".git", "lib"];

/// Why a path was not admitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// First path segment is denylisted
    DeniedSegment(String),
    /// Not a `file:` resource
    NotAFile(String),
    /// File name is not `test_*.<ext>`
    NameMismatch,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::DeniedSegment(segment) => write!(f, "under denied directory '{}'", segment),
            Rejection::NotAFile(scheme) => write!(f, "scheme '{}' is not a file", scheme),
            Rejection::NameMismatch => write!(f, "file name does not match the test pattern"),
        }
    }
}

/// Allow/deny checks applied before a path is tracked
#[derive(Debug, Clone)]
pub struct AdmissionFilter {
    denied_segments: Vec<String>,
    file_name: Regex,
}

impl AdmissionFilter {
    /// Filter for `test_*.<extension>` files outside `denied_segments`
    pub fn new(extension: &str, denied_segments: &[String]) -> ExplorerResult<Self> {
        let file_name = Regex::new(&format!(r"^test_.*\.{}$", regex::escape(extension)))?;
        Ok(Self {
            denied_segments: denied_segments.to_vec(),
            file_name,
        })
    }

    /// Check `uri`, whose root-relative path is `relative`
    ///
    /// Checks run in order: denied segment, scheme, file name.
    pub fn check(&self, uri: &Url, relative: &Path) -> Result<(), Rejection> {
        if let Some(first) = first_segment(relative) {
            if self.denied_segments.iter().any(|denied| *denied == first) {
                return Err(Rejection::DeniedSegment(first));
            }
        }

        if uri.scheme() != "file" {
            return Err(Rejection::NotAFile(uri.scheme().to_string()));
        }

        let name = relative
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if !self.file_name.is_match(name) {
            return Err(Rejection::NameMismatch);
        }

        Ok(())
    }

    pub fn admits(&self, uri: &Url, relative: &Path) -> bool {
        self.check(uri, relative).is_ok()
    }

    /// Whether a bare file name matches the test file pattern
    pub fn matches_file_name(&self, name: &str) -> bool {
        self.file_name.is_match(name)
    }
}

fn first_segment(relative: &Path) -> Option<String> {
    relative.components().find_map(|component| match component {
        Component::Normal(segment) => segment.to_str().map(str::to_string),
        _ => None,
    })
}
