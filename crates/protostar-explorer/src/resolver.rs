//! Tree synchronizer - keep the test tree in step with the workspace
//!
//! The resolver owns the [`TestTree`]. It creates one root per workspace
//! folder, one file node per admitted `test_*.<ext>` path and rebuilds a
//! file's cases wholesale whenever its content is (re)read.

use crate::config::DiscoveryConfig;
use crate::error::{ExplorerError, ExplorerResult};
use crate::filter::AdmissionFilter;
use crate::host::{OutputChannel, TextDocument};
use crate::scanner::Scanner;
use crate::tree::{NodeKind, NodeRef, TestNode, TestTree};
use crate::workspace::{FilePattern, FileWatch, FsEvent, WorkspaceFolder, WorkspaceProvider};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use url::Url;

/// Owns the test tree and applies discovery, document and watch updates
pub struct Resolver {
    tree: TestTree,
    workspace: Arc<dyn WorkspaceProvider>,
    output: Arc<dyn OutputChannel>,
    filter: AdmissionFilter,
    scanner: Scanner,
    pattern: FilePattern,
}

impl Resolver {
    /// Resolver with the default discovery rules
    pub fn new(
        workspace: Arc<dyn WorkspaceProvider>,
        output: Arc<dyn OutputChannel>,
    ) -> ExplorerResult<Self> {
        Self::with_config(workspace, output, &DiscoveryConfig::default())
    }

    pub fn with_config(
        workspace: Arc<dyn WorkspaceProvider>,
        output: Arc<dyn OutputChannel>,
        config: &DiscoveryConfig,
    ) -> ExplorerResult<Self> {
        Ok(Self {
            tree: TestTree::new(),
            workspace,
            output,
            filter: AdmissionFilter::new(&config.extension, &config.denied_segments)?,
            scanner: Scanner::new(&config.case_keyword)?,
            pattern: FilePattern::for_extension(&config.extension)?,
        })
    }

    pub fn tree(&self) -> &TestTree {
        &self.tree
    }

    /// Create every root, start watching it and admit the files already there
    ///
    /// Watch events are delivered to `events`. A workspace without folders
    /// yields no watches.
    pub fn discover_all_files_in_workspace(
        &mut self,
        events: &UnboundedSender<FsEvent>,
    ) -> ExplorerResult<Vec<FileWatch>> {
        let mut watches = Vec::new();

        for folder in self.workspace.folders() {
            self.tree.get_or_insert_root(&folder.name, &folder.path);

            match self.workspace.watch(&folder, &self.pattern, events.clone()) {
                Ok(watch) => watches.push(watch),
                Err(err) => warn!(folder = %folder.name, error = %err, "failed to watch folder"),
            }

            let files = self.workspace.find_files(&folder, &self.pattern)?;
            info!(folder = %folder.name, files = files.len(), "discovered test files");
            for path in files {
                match Url::from_file_path(&path) {
                    Ok(uri) => {
                        self.get_or_create_file(&folder, &uri);
                    }
                    Err(()) => debug!(path = %path.display(), "not an absolute path"),
                }
            }
        }

        Ok(watches)
    }

    /// File node for `uri`, created if the path is admitted and not yet known
    ///
    /// Returns `None` when the admission filter rejects the path. An existing
    /// node is returned untouched.
    pub fn get_or_create_file(&mut self, folder: &WorkspaceFolder, uri: &Url) -> Option<NodeRef> {
        let path = uri_path(uri);
        let relative = self.workspace.relative_path(folder, &path)?;

        if let Err(rejection) = self.filter.check(uri, Path::new(&relative)) {
            debug!(uri = %uri, reason = %rejection, "path not admitted");
            return None;
        }

        let root = self.tree.get_or_insert_root(&folder.name, &folder.path);
        let node = NodeRef::new(&folder.name, relative.as_str());
        if root.child(&relative).is_some() {
            return Some(node);
        }

        let label = relative.rsplit('/').next().unwrap_or(&relative).to_string();
        root.add_child(TestNode::file(relative.as_str(), label, path));
        self.output.append_line(&format!(
            "[{}] Found new test file: {}",
            folder.name, relative
        ));

        Some(node)
    }

    /// Rebuild a file's cases from an open document's live text
    pub fn parse_tests_in_document(&mut self, document: &TextDocument) -> Option<NodeRef> {
        let folder = self.folder_for_uri(&document.uri)?;
        let node = self.get_or_create_file(&folder, &document.uri)?;
        self.replace_cases(&folder, &node, &document.text);
        Some(node)
    }

    /// Rebuild a file's cases from its content on disk
    ///
    /// Returns `Ok(None)` when the path is outside the workspace or not
    /// admitted. A failed read surfaces as an error of this call only.
    pub fn parse_tests_in_file(&mut self, uri: &Url) -> ExplorerResult<Option<NodeRef>> {
        let Some(folder) = self.folder_for_uri(uri) else {
            return Ok(None);
        };
        let Some(node) = self.get_or_create_file(&folder, uri) else {
            return Ok(None);
        };

        let path = uri_path(uri);
        let bytes = self
            .workspace
            .read_file(&path)
            .map_err(|source| ExplorerError::Read {
                path: path.clone(),
                source,
            })?;
        let text = String::from_utf8_lossy(&bytes);
        self.replace_cases(&folder, &node, &text);

        Ok(Some(node))
    }

    /// Drop the file node for `uri`, if there is one
    pub fn remove_file(&mut self, uri: &Url) -> Option<NodeRef> {
        let folder = self.folder_for_uri(uri)?;
        let relative = self.workspace.relative_path(&folder, &uri_path(uri))?;
        let root = self.tree.root_mut(&folder.name)?;
        root.remove_child(&relative)?;
        debug!(folder = %folder.name, file = %relative, "removed test file");
        Some(NodeRef::new(&folder.name, relative))
    }

    /// Apply one watch event: create admits, change re-parses, delete removes
    pub fn handle_fs_event(&mut self, event: &FsEvent) -> ExplorerResult<()> {
        match event {
            FsEvent::Created(uri) => {
                if let Some(folder) = self.folder_for_uri(uri) {
                    self.get_or_create_file(&folder, uri);
                }
            }
            FsEvent::Changed(uri) => {
                self.parse_tests_in_file(uri)?;
            }
            FsEvent::Deleted(uri) => {
                self.remove_file(uri);
            }
        }
        Ok(())
    }

    /// Resolve children on demand
    ///
    /// `None` discovers the whole workspace and returns its watches; a file
    /// whose cases are still pending is parsed from disk.
    pub fn resolve(
        &mut self,
        target: Option<&NodeRef>,
        events: &UnboundedSender<FsEvent>,
    ) -> ExplorerResult<Vec<FileWatch>> {
        let Some(target) = target else {
            return self.discover_all_files_in_workspace(events);
        };

        if let Some(path) = self.pending_file_path(target) {
            self.parse_file_path(&path)?;
        }
        Ok(Vec::new())
    }

    /// Parse every known file eagerly
    ///
    /// Files that cannot be read are reported back and left as they were.
    pub fn resolve_all(&mut self) -> Vec<(NodeRef, ExplorerError)> {
        let files = self.tree.file_refs();
        self.parse_each(files)
    }

    /// Parse the pending files among `nodes`, or below them for roots
    pub fn resolve_pending(&mut self, nodes: &[NodeRef]) -> Vec<(NodeRef, ExplorerError)> {
        let mut files = Vec::new();
        for node in nodes {
            let Some(found) = self.tree.get(node) else {
                continue;
            };
            match found.kind() {
                NodeKind::Root => files.extend(
                    found
                        .children()
                        .filter(|file| file.can_resolve_children())
                        .map(|file| NodeRef::new(&node.root, file.id())),
                ),
                NodeKind::File if found.can_resolve_children() => files.push(node.clone()),
                _ => {}
            }
        }
        self.parse_each(files)
    }

    /// Tear a workspace root down with every node below it
    pub fn remove_workspace_root(&mut self, name: &str) -> Option<TestNode> {
        self.tree.remove_root(name)
    }

    fn parse_each(&mut self, files: Vec<NodeRef>) -> Vec<(NodeRef, ExplorerError)> {
        let mut errors = Vec::new();
        for file in files {
            let Some(path) = self.tree.get(&file).and_then(|n| n.path()).map(Path::to_path_buf)
            else {
                continue;
            };
            if let Err(err) = self.parse_file_path(&path) {
                warn!(file = %file, error = %err, "failed to parse test file");
                errors.push((file, err));
            }
        }
        errors
    }

    fn parse_file_path(&mut self, path: &Path) -> ExplorerResult<Option<NodeRef>> {
        match Url::from_file_path(path) {
            Ok(uri) => self.parse_tests_in_file(&uri),
            Err(()) => Ok(None),
        }
    }

    fn pending_file_path(&self, node: &NodeRef) -> Option<PathBuf> {
        let found = self.tree.get(node)?;
        if found.kind() == NodeKind::File && found.can_resolve_children() {
            found.path().map(Path::to_path_buf)
        } else {
            None
        }
    }

    fn folder_for_uri(&self, uri: &Url) -> Option<WorkspaceFolder> {
        self.workspace.folder_for(&uri_path(uri))
    }

    fn replace_cases(&mut self, folder: &WorkspaceFolder, node: &NodeRef, text: &str) {
        let Some(file) = self.tree.get_mut(node) else {
            return;
        };
        let path = file.path().map(Path::to_path_buf).unwrap_or_default();
        let cases = self
            .scanner
            .scan_file(&folder.name, file.id(), &path, text, self.output.as_ref());
        debug!(file = %node, cases = cases.len(), "parsed test file");
        file.replace_children(cases);
    }
}

/// Filesystem path named by `uri`; non-file URIs keep their raw path
fn uri_path(uri: &Url) -> PathBuf {
    uri.to_file_path()
        .unwrap_or_else(|()| PathBuf::from(uri.path()))
}
