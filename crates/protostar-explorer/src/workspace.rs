//! Workspace provider - folders, file search, reads and watches
//!
//! The engine reaches the filesystem only through [`WorkspaceProvider`].
//! [`LocalWorkspace`] backs it with the local disk: `walkdir` for searches and
//! `notify` for recursive watches.

use crate::error::{ExplorerError, ExplorerResult};
use globset::{GlobBuilder, GlobMatcher};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use url::Url;
use walkdir::WalkDir;

/// One root directory of the workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceFolder {
    /// Display name, also the id of the folder's root node
    pub name: String,
    pub path: PathBuf,
    /// Position among the workspace folders
    pub index: usize,
}

impl WorkspaceFolder {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, index: usize) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            index,
        }
    }
}

/// Change reported by a recursive watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Created(Url),
    Changed(Url),
    Deleted(Url),
}

impl FsEvent {
    pub fn uri(&self) -> &Url {
        match self {
            FsEvent::Created(uri) | FsEvent::Changed(uri) | FsEvent::Deleted(uri) => uri,
        }
    }
}

/// Glob selecting test sources below a folder (`**/test_*.<ext>`)
#[derive(Debug, Clone)]
pub struct FilePattern {
    glob: String,
    matcher: GlobMatcher,
}

impl FilePattern {
    pub fn for_extension(extension: &str) -> ExplorerResult<Self> {
        Self::new(&format!("**/test_*.{}", extension))
    }

    pub fn new(glob: &str) -> ExplorerResult<Self> {
        let matcher = GlobBuilder::new(glob)
            .literal_separator(true)
            .build()?
            .compile_matcher();
        Ok(Self {
            glob: glob.to_string(),
            matcher,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }

    /// Match a folder-relative path
    pub fn is_match(&self, relative: &Path) -> bool {
        self.matcher.is_match(relative)
    }
}

/// Keeps a recursive watch alive; dropping it stops the watch
pub struct FileWatch {
    folder: String,
    watcher: Option<RecommendedWatcher>,
}

impl FileWatch {
    fn new(folder: &str, watcher: RecommendedWatcher) -> Self {
        Self {
            folder: folder.to_string(),
            watcher: Some(watcher),
        }
    }

    /// A watch with no backing watcher, for providers that never emit events
    pub fn detached(folder: &str) -> Self {
        Self {
            folder: folder.to_string(),
            watcher: None,
        }
    }

    /// Name of the watched folder
    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn is_active(&self) -> bool {
        self.watcher.is_some()
    }
}

impl std::fmt::Debug for FileWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatch")
            .field("folder", &self.folder)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Filesystem services the engine consumes
pub trait WorkspaceProvider: Send + Sync {
    /// Every workspace folder, in order
    fn folders(&self) -> Vec<WorkspaceFolder>;

    /// Folder containing `path`; the deepest one wins when folders nest
    fn folder_for(&self, path: &Path) -> Option<WorkspaceFolder> {
        self.folders()
            .into_iter()
            .filter(|folder| path.starts_with(&folder.path))
            .max_by_key(|folder| folder.path.components().count())
    }

    /// `path` relative to `folder`, with `/` separators
    fn relative_path(&self, folder: &WorkspaceFolder, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&folder.path).ok()?;
        let segments: Vec<&str> = relative
            .components()
            .map(|component| match component {
                Component::Normal(segment) => segment.to_str(),
                _ => None,
            })
            .collect::<Option<_>>()?;
        if segments.is_empty() {
            None
        } else {
            Some(segments.join("/"))
        }
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Files below `folder` matching `pattern`
    fn find_files(
        &self,
        folder: &WorkspaceFolder,
        pattern: &FilePattern,
    ) -> ExplorerResult<Vec<PathBuf>>;

    /// Start a recursive watch; events matching `pattern` go to `events`
    fn watch(
        &self,
        folder: &WorkspaceFolder,
        pattern: &FilePattern,
        events: UnboundedSender<FsEvent>,
    ) -> ExplorerResult<FileWatch>;
}

/// Workspace backed by local directories
#[derive(Debug, Clone, Default)]
pub struct LocalWorkspace {
    folders: Vec<WorkspaceFolder>,
}

impl LocalWorkspace {
    /// Workspace over `paths`; each must be an existing directory
    pub fn new<P: Into<PathBuf>>(paths: impl IntoIterator<Item = P>) -> ExplorerResult<Self> {
        let mut folders = Vec::new();
        for (index, path) in paths.into_iter().enumerate() {
            let path: PathBuf = path.into();
            if !path.is_dir() {
                return Err(ExplorerError::NotADirectory(path));
            }
            let path = path.canonicalize()?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .unwrap_or_else(|| path.display().to_string());
            folders.push(WorkspaceFolder::new(name, path, index));
        }
        Ok(Self { folders })
    }

    /// Workspace with no folders
    pub fn empty() -> Self {
        Self::default()
    }
}

impl WorkspaceProvider for LocalWorkspace {
    fn folders(&self) -> Vec<WorkspaceFolder> {
        self.folders.clone()
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn find_files(
        &self,
        folder: &WorkspaceFolder,
        pattern: &FilePattern,
    ) -> ExplorerResult<Vec<PathBuf>> {
        let files = WalkDir::new(&folder.path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(
                        folder = %folder.name,
                        path = ?err.path(),
                        error = %err,
                        "skipping unreadable path during discovery"
                    );
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .strip_prefix(&folder.path)
                    .map(|relative| pattern.is_match(relative))
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect();
        Ok(files)
    }

    fn watch(
        &self,
        folder: &WorkspaceFolder,
        pattern: &FilePattern,
        events: UnboundedSender<FsEvent>,
    ) -> ExplorerResult<FileWatch> {
        let root = folder.path.clone();
        let glob = pattern.as_str().to_string();
        let pattern = pattern.clone();
        let name = folder.name.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for fs_event in translate_event(&event) {
                        let Ok(path) = fs_event.uri().to_file_path() else {
                            continue;
                        };
                        let matches = path
                            .strip_prefix(&root)
                            .map(|relative| pattern.is_match(relative))
                            .unwrap_or(false);
                        if matches && events.send(fs_event).is_err() {
                            debug!(folder = %name, "watch receiver dropped");
                            return;
                        }
                    }
                }
                Err(e) => warn!(folder = %name, error = %e, "watch error"),
            }
        })?;

        watcher.watch(&folder.path, RecursiveMode::Recursive)?;
        debug!(folder = %folder.name, pattern = %glob, "watching");

        Ok(FileWatch::new(&folder.name, watcher))
    }
}

/// Map a raw notify event onto create/change/delete events
pub fn translate_event(event: &Event) -> Vec<FsEvent> {
    let uris = || event.paths.iter().filter_map(|p| Url::from_file_path(p).ok());

    match &event.kind {
        EventKind::Create(_) => uris().map(FsEvent::Created).collect(),
        EventKind::Remove(_) => uris().map(FsEvent::Deleted).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            uris().map(FsEvent::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            uris().map(FsEvent::Created).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut renamed = uris();
            let mut out = Vec::new();
            if let Some(from) = renamed.next() {
                out.push(FsEvent::Deleted(from));
            }
            if let Some(to) = renamed.next() {
                out.push(FsEvent::Created(to));
            }
            out
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .filter_map(|p| {
                let uri = Url::from_file_path(p).ok()?;
                Some(if p.exists() {
                    FsEvent::Created(uri)
                } else {
                    FsEvent::Deleted(uri)
                })
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => uris().map(FsEvent::Changed).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn uri(path: &str) -> Url {
        Url::from_file_path(path).unwrap()
    }

    #[test]
    fn test_translate_create_modify_remove() {
        let path = PathBuf::from("/ws/tests/test_main.cairo");

        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        assert_eq!(
            translate_event(&created),
            vec![FsEvent::Created(uri("/ws/tests/test_main.cairo"))]
        );

        let changed = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(path.clone());
        assert_eq!(
            translate_event(&changed),
            vec![FsEvent::Changed(uri("/ws/tests/test_main.cairo"))]
        );

        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.clone());
        assert_eq!(
            translate_event(&removed),
            vec![FsEvent::Deleted(uri("/ws/tests/test_main.cairo"))]
        );

        let touched =
            Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))).add_path(path);
        assert!(translate_event(&touched).is_empty());
    }

    #[test]
    fn test_translate_rename_both() {
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/ws/test_old.cairo"))
            .add_path(PathBuf::from("/ws/test_new.cairo"));
        assert_eq!(
            translate_event(&event),
            vec![
                FsEvent::Deleted(uri("/ws/test_old.cairo")),
                FsEvent::Created(uri("/ws/test_new.cairo")),
            ]
        );
    }

    #[test]
    fn test_file_pattern() {
        let pattern = FilePattern::for_extension("cairo").unwrap();
        assert_eq!(pattern.as_str(), "**/test_*.cairo");
        assert!(pattern.is_match(Path::new("test_main.cairo")));
        assert!(pattern.is_match(Path::new("tests/unit/test_main.cairo")));
        assert!(!pattern.is_match(Path::new("tests/main.cairo")));
        assert!(!pattern.is_match(Path::new("test_dir/main.cairo")));
    }

    #[test]
    fn test_local_workspace_rejects_files() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        fs::write(&file, "").unwrap();

        let err = LocalWorkspace::new([file]).unwrap_err();
        assert!(matches!(err, ExplorerError::NotADirectory(_)));
    }

    #[test]
    fn test_find_files_and_relative_paths() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("starklings");
        fs::create_dir_all(root.join("tests/unit")).unwrap();
        fs::write(root.join("tests/unit/test_b.cairo"), "").unwrap();
        fs::write(root.join("tests/test_a.cairo"), "").unwrap();
        fs::write(root.join("tests/helper.cairo"), "").unwrap();

        let workspace = LocalWorkspace::new([&root]).unwrap();
        let folders = workspace.folders();
        assert_eq!(folders.len(), 1);
        assert_eq!(folders[0].name, "starklings");

        let pattern = FilePattern::for_extension("cairo").unwrap();
        let files = workspace.find_files(&folders[0], &pattern).unwrap();
        let relative: Vec<_> = files
            .iter()
            .map(|f| workspace.relative_path(&folders[0], f).unwrap())
            .collect();
        assert_eq!(relative, vec!["tests/test_a.cairo", "tests/unit/test_b.cairo"]);

        assert_eq!(
            workspace.folder_for(&files[0]).map(|f| f.name),
            Some("starklings".to_string())
        );
        assert!(workspace.folder_for(temp.path()).is_none());
        assert!(workspace.relative_path(&folders[0], &folders[0].path).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_find_files_skips_broken_entries() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("starklings");
        fs::create_dir_all(root.join("tests")).unwrap();
        fs::write(root.join("tests/test_a.cairo"), "").unwrap();
        std::os::unix::fs::symlink(root.join("missing"), root.join("tests/test_gone.cairo"))
            .unwrap();

        let workspace = LocalWorkspace::new([&root]).unwrap();
        let folder = &workspace.folders()[0];
        let pattern = FilePattern::for_extension("cairo").unwrap();

        let files = workspace.find_files(folder, &pattern).unwrap();
        assert_eq!(files, vec![folder.path.join("tests/test_a.cairo")]);
    }

    #[test]
    fn test_folder_for_prefers_deepest() {
        let temp = TempDir::new().unwrap();
        let outer = temp.path().join("outer");
        let inner = outer.join("inner");
        fs::create_dir_all(&inner).unwrap();

        let workspace = LocalWorkspace::new([&outer, &inner]).unwrap();
        let folder = workspace
            .folder_for(&workspace.folders()[1].path.join("test_x.cairo"))
            .unwrap();
        assert_eq!(folder.name, "inner");
        assert_eq!(folder.index, 1);
    }
}
