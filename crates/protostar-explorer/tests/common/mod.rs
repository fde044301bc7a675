//! Shared test utilities: a scripted process spawner and an in-memory
//! workspace
#![allow(dead_code)]

use futures_util::future::FutureExt;
use protostar_explorer::process::BoxedReader;
use protostar_explorer::workspace::FilePattern;
use protostar_explorer::{
    CancellationToken, CommandSpec, ExplorerResult, FileWatch, FsEvent, ProcessSpawner,
    RunningProcess, TestNode, TestTree, WorkspaceFolder, WorkspaceProvider,
};
use std::collections::HashMap;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

pub use pretty_assertions::assert_eq;

pub const ROOT: &str = "starklings";
pub const ROOT_PATH: &str = "/ws/starklings";
pub const MAIN_FILE: &str = "tests/test_main.cairo";
pub const OTHER_FILE: &str = "tests/test_other.cairo";

/// What a fake process prints and how it exits
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Stdout, delivered one read per entry
    pub stdout: Vec<String>,
    pub stderr: String,
    pub exit: Option<i32>,
    /// Produce no output and keep stdout open until killed
    pub hang: bool,
}

impl Script {
    pub fn stdout(chunks: &[&str]) -> Self {
        Self {
            stdout: chunks.iter().map(|c| c.to_string()).collect(),
            exit: Some(0),
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }

    pub fn with_exit(mut self, code: i32) -> Self {
        self.exit = Some(code);
        self
    }
}

/// Spawner replaying scripts keyed by the node id argument
///
/// Root-level runs (no node id) use the key `""`.
#[derive(Debug, Default)]
pub struct FakeSpawner {
    scripts: HashMap<String, Script>,
    fail: bool,
    spawned: Mutex<Vec<CommandSpec>>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawner whose every spawn fails as if the program were missing
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn script(mut self, key: &str, script: Script) -> Self {
        self.scripts.insert(key.to_string(), script);
        self
    }

    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.spawned.lock().unwrap().clone()
    }

    /// Node id argument of every spawn, `""` for root runs
    pub fn spawned_keys(&self) -> Vec<String> {
        self.spawned().iter().map(key_of).collect()
    }
}

fn key_of(command: &CommandSpec) -> String {
    command.args.get(3).cloned().unwrap_or_default()
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, command: &CommandSpec, kill: CancellationToken) -> io::Result<RunningProcess> {
        self.spawned.lock().unwrap().push(command.clone());
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::NotFound, "program not found"));
        }

        let script = self
            .scripts
            .get(&key_of(command))
            .cloned()
            .unwrap_or_else(|| Script::stdout(&[]));

        if script.hang {
            // Like a real child, the pipe stays open until the kill has
            // been carried out by the exit future
            let (reader, writer) = tokio::io::duplex(64);
            let exit = async move {
                kill.cancelled().await;
                drop(writer);
                Ok::<_, io::Error>(None)
            }
            .boxed();
            return Ok(RunningProcess {
                pid: Some(4242),
                stdout: Box::pin(reader),
                stderr: Box::pin(Cursor::new(Vec::new())),
                exit,
            });
        }

        let stdout: BoxedReader = if script.stdout.is_empty() {
            Box::pin(Cursor::new(Vec::new()))
        } else {
            let mut builder = tokio_test::io::Builder::new();
            for chunk in &script.stdout {
                builder.read(chunk.as_bytes());
            }
            Box::pin(builder.build())
        };
        let code = script.exit;

        Ok(RunningProcess {
            pid: Some(4242),
            stdout,
            stderr: Box::pin(Cursor::new(script.stderr.into_bytes())),
            exit: async move { Ok::<_, io::Error>(code) }.boxed(),
        })
    }
}

/// Workspace with fixed folders and in-memory file contents
#[derive(Debug, Default)]
pub struct StaticWorkspace {
    folders: Vec<WorkspaceFolder>,
    files: HashMap<PathBuf, String>,
}

impl StaticWorkspace {
    pub fn new() -> Self {
        Self {
            folders: vec![WorkspaceFolder::new(ROOT, ROOT_PATH, 0)],
            files: HashMap::new(),
        }
    }

    pub fn with_file(mut self, relative: &str, text: &str) -> Self {
        self.files
            .insert(Path::new(ROOT_PATH).join(relative), text.to_string());
        self
    }
}

impl WorkspaceProvider for StaticWorkspace {
    fn folders(&self) -> Vec<WorkspaceFolder> {
        self.folders.clone()
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .get(path)
            .map(|text| text.clone().into_bytes())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }

    fn find_files(
        &self,
        folder: &WorkspaceFolder,
        pattern: &FilePattern,
    ) -> ExplorerResult<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|path| {
                path.strip_prefix(&folder.path)
                    .map(|relative| pattern.is_match(relative))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        files.sort();
        Ok(files)
    }

    fn watch(
        &self,
        folder: &WorkspaceFolder,
        _pattern: &FilePattern,
        _events: UnboundedSender<FsEvent>,
    ) -> ExplorerResult<FileWatch> {
        Ok(FileWatch::detached(&folder.name))
    }
}

/// Tree with one root, a resolved file holding two cases and a pending file
pub fn sample_tree() -> TestTree {
    let mut tree = TestTree::new();
    let root = tree.get_or_insert_root(ROOT, Path::new(ROOT_PATH));

    let main_path = Path::new(ROOT_PATH).join(MAIN_FILE);
    let mut main = TestNode::file(MAIN_FILE, "test_main.cairo", &main_path);
    main.replace_children([
        TestNode::case(
            format!("{}::test_alpha", MAIN_FILE),
            "test_alpha",
            &main_path,
            0,
        ),
        TestNode::case(
            format!("{}::test_beta", MAIN_FILE),
            "test_beta",
            &main_path,
            4,
        ),
    ]);
    root.add_child(main);
    root.add_child(TestNode::file(
        OTHER_FILE,
        "test_other.cairo",
        Path::new(ROOT_PATH).join(OTHER_FILE),
    ));
    tree
}
