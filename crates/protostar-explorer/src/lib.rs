//! Protostar test explorer engine
//!
//! Discovers `test_*.cairo` files inside workspace roots, extracts their test
//! functions into a tree of roots, files and cases, and executes them through
//! the `protostar` command line runner, mapping its `[PASS]`/`[FAIL]` output
//! back onto the tree.
//!
//! The engine is split the same way data flows through it:
//! - [`scanner`] turns source text into case descriptors
//! - [`resolver`] keeps the [`tree::TestTree`] in sync with the filesystem
//! - [`runner`] spawns the runner and parses its streamed output
//! - [`formatter`] renders the coloured run log
//! - [`session`] funnels filesystem, document and run traffic through one
//!   single-threaded dispatcher
//!
//! Everything the engine needs from its host (run sessions, output channels,
//! the workspace) is expressed as traits in [`host`], [`workspace`] and
//! [`process`].

pub mod config;
pub mod error;
pub mod filter;
pub mod formatter;
pub mod host;
pub mod process;
pub mod resolver;
pub mod runner;
pub mod scanner;
pub mod session;
pub mod tree;
pub mod workspace;

pub use config::{ConfigError, ConfigLoader, ExplorerConfig, ProgressNumbering};
pub use error::{ExplorerError, ExplorerResult};
pub use host::{
    BufferedOutput, CancellationToken, OutputChannel, RecordingRun, RunEvent, TestMessage,
    TestRun, TestRunRequest, TextDocument,
};
pub use process::{CommandSpec, ProcessSpawner, RunningProcess, TokioSpawner};
pub use resolver::Resolver;
pub use runner::RunHandler;
pub use scanner::Scanner;
pub use session::{ExplorerEvent, ExplorerSession};
pub use tree::{Location, NodeKind, NodeRef, TestNode, TestTree};
pub use workspace::{FileWatch, FsEvent, LocalWorkspace, WorkspaceFolder, WorkspaceProvider};
