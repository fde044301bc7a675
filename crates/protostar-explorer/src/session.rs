//! Explorer session - single-threaded dispatcher over resolver and runner
//!
//! Watch events, document notifications and resolve requests are all
//! funneled through [`ExplorerSession::handle`], so the tree is only ever
//! touched from one place.

use crate::config::ExplorerConfig;
use crate::error::{ExplorerError, ExplorerResult};
use crate::host::{CancellationToken, OutputChannel, TestRun, TestRunRequest, TextDocument};
use crate::process::{ProcessSpawner, TokioSpawner};
use crate::resolver::Resolver;
use crate::runner::RunHandler;
use crate::tree::{NodeRef, TestTree};
use crate::workspace::{FileWatch, FsEvent, WorkspaceProvider};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Something the host wants the explorer to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplorerEvent {
    FileSystem(FsEvent),
    DocumentOpened(TextDocument),
    DocumentChanged(TextDocument),
    /// Resolve children; `None` discovers the whole workspace
    Resolve(Option<NodeRef>),
}

pub struct ExplorerSession<S: ProcessSpawner = TokioSpawner> {
    resolver: Resolver,
    runner: Arc<RunHandler<S>>,
    watches: Vec<FileWatch>,
    events_tx: UnboundedSender<FsEvent>,
    events_rx: UnboundedReceiver<FsEvent>,
}

impl ExplorerSession<TokioSpawner> {
    pub fn new(
        workspace: Arc<dyn WorkspaceProvider>,
        output: Arc<dyn OutputChannel>,
        config: &ExplorerConfig,
    ) -> ExplorerResult<Self> {
        Self::with_spawner(workspace, output, config, TokioSpawner)
    }
}

impl<S: ProcessSpawner> ExplorerSession<S> {
    pub fn with_spawner(
        workspace: Arc<dyn WorkspaceProvider>,
        output: Arc<dyn OutputChannel>,
        config: &ExplorerConfig,
        spawner: S,
    ) -> ExplorerResult<Self> {
        let resolver = Resolver::with_config(workspace.clone(), output.clone(), &config.discovery)?;
        let runner =
            RunHandler::with_spawner(workspace, output, spawner).with_config(&config.runner);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            resolver,
            runner: Arc::new(runner),
            watches: Vec::new(),
            events_tx,
            events_rx,
        })
    }

    pub fn tree(&self) -> &TestTree {
        self.resolver.tree()
    }

    /// Shared handle to the runner, usable to kill processes mid-run
    pub fn runner(&self) -> Arc<RunHandler<S>> {
        self.runner.clone()
    }

    /// Live watches
    pub fn watches(&self) -> &[FileWatch] {
        &self.watches
    }

    /// Discover every workspace folder and start watching them
    pub fn start(&mut self) -> ExplorerResult<()> {
        self.handle(ExplorerEvent::Resolve(None))
    }

    pub fn handle(&mut self, event: ExplorerEvent) -> ExplorerResult<()> {
        match event {
            ExplorerEvent::FileSystem(fs_event) => self.resolver.handle_fs_event(&fs_event),
            ExplorerEvent::DocumentOpened(document) | ExplorerEvent::DocumentChanged(document) => {
                self.resolver.parse_tests_in_document(&document);
                Ok(())
            }
            ExplorerEvent::Resolve(target) => {
                let watches = self.resolver.resolve(target.as_ref(), &self.events_tx)?;
                self.watches.extend(watches);
                Ok(())
            }
        }
    }

    /// Wait for the next watch event
    pub async fn next_fs_event(&mut self) -> Option<FsEvent> {
        self.events_rx.recv().await
    }

    /// Apply every watch event already queued; returns how many were handled
    pub fn drain_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if let Err(err) = self.resolver.handle_fs_event(&event) {
                warn!(uri = %event.uri(), error = %err, "failed to apply watch event");
            }
            handled += 1;
        }
        handled
    }

    /// Execute `request`, parsing any requested file still pending first
    pub async fn run(
        &mut self,
        request: &TestRunRequest,
        token: &CancellationToken,
        run: &mut dyn TestRun,
    ) {
        let targets = match &request.include {
            Some(include) => include.clone(),
            None => self.resolver.tree().root_refs(),
        };
        for (node, err) in self.resolver.resolve_pending(&targets) {
            warn!(node = %node, error = %err, "could not resolve cases before run");
        }

        self.runner
            .handle_request(self.resolver.tree(), request, token, run)
            .await;
    }

    /// Parse every known file
    pub fn resolve_all(&mut self) -> Vec<(NodeRef, ExplorerError)> {
        self.resolver.resolve_all()
    }

    /// Kill every runner process still alive
    pub fn cancel(&self) {
        self.runner.cancel();
    }

    /// Kill active processes and stop every watch
    pub fn dispose(&mut self) {
        self.runner.cancel();
        debug!(watches = self.watches.len(), "disposing explorer session");
        self.watches.clear();
        self.events_rx.close();
    }
}
