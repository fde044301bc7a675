//! `watch` - keep the test tree in sync with the filesystem

use super::list::resolve_cases;
use super::{load_config, open_session};
use crate::console::{print_tree, ConsoleOptions};
use anyhow::Result;
use colored::*;
use protostar_explorer::ExplorerEvent;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Debounce delay in milliseconds
const DEBOUNCE_MS: u64 = 300;

pub struct WatchArgs {
    pub dir: PathBuf,
    pub cases: bool,
}

pub async fn run(args: WatchArgs, options: ConsoleOptions) -> Result<()> {
    let config = load_config(&args.dir)?;
    let (mut session, _) = open_session(&args.dir, &config, options)?;

    if session.watches().iter().all(|watch| !watch.is_active()) {
        warn!("file watching is unavailable, the tree will not update");
    }
    if args.cases {
        resolve_cases(&mut session);
    }

    println!("Watching {} for changes...", args.dir.display());
    println!("Press Ctrl+C to stop\n");
    print_tree(session.tree());

    loop {
        tokio::select! {
            event = session.next_fs_event() => {
                let Some(event) = event else {
                    break;
                };
                if let Err(err) = session.handle(ExplorerEvent::FileSystem(event)) {
                    warn!(error = %err, "failed to apply watch event");
                }

                // Let bursts of editor writes settle before re-rendering
                tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS)).await;
                let batched = session.drain_pending();
                debug!(batched, "applied queued watch events");

                if args.cases {
                    resolve_cases(&mut session);
                }
                println!("\n{}", "Test tree changed".cyan().bold());
                print_tree(session.tree());
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    session.dispose();
    Ok(())
}
