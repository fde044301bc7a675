//! `list` - print the discovered test tree

use super::{load_config, open_session};
use crate::console::{print_tree, ConsoleOptions};
use anyhow::Result;
use protostar_explorer::ExplorerSession;
use std::path::PathBuf;
use tracing::warn;

pub struct ListArgs {
    pub dir: PathBuf,
    pub cases: bool,
    pub json: bool,
}

pub fn run(args: ListArgs, options: ConsoleOptions) -> Result<()> {
    let config = load_config(&args.dir)?;
    let (mut session, _) = open_session(&args.dir, &config, options)?;

    if args.cases {
        resolve_cases(&mut session);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(session.tree())?);
    } else {
        print_tree(session.tree());
    }

    session.dispose();
    Ok(())
}

/// Parse every file, reporting the ones that could not be read
pub fn resolve_cases(session: &mut ExplorerSession) {
    for (node, err) in session.resolve_all() {
        warn!(node = %node, error = %err, "could not parse test file");
    }
}
