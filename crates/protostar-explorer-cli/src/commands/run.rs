//! `run` - execute tests and report their results

use super::{load_config, open_session};
use crate::console::{ConsoleOptions, ConsoleRun};
use anyhow::Result;
use protostar_explorer::tree::ID_SEPARATOR;
use protostar_explorer::{
    CancellationToken, ExplorerEvent, ExplorerSession, NodeRef, ProgressNumbering, TestRunRequest,
};
use std::path::PathBuf;
use tracing::warn;

pub struct RunArgs {
    pub dir: PathBuf,
    pub ids: Vec<String>,
    pub exclude: Vec<String>,
    pub program: Option<String>,
    pub numbering: Option<String>,
    pub json: bool,
}

/// Run the requested tests; returns whether any of them failed
pub async fn run(args: RunArgs, options: ConsoleOptions) -> Result<bool> {
    let mut config = load_config(&args.dir)?;
    if let Some(program) = args.program {
        config.runner.program = program;
    }
    if let Some(numbering) = args.numbering {
        config.runner.numbering = numbering.parse::<ProgressNumbering>()?;
    }
    config.validate()?;

    let (mut session, root) = open_session(&args.dir, &config, options)?;

    let include: Vec<NodeRef> = args.ids.iter().map(|id| node_ref(&root, id)).collect();
    let exclude: Vec<NodeRef> = args.exclude.iter().map(|id| node_ref(&root, id)).collect();
    resolve_case_files(&mut session, &root, include.iter().chain(&exclude));

    for node in include.iter().chain(&exclude) {
        if session.tree().get(node).is_none() {
            warn!(node = %node, "no such test");
        }
    }

    let request = if include.is_empty() {
        TestRunRequest::all()
    } else {
        TestRunRequest::including(include)
    }
    .excluding(exclude);

    let runner = session.runner();
    let token = CancellationToken::new();
    let mut console = ConsoleRun::new(options, args.json);
    {
        let run = session.run(&request, &token, &mut console);
        tokio::pin!(run);
        tokio::select! {
            _ = &mut run => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, stopping test run");
                token.cancel();
                runner.cancel();
                run.await;
            }
        }
    }

    session.dispose();
    Ok(console.has_failures())
}

/// Node for a command-line id relative to the project folder
fn node_ref(root: &str, id: &str) -> NodeRef {
    let id = id.trim_start_matches("./");
    if id.is_empty() || id == "." {
        NodeRef::root(root)
    } else {
        NodeRef::new(root, id)
    }
}

/// Parse the files owning case ids, so those cases exist before the run
fn resolve_case_files<'a>(
    session: &mut ExplorerSession,
    root: &str,
    nodes: impl Iterator<Item = &'a NodeRef>,
) {
    let files: Vec<NodeRef> = nodes
        .filter(|node| session.tree().get(node).is_none())
        .filter_map(|node| node.id.split_once(ID_SEPARATOR))
        .map(|(file, _)| NodeRef::new(root, file))
        .collect();
    for file in files {
        if let Err(err) = session.handle(ExplorerEvent::Resolve(Some(file.clone()))) {
            warn!(file = %file, error = %err, "could not parse test file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ref_from_command_line() {
        assert_eq!(node_ref("proj", "."), NodeRef::root("proj"));
        assert_eq!(
            node_ref("proj", "./tests/test_a.cairo"),
            NodeRef::new("proj", "tests/test_a.cairo")
        );
        assert_eq!(
            node_ref("proj", "tests/test_a.cairo::test_one"),
            NodeRef::new("proj", "tests/test_a.cairo::test_one")
        );
    }
}
