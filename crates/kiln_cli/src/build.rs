//! `kiln build`: gather and assemble the requested targets.

use kiln_build::{BuildOptions, BuildOutcome, Orchestrator, Phases};
use kiln_config::BackslashPolicy;
use kiln_graph::CommandToolchain;
use tracing::debug;

use crate::pipeline::resolve_project_root;
use crate::{BackslashArg, BuildArgs, GlobalArgs};

/// Runs the `kiln build` command.
///
/// Returns 0 when actions ran or the graph was gathered, 2 when everything
/// was up to date, 1 on failure.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let root = resolve_project_root(global)?;
    let config = kiln_config::load_config(&root)?;
    debug!(root = %root.display(), "loaded workspace");

    if !global.quiet {
        eprintln!("    Building {} ({})", args.targets.join(", "), config.workspace.name);
    }

    let toolchain = CommandToolchain::new();
    let mut orchestrator = Orchestrator::new(&root, config, &toolchain);
    let report = orchestrator.run(&build_options(args))?;

    if let Some(explain) = &report.explain {
        println!("{}", serde_json::to_string_pretty(explain)?);
    }
    if !global.quiet {
        if let Some(reason) = &report.invalidation {
            eprintln!("    Gathered ({reason})");
        }
        match report.outcome {
            BuildOutcome::Succeeded => eprintln!("    Finished {} action(s)", report.executed),
            BuildOutcome::UpToDate => eprintln!("    Up to date"),
            BuildOutcome::Gathered => eprintln!("    Gathered build graph"),
        }
    }
    Ok(report.outcome.exit_code())
}

/// Translates command-line switches into orchestrator options.
pub fn build_options(args: &BuildArgs) -> BuildOptions {
    let phases = match (args.gather_only, args.assemble_only) {
        (true, true) => Phases::Both,
        (true, false) => Phases::GatherOnly,
        (false, true) => Phases::AssembleOnly,
        (false, false) => Phases::Auto,
    };
    BuildOptions {
        targets: args.targets.clone(),
        phases,
        no_snapshot: args.no_snapshot,
        force_rescan: args.rescan,
        single_file: args.single_file.clone(),
        backslash_includes: args.backslash_includes.map(|b| match b {
            BackslashArg::Allow => BackslashPolicy::Allow,
            BackslashArg::Error => BackslashPolicy::Error,
        }),
        hot_reload: args.hot_reload,
        modules: args.modules.clone(),
        graph_only: args.graph_only,
        explain: args.explain,
        no_lock: args.no_lock,
        executable: None,
    }
}
