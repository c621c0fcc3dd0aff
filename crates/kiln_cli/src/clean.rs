//! `kiln clean-snapshot`: delete persisted build graphs.

use kiln_build::Orchestrator;
use kiln_graph::CommandToolchain;

use crate::pipeline::resolve_project_root;
use crate::{CleanArgs, GlobalArgs};

/// Runs the `kiln clean-snapshot` command. Returns exit code 0.
pub fn run(args: &CleanArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let root = resolve_project_root(global)?;
    let config = kiln_config::load_config(&root)?;
    let targets: Vec<String> = if args.targets.is_empty() {
        config.targets.keys().cloned().collect()
    } else {
        args.targets.clone()
    };

    let toolchain = CommandToolchain::new();
    let orchestrator = Orchestrator::new(&root, config, &toolchain);
    let mut removed = 0;
    for target in &targets {
        removed += orchestrator.invalidate_snapshots(target)?;
    }
    if !global.quiet {
        eprintln!("     Removed {removed} snapshot(s)");
    }
    Ok(0)
}
