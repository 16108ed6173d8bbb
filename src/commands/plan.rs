// src/commands/plan.rs
//! Plan command

use super::{load_config, open_orchestrator};
use crate::cli::GlobalArgs;
use anyhow::Result;
use formula_engine::orchestrator::InstallOptions;

/// Print the ordered plan for `names`
pub fn cmd_plan(global: &GlobalArgs, names: &[String], test: bool) -> Result<()> {
    let config = load_config(global)?;
    let mut options = InstallOptions::from_config(&config);
    options.run_tests = test;

    let orchestrator = open_orchestrator(config)?;
    let plan = orchestrator.plan(names, &options)?;

    for (i, node) in plan.nodes().enumerate() {
        let formula = &node.formula;
        let state = if node.satisfied { " (installed)" } else { "" };
        println!("{:>3}. {} {}{}", i + 1, formula.name, formula.pkg_version(), state);

        let deps: Vec<String> = plan
            .graph()
            .dependencies(node.name())
            .into_iter()
            .map(|(dep, kind)| format!("{} ({})", dep, kind.as_str()))
            .collect();
        if !deps.is_empty() {
            println!("     needs: {}", deps.join(", "));
        }
    }
    Ok(())
}
