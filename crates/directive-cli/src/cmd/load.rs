use crate::output::print_json;
use anyhow::Context;
use directive_core::{config::EngineConfig, loader::Loader, DirectiveError};
use std::path::Path;

pub fn run(root: &Path, bundle: &Path, json: bool) -> anyhow::Result<()> {
    let config = EngineConfig::load(root).context("failed to load config")?;
    let loader = Loader::for_config(root, &config);

    let report = match loader.load_file(bundle) {
        Ok(report) => report,
        Err(DirectiveError::ConfigIntegrity { problems }) => {
            for problem in &problems {
                eprintln!("  {problem}");
            }
            anyhow::bail!(
                "{} rejected: {} integrity problem(s)",
                bundle.display(),
                problems.len()
            );
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to load {}", bundle.display()));
        }
    };

    if json {
        print_json(&report)?;
    } else {
        println!("Loaded bundle v{}", report.version);
        println!("  rules:    {}", report.rules);
        println!("  actions:  {}", report.actions);
        println!("  bindings: {}", report.bindings);
        println!("  edges:    {}", report.edges);
        if !report.migrations_applied.is_empty() {
            let applied: Vec<String> = report
                .migrations_applied
                .iter()
                .map(|v| format!("v{v}"))
                .collect();
            println!("  migrated: {}", applied.join(", "));
        }
    }
    Ok(())
}
