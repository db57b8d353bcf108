use crate::output::{print_json, print_table};
use anyhow::Context;
use directive_core::{DirectiveError, Engine};
use std::path::Path;

pub fn run(root: &Path, branch: &str, json: bool) -> anyhow::Result<()> {
    let engine = Engine::open(root).context("failed to open engine")?;
    let ours = engine.project().branch().to_string();

    match engine.plan_merge(branch) {
        Ok(plan) => {
            if json {
                print_json(&plan)?;
            } else {
                println!(
                    "'{branch}' merges cleanly into '{ours}' ({} change(s)).",
                    plan.changes.len()
                );
            }
            Ok(())
        }
        Err(DirectiveError::Conflict(conflicts)) => {
            if json {
                print_json(&conflicts)?;
            } else {
                let rows = conflicts
                    .iter()
                    .map(|c| vec![c.kind.to_string(), c.key.clone(), c.reason.clone()])
                    .collect();
                print_table(&["KIND", "ENTITY", "REASON"], rows);
            }
            anyhow::bail!("{} conflict(s) between '{ours}' and '{branch}'", conflicts.len())
        }
        Err(e) => Err(e).context("failed to compare branches"),
    }
}
