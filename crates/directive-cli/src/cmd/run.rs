use crate::output::{parse_params, print_json};
use anyhow::Context;
use directive_core::invoker::{ExecutionContext, RunOutcome};
use directive_core::Engine;
use std::path::Path;

pub fn run(root: &Path, rule: &str, params: &[String], json: bool) -> anyhow::Result<()> {
    let ctx = ExecutionContext::from_map(parse_params(params)?);
    let mut engine = Engine::open(root).context("failed to open engine")?;
    let result = engine
        .execute_rule_actions(rule, &ctx)
        .with_context(|| format!("failed to run rule '{rule}'"))?;

    if json {
        print_json(&result)?;
    } else {
        for output in &result.results {
            println!("  ok:      {}", output.action_id);
        }
        for warning in &result.warnings {
            println!("  warning: {} ({})", warning.action_id, warning.error);
        }
        for orphan in &result.orphaned_reservations {
            println!("  orphan:  {} {}", orphan.kind, orphan.id);
        }
        if let RunOutcome::Completed { guidance } = &result.outcome {
            println!("Rule '{rule}' completed.");
            for line in guidance {
                println!("  - {line}");
            }
        }
    }

    if let Some(failure) = result.failure() {
        anyhow::bail!(
            "rule '{rule}' failed at action {} '{}': {}",
            failure.index,
            failure.action_id,
            failure.error
        );
    }
    Ok(())
}

pub fn tool(root: &Path, action: &str, params: &[String], json: bool) -> anyhow::Result<()> {
    let params = parse_params(params)?;
    let mut engine = Engine::open(root).context("failed to open engine")?;
    let payload = engine
        .invoke_tool(action, params)
        .with_context(|| format!("tool '{action}' failed"))?;

    if json {
        print_json(&payload)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    }
    Ok(())
}
