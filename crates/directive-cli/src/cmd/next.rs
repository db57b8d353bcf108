use crate::output::{print_json, print_table};
use anyhow::Context;
use directive_core::Engine;
use std::path::Path;

pub fn run(root: &Path, after: Option<&str>, directive: bool, json: bool) -> anyhow::Result<()> {
    let engine = Engine::open(root).context("failed to open engine")?;
    let rules = engine.next(after).context("failed to resolve next rules")?;

    if directive {
        let Some(first) = rules.first() else {
            anyhow::bail!("no rule applies and the bundle has no fallback rule");
        };
        let doc = engine
            .directive(&first.id)
            .with_context(|| format!("failed to render rule '{}'", first.id))?;
        if json {
            print_json(&serde_json::json!({ "rule": first, "directive": doc }))?;
        } else {
            print!("{doc}");
        }
        return Ok(());
    }

    if json {
        return print_json(&rules);
    }
    if rules.is_empty() {
        println!("No rule applies.");
        return Ok(());
    }
    let rows = rules
        .iter()
        .map(|r| {
            vec![
                r.id.clone(),
                r.name.clone(),
                r.category.clone(),
                r.priority.to_string(),
            ]
        })
        .collect();
    print_table(&["RULE", "NAME", "CATEGORY", "PRIORITY"], rows);
    Ok(())
}
