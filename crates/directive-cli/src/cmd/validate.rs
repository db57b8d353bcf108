use crate::output::print_json;
use anyhow::Context;
use directive_core::types::WarnLevel;
use directive_core::Engine;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let engine = Engine::open(root).context("failed to open engine")?;
    let warnings = engine.validate().context("validation failed to run")?;

    if json {
        print_json(&warnings)?;
    } else if warnings.is_empty() {
        println!("No problems found.");
    } else {
        for w in &warnings {
            println!("  {}: {}", w.level, w.message);
        }
    }

    let errors = warnings
        .iter()
        .filter(|w| w.level == WarnLevel::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("{errors} error(s) found");
    }
    Ok(())
}
