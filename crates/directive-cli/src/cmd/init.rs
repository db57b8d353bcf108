use crate::output::print_json;
use anyhow::Context;
use directive_core::{config::EngineConfig, paths, Engine};
use std::path::Path;

pub fn run(root: &Path, branch: &str, json: bool) -> anyhow::Result<()> {
    let existed = paths::config_path(root).exists();
    let config = if existed {
        EngineConfig::load(root).context("failed to load config.yaml")?
    } else {
        EngineConfig::new(branch)
    };
    Engine::init(root, &config).context("failed to initialize .directive/")?;

    if json {
        print_json(&serde_json::json!({
            "root": root.display().to_string(),
            "branch": config.branch,
            "created": !existed,
        }))?;
    } else {
        println!("Initializing directive in: {}", root.display());
        if existed {
            println!("  exists:  {}", paths::CONFIG_FILE);
        } else {
            println!("  created: {}", paths::CONFIG_FILE);
        }
        println!("  branch:  {}", config.branch);
        println!("\nNext: directive load <bundle.yaml>");
    }
    Ok(())
}
