use crate::output::{print_json, print_table};
use anyhow::Context;
use directive_core::Engine;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let engine = Engine::open(root).context("failed to open engine")?;
    let ops = engine.project().state();
    let project = ops.project().context("failed to read project")?;
    let snapshot = engine.snapshot().context("failed to derive snapshot")?;
    let stages = ops.stages().context("failed to list stages")?;
    let milestones = ops.all_milestones().context("failed to list milestones")?;

    if json {
        #[derive(serde::Serialize)]
        struct StateOutput<'a> {
            branch: &'a str,
            project: Option<directive_core::project::Project>,
            snapshot: directive_core::resolver::StateSnapshot,
            stages: Vec<directive_core::project::Stage>,
            milestones: Vec<directive_core::project::Milestone>,
        }
        return print_json(&StateOutput {
            branch: engine.project().branch(),
            project,
            snapshot,
            stages,
            milestones,
        });
    }

    println!("Branch:   {}", engine.project().branch());
    match &project {
        Some(p) => {
            println!("Project:  {}", p.name);
            println!("Phase:    {}", p.phase);
        }
        None => println!("Project:  (not initialized)"),
    }

    if !milestones.is_empty() {
        println!();
        let rows = milestones
            .iter()
            .map(|m| {
                let stage = stages
                    .iter()
                    .find(|s| s.id == m.stage_id)
                    .map(|s| s.name.clone())
                    .unwrap_or_default();
                vec![stage, m.name.clone(), m.status.to_string(), m.scope.len().to_string()]
            })
            .collect();
        print_table(&["STAGE", "MILESTONE", "STATUS", "SCOPE LEFT"], rows);
    }

    println!();
    for (key, value) in snapshot.iter() {
        println!("  {key}: {value}");
    }
    Ok(())
}
