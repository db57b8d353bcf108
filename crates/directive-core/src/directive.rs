use crate::model::Rule;
use crate::resolver::StateSnapshot;
use crate::rule_store::Catalog;

// ---------------------------------------------------------------------------
// completion_steps
// ---------------------------------------------------------------------------

pub fn completion_steps(rule: &Rule) -> Vec<String> {
    vec![
        format!("directive run {}", rule.id),
        format!("directive next --after {} --json", rule.id),
    ]
}

// ---------------------------------------------------------------------------
// build_directive
// ---------------------------------------------------------------------------

/// Render a rule as the markdown brief handed to the driver.
pub fn build_directive(
    catalog: &Catalog,
    rule: &Rule,
    guidance: &[String],
    state: &StateSnapshot,
) -> String {
    let mut doc = String::new();

    doc.push_str(&format!("# Directive: {}\n\n", rule.name));
    doc.push_str(&format!("**Rule:** {}\n", rule.id));
    if !rule.category.is_empty() {
        doc.push_str(&format!("**Category:** {}\n", rule.category));
    }
    if let Some(ref parent) = rule.parent {
        doc.push_str(&format!("**Parent:** {parent}\n"));
    }
    doc.push_str(&format!("**Priority:** {}\n", rule.priority));

    if !rule.workflow.trunk.is_empty() || !rule.workflow.branches.is_empty() {
        doc.push_str("\n## Workflow\n\n");
        if !rule.workflow.trunk.is_empty() {
            doc.push_str(&format!("{}\n", rule.workflow.trunk));
        }
        for branch in &rule.workflow.branches {
            doc.push_str(&format!("- when {}: {}\n", branch.when, branch.then));
        }
    }

    let bindings = catalog.bindings(&rule.id);
    if !bindings.is_empty() {
        doc.push_str("\n## Actions\n\n");
        for (i, binding) in bindings.iter().enumerate() {
            let marker = if binding.is_required { "" } else { " (optional)" };
            doc.push_str(&format!("{}. `{}`{marker}\n", i + 1, binding.action_id));
        }
    }

    doc.push_str("\n## State\n\n");
    for (key, value) in state.iter() {
        doc.push_str(&format!("- {key}: {value}\n"));
    }

    if !guidance.is_empty() {
        doc.push_str("\n## Guidance\n\n");
        for line in guidance {
            doc.push_str(&format!("- {line}\n"));
        }
    }

    doc.push_str("\n## On Completion\n\n");
    doc.push_str("Run these commands in order:\n");
    for (i, step) in completion_steps(rule).iter().enumerate() {
        doc.push_str(&format!("{}. `{step}`\n", i + 1));
    }

    doc
}
