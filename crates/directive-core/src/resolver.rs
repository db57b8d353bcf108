//! Flow resolution: given the last-completed rule and a state snapshot, the
//! ordered list of rules that apply next.
//!
//! Resolution is a pure function of its inputs. The flow graph is allowed to
//! cycle (completion loops return to the status rule); the resolver keeps no
//! visit history, so termination depends on the driver mutating state between
//! calls.

use crate::model::{FlowEdge, Rule};
use crate::rule_store::Catalog;
use crate::types::StateValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Pseudo-rule used as `from_rule` at session entry.
pub const ENTRY_RULE: &str = "@entry";

// ---------------------------------------------------------------------------
// StateSnapshot
// ---------------------------------------------------------------------------

/// Named boolean / enum fields describing project state at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSnapshot(BTreeMap<String, StateValue>);

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.0.get(key)
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.0.get(key), Some(StateValue::Bool(true)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StateValue)> {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// True when the edge is unconditional or its condition matches `state`
/// exactly. A key missing from the snapshot never matches.
pub fn edge_holds(edge: &FlowEdge, state: &StateSnapshot) -> bool {
    match (&edge.condition_key, &edge.condition_value) {
        (None, _) => true,
        (Some(key), Some(expected)) => state.get(key) == Some(expected),
        (Some(key), None) => state.flag(key),
    }
}

/// Matching edges out of `current_rule` (or the entry pseudo-rule), sorted by
/// priority descending then edge id ascending.
pub fn matching_edges<'c>(
    catalog: &'c Catalog,
    current_rule: Option<&str>,
    state: &StateSnapshot,
) -> Vec<&'c FlowEdge> {
    let from = current_rule.unwrap_or(ENTRY_RULE);
    let mut edges: Vec<&FlowEdge> = catalog
        .edges_from(from)
        .filter(|e| edge_holds(e, state))
        .collect();
    edges.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    edges
}

/// Ordered ids of the rules eligible after `current_rule`. An empty list
/// means the driver should fall back to the catalog's fallback rule.
pub fn resolve_next(
    catalog: &Catalog,
    current_rule: Option<&str>,
    state: &StateSnapshot,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let next: Vec<String> = matching_edges(catalog, current_rule, state)
        .into_iter()
        .filter(|&e| seen.insert(e.to_rule.as_str()))
        .map(|e| e.to_rule.clone())
        .collect();
    debug!(
        from = current_rule.unwrap_or(ENTRY_RULE),
        candidates = next.len(),
        "resolved next rules"
    );
    next
}

/// Like [`resolve_next`] but returns the rule records.
pub fn resolve_rules<'c>(
    catalog: &'c Catalog,
    current_rule: Option<&str>,
    state: &StateSnapshot,
) -> Vec<&'c Rule> {
    resolve_next(catalog, current_rule, state)
        .iter()
        .filter_map(|id| catalog.rule(id))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bundle;

    fn catalog() -> Catalog {
        let bundle = Bundle::from_yaml_str(
            r#"
version: 1
fallback_rule: status
rules:
  - { id: status, name: Status }
  - { id: init, name: Init }
  - { id: create_task, name: Create task }
  - { id: work, name: Work }
  - { id: review, name: Review }
flow_edges:
  - { from_rule: "@entry", to_rule: status, priority: 1 }
  - from_rule: "@entry"
    to_rule: init
    condition_key: project_initialized
    condition_value: false
    priority: 100
  - from_rule: status
    to_rule: create_task
    condition_key: progression
    condition_value: task_creation_eligible
    priority: 10
  - from_rule: status
    to_rule: work
    condition_key: has_open_task
    condition_value: true
    priority: 10
  - from_rule: status
    to_rule: review
    condition_key: has_open_task
    condition_value: true
    priority: 10
  - { from_rule: work, to_rule: status, flow_type: completion_loop }
"#,
        )
        .unwrap();
        Catalog::from_bundle(&bundle)
    }

    #[test]
    fn entry_uninitialized_prefers_init() {
        let state = StateSnapshot::new().with("project_initialized", false);
        let next = resolve_next(&catalog(), None, &state);
        assert_eq!(next, vec!["init", "status"]);
    }

    #[test]
    fn missing_key_never_matches() {
        let next = resolve_next(&catalog(), None, &StateSnapshot::new());
        assert_eq!(next, vec!["status"]);
    }

    #[test]
    fn equal_priority_breaks_ties_by_declaration_order() {
        let state = StateSnapshot::new().with("has_open_task", true);
        let next = resolve_next(&catalog(), Some("status"), &state);
        assert_eq!(next, vec!["work", "review"]);
    }

    #[test]
    fn enum_condition_matches_exactly() {
        let state = StateSnapshot::new().with("progression", "task_creation_eligible");
        assert_eq!(
            resolve_next(&catalog(), Some("status"), &state),
            vec!["create_task"]
        );
        let state = StateSnapshot::new().with("progression", "complete");
        assert!(resolve_next(&catalog(), Some("status"), &state).is_empty());
    }

    #[test]
    fn type_mismatch_does_not_match() {
        let state = StateSnapshot::new().with("has_open_task", "true");
        assert!(resolve_next(&catalog(), Some("status"), &state).is_empty());
    }

    #[test]
    fn completion_loop_returns_to_status() {
        let next = resolve_next(&catalog(), Some("work"), &StateSnapshot::new());
        assert_eq!(next, vec!["status"]);
    }

    #[test]
    fn resolution_is_deterministic() {
        let catalog = catalog();
        let state = StateSnapshot::new()
            .with("has_open_task", true)
            .with("progression", "active_work");
        let first = resolve_next(&catalog, Some("status"), &state);
        for _ in 0..50 {
            assert_eq!(resolve_next(&catalog, Some("status"), &state), first);
        }
    }

    #[test]
    fn resolve_rules_returns_records() {
        let state = StateSnapshot::new().with("project_initialized", false);
        let catalog = catalog();
        let rules = resolve_rules(&catalog, None, &state);
        assert_eq!(rules[0].name, "Init");
    }
}
