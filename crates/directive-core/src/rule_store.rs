//! Read-only handle on the rule-configuration store.
//!
//! [`RuleStore`] opens the store with SQLite's read-only flag and exposes no
//! write methods; the only writer lives privately inside the loader. At open
//! time the rules, actions, bindings and edges are indexed into a
//! [`Catalog`]; guidance lines are read from the store on every request.

use crate::error::{DirectiveError, Result};
use crate::migrations;
use crate::model::{Action, Bundle, FlowEdge, Rule, RuleAction};
use crate::sqlite::{self, json_col};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// In-memory index over a set of rule-configuration records.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    version: u32,
    fallback_rule: Option<String>,
    rules: BTreeMap<String, Rule>,
    actions: BTreeMap<String, Action>,
    bindings: HashMap<String, Vec<RuleAction>>,
    edges: Vec<FlowEdge>,
    edges_from: HashMap<String, Vec<usize>>,
}

impl Catalog {
    pub fn new(
        version: u32,
        fallback_rule: Option<String>,
        rules: Vec<Rule>,
        actions: Vec<Action>,
        rule_actions: Vec<RuleAction>,
        mut edges: Vec<FlowEdge>,
    ) -> Self {
        let mut bindings: HashMap<String, Vec<RuleAction>> = HashMap::new();
        for ra in rule_actions {
            bindings.entry(ra.rule_id.clone()).or_default().push(ra);
        }
        for list in bindings.values_mut() {
            list.sort_by_key(|ra| ra.sequence_order);
        }

        edges.sort_by_key(|e| e.id);
        let mut edges_from: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            edges_from.entry(edge.from_rule.clone()).or_default().push(i);
        }

        Self {
            version,
            fallback_rule,
            rules: rules.into_iter().map(|r| (r.id.clone(), r)).collect(),
            actions: actions.into_iter().map(|a| (a.id.clone(), a)).collect(),
            bindings,
            edges,
            edges_from,
        }
    }

    pub fn from_bundle(bundle: &Bundle) -> Self {
        let mut bundle = bundle.clone();
        bundle.number_edges();
        Self::new(
            bundle.version,
            bundle.fallback_rule,
            bundle.rules,
            bundle.actions,
            bundle.rule_actions,
            bundle.flow_edges,
        )
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn fallback_rule(&self) -> Option<&Rule> {
        self.fallback_rule
            .as_deref()
            .and_then(|id| self.rules.get(id))
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.get(id)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    pub fn action(&self, id: &str) -> Option<&Action> {
        self.actions.get(id)
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    /// Bindings for `rule_id` ordered by `sequence_order`.
    pub fn bindings(&self, rule_id: &str) -> &[RuleAction] {
        self.bindings
            .get(rule_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Outgoing edges of `from_rule` in edge-id order.
    pub fn edges_from<'a>(&'a self, from_rule: &str) -> impl Iterator<Item = &'a FlowEdge> + 'a {
        self.edges_from
            .get(from_rule)
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    pub fn edges(&self) -> &[FlowEdge] {
        &self.edges
    }
}

// ---------------------------------------------------------------------------
// RuleStore
// ---------------------------------------------------------------------------

pub struct RuleStore {
    conn: Connection,
    catalog: Catalog,
}

impl RuleStore {
    /// Open the store read-only. Fails if the schema is behind the latest
    /// migration; only the loader may migrate it.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = sqlite::open_read_only(path)?;
        let found = migrations::current_version(&conn)?;
        let expected = migrations::latest(migrations::RULE_STORE);
        if found < expected {
            return Err(DirectiveError::SchemaOutdated { found, expected });
        }
        let catalog = read_catalog(&conn)?;
        debug!(
            version = catalog.version(),
            rules = catalog.rules.len(),
            edges = catalog.edges.len(),
            "rule store opened"
        );
        Ok(Self { conn, catalog })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn rule(&self, id: &str) -> Result<&Rule> {
        self.catalog
            .rule(id)
            .ok_or_else(|| DirectiveError::RuleNotFound(id.to_string()))
    }

    pub fn action(&self, id: &str) -> Result<&Action> {
        self.catalog
            .action(id)
            .ok_or_else(|| DirectiveError::ActionNotFound(id.to_string()))
    }

    /// Guidance lines for `rule_id`, read from the store on every call.
    pub fn guidance(&self, rule_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT text FROM guidance WHERE rule_id = ?1 ORDER BY seq")?;
        let lines = stmt
            .query_map(params![rule_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(lines)
    }
}

// ---------------------------------------------------------------------------
// Row readers
// ---------------------------------------------------------------------------

fn meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?)
}

fn read_catalog(conn: &Connection) -> Result<Catalog> {
    let version = meta(conn, "bundle_version")?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let fallback_rule = meta(conn, "fallback_rule")?;

    let rules = conn
        .prepare("SELECT id, name, category, level, parent, workflow, priority FROM rules")?
        .query_map([], |row| {
            Ok(Rule {
                id: row.get(0)?,
                name: row.get(1)?,
                category: row.get(2)?,
                level: row.get(3)?,
                parent: row.get(4)?,
                workflow: json_col(row, 5)?,
                priority: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let actions = conn
        .prepare("SELECT id, name, params, pure, is_tool, is_sub_action, target FROM actions")?
        .query_map([], |row| {
            Ok(Action {
                id: row.get(0)?,
                name: row.get(1)?,
                params: json_col(row, 2)?,
                pure: row.get(3)?,
                is_tool: row.get(4)?,
                is_sub_action: row.get(5)?,
                target: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let rule_actions = conn
        .prepare(
            "SELECT rule_id, action_id, sequence_order, is_required, parameter_mapping, execution_context
             FROM rule_actions",
        )?
        .query_map([], |row| {
            Ok(RuleAction {
                rule_id: row.get(0)?,
                action_id: row.get(1)?,
                sequence_order: row.get(2)?,
                is_required: row.get(3)?,
                parameter_mapping: json_col(row, 4)?,
                execution_context: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let edges = conn
        .prepare(
            "SELECT id, from_rule, to_rule, condition_key, condition_value, priority, flow_type
             FROM flow_edges",
        )?
        .query_map([], |row| {
            let value: Option<String> = row.get(4)?;
            let condition_value = match value {
                Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?),
                None => None,
            };
            Ok(FlowEdge {
                id: row.get(0)?,
                from_rule: row.get(1)?,
                to_rule: row.get(2)?,
                condition_key: row.get(3)?,
                condition_value,
                priority: row.get(5)?,
                flow_type: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Catalog::new(
        version,
        fallback_rule,
        rules,
        actions,
        rule_actions,
        edges,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bundle;

    fn bundle() -> Bundle {
        Bundle::from_yaml_str(
            r#"
version: 1
rules:
  - { id: a, name: A }
  - { id: b, name: B }
actions:
  - { id: x, name: x }
  - { id: y, name: y }
rule_actions:
  - { rule_id: a, action_id: y, sequence_order: 2 }
  - { rule_id: a, action_id: x, sequence_order: 1 }
flow_edges:
  - { from_rule: a, to_rule: b }
  - { from_rule: b, to_rule: a, flow_type: completion_loop }
  - { from_rule: a, to_rule: a }
"#,
        )
        .unwrap()
    }

    #[test]
    fn bindings_sorted_by_sequence() {
        let catalog = Catalog::from_bundle(&bundle());
        let ids: Vec<&str> = catalog
            .bindings("a")
            .iter()
            .map(|b| b.action_id.as_str())
            .collect();
        assert_eq!(ids, vec!["x", "y"]);
        assert!(catalog.bindings("b").is_empty());
    }

    #[test]
    fn edges_from_in_id_order() {
        let catalog = Catalog::from_bundle(&bundle());
        let targets: Vec<(u32, &str)> = catalog
            .edges_from("a")
            .map(|e| (e.id, e.to_rule.as_str()))
            .collect();
        assert_eq!(targets, vec![(1, "b"), (3, "a")]);
        assert_eq!(catalog.edges_from("missing").count(), 0);
    }

    #[test]
    fn open_missing_store_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            RuleStore::open(&dir.path().join("rules.db")),
            Err(DirectiveError::RuleStoreMissing(_))
        ));
    }

    #[test]
    fn runtime_handle_rejects_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules.db");
        crate::loader::Loader::new(&path).load(&bundle()).unwrap();

        let store = RuleStore::open(&path).unwrap();
        assert!(store.conn.execute("DELETE FROM rules", []).is_err());
        assert!(store
            .conn
            .execute(
                "INSERT INTO guidance (rule_id, seq, text) VALUES ('a', 0, 'x')",
                []
            )
            .is_err());
        assert_eq!(store.catalog().rules().count(), 2);
    }
}
