//! Rule bundle ingestion and rule-store versioning.
//!
//! The loader is the only component that opens the rule-configuration store
//! for writing. A bundle is validated in full before anything is written;
//! activation then replaces the previous contents inside one SQLite
//! transaction, so a partially loaded bundle is never visible.

use crate::config::EngineConfig;
use crate::error::{DirectiveError, Result};
use crate::migrations;
use crate::model::Bundle;
use crate::paths;
use crate::resolver::ENTRY_RULE;
use crate::rule_store::Catalog;
use crate::sqlite::to_json;
use crate::types::StoreTarget;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::info;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Every referential problem in `bundle`. Empty means the bundle may be
/// activated.
pub fn validate(bundle: &Bundle) -> Vec<String> {
    let mut problems = Vec::new();

    let mut rule_ids = HashSet::new();
    for rule in &bundle.rules {
        if paths::validate_id(&rule.id).is_err() {
            problems.push(format!("rule id '{}' is not a valid identifier", rule.id));
        }
        if !rule_ids.insert(rule.id.as_str()) {
            problems.push(format!("duplicate rule id '{}'", rule.id));
        }
    }

    for rule in &bundle.rules {
        if let Some(parent) = &rule.parent {
            if parent == &rule.id {
                problems.push(format!("rule '{}' is its own parent", rule.id));
            } else if !rule_ids.contains(parent.as_str()) {
                problems.push(format!(
                    "rule '{}' references missing parent '{parent}'",
                    rule.id
                ));
            }
        }
    }

    let mut actions = HashMap::new();
    for action in &bundle.actions {
        if paths::validate_id(&action.id).is_err() {
            problems.push(format!(
                "action id '{}' is not a valid identifier",
                action.id
            ));
        }
        if actions.insert(action.id.as_str(), action).is_some() {
            problems.push(format!("duplicate action id '{}'", action.id));
        }
        if action.is_tool && action.is_sub_action {
            problems.push(format!(
                "action '{}' cannot be both a tool and a sub-action",
                action.id
            ));
        }
        if action.target == StoreTarget::RuleConfig && !action.pure {
            problems.push(format!(
                "action '{}' writes to the rule-configuration store",
                action.id
            ));
        }
        let mut names = HashSet::new();
        for param in &action.params {
            if !names.insert(param.name.as_str()) {
                problems.push(format!(
                    "action '{}' declares parameter '{}' twice",
                    action.id, param.name
                ));
            }
        }
    }

    let mut sequences = HashSet::new();
    for ra in &bundle.rule_actions {
        if !rule_ids.contains(ra.rule_id.as_str()) {
            problems.push(format!(
                "binding {}#{} references missing rule '{}'",
                ra.rule_id, ra.sequence_order, ra.rule_id
            ));
        }
        if !sequences.insert((ra.rule_id.as_str(), ra.sequence_order)) {
            problems.push(format!(
                "rule '{}' has two bindings at sequence {}",
                ra.rule_id, ra.sequence_order
            ));
        }
        match actions.get(ra.action_id.as_str()) {
            None => problems.push(format!(
                "binding {}#{} references missing action '{}'",
                ra.rule_id, ra.sequence_order, ra.action_id
            )),
            Some(action) => {
                for key in ra.parameter_mapping.keys() {
                    if action.param(key).is_none() {
                        problems.push(format!(
                            "binding {}#{} maps undeclared parameter '{key}' of action '{}'",
                            ra.rule_id, ra.sequence_order, ra.action_id
                        ));
                    }
                }
            }
        }
    }

    for (i, edge) in bundle.flow_edges.iter().enumerate() {
        let n = i + 1;
        if edge.from_rule != ENTRY_RULE && !rule_ids.contains(edge.from_rule.as_str()) {
            problems.push(format!(
                "flow edge {n} starts at missing rule '{}'",
                edge.from_rule
            ));
        }
        if !rule_ids.contains(edge.to_rule.as_str()) {
            problems.push(format!(
                "flow edge {n} points to missing rule '{}'",
                edge.to_rule
            ));
        }
        if edge.condition_key.is_none() && edge.condition_value.is_some() {
            problems.push(format!("flow edge {n} has a condition value but no key"));
        }
    }

    if let Some(fallback) = &bundle.fallback_rule {
        if !rule_ids.contains(fallback.as_str()) {
            problems.push(format!("fallback rule '{fallback}' does not exist"));
        }
    }

    for rule_id in bundle.guidance.keys() {
        if !rule_ids.contains(rule_id.as_str()) {
            problems.push(format!("guidance given for missing rule '{rule_id}'"));
        }
    }

    problems
}

// ---------------------------------------------------------------------------
// LoadReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub version: u32,
    pub rules: usize,
    pub actions: usize,
    pub bindings: usize,
    pub edges: usize,
    pub migrations_applied: Vec<u32>,
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

pub struct Loader {
    path: PathBuf,
}

impl Loader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_config(root: &Path, config: &EngineConfig) -> Self {
        Self::new(config.rule_store_path(root))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bring the store schema up to date without touching its contents.
    pub fn migrate(&self) -> Result<Vec<u32>> {
        let mut writer = RuleStoreWriter::open(&self.path)?;
        writer.migrate()
    }

    pub fn load_file(&self, bundle_path: &Path) -> Result<LoadReport> {
        let bundle = Bundle::from_path(bundle_path)?;
        self.load(&bundle)
    }

    /// Validate `bundle` and, if it is sound, make it the active rule set.
    pub fn load(&self, bundle: &Bundle) -> Result<LoadReport> {
        let problems = validate(bundle);
        if !problems.is_empty() {
            return Err(DirectiveError::ConfigIntegrity { problems });
        }

        let mut writer = RuleStoreWriter::open(&self.path)?;
        let migrations_applied = writer.migrate()?;

        if let Some(active) = writer.active_version()? {
            if bundle.version < active {
                return Err(DirectiveError::StaleBundle {
                    incoming: bundle.version,
                    active,
                });
            }
        }

        let mut bundle = bundle.clone();
        bundle.number_edges();
        writer.replace(&bundle)?;

        let catalog = Catalog::from_bundle(&bundle);
        let report = LoadReport {
            version: bundle.version,
            rules: bundle.rules.len(),
            actions: bundle.actions.len(),
            bindings: bundle.rule_actions.len(),
            edges: catalog.edges().len(),
            migrations_applied,
        };
        info!(
            version = report.version,
            rules = report.rules,
            edges = report.edges,
            "rule bundle activated"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// RuleStoreWriter
// ---------------------------------------------------------------------------

/// Write access to the rule-configuration store. Private to the loader.
struct RuleStoreWriter {
    conn: Connection,
}

impl RuleStoreWriter {
    fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        // Rollback journal rather than WAL so read-only handles need no
        // shared-memory file.
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        Ok(Self { conn })
    }

    fn migrate(&mut self) -> Result<Vec<u32>> {
        migrations::apply(&mut self.conn, migrations::RULE_STORE)
    }

    fn active_version(&self) -> Result<Option<u32>> {
        let value: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'bundle_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    fn replace(&mut self, bundle: &Bundle) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM guidance;
             DELETE FROM rule_actions;
             DELETE FROM flow_edges;
             DELETE FROM actions;
             DELETE FROM rules;
             DELETE FROM meta;",
        )?;

        tx.execute(
            "INSERT INTO meta (key, value) VALUES ('bundle_version', ?1)",
            params![bundle.version.to_string()],
        )?;
        tx.execute(
            "INSERT INTO meta (key, value) VALUES ('bundle_name', ?1)",
            params![bundle.name],
        )?;
        if let Some(fallback) = &bundle.fallback_rule {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES ('fallback_rule', ?1)",
                params![fallback],
            )?;
        }

        for rule in &bundle.rules {
            tx.execute(
                "INSERT INTO rules (id, name, category, level, parent, workflow, priority)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    rule.id,
                    rule.name,
                    rule.category,
                    rule.level,
                    rule.parent,
                    to_json(&rule.workflow)?,
                    rule.priority
                ],
            )?;
        }

        for action in &bundle.actions {
            tx.execute(
                "INSERT INTO actions (id, name, params, pure, is_tool, is_sub_action, target)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    action.id,
                    action.name,
                    to_json(&action.params)?,
                    action.pure,
                    action.is_tool,
                    action.is_sub_action,
                    action.target
                ],
            )?;
        }

        for ra in &bundle.rule_actions {
            tx.execute(
                "INSERT INTO rule_actions
                 (rule_id, action_id, sequence_order, is_required, parameter_mapping, execution_context)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    ra.rule_id,
                    ra.action_id,
                    ra.sequence_order,
                    ra.is_required,
                    to_json(&ra.parameter_mapping)?,
                    ra.execution_context
                ],
            )?;
        }

        for edge in &bundle.flow_edges {
            let condition_value = match &edge.condition_value {
                Some(v) => Some(to_json(v)?),
                None => None,
            };
            tx.execute(
                "INSERT INTO flow_edges
                 (id, from_rule, to_rule, condition_key, condition_value, priority, flow_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    edge.id,
                    edge.from_rule,
                    edge.to_rule,
                    edge.condition_key,
                    condition_value,
                    edge.priority,
                    edge.flow_type
                ],
            )?;
        }

        for (rule_id, lines) in &bundle.guidance {
            for (seq, text) in lines.iter().enumerate() {
                tx.execute(
                    "INSERT INTO guidance (rule_id, seq, text) VALUES (?1, ?2, ?3)",
                    params![rule_id, seq as i64, text],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule_store::RuleStore;
    use tempfile::TempDir;

    const VALID: &str = r#"
version: 2
fallback_rule: status
rules:
  - { id: status, name: Status }
  - { id: init, name: Init, parent: status }
actions:
  - id: init_project
    name: init_project
    params:
      - { name: name, required: true }
rule_actions:
  - rule_id: init
    action_id: init_project
    sequence_order: 1
    parameter_mapping: { name: $ctx.project_name }
flow_edges:
  - { from_rule: "@entry", to_rule: init, condition_key: project_initialized, condition_value: false }
  - { from_rule: init, to_rule: status, flow_type: completion_loop }
guidance:
  init:
    - Describe the project goals next.
"#;

    fn valid() -> Bundle {
        Bundle::from_yaml_str(VALID).unwrap()
    }

    #[test]
    fn valid_bundle_has_no_problems() {
        assert!(validate(&valid()).is_empty());
    }

    #[test]
    fn dangling_edge_fails_then_fixed_bundle_loads() {
        let dir = TempDir::new().unwrap();
        let loader = Loader::new(dir.path().join("rules.db"));

        let mut broken = valid();
        broken.flow_edges[1].to_rule = "ghost".to_string();
        match loader.load(&broken) {
            Err(DirectiveError::ConfigIntegrity { problems }) => {
                assert_eq!(problems.len(), 1);
                assert!(problems[0].contains("ghost"));
            }
            other => panic!("expected ConfigIntegrity, got {other:?}"),
        }
        assert!(!loader.path().exists(), "nothing may be written on failure");

        let report = loader.load(&valid()).unwrap();
        assert_eq!(report.edges, 2);
        assert_eq!(report.migrations_applied, vec![1, 2]);
    }

    #[test]
    fn failed_reload_keeps_previous_bundle_active() {
        let dir = TempDir::new().unwrap();
        let loader = Loader::new(dir.path().join("rules.db"));
        loader.load(&valid()).unwrap();

        let mut broken = valid();
        broken.version = 3;
        broken.rule_actions[0].action_id = "missing".to_string();
        assert!(loader.load(&broken).is_err());

        let store = RuleStore::open(loader.path()).unwrap();
        assert_eq!(store.catalog().version(), 2);
        assert_eq!(store.catalog().bindings("init").len(), 1);
    }

    #[test]
    fn reports_every_dangling_reference() {
        let mut bundle = valid();
        bundle.rules[1].parent = Some("nobody".into());
        bundle.fallback_rule = Some("nowhere".into());
        bundle.flow_edges[0].from_rule = "elsewhere".into();
        let problems = validate(&bundle);
        assert_eq!(problems.len(), 3, "{problems:?}");
    }

    #[test]
    fn duplicate_sequence_rejected() {
        let mut bundle = valid();
        let dup = bundle.rule_actions[0].clone();
        bundle.rule_actions.push(dup);
        let problems = validate(&bundle);
        assert!(problems.iter().any(|p| p.contains("two bindings")));
    }

    #[test]
    fn undeclared_mapping_key_rejected() {
        let mut bundle = valid();
        bundle.rule_actions[0]
            .parameter_mapping
            .insert("colour".into(), serde_json::json!("blue"));
        let problems = validate(&bundle);
        assert!(problems.iter().any(|p| p.contains("undeclared parameter 'colour'")));
    }

    #[test]
    fn effectful_rule_config_action_rejected() {
        let mut bundle = valid();
        bundle.actions[0].target = StoreTarget::RuleConfig;
        assert_eq!(validate(&bundle).len(), 1);
        bundle.actions[0].pure = true;
        assert!(validate(&bundle).is_empty());
    }

    #[test]
    fn stale_bundle_version_rejected() {
        let dir = TempDir::new().unwrap();
        let loader = Loader::new(dir.path().join("rules.db"));
        loader.load(&valid()).unwrap();

        let mut older = valid();
        older.version = 1;
        assert!(matches!(
            loader.load(&older),
            Err(DirectiveError::StaleBundle {
                incoming: 1,
                active: 2
            })
        ));

        // Same version reloads.
        let report = loader.load(&valid()).unwrap();
        assert!(report.migrations_applied.is_empty());
    }

    #[test]
    fn loaded_store_round_trips_records() {
        let dir = TempDir::new().unwrap();
        let loader = Loader::new(dir.path().join("rules.db"));
        loader.load(&valid()).unwrap();

        let store = RuleStore::open(loader.path()).unwrap();
        let catalog = store.catalog();
        assert_eq!(catalog.fallback_rule().unwrap().id, "status");
        assert_eq!(catalog.rule("init").unwrap().parent.as_deref(), Some("status"));
        let edge = &catalog.edges()[0];
        assert_eq!(edge.id, 1);
        assert_eq!(
            edge.condition_value,
            Some(crate::types::StateValue::Bool(false))
        );
        assert_eq!(
            store.guidance("init").unwrap(),
            vec!["Describe the project goals next."]
        );
        assert!(store.guidance("status").unwrap().is_empty());
    }

    #[test]
    fn migrate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let loader = Loader::new(dir.path().join("rules.db"));
        assert_eq!(loader.migrate().unwrap(), vec![1, 2]);
        assert!(loader.migrate().unwrap().is_empty());
    }
}
