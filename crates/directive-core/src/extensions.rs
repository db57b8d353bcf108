//! User-authored extensions: rules, actions, bindings and flow edges kept
//! apart from the rule-configuration store, with a per-action lifecycle.
//!
//! Only `active` actions take part in the extension flow catalog. The store
//! also tracks the set of organisational themes; recording a changed set
//! yields a [`ThemeSignal`] for progression to re-evaluate scope against.

use crate::error::{DirectiveError, Result};
use crate::migrations;
use crate::model::{Action, FlowEdge, ParamSpec, Rule, RuleAction, Workflow};
use crate::paths;
use crate::resolver::ENTRY_RULE;
use crate::rule_store::Catalog;
use crate::sqlite::{self, json_col, to_json};
use crate::types::{text_enum, StoreTarget};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

// ---------------------------------------------------------------------------
// LifecycleStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Draft,
    Generated,
    Tested,
    Approved,
    Active,
    Deprecated,
}

text_enum!(LifecycleStatus, "lifecycle status", {
    Draft => "draft",
    Generated => "generated",
    Tested => "tested",
    Approved => "approved",
    Active => "active",
    Deprecated => "deprecated",
});

impl LifecycleStatus {
    /// Forward-only, skipping allowed. `deprecated` is reachable from any
    /// other status and is terminal.
    pub fn can_transition_to(self, target: LifecycleStatus) -> Result<()> {
        let reason = if self == LifecycleStatus::Deprecated {
            "deprecated is terminal"
        } else if target == LifecycleStatus::Deprecated {
            return Ok(());
        } else if target <= self {
            "transitions are forward-only"
        } else {
            return Ok(());
        };
        Err(DirectiveError::InvalidTransition {
            from: self.to_string(),
            to: target.to_string(),
            reason: reason.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionAction {
    pub id: String,
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub pure: bool,
    pub status: LifecycleStatus,
    pub status_changed_at: DateTime<Utc>,
}

impl ExtensionAction {
    fn as_action(&self) -> Action {
        Action {
            id: self.id.clone(),
            name: self.name.clone(),
            params: self.params.clone(),
            pure: self.pure,
            is_tool: true,
            is_sub_action: false,
            target: StoreTarget::Project,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    #[serde(default)]
    pub flows: Vec<String>,
}

/// An extension-store change requested by a handler. Rule runs queue these
/// and apply them only after the project transaction commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "write", rename_all = "snake_case")]
pub enum ExtensionWrite {
    Advance {
        action_id: String,
        status: LifecycleStatus,
    },
}

/// Emitted when the recorded theme set changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeSignal {
    pub revision: u32,
    pub themes: Vec<Theme>,
}

fn action_row(row: &Row<'_>) -> rusqlite::Result<ExtensionAction> {
    Ok(ExtensionAction {
        id: row.get(0)?,
        name: row.get(1)?,
        params: json_col(row, 2)?,
        pure: row.get(3)?,
        status: row.get(4)?,
        status_changed_at: row.get(5)?,
    })
}

fn edge_row(row: &Row<'_>) -> rusqlite::Result<FlowEdge> {
    let value: Option<String> = row.get(4)?;
    let condition_value = match value {
        Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
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
}

// ---------------------------------------------------------------------------
// ExtensionStore
// ---------------------------------------------------------------------------

pub struct ExtensionStore {
    conn: Connection,
}

impl ExtensionStore {
    pub fn open(path: &Path) -> Result<Self> {
        let mut conn = sqlite::open_read_write(path)?;
        migrations::apply(&mut conn, migrations::EXTENSION_STORE)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut conn = sqlite::open_in_memory()?;
        migrations::apply(&mut conn, migrations::EXTENSION_STORE)?;
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    pub fn add_rule(&self, rule: &Rule) -> Result<()> {
        paths::validate_id(&rule.id)?;
        self.conn.execute(
            "INSERT INTO ext_rules (id, name, category, workflow, priority, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                rule.id,
                rule.name,
                rule.category,
                to_json(&rule.workflow)?,
                rule.priority,
                Utc::now()
            ],
        )?;
        Ok(())
    }

    pub fn rules(&self) -> Result<Vec<Rule>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, category, workflow, priority FROM ext_rules ORDER BY id")?;
        let rules = stmt
            .query_map([], |row| {
                let workflow: Workflow = json_col(row, 3)?;
                Ok(Rule {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    category: row.get(2)?,
                    level: 0,
                    parent: None,
                    workflow,
                    priority: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rules)
    }

    fn has_rule(&self, id: &str) -> Result<bool> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM ext_rules WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?)
    }

    // -----------------------------------------------------------------------
    // Actions and lifecycle
    // -----------------------------------------------------------------------

    /// Register an action. New actions start as `draft`.
    pub fn add_action(&self, action: &Action) -> Result<ExtensionAction> {
        paths::validate_id(&action.id)?;
        if action.target == StoreTarget::RuleConfig && !action.pure {
            return Err(DirectiveError::ConfigIntegrity {
                problems: vec![format!(
                    "extension action '{}' writes to the rule-configuration store",
                    action.id
                )],
            });
        }
        self.conn.execute(
            "INSERT INTO ext_actions (id, name, params, pure, status, status_changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                action.id,
                action.name,
                to_json(&action.params)?,
                action.pure,
                LifecycleStatus::Draft,
                Utc::now()
            ],
        )?;
        self.action(&action.id)
    }

    pub fn action(&self, id: &str) -> Result<ExtensionAction> {
        self.conn
            .query_row(
                "SELECT id, name, params, pure, status, status_changed_at
                 FROM ext_actions WHERE id = ?1",
                params![id],
                action_row,
            )
            .optional()?
            .ok_or_else(|| DirectiveError::ActionNotFound(id.to_string()))
    }

    pub fn actions(&self) -> Result<Vec<ExtensionAction>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, params, pure, status, status_changed_at FROM ext_actions ORDER BY id",
        )?;
        let actions = stmt
            .query_map([], action_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(actions)
    }

    pub fn advance(&self, id: &str, target: LifecycleStatus) -> Result<ExtensionAction> {
        let action = self.action(id)?;
        action.status.can_transition_to(target)?;
        self.conn.execute(
            "UPDATE ext_actions SET status = ?1, status_changed_at = ?2 WHERE id = ?3",
            params![target, Utc::now(), id],
        )?;
        info!(action = id, from = %action.status, to = %target, "extension lifecycle");
        self.action(id)
    }

    pub fn deprecate(&self, id: &str) -> Result<ExtensionAction> {
        self.advance(id, LifecycleStatus::Deprecated)
    }

    /// Apply writes queued during a rule run, all or none.
    pub fn apply(&self, writes: &[ExtensionWrite]) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let tx = self.conn.unchecked_transaction()?;
        for write in writes {
            match write {
                ExtensionWrite::Advance { action_id, status } => {
                    self.advance(action_id, *status)?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bindings and edges
    // -----------------------------------------------------------------------

    pub fn link(&self, binding: &RuleAction) -> Result<()> {
        let mut problems = Vec::new();
        if !self.has_rule(&binding.rule_id)? {
            problems.push(format!("missing extension rule '{}'", binding.rule_id));
        }
        match self.action(&binding.action_id) {
            Ok(action) => {
                for key in binding.parameter_mapping.keys() {
                    if !action.params.iter().any(|p| &p.name == key) {
                        problems.push(format!(
                            "undeclared parameter '{key}' of action '{}'",
                            action.id
                        ));
                    }
                }
            }
            Err(DirectiveError::ActionNotFound(id)) => {
                problems.push(format!("missing extension action '{id}'"))
            }
            Err(e) => return Err(e),
        }
        if !problems.is_empty() {
            return Err(DirectiveError::ConfigIntegrity { problems });
        }
        self.conn.execute(
            "INSERT INTO ext_rule_actions
             (rule_id, action_id, sequence_order, is_required, parameter_mapping)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                binding.rule_id,
                binding.action_id,
                binding.sequence_order,
                binding.is_required,
                to_json(&binding.parameter_mapping)?
            ],
        )?;
        Ok(())
    }

    fn bindings(&self) -> Result<Vec<RuleAction>> {
        let mut stmt = self.conn.prepare(
            "SELECT rule_id, action_id, sequence_order, is_required, parameter_mapping
             FROM ext_rule_actions",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(RuleAction {
                    rule_id: row.get(0)?,
                    action_id: row.get(1)?,
                    sequence_order: row.get(2)?,
                    is_required: row.get(3)?,
                    parameter_mapping: json_col(row, 4)?,
                    execution_context: None,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Add a flow edge; returns its id. Both endpoints must be extension
    /// rules, except that `from_rule` may be the entry pseudo-rule.
    pub fn add_edge(&self, edge: &FlowEdge) -> Result<u32> {
        let mut problems = Vec::new();
        if edge.from_rule != ENTRY_RULE && !self.has_rule(&edge.from_rule)? {
            problems.push(format!("edge starts at missing rule '{}'", edge.from_rule));
        }
        if !self.has_rule(&edge.to_rule)? {
            problems.push(format!("edge points to missing rule '{}'", edge.to_rule));
        }
        if !problems.is_empty() {
            return Err(DirectiveError::ConfigIntegrity { problems });
        }
        let condition_value = match &edge.condition_value {
            Some(v) => Some(to_json(v)?),
            None => None,
        };
        self.conn.execute(
            "INSERT INTO ext_flow_edges
             (from_rule, to_rule, condition_key, condition_value, priority, flow_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                edge.from_rule,
                edge.to_rule,
                edge.condition_key,
                condition_value,
                edge.priority,
                edge.flow_type
            ],
        )?;
        Ok(self.conn.last_insert_rowid() as u32)
    }

    pub fn edges(&self) -> Result<Vec<FlowEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, from_rule, to_rule, condition_key, condition_value, priority, flow_type
             FROM ext_flow_edges ORDER BY id",
        )?;
        let edges = stmt
            .query_map([], edge_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    /// Extension rules and edges indexed for resolution. Bindings to actions
    /// that are not `active` are left out.
    pub fn flow_catalog(&self) -> Result<Catalog> {
        let active: BTreeMap<String, Action> = self
            .actions()?
            .into_iter()
            .filter(|a| a.status == LifecycleStatus::Active)
            .map(|a| (a.id.clone(), a.as_action()))
            .collect();
        let bindings = self
            .bindings()?
            .into_iter()
            .filter(|b| active.contains_key(&b.action_id))
            .collect();
        Ok(Catalog::new(
            0,
            None,
            self.rules()?,
            active.into_values().collect(),
            bindings,
            self.edges()?,
        ))
    }

    // -----------------------------------------------------------------------
    // Themes
    // -----------------------------------------------------------------------

    pub fn themes(&self) -> Result<Vec<Theme>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, flows FROM ext_themes ORDER BY name")?;
        let themes = stmt
            .query_map([], |row| {
                Ok(Theme {
                    name: row.get(0)?,
                    flows: json_col(row, 1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(themes)
    }

    pub fn theme_revision(&self) -> Result<u32> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM ext_meta WHERE key = 'theme_revision'",
                [],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0))
    }

    /// Replace the recorded theme set. Returns a signal only when the set
    /// actually changed.
    pub fn record_themes(&mut self, mut themes: Vec<Theme>) -> Result<Option<ThemeSignal>> {
        themes.sort_by(|a, b| a.name.cmp(&b.name));
        themes.dedup_by(|a, b| a.name == b.name);
        if self.themes()? == themes {
            return Ok(None);
        }

        let revision = self.theme_revision()? + 1;
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM ext_themes", [])?;
        for theme in &themes {
            tx.execute(
                "INSERT INTO ext_themes (name, flows) VALUES (?1, ?2)",
                params![theme.name, to_json(&theme.flows)?],
            )?;
        }
        tx.execute(
            "INSERT INTO ext_meta (key, value) VALUES ('theme_revision', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![revision],
        )?;
        tx.commit()?;

        info!(revision, themes = themes.len(), "theme set changed");
        Ok(Some(ThemeSignal { revision, themes }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
