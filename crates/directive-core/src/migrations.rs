//! Sequential, idempotent schema migrations for the SQLite stores.
//!
//! Each store owns an ordered list of [`Migration`]s. Applied versions are
//! recorded in `schema_migrations`; the highest recorded version is the
//! store's version marker. Re-running [`apply`] is a no-op once every
//! migration is recorded.

use crate::error::{DirectiveError, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;

pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Version marker of the store behind `conn` (0 for a fresh store).
pub fn current_version(conn: &Connection) -> Result<u32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations')",
        [],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(0);
    }
    let version: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })?;
    Ok(version.unwrap_or(0))
}

pub fn latest(migrations: &[Migration]) -> u32 {
    migrations.last().map(|m| m.version).unwrap_or(0)
}

/// Apply every migration newer than the store's marker, in order, each in
/// its own transaction. Returns the versions applied by this call.
pub fn apply(conn: &mut Connection, migrations: &[Migration]) -> Result<Vec<u32>> {
    check_order(migrations)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )?;

    let current = current_version(conn)?;
    let mut applied = Vec::new();
    for migration in migrations.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, Utc::now()],
        )?;
        tx.commit()?;
        info!(
            version = migration.version,
            name = migration.name,
            "applied migration"
        );
        applied.push(migration.version);
    }
    Ok(applied)
}

fn check_order(migrations: &[Migration]) -> Result<()> {
    for pair in migrations.windows(2) {
        if pair[1].version <= pair[0].version {
            return Err(DirectiveError::MigrationOrder(format!(
                "v{} ({}) follows v{} ({})",
                pair[1].version, pair[1].name, pair[0].version, pair[0].name
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Rule-configuration store
// ---------------------------------------------------------------------------

pub const RULE_STORE: &[Migration] = &[
    Migration {
        version: 1,
        name: "rules_actions_edges",
        sql: "
CREATE TABLE meta (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
CREATE TABLE rules (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    category TEXT NOT NULL,
    level INTEGER NOT NULL,
    parent TEXT,
    workflow TEXT NOT NULL,
    priority INTEGER NOT NULL
);
CREATE TABLE actions (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    params TEXT NOT NULL,
    pure INTEGER NOT NULL,
    is_tool INTEGER NOT NULL,
    is_sub_action INTEGER NOT NULL,
    target TEXT NOT NULL
);
CREATE TABLE rule_actions (
    rule_id TEXT NOT NULL REFERENCES rules(id),
    action_id TEXT NOT NULL REFERENCES actions(id),
    sequence_order INTEGER NOT NULL,
    is_required INTEGER NOT NULL,
    parameter_mapping TEXT NOT NULL,
    execution_context TEXT,
    PRIMARY KEY (rule_id, sequence_order)
);
CREATE TABLE flow_edges (
    id INTEGER PRIMARY KEY NOT NULL,
    from_rule TEXT NOT NULL,
    to_rule TEXT NOT NULL REFERENCES rules(id),
    condition_key TEXT,
    condition_value TEXT,
    priority INTEGER NOT NULL,
    flow_type TEXT NOT NULL
);
CREATE INDEX idx_flow_edges_from ON flow_edges(from_rule);
",
    },
    Migration {
        version: 2,
        name: "rule_guidance",
        sql: "
CREATE TABLE guidance (
    rule_id TEXT NOT NULL REFERENCES rules(id),
    seq INTEGER NOT NULL,
    text TEXT NOT NULL,
    PRIMARY KEY (rule_id, seq)
);
",
    },
];

// ---------------------------------------------------------------------------
// Project state store
// ---------------------------------------------------------------------------

pub const PROJECT_STORE: &[Migration] = &[
    Migration {
        version: 1,
        name: "completion_hierarchy",
        sql: "
CREATE TABLE projects (
    branch TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    phase TEXT NOT NULL,
    flags TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE stages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    branch TEXT NOT NULL,
    name TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE milestones (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    branch TEXT NOT NULL,
    stage_id INTEGER NOT NULL REFERENCES stages(id),
    name TEXT NOT NULL,
    ordinal INTEGER NOT NULL,
    status TEXT NOT NULL,
    theme TEXT,
    scope TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    branch TEXT NOT NULL,
    milestone_id INTEGER NOT NULL REFERENCES milestones(id),
    name TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE subtasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    branch TEXT NOT NULL,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE TABLE items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    branch TEXT NOT NULL,
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    subtask_id INTEGER REFERENCES subtasks(id),
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX idx_milestones_stage ON milestones(branch, stage_id, ordinal);
CREATE INDEX idx_tasks_milestone ON tasks(branch, milestone_id, status);
CREATE INDEX idx_items_task ON items(branch, task_id);
",
    },
    Migration {
        version: 2,
        name: "code_entities_and_changelog",
        sql: "
CREATE TABLE code_entities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    branch TEXT NOT NULL,
    kind TEXT NOT NULL,
    name TEXT,
    provisional INTEGER NOT NULL,
    attrs TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX idx_code_entities_kind ON code_entities(branch, kind);
CREATE TABLE changelog (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    branch TEXT NOT NULL,
    entity_kind TEXT NOT NULL,
    entity_id INTEGER NOT NULL,
    entity_key TEXT NOT NULL,
    op TEXT NOT NULL,
    fields TEXT NOT NULL,
    pure INTEGER,
    at TEXT NOT NULL
);
CREATE INDEX idx_changelog_branch ON changelog(branch, seq);
",
    },
    Migration {
        version: 3,
        name: "applied_theme_revision",
        sql: "ALTER TABLE projects ADD COLUMN theme_revision INTEGER NOT NULL DEFAULT 0;",
    },
];

// ---------------------------------------------------------------------------
// Extension store
// ---------------------------------------------------------------------------

pub const EXTENSION_STORE: &[Migration] = &[
    Migration {
        version: 1,
        name: "extension_rules",
        sql: "
CREATE TABLE ext_rules (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    category TEXT NOT NULL,
    workflow TEXT NOT NULL,
    priority INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE ext_actions (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    params TEXT NOT NULL,
    pure INTEGER NOT NULL,
    status TEXT NOT NULL,
    status_changed_at TEXT NOT NULL
);
CREATE TABLE ext_rule_actions (
    rule_id TEXT NOT NULL REFERENCES ext_rules(id),
    action_id TEXT NOT NULL REFERENCES ext_actions(id),
    sequence_order INTEGER NOT NULL,
    is_required INTEGER NOT NULL,
    parameter_mapping TEXT NOT NULL,
    PRIMARY KEY (rule_id, sequence_order)
);
CREATE TABLE ext_flow_edges (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_rule TEXT NOT NULL,
    to_rule TEXT NOT NULL REFERENCES ext_rules(id),
    condition_key TEXT,
    condition_value TEXT,
    priority INTEGER NOT NULL,
    flow_type TEXT NOT NULL
);
",
    },
    Migration {
        version: 2,
        name: "extension_themes",
        sql: "
CREATE TABLE ext_themes (
    name TEXT PRIMARY KEY NOT NULL,
    flows TEXT NOT NULL
);
CREATE TABLE ext_meta (
    key TEXT PRIMARY KEY NOT NULL,
    value INTEGER NOT NULL
);
",
    },
];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
