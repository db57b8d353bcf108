//! The completion hierarchy: project → stage → milestone → task →
//! subtask/sidequest → item.
//!
//! Status changes are checked here, not by callers: a node cannot become
//! terminal while any child is open, terminal nodes never reopen, and a
//! milestone holds at most one open task.

use super::changelog::{entity_key, ChangeOp};
use super::StateOps;
use crate::error::{DirectiveError, Result};
use crate::progression::ProgressionState;
use crate::sqlite::{json_col, to_json};
use crate::types::{EntityKind, Status};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub branch: String,
    pub name: String,
    pub status: Status,
    pub phase: ProgressionState,
    pub flags: BTreeMap<String, bool>,
    /// Last theme revision this branch's scope was re-evaluated against.
    #[serde(default)]
    pub theme_revision: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: i64,
    pub name: String,
    pub ordinal: i64,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: i64,
    pub stage_id: i64,
    pub name: String,
    pub ordinal: i64,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    /// Titles of work not yet turned into tasks, in order.
    pub scope: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub milestone_id: i64,
    pub name: String,
    pub priority: i64,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A subtask or sidequest hanging off a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: i64,
    pub task_id: i64,
    pub kind: EntityKind,
    pub name: String,
    pub priority: i64,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub task_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<i64>,
    pub name: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const PROJECT_COLS: &str =
    "branch, name, status, phase, flags, theme_revision, created_at, updated_at";
const STAGE_COLS: &str = "id, name, ordinal, status, created_at, updated_at";
const MILESTONE_COLS: &str =
    "id, stage_id, name, ordinal, status, theme, scope, created_at, updated_at";
const TASK_COLS: &str = "id, milestone_id, name, priority, status, created_at, updated_at";
const SUBTASK_COLS: &str = "id, task_id, kind, name, priority, status, created_at, updated_at";
const ITEM_COLS: &str = "id, task_id, subtask_id, name, status, created_at, updated_at";

fn project_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        branch: row.get(0)?,
        name: row.get(1)?,
        status: row.get(2)?,
        phase: row.get(3)?,
        flags: json_col(row, 4)?,
        theme_revision: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn stage_row(row: &Row<'_>) -> rusqlite::Result<Stage> {
    Ok(Stage {
        id: row.get(0)?,
        name: row.get(1)?,
        ordinal: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn milestone_row(row: &Row<'_>) -> rusqlite::Result<Milestone> {
    Ok(Milestone {
        id: row.get(0)?,
        stage_id: row.get(1)?,
        name: row.get(2)?,
        ordinal: row.get(3)?,
        status: row.get(4)?,
        theme: row.get(5)?,
        scope: json_col(row, 6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn task_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        milestone_id: row.get(1)?,
        name: row.get(2)?,
        priority: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn subtask_row(row: &Row<'_>) -> rusqlite::Result<Subtask> {
    Ok(Subtask {
        id: row.get(0)?,
        task_id: row.get(1)?,
        kind: row.get(2)?,
        name: row.get(3)?,
        priority: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn item_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        task_id: row.get(1)?,
        subtask_id: row.get(2)?,
        name: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub(crate) fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Terminal nodes never reopen or switch between completed and cancelled.
fn check_status_change(kind: EntityKind, from: Status, to: Status) -> Result<()> {
    if from.is_terminal() && from != to {
        return Err(DirectiveError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: format!("{kind} is already {from}"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

impl<'c> StateOps<'c> {
    pub fn project(&self) -> Result<Option<Project>> {
        let sql = format!("SELECT {PROJECT_COLS} FROM projects WHERE branch = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![self.branch], project_row)
            .optional()?)
    }

    pub fn require_project(&self) -> Result<Project> {
        self.project()?.ok_or_else(|| {
            DirectiveError::StateConsistency(format!(
                "no project initialized on branch '{}'",
                self.branch
            ))
        })
    }

    pub(crate) fn create_project(&self, name: &str) -> Result<Project> {
        if self.project()?.is_some() {
            return Err(DirectiveError::StateConsistency(format!(
                "project already initialized on branch '{}'",
                self.branch
            )));
        }
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO projects (branch, name, status, phase, flags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, '{}', ?5, ?5)",
            params![
                self.branch,
                name,
                Status::InProgress,
                ProgressionState::NotInitialized,
                now
            ],
        )?;
        self.require_project()
    }

    pub(crate) fn set_phase(&self, phase: ProgressionState) -> Result<()> {
        self.conn.execute(
            "UPDATE projects SET phase = ?1, updated_at = ?2 WHERE branch = ?3",
            params![phase, Utc::now(), self.branch],
        )?;
        Ok(())
    }

    pub(crate) fn set_theme_revision(&self, revision: u32) -> Result<()> {
        self.conn.execute(
            "UPDATE projects SET theme_revision = ?1, updated_at = ?2 WHERE branch = ?3",
            params![revision, Utc::now(), self.branch],
        )?;
        Ok(())
    }

    pub(crate) fn set_project_status(&self, status: Status) -> Result<()> {
        self.conn.execute(
            "UPDATE projects SET status = ?1, updated_at = ?2 WHERE branch = ?3",
            params![status, Utc::now(), self.branch],
        )?;
        Ok(())
    }

    pub(crate) fn set_flag(&self, key: &str, value: bool) -> Result<()> {
        let mut project = self.require_project()?;
        project.flags.insert(key.to_string(), value);
        self.conn.execute(
            "UPDATE projects SET flags = ?1, updated_at = ?2 WHERE branch = ?3",
            params![to_json(&project.flags)?, Utc::now(), self.branch],
        )?;
        Ok(())
    }

    pub fn flag(&self, key: &str) -> Result<bool> {
        Ok(self
            .project()?
            .and_then(|p| p.flags.get(key).copied())
            .unwrap_or(false))
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    pub fn add_stage(&self, name: &str) -> Result<Stage> {
        let ordinal: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(ordinal), 0) + 1 FROM stages WHERE branch = ?1",
            params![self.branch],
            |row| row.get(0),
        )?;
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO stages (branch, name, ordinal, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![self.branch, name, ordinal, Status::Pending, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.log_change(
            EntityKind::Stage,
            id,
            name,
            ChangeOp::Create,
            object(json!({ "name": name, "ordinal": ordinal })),
            true,
        )?;
        self.stage(id)
    }

    pub fn stage(&self, id: i64) -> Result<Stage> {
        let sql = format!("SELECT {STAGE_COLS} FROM stages WHERE id = ?1 AND branch = ?2");
        self.conn
            .query_row(&sql, params![id, self.branch], stage_row)
            .optional()?
            .ok_or(DirectiveError::NotFound { kind: "stage", id })
    }

    /// Stages in order.
    pub fn stages(&self) -> Result<Vec<Stage>> {
        let sql = format!("SELECT {STAGE_COLS} FROM stages WHERE branch = ?1 ORDER BY ordinal, id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![self.branch], stage_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn set_stage_status(&self, id: i64, status: Status) -> Result<Stage> {
        let stage = self.stage(id)?;
        check_status_change(EntityKind::Stage, stage.status, status)?;
        if status.is_terminal() {
            let open = self.open_children("milestones", "stage_id", id)?;
            if open > 0 {
                return Err(DirectiveError::StateConsistency(format!(
                    "stage {id} has {open} open milestone(s)"
                )));
            }
        }
        self.write_status("stages", EntityKind::Stage, id, &stage.name, stage.status, status)?;
        self.stage(id)
    }

    // -----------------------------------------------------------------------
    // Milestones
    // -----------------------------------------------------------------------

    pub fn add_milestone(
        &self,
        stage_id: i64,
        name: &str,
        scope: &[String],
        theme: Option<&str>,
    ) -> Result<Milestone> {
        let stage = self.stage(stage_id)?;
        if stage.status.is_terminal() {
            return Err(DirectiveError::StateConsistency(format!(
                "stage {stage_id} is {}",
                stage.status
            )));
        }
        let ordinal: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(ordinal), 0) + 1 FROM milestones WHERE branch = ?1 AND stage_id = ?2",
            params![self.branch, stage_id],
            |row| row.get(0),
        )?;
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO milestones
             (branch, stage_id, name, ordinal, status, theme, scope, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                self.branch,
                stage_id,
                name,
                ordinal,
                Status::Pending,
                theme,
                to_json(scope)?,
                now
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.log_change(
            EntityKind::Milestone,
            id,
            name,
            ChangeOp::Create,
            object(json!({
                "stage": stage.name,
                "name": name,
                "theme": theme,
                "scope": scope,
            })),
            true,
        )?;
        self.milestone(id)
    }

    pub fn milestone(&self, id: i64) -> Result<Milestone> {
        let sql =
            format!("SELECT {MILESTONE_COLS} FROM milestones WHERE id = ?1 AND branch = ?2");
        self.conn
            .query_row(&sql, params![id, self.branch], milestone_row)
            .optional()?
            .ok_or(DirectiveError::NotFound {
                kind: "milestone",
                id,
            })
    }

    /// Milestones of a stage in order.
    pub fn milestones(&self, stage_id: i64) -> Result<Vec<Milestone>> {
        let sql = format!(
            "SELECT {MILESTONE_COLS} FROM milestones
             WHERE branch = ?1 AND stage_id = ?2 ORDER BY ordinal, id"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![self.branch, stage_id], milestone_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every milestone on the branch, in stage then milestone order.
    pub fn all_milestones(&self) -> Result<Vec<Milestone>> {
        let sql = format!(
            "SELECT m.{} FROM milestones m JOIN stages s ON s.id = m.stage_id
             WHERE m.branch = ?1 ORDER BY s.ordinal, s.id, m.ordinal, m.id",
            MILESTONE_COLS.replace(", ", ", m.")
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![self.branch], milestone_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn set_milestone_status(&self, id: i64, status: Status) -> Result<Milestone> {
        let milestone = self.milestone(id)?;
        check_status_change(EntityKind::Milestone, milestone.status, status)?;
        if status.is_terminal() {
            let open = self.open_children("tasks", "milestone_id", id)?;
            if open > 0 {
                return Err(DirectiveError::StateConsistency(format!(
                    "milestone {id} has {open} open task(s)"
                )));
            }
        }
        self.write_status(
            "milestones",
            EntityKind::Milestone,
            id,
            &milestone.name,
            milestone.status,
            status,
        )?;
        self.milestone(id)
    }

    /// Take the first remaining-scope entry off a milestone.
    pub fn pop_scope(&self, milestone_id: i64) -> Result<Option<String>> {
        let mut milestone = self.milestone(milestone_id)?;
        if milestone.scope.is_empty() {
            return Ok(None);
        }
        let next = milestone.scope.remove(0);
        self.write_scope(&milestone)?;
        Ok(Some(next))
    }

    pub fn extend_scope(&self, milestone_id: i64, entries: &[String]) -> Result<Milestone> {
        let mut milestone = self.milestone(milestone_id)?;
        milestone.scope.extend(entries.iter().cloned());
        self.write_scope(&milestone)?;
        self.milestone(milestone_id)
    }

    fn write_scope(&self, milestone: &Milestone) -> Result<()> {
        self.conn.execute(
            "UPDATE milestones SET scope = ?1, updated_at = ?2 WHERE id = ?3 AND branch = ?4",
            params![
                to_json(&milestone.scope)?,
                Utc::now(),
                milestone.id,
                self.branch
            ],
        )?;
        self.log_change(
            EntityKind::Milestone,
            milestone.id,
            &milestone.name,
            ChangeOp::Update,
            object(json!({ "scope": milestone.scope })),
            true,
        )
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    /// Create one task under a milestone. Fails with `OpenTaskExists` while
    /// the milestone still has a pending or in-progress task.
    pub fn create_task(&self, milestone_id: i64, name: &str, priority: i64) -> Result<Task> {
        let milestone = self.milestone(milestone_id)?;
        if milestone.status.is_terminal() {
            return Err(DirectiveError::StateConsistency(format!(
                "milestone {milestone_id} is {}",
                milestone.status
            )));
        }
        if let Some(open) = self.open_task(milestone_id)? {
            return Err(DirectiveError::OpenTaskExists {
                milestone: milestone_id,
                task: open.id,
            });
        }
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO tasks (branch, milestone_id, name, priority, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                self.branch,
                milestone_id,
                name,
                priority,
                Status::Pending,
                now
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.log_change(
            EntityKind::Task,
            id,
            name,
            ChangeOp::Create,
            object(json!({
                "milestone": milestone.name,
                "name": name,
                "priority": priority,
            })),
            true,
        )?;
        self.task(id)
    }

    pub fn task(&self, id: i64) -> Result<Task> {
        let sql = format!("SELECT {TASK_COLS} FROM tasks WHERE id = ?1 AND branch = ?2");
        self.conn
            .query_row(&sql, params![id, self.branch], task_row)
            .optional()?
            .ok_or(DirectiveError::NotFound { kind: "task", id })
    }

    pub fn tasks(&self, milestone_id: i64) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLS} FROM tasks WHERE branch = ?1 AND milestone_id = ?2 ORDER BY id"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![self.branch, milestone_id], task_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// The milestone's pending or in-progress task, if any.
    pub fn open_task(&self, milestone_id: i64) -> Result<Option<Task>> {
        let sql = format!(
            "SELECT {TASK_COLS} FROM tasks
             WHERE branch = ?1 AND milestone_id = ?2 AND status IN ('pending', 'in_progress')
             ORDER BY id LIMIT 1"
        );
        Ok(self
            .conn
            .query_row(&sql, params![self.branch, milestone_id], task_row)
            .optional()?)
    }

    /// Pending tasks of a milestone, highest priority first.
    pub fn pending_tasks(&self, milestone_id: i64) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLS} FROM tasks
             WHERE branch = ?1 AND milestone_id = ?2 AND status = 'pending'
             ORDER BY priority DESC, id"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![self.branch, milestone_id], task_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every open task on the branch.
    pub fn open_tasks(&self) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLS} FROM tasks
             WHERE branch = ?1 AND status IN ('pending', 'in_progress') ORDER BY id"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![self.branch], task_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn set_task_status(&self, id: i64, status: Status) -> Result<Task> {
        let task = self.task(id)?;
        check_status_change(EntityKind::Task, task.status, status)?;
        if status.is_terminal() {
            let open = self.open_children("items", "task_id", id)?
                + self.open_children("subtasks", "task_id", id)?;
            if open > 0 {
                return Err(DirectiveError::StateConsistency(format!(
                    "task {id} has {open} open item(s) or subtask(s)"
                )));
            }
        }
        self.write_status("tasks", EntityKind::Task, id, &task.name, task.status, status)?;
        self.task(id)
    }

    // -----------------------------------------------------------------------
    // Subtasks / sidequests
    // -----------------------------------------------------------------------

    pub fn add_subtask(
        &self,
        task_id: i64,
        kind: EntityKind,
        name: &str,
        priority: i64,
    ) -> Result<Subtask> {
        if !matches!(kind, EntityKind::Subtask | EntityKind::Sidequest) {
            return Err(DirectiveError::invalid("subtask kind", kind.as_str()));
        }
        let task = self.open_parent_task(task_id)?;
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO subtasks (branch, task_id, kind, name, priority, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![self.branch, task_id, kind, name, priority, Status::Pending, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.log_change(
            kind,
            id,
            name,
            ChangeOp::Create,
            object(json!({ "task": task.name, "name": name, "priority": priority })),
            true,
        )?;
        self.subtask(id)
    }

    pub fn subtask(&self, id: i64) -> Result<Subtask> {
        let sql = format!("SELECT {SUBTASK_COLS} FROM subtasks WHERE id = ?1 AND branch = ?2");
        self.conn
            .query_row(&sql, params![id, self.branch], subtask_row)
            .optional()?
            .ok_or(DirectiveError::NotFound {
                kind: "subtask",
                id,
            })
    }

    /// Subtasks and sidequests of a task, highest priority first.
    pub fn subtasks(&self, task_id: i64) -> Result<Vec<Subtask>> {
        let sql = format!(
            "SELECT {SUBTASK_COLS} FROM subtasks
             WHERE branch = ?1 AND task_id = ?2 ORDER BY priority DESC, id"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![self.branch, task_id], subtask_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn set_subtask_status(&self, id: i64, status: Status) -> Result<Subtask> {
        let subtask = self.subtask(id)?;
        check_status_change(subtask.kind, subtask.status, status)?;
        if status.is_terminal() {
            let open = self.open_children("items", "subtask_id", id)?;
            if open > 0 {
                return Err(DirectiveError::StateConsistency(format!(
                    "{} {id} has {open} open item(s)",
                    subtask.kind
                )));
            }
        }
        self.write_status(
            "subtasks",
            subtask.kind,
            id,
            &subtask.name,
            subtask.status,
            status,
        )?;
        self.subtask(id)
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    pub fn add_item(&self, task_id: i64, subtask_id: Option<i64>, name: &str) -> Result<Item> {
        let task = self.open_parent_task(task_id)?;
        if let Some(sid) = subtask_id {
            let subtask = self.subtask(sid)?;
            if subtask.task_id != task_id || subtask.status.is_terminal() {
                return Err(DirectiveError::StateConsistency(format!(
                    "{} {sid} cannot take items for task {task_id}",
                    subtask.kind
                )));
            }
        }
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO items (branch, task_id, subtask_id, name, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![self.branch, task_id, subtask_id, name, Status::Pending, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.log_change(
            EntityKind::Item,
            id,
            &entity_key(Some(name), id),
            ChangeOp::Create,
            object(json!({ "task": task.name, "name": name })),
            true,
        )?;
        self.item(id)
    }

    pub fn item(&self, id: i64) -> Result<Item> {
        let sql = format!("SELECT {ITEM_COLS} FROM items WHERE id = ?1 AND branch = ?2");
        self.conn
            .query_row(&sql, params![id, self.branch], item_row)
            .optional()?
            .ok_or(DirectiveError::NotFound { kind: "item", id })
    }

    pub fn items(&self, task_id: i64) -> Result<Vec<Item>> {
        let sql =
            format!("SELECT {ITEM_COLS} FROM items WHERE branch = ?1 AND task_id = ?2 ORDER BY id");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![self.branch, task_id], item_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn set_item_status(&self, id: i64, status: Status) -> Result<Item> {
        let item = self.item(id)?;
        check_status_change(EntityKind::Item, item.status, status)?;
        self.write_status("items", EntityKind::Item, id, &item.name, item.status, status)?;
        self.item(id)
    }

    // -----------------------------------------------------------------------
    // Shared
    // -----------------------------------------------------------------------

    fn open_parent_task(&self, task_id: i64) -> Result<Task> {
        let task = self.task(task_id)?;
        if task.status.is_terminal() {
            return Err(DirectiveError::StateConsistency(format!(
                "task {task_id} is {}",
                task.status
            )));
        }
        Ok(task)
    }

    pub(crate) fn open_children(&self, table: &str, parent_col: &str, parent: i64) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {table}
             WHERE branch = ?1 AND {parent_col} = ?2 AND status IN ('pending', 'in_progress')"
        );
        Ok(self
            .conn
            .query_row(&sql, params![self.branch, parent], |row| row.get(0))?)
    }

    pub(crate) fn count_children(&self, table: &str, parent_col: &str, parent: i64) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE branch = ?1 AND {parent_col} = ?2");
        Ok(self
            .conn
            .query_row(&sql, params![self.branch, parent], |row| row.get(0))?)
    }

    fn write_status(
        &self,
        table: &str,
        kind: EntityKind,
        id: i64,
        name: &str,
        from: Status,
        to: Status,
    ) -> Result<()> {
        if from == to {
            return Ok(());
        }
        let sql = format!("UPDATE {table} SET status = ?1, updated_at = ?2 WHERE id = ?3 AND branch = ?4");
        self.conn
            .execute(&sql, params![to, Utc::now(), id, self.branch])?;
        self.log_change(
            kind,
            id,
            name,
            ChangeOp::Update,
            object(json!({ "status": to })),
            false,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
