//! Kind-agnostic CRUD over project entities.
//!
//! Records travel as JSON field maps so actions can address any entity
//! kind through one surface. Status updates are routed to the specialised
//! setters, so the hierarchy invariants hold no matter which surface the
//! caller uses.

use super::changelog::{entity_key, ChangeOp};
use super::StateOps;
use crate::error::{DirectiveError, Result};
use crate::types::{EntityKind, Status};
use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub kind: EntityKind,
    pub id: i64,
    pub fields: Map<String, Value>,
}

impl Record {
    fn from_entity(kind: EntityKind, id: i64, entity: impl Serialize) -> Result<Self> {
        let fields = match serde_json::to_value(entity)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(Record { kind, id, fields })
    }
}

fn table(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Stage => "stages",
        EntityKind::Milestone => "milestones",
        EntityKind::Task => "tasks",
        EntityKind::Subtask | EntityKind::Sidequest => "subtasks",
        EntityKind::Item => "items",
        EntityKind::File | EntityKind::Function | EntityKind::Type | EntityKind::Interaction => {
            "code_entities"
        }
    }
}

fn field_error(kind: EntityKind, field: &str) -> DirectiveError {
    DirectiveError::invalid("record field", format!("{kind}.{field}"))
}

fn req_str<'f>(kind: EntityKind, fields: &'f Map<String, Value>, name: &str) -> Result<&'f str> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| field_error(kind, name))
}

fn req_i64(kind: EntityKind, fields: &Map<String, Value>, name: &str) -> Result<i64> {
    fields
        .get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| field_error(kind, name))
}

fn opt_i64(kind: EntityKind, fields: &Map<String, Value>, name: &str) -> Result<Option<i64>> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| field_error(kind, name)),
    }
}

fn str_list(kind: EntityKind, fields: &Map<String, Value>, name: &str) -> Result<Vec<String>> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(values)) => values
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| field_error(kind, name))
            })
            .collect(),
        Some(_) => Err(field_error(kind, name)),
    }
}

impl<'c> StateOps<'c> {
    pub fn get(&self, kind: EntityKind, id: i64) -> Result<Record> {
        match kind {
            EntityKind::Stage => Record::from_entity(kind, id, self.stage(id)?),
            EntityKind::Milestone => Record::from_entity(kind, id, self.milestone(id)?),
            EntityKind::Task => Record::from_entity(kind, id, self.task(id)?),
            EntityKind::Subtask | EntityKind::Sidequest => {
                let subtask = self.subtask(id)?;
                if subtask.kind != kind {
                    return Err(DirectiveError::NotFound {
                        kind: kind.as_str(),
                        id,
                    });
                }
                Record::from_entity(kind, id, subtask)
            }
            EntityKind::Item => Record::from_entity(kind, id, self.item(id)?),
            _ => {
                let entity = self.code_entity(id)?;
                if entity.kind != kind {
                    return Err(DirectiveError::NotFound {
                        kind: kind.as_str(),
                        id,
                    });
                }
                Record::from_entity(kind, id, entity)
            }
        }
    }

    /// Create an entity of `kind` from `fields`. Code entities are reserved
    /// and finalized in one step.
    pub fn add(&self, kind: EntityKind, fields: &Map<String, Value>) -> Result<Record> {
        let id = match kind {
            EntityKind::Stage => self.add_stage(req_str(kind, fields, "name")?)?.id,
            EntityKind::Milestone => {
                let theme = fields.get("theme").and_then(Value::as_str);
                self.add_milestone(
                    req_i64(kind, fields, "stage_id")?,
                    req_str(kind, fields, "name")?,
                    &str_list(kind, fields, "scope")?,
                    theme,
                )?
                .id
            }
            EntityKind::Task => {
                self.create_task(
                    req_i64(kind, fields, "milestone_id")?,
                    req_str(kind, fields, "name")?,
                    opt_i64(kind, fields, "priority")?.unwrap_or(0),
                )?
                .id
            }
            EntityKind::Subtask | EntityKind::Sidequest => {
                self.add_subtask(
                    req_i64(kind, fields, "task_id")?,
                    kind,
                    req_str(kind, fields, "name")?,
                    opt_i64(kind, fields, "priority")?.unwrap_or(0),
                )?
                .id
            }
            EntityKind::Item => {
                self.add_item(
                    req_i64(kind, fields, "task_id")?,
                    opt_i64(kind, fields, "subtask_id")?,
                    req_str(kind, fields, "name")?,
                )?
                .id
            }
            _ => {
                let reservation = self.reserve(kind, Map::new())?;
                self.finalize(reservation.id, fields.clone())?.id
            }
        };
        self.get(kind, id)
    }

    /// Apply a partial update. Unknown fields are rejected before anything
    /// is written.
    pub fn update(&self, kind: EntityKind, id: i64, fields: &Map<String, Value>) -> Result<Record> {
        let current = self.get(kind, id)?;
        if kind.is_code_entity() {
            if fields.contains_key("status") {
                return Err(field_error(kind, "status"));
            }
            self.update_code_entity(id, fields.clone())?;
            return self.get(kind, id);
        }

        let allowed: &[&str] = match kind {
            EntityKind::Stage | EntityKind::Item => &["name", "status"],
            EntityKind::Milestone => &["name", "status", "theme", "scope"],
            _ => &["name", "status", "priority"],
        };
        if let Some(bad) = fields.keys().find(|k| !allowed.contains(&k.as_str())) {
            return Err(field_error(kind, bad));
        }

        let key = current
            .fields
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let status: Option<Status> = match fields.get("status") {
            None => None,
            Some(value) => Some(
                value
                    .as_str()
                    .ok_or_else(|| field_error(kind, "status"))?
                    .parse()?,
            ),
        };
        let mut columns: Vec<(&str, Box<dyn rusqlite::ToSql>)> = Vec::new();
        let mut plain = Map::new();
        for (field, value) in fields {
            let column_value: Box<dyn rusqlite::ToSql> = match field.as_str() {
                "status" => continue,
                "name" => Box::new(req_str(kind, fields, "name")?.to_string()),
                "priority" => Box::new(req_i64(kind, fields, "priority")?),
                "theme" => Box::new(value.as_str().map(str::to_string)),
                "scope" => Box::new(crate::sqlite::to_json(&str_list(kind, fields, "scope")?)?),
                other => return Err(field_error(kind, other)),
            };
            columns.push((field.as_str(), column_value));
            plain.insert(field.clone(), value.clone());
        }

        // The status setters check their invariants before writing, so a
        // refused status leaves the plain fields untouched too.
        if let Some(status) = status {
            match kind {
                EntityKind::Stage => {
                    self.set_stage_status(id, status)?;
                }
                EntityKind::Milestone => {
                    self.set_milestone_status(id, status)?;
                }
                EntityKind::Task => {
                    self.set_task_status(id, status)?;
                }
                EntityKind::Subtask | EntityKind::Sidequest => {
                    self.set_subtask_status(id, status)?;
                }
                _ => {
                    self.set_item_status(id, status)?;
                }
            }
        }

        let table = table(kind);
        for (field, column_value) in columns {
            let sql = format!(
                "UPDATE {table} SET {field} = ?1, updated_at = ?2 WHERE id = ?3 AND branch = ?4"
            );
            self.conn
                .execute(&sql, params![column_value, Utc::now(), id, self.branch])?;
        }
        if !plain.is_empty() {
            self.log_change(
                kind,
                id,
                &entity_key(key.as_deref(), id),
                ChangeOp::Update,
                plain,
                true,
            )?;
        }
        self.get(kind, id)
    }

    /// Delete a leaf entity. Entities with children are refused.
    pub fn delete(&self, kind: EntityKind, id: i64) -> Result<()> {
        let current = self.get(kind, id)?;
        if kind.is_code_entity() {
            return self.delete_code_entity(id);
        }
        let children = match kind {
            EntityKind::Stage => self.count_children("milestones", "stage_id", id)?,
            EntityKind::Milestone => self.count_children("tasks", "milestone_id", id)?,
            EntityKind::Task => {
                self.count_children("items", "task_id", id)?
                    + self.count_children("subtasks", "task_id", id)?
            }
            EntityKind::Subtask | EntityKind::Sidequest => {
                self.count_children("items", "subtask_id", id)?
            }
            _ => 0,
        };
        if children > 0 {
            return Err(DirectiveError::StateConsistency(format!(
                "{kind} {id} still has {children} child record(s)"
            )));
        }
        let sql = format!("DELETE FROM {} WHERE id = ?1 AND branch = ?2", table(kind));
        self.conn.execute(&sql, params![id, self.branch])?;
        let key = current.fields.get("name").and_then(Value::as_str);
        self.log_change(
            kind,
            id,
            &entity_key(key, id),
            ChangeOp::Delete,
            Map::new(),
            false,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
