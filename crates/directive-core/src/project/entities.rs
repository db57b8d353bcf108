//! Code entities (files, functions, types, interactions) and the
//! reserve → finalize protocol.
//!
//! A reservation allocates a durable id before the entity's details are
//! known. The row carries `provisional = 1` until it is finalized; rows left
//! provisional are reported as orphans.

use super::changelog::{entity_key, ChangeOp};
use super::hierarchy::object;
use super::StateOps;
use crate::error::{DirectiveError, Result};
use crate::sqlite::{json_col, to_json};
use crate::types::{EntityKind, Status, ValidationWarning};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: i64,
    pub kind: EntityKind,
    pub provisional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEntity {
    pub id: i64,
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub provisional: bool,
    pub attrs: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CodeEntity {
    pub fn reservation(&self) -> Reservation {
        Reservation {
            id: self.id,
            kind: self.kind,
            provisional: self.provisional,
        }
    }
}

const ENTITY_COLS: &str = "id, kind, name, provisional, attrs, created_at, updated_at";

fn entity_row(row: &Row<'_>) -> rusqlite::Result<CodeEntity> {
    Ok(CodeEntity {
        id: row.get(0)?,
        kind: row.get(1)?,
        name: row.get(2)?,
        provisional: row.get(3)?,
        attrs: json_col(row, 4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn name_attr(attrs: &Map<String, Value>) -> Option<&str> {
    attrs.get("name").and_then(Value::as_str)
}

impl<'c> StateOps<'c> {
    /// Allocate an id for a code entity whose details come later.
    pub fn reserve(&self, kind: EntityKind, attrs: Map<String, Value>) -> Result<Reservation> {
        if !kind.is_code_entity() {
            return Err(DirectiveError::invalid("code entity kind", kind.as_str()));
        }
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO code_entities (branch, kind, name, provisional, attrs, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?5)",
            params![self.branch, kind, name_attr(&attrs), to_json(&attrs)?, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.log_change(
            kind,
            id,
            &entity_key(name_attr(&attrs), id),
            ChangeOp::Create,
            object(json!({ "provisional": true })),
            false,
        )?;
        Ok(Reservation {
            id,
            kind,
            provisional: true,
        })
    }

    /// Attach durable metadata to a reservation. `attrs` are merged over the
    /// attributes given at reservation time.
    pub fn finalize(&self, id: i64, attrs: Map<String, Value>) -> Result<Reservation> {
        let entity = self.code_entity(id)?;
        if !entity.provisional {
            return Err(DirectiveError::AlreadyFinalized {
                kind: entity.kind,
                id,
            });
        }
        let mut merged = entity.attrs;
        merged.extend(attrs.clone());
        let name = name_attr(&merged).map(str::to_string).or(entity.name);
        self.conn.execute(
            "UPDATE code_entities SET provisional = 0, name = ?1, attrs = ?2, updated_at = ?3
             WHERE id = ?4 AND branch = ?5",
            params![name, to_json(&merged)?, Utc::now(), id, self.branch],
        )?;
        self.log_change(
            entity.kind,
            id,
            &entity_key(name.as_deref(), id),
            ChangeOp::Update,
            attrs,
            true,
        )?;
        Ok(Reservation {
            id,
            kind: entity.kind,
            provisional: false,
        })
    }

    pub fn code_entity(&self, id: i64) -> Result<CodeEntity> {
        let sql =
            format!("SELECT {ENTITY_COLS} FROM code_entities WHERE id = ?1 AND branch = ?2");
        self.conn
            .query_row(&sql, params![id, self.branch], entity_row)
            .optional()?
            .ok_or(DirectiveError::NotFound {
                kind: "code entity",
                id,
            })
    }

    pub fn code_entities(&self, kind: EntityKind) -> Result<Vec<CodeEntity>> {
        let sql = format!(
            "SELECT {ENTITY_COLS} FROM code_entities WHERE branch = ?1 AND kind = ?2 ORDER BY id"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![self.branch, kind], entity_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn provisional_entities(&self) -> Result<Vec<CodeEntity>> {
        self.provisional_since(0)
    }

    /// Reservations with an id above `after` that are still provisional.
    pub fn provisional_since(&self, after: i64) -> Result<Vec<CodeEntity>> {
        let sql = format!(
            "SELECT {ENTITY_COLS} FROM code_entities
             WHERE branch = ?1 AND provisional = 1 AND id > ?2 ORDER BY id"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![self.branch, after], entity_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Highest code-entity id allocated so far in the store.
    pub fn max_code_entity_id(&self) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(id), 0) FROM code_entities",
            [],
            |row| row.get(0),
        )?)
    }

    pub(crate) fn update_code_entity(
        &self,
        id: i64,
        attrs: Map<String, Value>,
    ) -> Result<CodeEntity> {
        let entity = self.code_entity(id)?;
        let mut merged = entity.attrs;
        merged.extend(attrs.clone());
        let name = name_attr(&merged).map(str::to_string).or(entity.name);
        self.conn.execute(
            "UPDATE code_entities SET name = ?1, attrs = ?2, updated_at = ?3
             WHERE id = ?4 AND branch = ?5",
            params![name, to_json(&merged)?, Utc::now(), id, self.branch],
        )?;
        self.log_change(
            entity.kind,
            id,
            &entity_key(name.as_deref(), id),
            ChangeOp::Update,
            attrs,
            true,
        )?;
        self.code_entity(id)
    }

    pub(crate) fn delete_code_entity(&self, id: i64) -> Result<()> {
        let entity = self.code_entity(id)?;
        self.conn.execute(
            "DELETE FROM code_entities WHERE id = ?1 AND branch = ?2",
            params![id, self.branch],
        )?;
        self.log_change(
            entity.kind,
            id,
            &entity_key(entity.name.as_deref(), id),
            ChangeOp::Delete,
            Map::new(),
            false,
        )
    }

    /// Non-fatal findings about the branch's project state.
    pub fn validate(&self) -> Result<Vec<ValidationWarning>> {
        let mut warnings = Vec::new();
        for orphan in self.provisional_entities()? {
            warnings.push(ValidationWarning::warning(format!(
                "{} {} was reserved but never finalized",
                orphan.kind, orphan.id
            )));
        }
        for milestone in self.all_milestones()? {
            if milestone.status == Status::Pending
                && milestone.scope.is_empty()
                && self.count_children("tasks", "milestone_id", milestone.id)? == 0
            {
                warnings.push(ValidationWarning::warning(format!(
                    "milestone '{}' has no tasks and no remaining scope",
                    milestone.name
                )));
            }
        }
        for stage in self.stages()? {
            if stage.status == Status::Completed
                && self.open_children("milestones", "stage_id", stage.id)? > 0
            {
                warnings.push(ValidationWarning::error(format!(
                    "stage '{}' is completed but has open milestones",
                    stage.name
                )));
            }
        }
        Ok(warnings)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::ProjectStore;
    use super::*;

    fn attrs(v: Value) -> Map<String, Value> {
        object(v)
    }

    #[test]
    fn reserve_then_finalize() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        let r = ops.reserve(EntityKind::Function, Map::new()).unwrap();
        assert!(r.provisional);

        let f = ops
            .finalize(r.id, attrs(json!({ "name": "parse", "file": "src/lib.rs" })))
            .unwrap();
        assert_eq!(f.id, r.id);
        assert!(!f.provisional);

        let entity = ops.code_entity(r.id).unwrap();
        assert_eq!(entity.name.as_deref(), Some("parse"));
        assert_eq!(entity.attrs["file"], "src/lib.rs");
        assert_eq!(ops.code_entities(EntityKind::Function).unwrap().len(), 1);
    }

    #[test]
    fn finalize_unknown_id_is_not_found() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        assert!(matches!(
            store.state().finalize(42, Map::new()),
            Err(DirectiveError::NotFound { id: 42, .. })
        ));
    }

    #[test]
    fn double_finalize_rejected() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        let r = ops.reserve(EntityKind::File, Map::new()).unwrap();
        ops.finalize(r.id, Map::new()).unwrap();
        assert!(matches!(
            ops.finalize(r.id, Map::new()),
            Err(DirectiveError::AlreadyFinalized { id, .. }) if id == r.id
        ));
    }

    #[test]
    fn reserve_rejects_hierarchy_kinds() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        assert!(store.state().reserve(EntityKind::Task, Map::new()).is_err());
    }

    #[test]
    fn orphaned_reservations_are_warnings() {
        let store = ProjectStore::open_in_memory("main").unwrap();
        let ops = store.state();
        let before = ops.max_code_entity_id().unwrap();
        let r = ops.reserve(EntityKind::Type, Map::new()).unwrap();

        let orphans = ops.provisional_since(before).unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, r.id);

        let warnings = ops.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("never finalized"));
    }

    #[test]
    fn other_branch_cannot_finalize() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("project.db");
        let a = ProjectStore::open(&path, "a").unwrap();
        let b = ProjectStore::open(&path, "b").unwrap();
        let r = a.state().reserve(EntityKind::File, Map::new()).unwrap();
        assert!(b.state().finalize(r.id, Map::new()).is_err());
        assert!(a.state().finalize(r.id, Map::new()).is_ok());
    }
}
