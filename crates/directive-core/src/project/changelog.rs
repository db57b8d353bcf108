use super::StateOps;
use crate::error::Result;
use crate::sqlite::{json_col, to_json};
use crate::types::{text_enum, EntityKind};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Create,
    Update,
    Delete,
}

text_enum!(ChangeOp, "change op", {
    Create => "create",
    Update => "update",
    Delete => "delete",
});

/// One mutation of project state, as recorded for conflict detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub seq: i64,
    pub branch: String,
    pub kind: EntityKind,
    pub id: i64,
    /// Identity that survives across branches: the entity name, or `#<id>`
    /// for unnamed rows.
    pub key: String,
    pub op: ChangeOp,
    pub fields: Map<String, Value>,
    /// `Some(true)` for plain field writes, `Some(false)` for changes with
    /// side effects beyond the touched fields (status cascades, id
    /// allocation, deletes). `None` when unknown.
    pub pure: Option<bool>,
    pub at: DateTime<Utc>,
}

pub(crate) fn entity_key(name: Option<&str>, id: i64) -> String {
    match name {
        Some(name) => name.to_string(),
        None => format!("#{id}"),
    }
}

impl<'c> StateOps<'c> {
    pub(crate) fn log_change(
        &self,
        kind: EntityKind,
        id: i64,
        key: &str,
        op: ChangeOp,
        fields: Map<String, Value>,
        pure: bool,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO changelog (branch, entity_kind, entity_id, entity_key, op, fields, pure, at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                self.branch,
                kind,
                id,
                key,
                op,
                to_json(&fields)?,
                pure,
                Utc::now()
            ],
        )?;
        Ok(())
    }

    /// Changes on this branch with `seq > since`, oldest first.
    pub fn changes(&self, since: i64) -> Result<Vec<Change>> {
        self.changes_on(self.branch, since)
    }

    /// Changes recorded by another branch sharing this store. Read-only.
    pub fn changes_on(&self, branch: &str, since: i64) -> Result<Vec<Change>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT seq, branch, entity_kind, entity_id, entity_key, op, fields, pure, at
             FROM changelog WHERE branch = ?1 AND seq > ?2 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![branch, since], |row| {
                Ok(Change {
                    seq: row.get(0)?,
                    branch: row.get(1)?,
                    kind: row.get(2)?,
                    id: row.get(3)?,
                    key: row.get(4)?,
                    op: row.get(5)?,
                    fields: json_col(row, 6)?,
                    pure: row.get(7)?,
                    at: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
