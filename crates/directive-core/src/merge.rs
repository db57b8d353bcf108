//! Conflict detection between two branches' change logs.
//!
//! Changes are grouped by entity identity (kind plus name, or `#id` for
//! unnamed rows). An entity touched on only one side merges cleanly. An
//! entity touched on both sides merges only when every change to it on both
//! sides is a plain field write and no field was given two different
//! values. Anything else is reported as a [`Conflict`] and left for a person
//! to resolve.

use crate::error::{DirectiveError, Result};
use crate::project::{Change, ChangeOp};
use crate::types::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: EntityKind,
    pub key: String,
    pub ours: Map<String, Value>,
    pub theirs: Map<String, Value>,
    pub reason: String,
}

/// Changes from `theirs` that can be replayed onto `ours`.
#[derive(Debug, Clone, Serialize)]
pub struct MergePlan {
    pub ours: String,
    pub theirs: String,
    pub changes: Vec<Change>,
}

#[derive(Default)]
struct Touch {
    fields: Map<String, Value>,
    deleted: bool,
    side_effects: bool,
}

fn summarize(changes: &[Change]) -> BTreeMap<EntityKey, Touch> {
    let mut touched: BTreeMap<EntityKey, Touch> = BTreeMap::new();
    for change in changes {
        let touch = touched
            .entry(EntityKey {
                kind: change.kind,
                key: change.key.clone(),
            })
            .or_default();
        touch.deleted |= change.op == ChangeOp::Delete;
        touch.side_effects |= change.pure != Some(true);
        for (field, value) in &change.fields {
            touch.fields.insert(field.clone(), value.clone());
        }
    }
    touched
}

/// Every entity whose changes on the two sides cannot be shown to commute.
pub fn detect_conflicts(ours: &[Change], theirs: &[Change]) -> Vec<Conflict> {
    let ours = summarize(ours);
    let theirs = summarize(theirs);

    let mut conflicts = Vec::new();
    for (key, mine) in &ours {
        let Some(other) = theirs.get(key) else {
            continue;
        };
        let reason = if mine.deleted || other.deleted {
            Some("deleted on one branch and changed on the other".to_string())
        } else if mine.side_effects || other.side_effects {
            Some("changed with side effects on both branches".to_string())
        } else {
            let diverged: Vec<&String> = mine
                .fields
                .iter()
                .filter(|(f, v)| other.fields.get(*f).is_some_and(|o| o != *v))
                .map(|(f, _)| f)
                .collect();
            if diverged.is_empty() {
                None
            } else {
                Some(format!(
                    "both branches set {}",
                    diverged
                        .iter()
                        .map(|f| f.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            }
        };
        if let Some(reason) = reason {
            conflicts.push(Conflict {
                kind: key.kind,
                key: key.key.clone(),
                ours: mine.fields.clone(),
                theirs: other.fields.clone(),
                reason,
            });
        }
    }
    conflicts
}

/// Plan a merge of `theirs` into `ours`, or fail with every conflict found.
pub fn plan_merge(ours: &[Change], theirs: &[Change]) -> Result<MergePlan> {
    let conflicts = detect_conflicts(ours, theirs);
    if !conflicts.is_empty() {
        return Err(DirectiveError::Conflict(conflicts));
    }
    Ok(MergePlan {
        ours: ours.first().map(|c| c.branch.clone()).unwrap_or_default(),
        theirs: theirs.first().map(|c| c.branch.clone()).unwrap_or_default(),
        changes: theirs.to_vec(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::ProjectStore;
    use crate::types::Status;
    use serde_json::json;
    use tempfile::TempDir;

    fn change(branch: &str, key: &str, op: ChangeOp, fields: Value, pure: Option<bool>) -> Change {
        Change {
            seq: 0,
            branch: branch.into(),
            kind: EntityKind::Task,
            id: 1,
            key: key.into(),
            op,
            fields: match fields {
                Value::Object(m) => m,
                _ => Map::new(),
            },
            pure,
            at: chrono::Utc::now(),
        }
    }

    #[test]
    fn disjoint_entities_merge() {
        let ours = [change("a", "x", ChangeOp::Create, json!({"name": "x"}), Some(true))];
        let theirs = [change("b", "y", ChangeOp::Create, json!({"name": "y"}), Some(true))];
        let plan = plan_merge(&ours, &theirs).unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.theirs, "b");
    }

    #[test]
    fn disjoint_plain_fields_merge() {
        let ours = [change("a", "x", ChangeOp::Update, json!({"name": "x"}), Some(true))];
        let theirs = [change("b", "x", ChangeOp::Update, json!({"priority": 2}), Some(true))];
        assert!(detect_conflicts(&ours, &theirs).is_empty());
    }

    #[test]
    fn divergent_values_conflict() {
        let ours = [change("a", "x", ChangeOp::Update, json!({"priority": 1}), Some(true))];
        let theirs = [change("b", "x", ChangeOp::Update, json!({"priority": 2}), Some(true))];
        let conflicts = detect_conflicts(&ours, &theirs);
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].reason.contains("priority"));
    }

    #[test]
    fn side_effects_or_unknown_purity_conflict() {
        let ours = [change("a", "x", ChangeOp::Update, json!({"status": "completed"}), Some(false))];
        let theirs = [change("b", "x", ChangeOp::Update, json!({"name": "x"}), Some(true))];
        assert_eq!(detect_conflicts(&ours, &theirs).len(), 1);

        let ours = [change("a", "x", ChangeOp::Update, json!({"name": "x"}), None)];
        assert_eq!(detect_conflicts(&ours, &theirs).len(), 1);
    }

    #[test]
    fn delete_conflicts() {
        let ours = [change("a", "x", ChangeOp::Delete, json!({}), Some(false))];
        let theirs = [change("b", "x", ChangeOp::Update, json!({"name": "x"}), Some(true))];
        assert!(matches!(
            plan_merge(&ours, &theirs),
            Err(DirectiveError::Conflict(c)) if c.len() == 1
        ));
    }

    #[test]
    fn branches_completing_same_task_conflict() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.db");
        let a = ProjectStore::open(&path, "a").unwrap();
        let b = ProjectStore::open(&path, "b").unwrap();
        for store in [&a, &b] {
            let ops = store.state();
            let stage = ops.add_stage("S").unwrap();
            let m = ops.add_milestone(stage.id, "M", &[], None).unwrap();
            let t = ops.create_task(m.id, "shared", 0).unwrap();
            ops.set_task_status(t.id, Status::Completed).unwrap();
        }
        let ours = a.state().changes(0).unwrap();
        let theirs = a.state().changes_on("b", 0).unwrap();
        let conflicts = detect_conflicts(&ours, &theirs);
        assert!(conflicts
            .iter()
            .any(|c| c.kind == EntityKind::Task && c.key == "shared"));
        // Identical plain creates of the stage commute.
        assert!(!conflicts.iter().any(|c| c.kind == EntityKind::Stage));
    }
}
