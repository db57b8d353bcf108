//! Preference and instrumentation store backed by redb.
//!
//! The engine opens this store only when preferences are enabled in the
//! config. It holds per-rule parameter defaults and, when tracking is on,
//! one event per rule run or tool call.
//!
//! # Table design
//!
//! `PREFERENCES` is keyed by `"<rule_id>\0<param>"`, so every default of a
//! rule sits in one contiguous key range. `EVENTS` uses a 24-byte composite
//! key:
//! ```text
//! [ timestamp_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//! so a plain iteration yields events in time order.

use crate::error::{DirectiveError, Result};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: `rule_id \0 param`. Value: JSON-encoded default.
const PREFERENCES: TableDefinition<&str, &[u8]> = TableDefinition::new("preferences");

/// Key: 24-byte composite (timestamp_ms big-endian ++ uuid bytes).
/// Value: JSON-encoded InvocationEvent.
const EVENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("events");

fn pref_key(rule_id: &str, param: &str) -> String {
    format!("{rule_id}\0{param}")
}

fn event_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

fn db_err(e: impl std::fmt::Display) -> DirectiveError {
    DirectiveError::Preferences(e.to_string())
}

// ---------------------------------------------------------------------------
// InvocationEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RuleRun,
    ToolCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub branch: String,
    /// Rule id for rule runs, action id for tool calls.
    pub target: String,
    pub succeeded: bool,
    pub warnings: usize,
    pub at: DateTime<Utc>,
}

impl InvocationEvent {
    pub fn new(kind: EventKind, branch: &str, target: &str, succeeded: bool, warnings: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            branch: branch.to_string(),
            target: target.to_string(),
            succeeded,
            warnings,
            at: Utc::now(),
        }
    }
}

/// Where the invoker reports rule runs and tool calls.
pub trait EventSink {
    /// Returns whether the event was stored.
    fn record(&self, event: &InvocationEvent) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// PreferenceStore
// ---------------------------------------------------------------------------

pub struct PreferenceStore {
    db: Database,
    tracking: bool,
}

impl PreferenceStore {
    /// Open or create the store at `path`, creating both tables.
    pub fn open(path: &Path, tracking: bool) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(PREFERENCES).map_err(db_err)?;
        wt.open_table(EVENTS).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db, tracking })
    }

    pub fn tracking(&self) -> bool {
        self.tracking
    }

    pub fn set_default(&self, rule_id: &str, param: &str, value: &Value) -> Result<()> {
        let key = pref_key(rule_id, param);
        let bytes = serde_json::to_vec(value)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(PREFERENCES).map_err(db_err)?;
            table
                .insert(key.as_str(), bytes.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn clear_default(&self, rule_id: &str, param: &str) -> Result<bool> {
        let key = pref_key(rule_id, param);
        let wt = self.db.begin_write().map_err(db_err)?;
        let removed = {
            let mut table = wt.open_table(PREFERENCES).map_err(db_err)?;
            let old = table.remove(key.as_str()).map_err(db_err)?;
            old.is_some()
        };
        wt.commit().map_err(db_err)?;
        Ok(removed)
    }

    /// Every stored default for `rule_id`, keyed by parameter name.
    pub fn defaults_for(&self, rule_id: &str) -> Result<Map<String, Value>> {
        let lower = format!("{rule_id}\0");
        let upper = format!("{rule_id}\u{1}");
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(PREFERENCES).map_err(db_err)?;

        let mut defaults = Map::new();
        for entry in table
            .range(lower.as_str()..upper.as_str())
            .map_err(db_err)?
        {
            let (k, v) = entry.map_err(db_err)?;
            let param = k.value()[lower.len()..].to_string();
            let value: Value = serde_json::from_slice(v.value())?;
            defaults.insert(param, value);
        }
        Ok(defaults)
    }

    /// Store an event when tracking is on. Returns whether it was stored.
    pub fn record(&self, event: &InvocationEvent) -> Result<bool> {
        if !self.tracking {
            return Ok(false);
        }
        let key = event_key(event.at, event.id);
        let value = serde_json::to_vec(event)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(EVENTS).map_err(db_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(true)
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Result<Vec<InvocationEvent>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(EVENTS).map_err(db_err)?;
        let mut events = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            events.push(serde_json::from_slice(v.value())?);
        }
        Ok(events)
    }
}

impl EventSink for PreferenceStore {
    fn record(&self, event: &InvocationEvent) -> Result<bool> {
        PreferenceStore::record(self, event)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_tmp(tracking: bool) -> (TempDir, PreferenceStore) {
        let dir = TempDir::new().unwrap();
        let store = PreferenceStore::open(&dir.path().join("prefs.redb"), tracking).unwrap();
        (dir, store)
    }

    #[test]
    fn defaults_are_scoped_per_rule() {
        let (_dir, store) = open_tmp(false);
        store.set_default("plan", "priority", &json!(3)).unwrap();
        store.set_default("plan", "theme", &json!("core")).unwrap();
        store.set_default("planner", "priority", &json!(9)).unwrap();

        let plan = store.defaults_for("plan").unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan["priority"], json!(3));
        assert_eq!(store.defaults_for("planner").unwrap()["priority"], json!(9));
        assert!(store.defaults_for("plan_x").unwrap().is_empty());

        assert!(store.clear_default("plan", "theme").unwrap());
        assert!(!store.clear_default("plan", "theme").unwrap());
        assert_eq!(store.defaults_for("plan").unwrap().len(), 1);
    }

    #[test]
    fn events_only_recorded_when_tracking() {
        let (_dir, off) = open_tmp(false);
        let event = InvocationEvent::new(EventKind::RuleRun, "main", "status", true, 0);
        assert!(!off.record(&event).unwrap());
        assert!(off.events().unwrap().is_empty());

        let (_dir, on) = open_tmp(true);
        assert!(on.record(&event).unwrap());
        let later = InvocationEvent {
            at: event.at + chrono::Duration::milliseconds(5),
            ..InvocationEvent::new(EventKind::ToolCall, "main", "add_item", false, 0)
        };
        on.record(&later).unwrap();
        let events = on.events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].target, "status");
        assert_eq!(events[1].kind, EventKind::ToolCall);
    }

    #[test]
    fn defaults_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs.redb");
        {
            let store = PreferenceStore::open(&path, false).unwrap();
            store.set_default("r", "p", &json!(true)).unwrap();
        }
        let store = PreferenceStore::open(&path, false).unwrap();
        assert_eq!(store.defaults_for("r").unwrap()["p"], json!(true));
    }
}
