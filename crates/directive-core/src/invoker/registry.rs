use crate::error::{DirectiveError, Result};
use crate::extensions::{ExtensionStore, ExtensionWrite, LifecycleStatus};
use crate::model::Action;
use crate::project::StateOps;
use crate::rule_store::Catalog;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// PendingWrites
// ---------------------------------------------------------------------------

/// Extension writes queued by handlers during one run.
#[derive(Debug, Default)]
pub struct PendingWrites {
    writes: RefCell<Vec<ExtensionWrite>>,
}

impl PendingWrites {
    pub fn len(&self) -> usize {
        self.writes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.borrow().is_empty()
    }

    /// Drop everything queued after the first `len` writes.
    pub(crate) fn truncate(&self, len: usize) {
        self.writes.borrow_mut().truncate(len);
    }

    pub(crate) fn take(&self) -> Vec<ExtensionWrite> {
        self.writes.take()
    }

    fn push(&self, write: ExtensionWrite) {
        self.writes.borrow_mut().push(write);
    }

    /// Status an action will have once the queued writes are applied.
    fn queued_status(&self, action_id: &str) -> Option<LifecycleStatus> {
        self.writes.borrow().iter().rev().find_map(|w| match w {
            ExtensionWrite::Advance {
                action_id: id,
                status,
            } if id == action_id => Some(*status),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// ActionCall
// ---------------------------------------------------------------------------

/// Everything a handler may touch during one invocation. Project state is
/// reached only through `state`, which is bound to the run's transaction.
pub struct ActionCall<'a> {
    pub action: &'a Action,
    pub params: &'a Map<String, Value>,
    pub state: StateOps<'a>,
    pub extensions: Option<&'a ExtensionStore>,
    /// Extension writes land here and are applied when the run commits.
    pub pending: &'a PendingWrites,
    pub execution_context: Option<&'a str>,
}

impl<'a> ActionCall<'a> {
    fn missing(&self, name: &str, reason: &str) -> DirectiveError {
        DirectiveError::Binding {
            action: self.action.id.clone(),
            param: name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn str(&self, name: &str) -> Result<&'a str> {
        self.opt_str(name)?
            .ok_or_else(|| self.missing(name, "missing required parameter"))
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<&'a str>> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(self.missing(name, "expected string")),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        self.opt_int(name)?
            .ok_or_else(|| self.missing(name, "missing required parameter"))
    }

    pub fn opt_int(&self, name: &str) -> Result<Option<i64>> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.missing(name, "expected integer")),
        }
    }

    /// A JSON object parameter; absent means empty.
    pub fn object(&self, name: &str) -> Result<Map<String, Value>> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(_) => Err(self.missing(name, "expected object")),
        }
    }

    /// A list of strings; absent means empty.
    pub fn strings(&self, name: &str) -> Result<Vec<String>> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| self.missing(name, "expected list of strings"))
                })
                .collect(),
            Some(_) => Err(self.missing(name, "expected list of strings")),
        }
    }

    pub fn require_extensions(&self) -> Result<&'a ExtensionStore> {
        self.extensions.ok_or_else(|| DirectiveError::ActionExecution {
            action: self.action.id.clone(),
            reason: "extension store is not open".to_string(),
        })
    }

    /// Check a lifecycle move against the store and any moves already queued
    /// in this run, then queue it. Returns the status it moves from.
    pub fn queue_advance(&self, action_id: &str, target: LifecycleStatus) -> Result<LifecycleStatus> {
        let store = self.require_extensions()?;
        let from = match self.pending.queued_status(action_id) {
            Some(status) => status,
            None => store.action(action_id)?.status,
        };
        from.can_transition_to(target)?;
        self.pending.push(ExtensionWrite::Advance {
            action_id: action_id.to_string(),
            status: target,
        });
        Ok(from)
    }
}

// ---------------------------------------------------------------------------
// ActionHandler
// ---------------------------------------------------------------------------

pub trait ActionHandler {
    fn call(&self, call: &ActionCall<'_>) -> Result<Value>;
}

impl<F> ActionHandler for F
where
    F: Fn(&ActionCall<'_>) -> Result<Value>,
{
    fn call(&self, call: &ActionCall<'_>) -> Result<Value> {
        self(call)
    }
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Handlers keyed by action name.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Box<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in project-state handlers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_all(&mut registry);
        registry
    }

    /// Register `handler` under `name`, replacing any previous handler.
    pub fn register(&mut self, name: impl Into<String>, handler: impl ActionHandler + 'static) {
        self.handlers.insert(name.into(), Box::new(handler));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ActionHandler> {
        self.handlers.get(name).map(|h| h.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Ids of catalog actions whose handler is not registered.
    pub fn missing_for(&self, catalog: &Catalog) -> Vec<String> {
        catalog
            .actions()
            .filter(|a| !self.contains(&a.name))
            .map(|a| a.id.clone())
            .collect()
    }
}
