use crate::merge::Conflict;
use crate::types::EntityKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectiveError {
    #[error("not initialized: run 'directive init'")]
    NotInitialized,

    #[error("rule store not found at {0}: load a rule bundle first")]
    RuleStoreMissing(String),

    #[error("rule bundle failed integrity checks: {}", problems.join("; "))]
    ConfigIntegrity { problems: Vec<String> },

    #[error("bundle version {incoming} is older than the active version {active}")]
    StaleBundle { incoming: u32, active: u32 },

    #[error("store schema is at v{found}, expected v{expected}: run the loader to migrate")]
    SchemaOutdated { found: u32, expected: u32 },

    #[error("migrations out of order: {0}")]
    MigrationOrder(String),

    #[error("rule not found: {0}")]
    RuleNotFound(String),

    #[error("action not found: {0}")]
    ActionNotFound(String),

    #[error("no handler registered for action '{0}'")]
    MissingHandler(String),

    #[error("action '{0}' is a sub-action and cannot be invoked directly")]
    NotATool(String),

    #[error("parameter '{param}' of action '{action}': {reason}")]
    Binding {
        action: String,
        param: String,
        reason: String,
    },

    #[error("action '{action}' failed: {reason}")]
    ActionExecution { action: String, reason: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("{kind} {id} is already finalized")]
    AlreadyFinalized { kind: EntityKind, id: i64 },

    #[error("milestone {milestone} already has an open task ({task})")]
    OpenTaskExists { milestone: i64, task: i64 },

    #[error("state consistency violation: {0}")]
    StateConsistency(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("merge blocked by {} conflicting change(s)", .0.len())]
    Conflict(Vec<Conflict>),

    #[error("invalid {what}: '{value}'")]
    InvalidValue { what: &'static str, value: String },

    #[error("preference store error: {0}")]
    Preferences(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl DirectiveError {
    pub(crate) fn invalid(what: &'static str, value: impl Into<String>) -> Self {
        DirectiveError::InvalidValue {
            what,
            value: value.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DirectiveError>;
