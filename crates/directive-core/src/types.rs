use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Text-backed enums
// ---------------------------------------------------------------------------

/// Gives a unit-only enum a canonical snake_case string form and wires it
/// through `Display`, `FromStr` and the SQLite text column conversions.
macro_rules! text_enum {
    ($name:ident, $what:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::DirectiveError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(crate::error::DirectiveError::invalid($what, s)),
                }
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                value.as_str()?.parse().map_err(|e: crate::error::DirectiveError| {
                    rusqlite::types::FromSqlError::Other(Box::new(e))
                })
            }
        }
    };
}

pub(crate) use text_enum;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status shared by every node of the completion hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

text_enum!(Status, "status", {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
});

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Cancelled)
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Stage,
    Milestone,
    Task,
    Subtask,
    Sidequest,
    Item,
    File,
    Function,
    Type,
    Interaction,
}

text_enum!(EntityKind, "entity kind", {
    Stage => "stage",
    Milestone => "milestone",
    Task => "task",
    Subtask => "subtask",
    Sidequest => "sidequest",
    Item => "item",
    File => "file",
    Function => "function",
    Type => "type",
    Interaction => "interaction",
});

impl EntityKind {
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Stage,
            EntityKind::Milestone,
            EntityKind::Task,
            EntityKind::Subtask,
            EntityKind::Sidequest,
            EntityKind::Item,
            EntityKind::File,
            EntityKind::Function,
            EntityKind::Type,
            EntityKind::Interaction,
        ]
    }

    /// Code entities are created through reserve → finalize.
    pub fn is_code_entity(self) -> bool {
        matches!(
            self,
            EntityKind::File | EntityKind::Function | EntityKind::Type | EntityKind::Interaction
        )
    }
}

// ---------------------------------------------------------------------------
// FlowType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    #[default]
    Canonical,
    Conditional,
    CompletionLoop,
    ErrorHandler,
    ReferenceConsultation,
}

text_enum!(FlowType, "flow type", {
    Canonical => "canonical",
    Conditional => "conditional",
    CompletionLoop => "completion_loop",
    ErrorHandler => "error_handler",
    ReferenceConsultation => "reference_consultation",
});

// ---------------------------------------------------------------------------
// StoreTarget
// ---------------------------------------------------------------------------

/// Which of the four stores an action operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreTarget {
    RuleConfig,
    #[default]
    Project,
    Preferences,
    Extensions,
}

text_enum!(StoreTarget, "store target", {
    RuleConfig => "rule_config",
    Project => "project",
    Preferences => "preferences",
    Extensions => "extensions",
});

// ---------------------------------------------------------------------------
// ParamKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    #[default]
    String,
    Integer,
    Boolean,
    Json,
}

impl ParamKind {
    pub fn accepts(self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            ParamKind::String => matches!(value, Value::String(_)),
            ParamKind::Integer => value.as_i64().is_some(),
            ParamKind::Boolean => matches!(value, Value::Bool(_)),
            ParamKind::Json => true,
        }
    }
}

text_enum!(ParamKind, "parameter kind", {
    String => "string",
    Integer => "integer",
    Boolean => "boolean",
    Json => "json",
});

// ---------------------------------------------------------------------------
// StateValue
// ---------------------------------------------------------------------------

/// A single named field of a state snapshot, or the value a flow edge
/// expects that field to hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Bool(b) => write!(f, "{b}"),
            StateValue::Int(i) => write!(f, "{i}"),
            StateValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for StateValue {
    fn from(b: bool) -> Self {
        StateValue::Bool(b)
    }
}

impl From<i64> for StateValue {
    fn from(i: i64) -> Self {
        StateValue::Int(i)
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::Text(s.to_string())
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        StateValue::Text(s)
    }
}

// ---------------------------------------------------------------------------
// ValidationWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

text_enum!(WarnLevel, "warning level", {
    Warning => "warning",
    Error => "error",
});

impl ValidationWarning {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            Status::Pending,
            Status::InProgress,
            Status::Completed,
            Status::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("done".parse::<Status>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(Status::Completed.is_terminal());
        assert!(Status::Cancelled.is_terminal());
        assert!(Status::Pending.is_open());
        assert!(Status::InProgress.is_open());
    }

    #[test]
    fn code_entity_kinds() {
        let code: Vec<_> = EntityKind::all()
            .iter()
            .filter(|k| k.is_code_entity())
            .collect();
        assert_eq!(code.len(), 4);
        assert!(!EntityKind::Task.is_code_entity());
    }

    #[test]
    fn state_value_untagged_yaml() {
        let v: StateValue = serde_yaml::from_str("false").unwrap();
        assert_eq!(v, StateValue::Bool(false));
        let v: StateValue = serde_yaml::from_str("active_work").unwrap();
        assert_eq!(v, StateValue::Text("active_work".into()));
        let v: StateValue = serde_yaml::from_str("3").unwrap();
        assert_eq!(v, StateValue::Int(3));
    }

    #[test]
    fn param_kind_accepts() {
        use serde_json::json;
        assert!(ParamKind::Integer.accepts(&json!(4)));
        assert!(!ParamKind::Integer.accepts(&json!("4")));
        assert!(ParamKind::Boolean.accepts(&json!(true)));
        assert!(ParamKind::Json.accepts(&json!({"a": 1})));
    }
}
