//! Rule-configuration records: rules (directives), actions (helpers), the
//! links binding actions to rules, and the flow edges between rules.
//!
//! A [`Bundle`] is the unit the loader ingests. It carries these records in
//! the shapes below; YAML and JSON documents both deserialize into it.

use crate::error::Result;
use crate::types::{FlowType, ParamKind, StateValue, StoreTarget};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    /// Depth in the rule hierarchy (0 = top level).
    #[serde(default)]
    pub level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub workflow: Workflow,
    #[serde(default)]
    pub priority: i64,
}

/// One trunk condition followed by ordered conditional branches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub trunk: String,
    #[serde(default)]
    pub branches: Vec<WorkflowBranch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowBranch {
    pub when: String,
    pub then: String,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    /// Handler name in the action registry. Several action ids may share one
    /// handler with different parameter lists.
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Pure queries never mutate a store.
    #[serde(default)]
    pub pure: bool,
    #[serde(default = "default_true")]
    pub is_tool: bool,
    #[serde(default)]
    pub is_sub_action: bool,
    #[serde(default)]
    pub target: StoreTarget,
}

impl Action {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// RuleAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAction {
    pub rule_id: String,
    pub action_id: String,
    pub sequence_order: u32,
    #[serde(default = "default_true")]
    pub is_required: bool,
    /// Parameter name → binding expression. `"$ctx.<name>"` reads the
    /// execution context, `"$step.<action_id>.<path>"` reads an earlier
    /// result of the same run; anything else is a literal.
    #[serde(default)]
    pub parameter_mapping: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_context: Option<String>,
}

// ---------------------------------------------------------------------------
// FlowEdge
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowEdge {
    /// Assigned from declaration order when a bundle is loaded.
    #[serde(default)]
    pub id: u32,
    pub from_rule: String,
    pub to_rule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_value: Option<StateValue>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub flow_type: FlowType,
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bundle {
    pub version: u32,
    #[serde(default)]
    pub name: String,
    /// Rule the driver falls back to when no flow edge matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_rule: Option<String>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub rule_actions: Vec<RuleAction>,
    #[serde(default)]
    pub flow_edges: Vec<FlowEdge>,
    /// Forward-looking guidance lines per rule id.
    #[serde(default)]
    pub guidance: BTreeMap<String, Vec<String>>,
}

impl Bundle {
    pub fn from_yaml_str(data: &str) -> Result<Self> {
        let mut bundle: Bundle = serde_yaml::from_str(data)?;
        bundle.number_edges();
        Ok(bundle)
    }

    /// Read a bundle from disk. JSON is a subset of YAML, so both parse.
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&data)
    }

    /// Edge ids follow declaration order so that priority ties resolve the
    /// same way on every load.
    pub fn number_edges(&mut self) {
        for (i, edge) in self.flow_edges.iter_mut().enumerate() {
            edge.id = i as u32 + 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
