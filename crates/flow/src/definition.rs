//! Declarative flow definitions as they appear on disk (YAML or JSON).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowType {
    Authentication,
    Registration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Task,
    Prompt,
    Decision,
}

/// One user-facing input field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InputDefinition {
    pub identifier: String,
    /// Rendering hint: "text", "password", "otp", ...
    #[serde(rename = "type", default = "default_input_type")]
    pub input_type: String,
    #[serde(default)]
    pub required: bool,
    /// Choice values for select-style inputs; may be enriched at runtime.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

fn default_input_type() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinition {
    #[serde(rename = "ref")]
    pub ref_: String,
    /// Empty only on final nodes.
    #[serde(default)]
    pub next_node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromptDefinition {
    #[serde(default)]
    pub inputs: Vec<InputDefinition>,
    pub action: ActionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub is_start: bool,
    #[serde(default)]
    pub is_final: bool,
    /// Executor name for TASK nodes.
    #[serde(default)]
    pub executor: Option<String>,
    /// Successor for TASK nodes; absent on final nodes.
    #[serde(default)]
    pub next_node_id: Option<String>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// Executor-level inputs (TASK nodes).
    #[serde(default)]
    pub inputs: Vec<InputDefinition>,
    /// Runtime-data keys that must exist before the node runs.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// Prompts for PROMPT/DECISION nodes.
    #[serde(default)]
    pub prompts: Vec<PromptDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowDefinition {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub flow_type: FlowType,
    pub nodes: Vec<NodeDefinition>,
}
