//! Compiled flow graphs.
//!
//! Compilation turns a declarative [`FlowDefinition`] into typed nodes and
//! validates the graph shape up front so the engine never meets a dangling
//! reference or unknown executor at runtime.

use std::collections::{HashMap, HashSet};

use shared::error::CommonError;

use crate::definition::{
    FlowDefinition, FlowType, InputDefinition, NodeDefinition, NodeKind, PromptDefinition,
};
use crate::executor::ExecutorKind;

/// Node property naming the identity provider an executor talks to.
pub const PROP_IDP_NAME: &str = "idpName";

#[derive(Debug, Clone)]
pub struct NodeBase {
    pub id: String,
    pub is_start: bool,
    pub is_final: bool,
    pub properties: HashMap<String, String>,
    pub prerequisites: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum Node {
    Task {
        base: NodeBase,
        executor: ExecutorKind,
        inputs: Vec<InputDefinition>,
        next_node_id: Option<String>,
    },
    Prompt {
        base: NodeBase,
        prompts: Vec<PromptDefinition>,
    },
    Decision {
        base: NodeBase,
        prompts: Vec<PromptDefinition>,
    },
}

impl Node {
    pub fn base(&self) -> &NodeBase {
        match self {
            Node::Task { base, .. } | Node::Prompt { base, .. } | Node::Decision { base, .. } => {
                base
            }
        }
    }

    pub fn prompts(&self) -> Option<&[PromptDefinition]> {
        match self {
            Node::Prompt { prompts, .. } | Node::Decision { prompts, .. } => Some(prompts),
            Node::Task { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowGraph {
    pub id: String,
    pub name: String,
    pub flow_type: FlowType,
    nodes: HashMap<String, Node>,
    pub start_node_id: String,
    pub final_node_ids: Vec<String>,
}

impl FlowGraph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Compile and validate a definition. `known_idps` is the set of
    /// identity provider names that exist at publication time.
    pub fn compile(
        definition: &FlowDefinition,
        known_idps: &HashSet<String>,
    ) -> Result<Self, CommonError> {
        if definition.id.is_empty() {
            return Err(CommonError::invalid_request("flow id is required"));
        }
        if definition.nodes.is_empty() {
            return Err(CommonError::invalid_request(format!(
                "flow '{}' has no nodes",
                definition.id
            )));
        }

        let node_ids: HashSet<&str> =
            definition.nodes.iter().map(|n| n.id.as_str()).collect();
        if node_ids.len() != definition.nodes.len() {
            return Err(CommonError::invalid_request(format!(
                "flow '{}' contains duplicate node ids",
                definition.id
            )));
        }

        let start_nodes: Vec<&NodeDefinition> =
            definition.nodes.iter().filter(|n| n.is_start).collect();
        if start_nodes.len() != 1 {
            return Err(CommonError::invalid_request(format!(
                "flow '{}' must have exactly one start node, found {}",
                definition.id,
                start_nodes.len()
            )));
        }
        let start_node_id = start_nodes[0].id.clone();

        let final_node_ids: Vec<String> = definition
            .nodes
            .iter()
            .filter(|n| n.is_final)
            .map(|n| n.id.clone())
            .collect();
        if final_node_ids.is_empty() {
            return Err(CommonError::invalid_request(format!(
                "flow '{}' must have at least one final node",
                definition.id
            )));
        }

        let mut nodes = HashMap::with_capacity(definition.nodes.len());
        for node_def in &definition.nodes {
            let node = compile_node(&definition.id, node_def, &node_ids, known_idps)?;
            nodes.insert(node_def.id.clone(), node);
        }

        Ok(FlowGraph {
            id: definition.id.clone(),
            name: definition.name.clone(),
            flow_type: definition.flow_type,
            nodes,
            start_node_id,
            final_node_ids,
        })
    }
}

fn compile_node(
    flow_id: &str,
    node_def: &NodeDefinition,
    node_ids: &HashSet<&str>,
    known_idps: &HashSet<String>,
) -> Result<Node, CommonError> {
    let base = NodeBase {
        id: node_def.id.clone(),
        is_start: node_def.is_start,
        is_final: node_def.is_final,
        properties: node_def.properties.clone(),
        prerequisites: node_def.prerequisites.clone(),
    };

    match node_def.kind {
        NodeKind::Task => {
            let executor_name = node_def.executor.as_deref().ok_or_else(|| {
                CommonError::invalid_request(format!(
                    "task node '{}' in flow '{flow_id}' names no executor",
                    node_def.id
                ))
            })?;
            let executor = ExecutorKind::parse(executor_name).ok_or_else(|| {
                CommonError::invalid_request(format!(
                    "unknown executor '{executor_name}' in flow '{flow_id}'"
                ))
            })?;

            if executor.requires_idp() {
                let idp_name =
                    node_def.properties.get(PROP_IDP_NAME).ok_or_else(|| {
                        CommonError::invalid_request(format!(
                            "node '{}' in flow '{flow_id}' requires the {PROP_IDP_NAME} property",
                            node_def.id
                        ))
                    })?;
                if !known_idps.contains(idp_name) {
                    return Err(CommonError::invalid_request(format!(
                        "flow '{flow_id}' references unknown identity provider '{idp_name}'"
                    )));
                }
            }

            match &node_def.next_node_id {
                Some(next) if !next.is_empty() => {
                    if !node_ids.contains(next.as_str()) {
                        return Err(CommonError::invalid_request(format!(
                            "node '{}' in flow '{flow_id}' points at unknown node '{next}'",
                            node_def.id
                        )));
                    }
                }
                _ if node_def.is_final => {}
                _ => {
                    return Err(CommonError::invalid_request(format!(
                        "non-final task node '{}' in flow '{flow_id}' has no successor",
                        node_def.id
                    )));
                }
            }

            Ok(Node::Task {
                base,
                executor,
                inputs: node_def.inputs.clone(),
                next_node_id: node_def.next_node_id.clone().filter(|n| !n.is_empty()),
            })
        }
        NodeKind::Prompt | NodeKind::Decision => {
            if node_def.prompts.is_empty() {
                return Err(CommonError::invalid_request(format!(
                    "prompt node '{}' in flow '{flow_id}' has no prompts",
                    node_def.id
                )));
            }

            let mut refs = HashSet::new();
            for prompt in &node_def.prompts {
                if !refs.insert(prompt.action.ref_.as_str()) {
                    return Err(CommonError::invalid_request(format!(
                        "duplicate action ref '{}' on node '{}' in flow '{flow_id}'",
                        prompt.action.ref_, node_def.id
                    )));
                }
                validate_prompt_target(flow_id, node_def, prompt, node_ids)?;
            }

            match node_def.kind {
                NodeKind::Prompt => Ok(Node::Prompt {
                    base,
                    prompts: node_def.prompts.clone(),
                }),
                _ => Ok(Node::Decision {
                    base,
                    prompts: node_def.prompts.clone(),
                }),
            }
        }
    }
}

fn validate_prompt_target(
    flow_id: &str,
    node_def: &NodeDefinition,
    prompt: &PromptDefinition,
    node_ids: &HashSet<&str>,
) -> Result<(), CommonError> {
    let next = &prompt.action.next_node_id;
    if next.is_empty() {
        if node_def.is_final {
            return Ok(());
        }
        return Err(CommonError::invalid_request(format!(
            "action '{}' on non-final node '{}' in flow '{flow_id}' has no target",
            prompt.action.ref_, node_def.id
        )));
    }
    if !node_ids.contains(next.as_str()) {
        return Err(CommonError::invalid_request(format!(
            "action '{}' on node '{}' in flow '{flow_id}' points at unknown node '{next}'",
            prompt.action.ref_, node_def.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ActionDefinition;

    fn input(identifier: &str, required: bool) -> InputDefinition {
        InputDefinition {
            identifier: identifier.to_string(),
            input_type: "text".to_string(),
            required,
            options: vec![],
        }
    }

    fn prompt(ref_: &str, next: &str, inputs: Vec<InputDefinition>) -> PromptDefinition {
        PromptDefinition {
            inputs,
            action: ActionDefinition {
                ref_: ref_.to_string(),
                next_node_id: next.to_string(),
            },
        }
    }

    fn valid_definition() -> FlowDefinition {
        FlowDefinition {
            id: "login".to_string(),
            name: "Login".to_string(),
            flow_type: FlowType::Authentication,
            nodes: vec![
                NodeDefinition {
                    id: "collect".to_string(),
                    kind: NodeKind::Prompt,
                    is_start: true,
                    is_final: false,
                    executor: None,
                    next_node_id: None,
                    properties: HashMap::new(),
                    inputs: vec![],
                    prerequisites: vec![],
                    prompts: vec![prompt(
                        "submit",
                        "verify",
                        vec![input("username", true), input("password", true)],
                    )],
                },
                NodeDefinition {
                    id: "verify".to_string(),
                    kind: NodeKind::Task,
                    is_start: false,
                    is_final: false,
                    executor: Some("BasicAuthExecutor".to_string()),
                    next_node_id: Some("assert".to_string()),
                    properties: HashMap::new(),
                    inputs: vec![input("username", true), input("password", true)],
                    prerequisites: vec![],
                    prompts: vec![],
                },
                NodeDefinition {
                    id: "assert".to_string(),
                    kind: NodeKind::Task,
                    is_start: false,
                    is_final: true,
                    executor: Some("AuthAssertExecutor".to_string()),
                    next_node_id: None,
                    properties: HashMap::new(),
                    inputs: vec![],
                    prerequisites: vec![],
                    prompts: vec![],
                },
            ],
        }
    }

    #[test]
    fn test_compile_valid_flow() {
        let graph = FlowGraph::compile(&valid_definition(), &HashSet::new()).unwrap();
        assert_eq!(graph.start_node_id, "collect");
        assert_eq!(graph.final_node_ids, vec!["assert"]);
        assert_eq!(graph.node_count(), 3);
        assert!(matches!(graph.node("verify"), Some(Node::Task { .. })));
    }

    #[test]
    fn test_compile_rejects_dangling_target() {
        let mut definition = valid_definition();
        definition.nodes[0].prompts[0].action.next_node_id = "nowhere".to_string();
        let err = FlowGraph::compile(&definition, &HashSet::new()).unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_compile_rejects_zero_or_two_starts() {
        let mut definition = valid_definition();
        definition.nodes[1].is_start = true;
        assert!(FlowGraph::compile(&definition, &HashSet::new()).is_err());

        let mut definition = valid_definition();
        definition.nodes[0].is_start = false;
        assert!(FlowGraph::compile(&definition, &HashSet::new()).is_err());
    }

    #[test]
    fn test_compile_rejects_missing_final() {
        let mut definition = valid_definition();
        definition.nodes[2].is_final = false;
        definition.nodes[2].next_node_id = Some("collect".to_string());
        assert!(FlowGraph::compile(&definition, &HashSet::new()).is_err());
    }

    #[test]
    fn test_compile_rejects_unknown_executor() {
        let mut definition = valid_definition();
        definition.nodes[1].executor = Some("TelepathyExecutor".to_string());
        let err = FlowGraph::compile(&definition, &HashSet::new()).unwrap_err();
        assert!(err.to_string().contains("TelepathyExecutor"));
    }

    #[test]
    fn test_compile_rejects_duplicate_action_refs() {
        let mut definition = valid_definition();
        definition.nodes[0]
            .prompts
            .push(prompt("submit", "verify", vec![]));
        assert!(FlowGraph::compile(&definition, &HashSet::new()).is_err());
    }

    #[test]
    fn test_compile_checks_idp_references() {
        let mut definition = valid_definition();
        definition.nodes[1].executor = Some("GithubOAuthExecutor".to_string());
        definition.nodes[1]
            .properties
            .insert(PROP_IDP_NAME.to_string(), "github".to_string());

        // Unknown IdP rejected.
        assert!(FlowGraph::compile(&definition, &HashSet::new()).is_err());

        // Known IdP accepted.
        let mut known = HashSet::new();
        known.insert("github".to_string());
        FlowGraph::compile(&definition, &known).unwrap();
    }
}
