//! The flow executor core: advances one ceremony by one step per call.
//!
//! A single `execute` call runs synchronously until the ceremony suspends
//! (user input required, external redirect), fails, or completes. Task
//! completions advance through the graph within the same call, bounded by
//! a hop budget so a cyclic graph cannot spin forever.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use shared::error::CommonError;

use crate::context::{FAILURE_REASON_KEY, FlowContext};
use crate::definition::{FlowType, InputDefinition, PromptDefinition};
use crate::executor::{Executors, TaskNode};
use crate::graph::{Node, NodeBase};
use crate::registry::FlowRegistry;
use crate::response::{ExecutorStatus, FlowStatus, FlowStepResult, StepType};

#[derive(Debug, Clone)]
pub struct FlowEngineConfig {
    /// Same-call node transition bound.
    pub max_hops: usize,
}

impl Default for FlowEngineConfig {
    fn default() -> Self {
        Self { max_hops: 32 }
    }
}

/// What one HTTP round trip contributes to the ceremony.
#[derive(Debug, Clone, Default)]
pub struct FlowInput {
    pub action: Option<String>,
    pub inputs: HashMap<String, String>,
}

impl FlowInput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            inputs: HashMap::new(),
        }
    }
}

pub struct FlowEngine {
    registry: Arc<FlowRegistry>,
    executors: Executors,
    config: FlowEngineConfig,
}

enum PromptOutcome {
    Respond(FlowStepResult),
    Advance(String),
    Finish,
}

impl FlowEngine {
    pub fn new(registry: Arc<FlowRegistry>, executors: Executors, config: FlowEngineConfig) -> Self {
        Self {
            registry,
            executors,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<FlowRegistry> {
        &self.registry
    }

    /// Create a fresh context positioned at the flow's start node.
    pub fn start(&self, flow_id: &str) -> Result<FlowContext, CommonError> {
        let graph = self
            .registry
            .get_graph(flow_id)
            .ok_or_else(|| CommonError::not_found("flow not found", flow_id))?;
        Ok(FlowContext::new(
            &graph.id,
            graph.flow_type,
            &graph.start_node_id,
        ))
    }

    /// Advance the ceremony by one step.
    pub async fn execute(
        &self,
        context: &mut FlowContext,
        input: FlowInput,
    ) -> Result<FlowStepResult, CommonError> {
        let graph = self
            .registry
            .get_graph(&context.flow_id)
            .ok_or_else(|| CommonError::not_found("flow not found", context.flow_id.clone()))?;

        // Fold the round trip's contribution into the context.
        for (key, value) in input.inputs {
            context.user_inputs.insert(key, value);
        }
        let mut pending_action = input.action.filter(|a| !a.is_empty());

        let mut hops = 0usize;
        loop {
            hops += 1;
            if hops > self.config.max_hops {
                tracing::warn!(flow_id = %context.flow_id, node = %context.current_node_id,
                    "ceremony exceeded the node transition bound");
                return Ok(FlowStepResult::failure(
                    "Flow did not terminate within the node transition bound",
                ));
            }

            let node = graph.node(&context.current_node_id).ok_or_else(|| {
                CommonError::Unknown(anyhow::anyhow!(
                    "ceremony is positioned at unknown node '{}' of flow '{}'",
                    context.current_node_id,
                    context.flow_id
                ))
            })?;

            match node {
                Node::Prompt { base, prompts } | Node::Decision { base, prompts } => {
                    match self.handle_prompt(context, base, prompts, pending_action.take())? {
                        PromptOutcome::Respond(result) => return Ok(result),
                        PromptOutcome::Advance(next) => {
                            context.current_node_id = next;
                        }
                        PromptOutcome::Finish => return Ok(self.finish(context)),
                    }
                }
                Node::Task {
                    base,
                    executor,
                    inputs,
                    next_node_id,
                } => {
                    if let Some(missing) = base
                        .prerequisites
                        .iter()
                        .find(|p| !context.runtime_data.contains_key(*p))
                    {
                        return Ok(FlowStepResult::failure(format!(
                            "Missing prerequisite '{missing}'"
                        )));
                    }

                    let task = TaskNode { base, inputs };
                    let mut response = self.executors.execute(*executor, &task, context).await?;

                    for (key, value) in response.runtime_data.drain() {
                        context.runtime_data.insert(key, value);
                    }

                    match response.status() {
                        ExecutorStatus::Complete => {
                            if let Some(user) = response.authenticated_user.take() {
                                context.authenticated_user = Some(user);
                            }
                            match next_node_id {
                                Some(next) => context.current_node_id = next.clone(),
                                None => return Ok(self.finish(context)),
                            }
                        }
                        ExecutorStatus::UserInputRequired => {
                            let mut result = FlowStepResult::view();
                            result.inputs =
                                enrich_inputs(response.required_inputs, context);
                            result.data = response.additional_data;
                            result.failure_reason =
                                context.runtime_data.remove(FAILURE_REASON_KEY);
                            return Ok(result);
                        }
                        ExecutorStatus::ExternalRedirection => {
                            let url = response.redirect_url.unwrap_or_default();
                            if url.is_empty() {
                                return Err(CommonError::Unknown(anyhow::anyhow!(
                                    "executor on node '{}' reported a redirection without a URL",
                                    base.id
                                )));
                            }
                            let mut result = FlowStepResult::view();
                            result.step_type = StepType::Redirection;
                            result.redirect_url = Some(url);
                            result.data = response.additional_data;
                            return Ok(result);
                        }
                        ExecutorStatus::Failure => {
                            return Ok(FlowStepResult::failure(
                                response
                                    .failure_reason
                                    .unwrap_or_else(|| "Authentication failed".to_string()),
                            ));
                        }
                    }
                }
            }
        }
    }

    fn handle_prompt(
        &self,
        context: &mut FlowContext,
        base: &NodeBase,
        prompts: &[PromptDefinition],
        incoming_action: Option<String>,
    ) -> Result<PromptOutcome, CommonError> {
        let selected = match incoming_action {
            Some(action_ref) => match prompts.iter().find(|p| p.action.ref_ == action_ref) {
                Some(prompt) => Some(prompt),
                // Unknown action: re-present everything without touching
                // the context.
                None => None,
            },
            None => auto_select(prompts, context),
        };

        let Some(prompt) = selected else {
            return Ok(PromptOutcome::Respond(present_all(context, prompts)));
        };

        let missing: Vec<InputDefinition> = prompt
            .inputs
            .iter()
            .filter(|input| {
                input.required
                    && context
                        .user_inputs
                        .get(&input.identifier)
                        .is_none_or(|v| v.is_empty())
            })
            .cloned()
            .collect();
        if !missing.is_empty() {
            // Missing inputs go back with the full action set so the
            // client may re-choose; the context is preserved.
            let mut result = FlowStepResult::view();
            result.inputs = enrich_inputs(missing, context);
            result.actions = prompts.iter().map(|p| p.action.clone()).collect();
            result.failure_reason = context.runtime_data.remove(FAILURE_REASON_KEY);
            return Ok(PromptOutcome::Respond(result));
        }

        context.current_action = Some(prompt.action.ref_.clone());

        let next = prompt.action.next_node_id.clone();
        if next.is_empty() {
            if base.is_final {
                return Ok(PromptOutcome::Finish);
            }
            return Ok(PromptOutcome::Respond(FlowStepResult::failure(
                "Invalid action selected",
            )));
        }
        Ok(PromptOutcome::Advance(next))
    }

    fn finish(&self, context: &FlowContext) -> FlowStepResult {
        // A completed authentication ceremony must carry an authenticated
        // user; registration may finish with an unauthenticated assertion.
        let authenticated = context
            .authenticated_user
            .as_ref()
            .is_some_and(|u| u.is_authenticated);
        if context.flow_type == FlowType::Authentication && !authenticated {
            return FlowStepResult::failure("Authentication has not been completed");
        }

        let mut result = FlowStepResult::view();
        result.flow_status = FlowStatus::Complete;
        result.authenticated_user = context.authenticated_user.clone();
        result
    }
}

/// Auto-selection: a lone prompt that has required inputs, all of which
/// are already present. Confirmation-only prompts (no inputs) always wait
/// for an explicit action.
fn auto_select<'a>(
    prompts: &'a [PromptDefinition],
    context: &FlowContext,
) -> Option<&'a PromptDefinition> {
    if prompts.len() != 1 {
        return None;
    }
    let prompt = &prompts[0];
    let required: Vec<&InputDefinition> =
        prompt.inputs.iter().filter(|i| i.required).collect();
    if required.is_empty() {
        return None;
    }
    let all_present = required.iter().all(|input| {
        context
            .user_inputs
            .get(&input.identifier)
            .is_some_and(|v| !v.is_empty())
    });
    all_present.then_some(prompt)
}

fn present_all(context: &mut FlowContext, prompts: &[PromptDefinition]) -> FlowStepResult {
    let mut inputs: Vec<InputDefinition> = Vec::new();
    for prompt in prompts {
        for input in &prompt.inputs {
            if !inputs.iter().any(|i| i.identifier == input.identifier) {
                inputs.push(input.clone());
            }
        }
    }

    let mut result = FlowStepResult::view();
    result.inputs = enrich_inputs(inputs, context);
    result.actions = prompts.iter().map(|p| p.action.clone()).collect();
    result.failure_reason = context.runtime_data.remove(FAILURE_REASON_KEY);
    result
}

/// Merge forwarded enrichment onto the inputs: only non-empty `options`
/// are taken, matched by identifier; type and required always come from
/// the definition.
fn enrich_inputs(mut inputs: Vec<InputDefinition>, context: &FlowContext) -> Vec<InputDefinition> {
    let Some(forwarded) = context
        .forwarded_data
        .get("inputs")
        .and_then(Value::as_array)
    else {
        return inputs;
    };

    for entry in forwarded {
        let Some(identifier) = entry.get("identifier").and_then(Value::as_str) else {
            continue;
        };
        let options: Vec<String> = entry
            .get("options")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if options.is_empty() {
            continue;
        }
        if let Some(input) = inputs.iter_mut().find(|i| i.identifier == identifier) {
            input.options = options;
        }
    }

    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{
        ActionDefinition, FlowDefinition, NodeDefinition, NodeKind,
    };
    use crate::executor::testsupport::deps_with_user;
    use crate::executor::{ExecutorDeps, Executors};
    use serde_json::json;
    use std::collections::HashSet;

    fn input(identifier: &str) -> InputDefinition {
        InputDefinition {
            identifier: identifier.to_string(),
            input_type: "text".to_string(),
            required: true,
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

    fn prompt_node(id: &str, is_start: bool, prompts: Vec<PromptDefinition>) -> NodeDefinition {
        NodeDefinition {
            id: id.to_string(),
            kind: NodeKind::Prompt,
            is_start,
            is_final: false,
            executor: None,
            next_node_id: None,
            properties: Default::default(),
            inputs: vec![],
            prerequisites: vec![],
            prompts,
        }
    }

    fn task_node(id: &str, executor: &str, next: Option<&str>, is_final: bool) -> NodeDefinition {
        NodeDefinition {
            id: id.to_string(),
            kind: NodeKind::Task,
            is_start: false,
            is_final,
            executor: Some(executor.to_string()),
            next_node_id: next.map(str::to_string),
            properties: Default::default(),
            inputs: vec![],
            prerequisites: vec![],
            prompts: vec![],
        }
    }

    async fn engine_with(deps: ExecutorDeps, definition: FlowDefinition) -> FlowEngine {
        let registry = Arc::new(FlowRegistry::new());
        registry.publish(&definition, &HashSet::new()).unwrap();
        FlowEngine::new(registry, Executors::new(deps), FlowEngineConfig::default())
    }

    fn two_action_definition() -> FlowDefinition {
        // Prompt with a1 (username/password) and a2 (no inputs), both
        // leading to a no-op final task node.
        FlowDefinition {
            id: "pick".to_string(),
            name: "Pick".to_string(),
            flow_type: FlowType::Registration,
            nodes: vec![
                prompt_node(
                    "choose",
                    true,
                    vec![
                        prompt("a1", "done", vec![input("username"), input("password")]),
                        prompt("a2", "done", vec![]),
                    ],
                ),
                task_node("done", "AttributeCollector", None, true),
            ],
        }
    }

    #[tokio::test]
    async fn test_prompt_presents_actions_and_input_union() {
        let deps = deps_with_user("jdoe", "pw").await;
        let engine = engine_with(deps, two_action_definition()).await;

        let mut ctx = engine.start("pick").unwrap();
        let result = engine.execute(&mut ctx, FlowInput::empty()).await.unwrap();

        assert_eq!(result.flow_status, FlowStatus::Incomplete);
        assert_eq!(result.actions.len(), 2);
        let identifiers: Vec<&str> =
            result.inputs.iter().map(|i| i.identifier.as_str()).collect();
        assert_eq!(identifiers, vec!["username", "password"]);
    }

    #[tokio::test]
    async fn test_explicit_action_advances() {
        let deps = deps_with_user("jdoe", "pw").await;
        let engine = engine_with(deps, two_action_definition()).await;

        let mut ctx = engine.start("pick").unwrap();
        engine.execute(&mut ctx, FlowInput::empty()).await.unwrap();

        let result = engine
            .execute(&mut ctx, FlowInput::with_action("a2"))
            .await
            .unwrap();
        assert_eq!(result.flow_status, FlowStatus::Complete);
        assert_eq!(ctx.current_action.as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn test_confirmation_only_prompt_never_auto_completes() {
        let deps = deps_with_user("jdoe", "pw").await;
        let definition = FlowDefinition {
            id: "confirm".to_string(),
            name: "Confirm".to_string(),
            flow_type: FlowType::Registration,
            nodes: vec![
                prompt_node("ack", true, vec![prompt("ok", "done", vec![])]),
                task_node("done", "AttributeCollector", None, true),
            ],
        };
        let engine = engine_with(deps, definition).await;

        let mut ctx = engine.start("confirm").unwrap();
        // No explicit action: must wait even though the prompt has no
        // inputs at all.
        let result = engine.execute(&mut ctx, FlowInput::empty()).await.unwrap();
        assert_eq!(result.flow_status, FlowStatus::Incomplete);
        assert_eq!(result.actions.len(), 1);

        let result = engine
            .execute(&mut ctx, FlowInput::with_action("ok"))
            .await
            .unwrap();
        assert_eq!(result.flow_status, FlowStatus::Complete);
    }

    #[tokio::test]
    async fn test_auto_select_with_all_required_inputs() {
        let deps = deps_with_user("jdoe", "pw").await;
        let definition = FlowDefinition {
            id: "login".to_string(),
            name: "Login".to_string(),
            flow_type: FlowType::Authentication,
            nodes: vec![
                prompt_node(
                    "collect",
                    true,
                    vec![prompt("submit", "verify", vec![input("username"), input("password")])],
                ),
                task_node("verify", "BasicAuthExecutor", Some("assert"), false),
                task_node("assert", "AuthAssertExecutor", None, true),
            ],
        };
        let engine = engine_with(deps, definition).await;

        let mut ctx = engine.start("login").unwrap();
        let mut inputs = HashMap::new();
        inputs.insert("username".to_string(), "jdoe".to_string());
        inputs.insert("password".to_string(), "pw".to_string());

        // No action supplied; the single prompt auto-selects and the call
        // runs through verification and assertion to completion.
        let result = engine
            .execute(
                &mut ctx,
                FlowInput {
                    action: None,
                    inputs,
                },
            )
            .await
            .unwrap();

        assert_eq!(result.flow_status, FlowStatus::Complete);
        assert!(result.actions.is_empty());
        assert_eq!(ctx.current_action.as_deref(), Some("submit"));
        let user = result.authenticated_user.unwrap();
        assert!(user.is_authenticated);
    }

    #[tokio::test]
    async fn test_missing_inputs_preserve_context_and_return_actions() {
        let deps = deps_with_user("jdoe", "pw").await;
        let engine = engine_with(deps, two_action_definition()).await;

        let mut ctx = engine.start("pick").unwrap();
        let mut inputs = HashMap::new();
        inputs.insert("username".to_string(), "jdoe".to_string());

        let result = engine
            .execute(
                &mut ctx,
                FlowInput {
                    action: Some("a1".to_string()),
                    inputs,
                },
            )
            .await
            .unwrap();

        assert_eq!(result.flow_status, FlowStatus::Incomplete);
        // Only the missing input comes back, with the action set attached.
        let identifiers: Vec<&str> =
            result.inputs.iter().map(|i| i.identifier.as_str()).collect();
        assert_eq!(identifiers, vec!["password"]);
        assert_eq!(result.actions.len(), 2);
        // The context kept the username for the retry.
        assert_eq!(ctx.user_inputs.get("username").map(String::as_str), Some("jdoe"));
        assert_eq!(ctx.current_node_id, "choose");
    }

    #[tokio::test]
    async fn test_unknown_action_represents_prompt() {
        let deps = deps_with_user("jdoe", "pw").await;
        let engine = engine_with(deps, two_action_definition()).await;

        let mut ctx = engine.start("pick").unwrap();
        let result = engine
            .execute(&mut ctx, FlowInput::with_action("nonsense"))
            .await
            .unwrap();

        assert_eq!(result.flow_status, FlowStatus::Incomplete);
        assert_eq!(result.actions.len(), 2);
        assert!(ctx.current_action.is_none());
    }

    #[tokio::test]
    async fn test_full_basic_auth_flow_with_retry_reason() {
        let deps = deps_with_user("jdoe", "hunter2").await;
        let definition = FlowDefinition {
            id: "login".to_string(),
            name: "Login".to_string(),
            flow_type: FlowType::Authentication,
            nodes: vec![
                prompt_node(
                    "collect",
                    true,
                    vec![prompt("submit", "verify", vec![input("username"), input("password")])],
                ),
                task_node("verify", "BasicAuthExecutor", Some("assert"), false),
                task_node("assert", "AuthAssertExecutor", None, true),
            ],
        };
        let engine = engine_with(deps, definition).await;

        let mut ctx = engine.start("login").unwrap();

        // Wrong password: the failure reason is lifted out of runtime data
        // into the prompt response, and is not sticky.
        let mut inputs = HashMap::new();
        inputs.insert("username".to_string(), "jdoe".to_string());
        inputs.insert("password".to_string(), "wrong".to_string());
        let result = engine
            .execute(
                &mut ctx,
                FlowInput {
                    action: Some("submit".to_string()),
                    inputs,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.flow_status, FlowStatus::Incomplete);
        assert_eq!(result.failure_reason.as_deref(), Some("Invalid credentials"));
        assert!(!ctx.runtime_data.contains_key(FAILURE_REASON_KEY));

        // Correct password this time.
        let mut inputs = HashMap::new();
        inputs.insert("password".to_string(), "hunter2".to_string());
        let result = engine
            .execute(
                &mut ctx,
                FlowInput {
                    action: None,
                    inputs,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.flow_status, FlowStatus::Complete);
        assert!(result.failure_reason.is_none());
    }

    #[tokio::test]
    async fn test_hop_bound_breaks_cycles() {
        let deps = deps_with_user("jdoe", "pw").await;
        // Two no-op task nodes pointing at each other.
        let definition = FlowDefinition {
            id: "cycle".to_string(),
            name: "Cycle".to_string(),
            flow_type: FlowType::Registration,
            nodes: vec![
                NodeDefinition {
                    is_start: true,
                    ..task_node("a", "AttributeCollector", Some("b"), false)
                },
                task_node("b", "AttributeCollector", Some("a"), false),
                task_node("end", "AttributeCollector", None, true),
            ],
        };
        // "end" is unreachable but satisfies the final-node requirement.
        let engine = engine_with(deps, definition).await;

        let mut ctx = engine.start("cycle").unwrap();
        let result = engine.execute(&mut ctx, FlowInput::empty()).await.unwrap();
        assert_eq!(result.flow_status, FlowStatus::Failure);
        assert!(
            result
                .failure_reason
                .unwrap()
                .contains("node transition bound")
        );
    }

    #[tokio::test]
    async fn test_forwarded_options_enrich_inputs() {
        let deps = deps_with_user("jdoe", "pw").await;
        let definition = FlowDefinition {
            id: "pick-ou".to_string(),
            name: "Pick OU".to_string(),
            flow_type: FlowType::Registration,
            nodes: vec![
                prompt_node(
                    "choose",
                    true,
                    vec![prompt("go", "done", vec![input("organization")])],
                ),
                task_node("done", "AttributeCollector", None, true),
            ],
        };
        let engine = engine_with(deps, definition).await;

        let mut ctx = engine.start("pick-ou").unwrap();
        ctx.forwarded_data.insert(
            "inputs".to_string(),
            json!([
                {"identifier": "organization", "options": ["acme", "globex"]},
                {"identifier": "organization", "options": []},
                {"identifier": "unrelated", "options": ["x"]},
            ]),
        );

        let result = engine.execute(&mut ctx, FlowInput::empty()).await.unwrap();
        let organization = result
            .inputs
            .iter()
            .find(|i| i.identifier == "organization")
            .unwrap();
        assert_eq!(organization.options, vec!["acme", "globex"]);
        // Definition-owned fields survive enrichment.
        assert!(organization.required);
        assert_eq!(organization.input_type, "text");
    }

    #[tokio::test]
    async fn test_unknown_flow_is_not_found() {
        let deps = deps_with_user("jdoe", "pw").await;
        let engine = engine_with(deps, two_action_definition()).await;
        assert!(engine.start("missing").is_err());
    }
}
