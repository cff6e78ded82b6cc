//! Collects user attributes declared on the node, prompting for whatever
//! is still missing.

use serde_json::{Map, Value};
use shared::error::CommonError;

use crate::context::FlowContext;
use crate::response::{ExecutorResponse, ExecutorStatus};

use super::{ExecutorDeps, TaskNode, missing_required_inputs};

const COLLECTED_KEY: &str = "collectedAttributes";

pub async fn execute(
    deps: &ExecutorDeps,
    node: &TaskNode<'_>,
    context: &mut FlowContext,
) -> Result<ExecutorResponse, CommonError> {
    if node.inputs.is_empty() {
        // Nothing to collect; the node is a no-op.
        let mut response = ExecutorResponse::default();
        response.status = Some(ExecutorStatus::Complete);
        return Ok(response);
    }

    let missing = missing_required_inputs(node.inputs, context);
    if !missing.is_empty() {
        return Ok(ExecutorResponse::input_required(missing));
    }

    let mut collected = Map::new();
    for input in node.inputs {
        if let Some(value) = context.user_inputs.get(&input.identifier)
            && !value.is_empty()
        {
            collected.insert(input.identifier.clone(), Value::String(value.clone()));
        }
    }

    // An authenticated user receives the attributes immediately; otherwise
    // they ride along for provisioning.
    let authenticated_user_id = context
        .authenticated_user
        .as_ref()
        .filter(|u| u.is_authenticated)
        .and_then(|u| u.user_id.clone());

    let mut response = ExecutorResponse::default();
    response.status = Some(ExecutorStatus::Complete);

    match authenticated_user_id {
        Some(user_id) => {
            deps.users.merge_attributes(&user_id, collected).await?;
        }
        None => {
            let mut merged = context
                .runtime_data
                .get(COLLECTED_KEY)
                .and_then(|raw| serde_json::from_str::<Map<String, Value>>(raw).ok())
                .unwrap_or_default();
            for (key, value) in collected {
                merged.insert(key, value);
            }
            response
                .runtime_data
                .insert(COLLECTED_KEY.to_string(), Value::Object(merged).to_string());
        }
    }

    Ok(response)
}
