//! Username/password verification against the authentication provider.

use std::collections::HashMap;

use directory::authn::{AuthnErrorCode, AuthnRequest};
use serde_json::{Map, Value};
use shared::error::CommonError;

use crate::context::{FAILURE_REASON_KEY, FlowContext};
use crate::definition::{FlowType, InputDefinition};
use crate::response::{AuthenticatedUser, ExecutorResponse};

use super::{ExecutorDeps, TaskNode, missing_required_inputs};

const ATTEMPTS_KEY: &str = "basicAuthAttempts";
const PASSWORD_INPUT: &str = "password";

pub async fn execute(
    deps: &ExecutorDeps,
    node: &TaskNode<'_>,
    context: &mut FlowContext,
) -> Result<ExecutorResponse, CommonError> {
    let inputs = effective_inputs(node);

    let missing = missing_required_inputs(&inputs, context);
    if !missing.is_empty() {
        return Ok(ExecutorResponse::input_required(missing));
    }

    let password = context
        .user_inputs
        .get(PASSWORD_INPUT)
        .cloned()
        .unwrap_or_default();

    // Every non-credential input identifies the user.
    let mut identifiers = Map::new();
    for input in &inputs {
        if input.identifier == PASSWORD_INPUT {
            continue;
        }
        if let Some(value) = context.user_inputs.get(&input.identifier) {
            identifiers.insert(input.identifier.clone(), Value::String(value.clone()));
        }
    }

    let mut credentials = HashMap::new();
    credentials.insert(PASSWORD_INPUT.to_string(), password);
    let request = AuthnRequest {
        identifiers: identifiers.clone(),
        credentials,
        metadata: None,
    };

    match deps.authn.authenticate(&request).await {
        Ok(authenticated) => match context.flow_type {
            FlowType::Authentication => {
                let mut response = ExecutorResponse::complete(AuthenticatedUser {
                    is_authenticated: true,
                    user_id: Some(authenticated.user_id.clone()),
                    attributes: authenticated.attributes,
                });
                response
                    .runtime_data
                    .insert("userId".to_string(), authenticated.user_id);
                Ok(response)
            }
            // A resolvable user during registration is the failure case.
            FlowType::Registration => Ok(ExecutorResponse::failure("User already exists")),
        },
        Err(err) => match (err.code, context.flow_type) {
            // Unknown user during registration proceeds to provisioning.
            (AuthnErrorCode::UserNotFound, FlowType::Registration) => {
                let mut response =
                    ExecutorResponse::complete(AuthenticatedUser::unauthenticated());
                response.runtime_data.insert(
                    "pendingAttributes".to_string(),
                    Value::Object(identifiers).to_string(),
                );
                Ok(response)
            }
            (AuthnErrorCode::UserNotFound, FlowType::Authentication) => {
                Ok(retryable(node, context, inputs, "User not found"))
            }
            (AuthnErrorCode::AuthenticationFailed, FlowType::Authentication) => {
                Ok(retryable(node, context, inputs, "Invalid credentials"))
            }
            (AuthnErrorCode::AuthenticationFailed, FlowType::Registration) => {
                Ok(ExecutorResponse::failure("User already exists"))
            }
            _ => Err(err.into()),
        },
    }
}

fn effective_inputs(node: &TaskNode<'_>) -> Vec<InputDefinition> {
    if !node.inputs.is_empty() {
        return node.inputs.to_vec();
    }
    vec![
        InputDefinition {
            identifier: "username".to_string(),
            input_type: "text".to_string(),
            required: true,
            options: vec![],
        },
        InputDefinition {
            identifier: PASSWORD_INPUT.to_string(),
            input_type: "password".to_string(),
            required: true,
            options: vec![],
        },
    ]
}

/// Client-classified errors re-issue the prompt with a reason until the
/// retry budget is spent.
fn retryable(
    node: &TaskNode<'_>,
    context: &mut FlowContext,
    inputs: Vec<InputDefinition>,
    reason: &str,
) -> ExecutorResponse {
    let attempts: u32 = context
        .runtime_data
        .get(ATTEMPTS_KEY)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
        + 1;

    if attempts >= node.max_retries() {
        return ExecutorResponse::failure(reason);
    }

    // The stale secret must not satisfy the re-issued prompt.
    context.user_inputs.remove(PASSWORD_INPUT);

    let mut response = ExecutorResponse::input_required(inputs);
    response
        .runtime_data
        .insert(ATTEMPTS_KEY.to_string(), attempts.to_string());
    response
        .runtime_data
        .insert(FAILURE_REASON_KEY.to_string(), reason.to_string());
    response
}
