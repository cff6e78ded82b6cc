//! Creates the user at the end of a registration ceremony from everything
//! the flow gathered.

use serde_json::{Map, Value};
use shared::error::CommonError;

use crate::context::FlowContext;
use crate::definition::FlowType;
use crate::response::{AuthenticatedUser, ExecutorResponse};

use super::{ExecutorDeps, TaskNode};

const PENDING_KEY: &str = "pendingAttributes";
const COLLECTED_KEY: &str = "collectedAttributes";
const USER_ID_KEY: &str = "userId";

/// Inputs that are credentials or protocol plumbing, never attributes.
const NON_ATTRIBUTE_INPUTS: &[&str] = &["password", "otp", "code", "state"];

pub async fn execute(
    deps: &ExecutorDeps,
    node: &TaskNode<'_>,
    context: &mut FlowContext,
) -> Result<ExecutorResponse, CommonError> {
    if context.flow_type != FlowType::Registration {
        // A provisioning node inside an authentication flow is a broken
        // deployment, not a user mistake.
        return Err(CommonError::Unknown(anyhow::anyhow!(
            "provisioning node '{}' reached in an authentication flow",
            node.base.id
        )));
    }

    let mut attributes = Map::new();
    for key in [PENDING_KEY, COLLECTED_KEY] {
        if let Some(raw) = context.runtime_data.get(key)
            && let Ok(parsed) = serde_json::from_str::<Map<String, Value>>(raw)
        {
            for (k, v) in parsed {
                attributes.insert(k, v);
            }
        }
    }
    for (key, value) in &context.user_inputs {
        if NON_ATTRIBUTE_INPUTS.contains(&key.as_str()) || value.is_empty() {
            continue;
        }
        attributes.insert(key.clone(), Value::String(value.clone()));
    }
    if let Some(mobile) = context.runtime_data.get("otpMobile") {
        attributes.insert("mobile".to_string(), Value::String(mobile.clone()));
    }

    if attributes.is_empty() {
        return Ok(ExecutorResponse::failure(
            "No attributes available to provision the user",
        ));
    }

    let password = context.user_inputs.get("password").cloned();
    let user_type = node
        .base
        .properties
        .get("userType")
        .cloned()
        .unwrap_or_else(|| "person".to_string());

    let user = deps
        .users
        .create(directory::user::CreateUserRequest {
            org_unit_id: node.base.properties.get("ouId").cloned(),
            user_type,
            attributes: attributes.clone(),
            password,
        })
        .await?;

    tracing::info!(user_id = %user.id, "user provisioned by registration flow");

    // The freshly registered user finishes the ceremony signed in.
    let mut response = ExecutorResponse::complete(AuthenticatedUser {
        is_authenticated: true,
        user_id: Some(user.id.clone()),
        attributes,
    });
    response.runtime_data.insert(USER_ID_KEY.to_string(), user.id);
    response.runtime_data.remove(PENDING_KEY);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testsupport::{deps_with_user, task_node};
    use serde_json::json;

    #[tokio::test]
    async fn test_provisions_from_collected_state() {
        let deps = deps_with_user("existing", "pw").await;
        let base = task_node("provision");
        let node = TaskNode {
            base: &base,
            inputs: &[],
        };

        let mut ctx = FlowContext::new("signup", FlowType::Registration, "provision");
        ctx.user_inputs
            .insert("username".to_string(), "newcomer".to_string());
        ctx.user_inputs
            .insert("password".to_string(), "fresh-pw".to_string());
        ctx.runtime_data.insert(
            COLLECTED_KEY.to_string(),
            json!({"given_name": "New", "email": "new@example.com"}).to_string(),
        );

        let response = execute(&deps, &node, &mut ctx).await.unwrap();
        let user = response.authenticated_user.unwrap();
        assert!(user.is_authenticated);
        let user_id = user.user_id.unwrap();

        let stored = deps.users.get(&user_id).await.unwrap();
        assert_eq!(stored.attribute("username"), Some(&json!("newcomer")));
        assert_eq!(stored.attribute("given_name"), Some(&json!("New")));
        // The password became a credential, not an attribute.
        assert!(stored.attribute("password").is_none());
        assert!(stored.credential.is_some());

        // The new user can immediately authenticate.
        let mut filters = serde_json::Map::new();
        filters.insert("username".to_string(), json!("newcomer"));
        deps.users
            .verify_credentials(&filters, "fresh-pw")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_outside_registration() {
        let deps = deps_with_user("existing", "pw").await;
        let base = task_node("provision");
        let node = TaskNode {
            base: &base,
            inputs: &[],
        };
        let mut ctx = FlowContext::new("login", FlowType::Authentication, "provision");
        ctx.user_inputs
            .insert("username".to_string(), "x".to_string());

        let err = execute(&deps, &node, &mut ctx).await.unwrap_err();
        assert!(matches!(err, CommonError::Unknown(_)));
    }

    #[tokio::test]
    async fn test_fails_without_attributes() {
        let deps = deps_with_user("existing", "pw").await;
        let base = task_node("provision");
        let node = TaskNode {
            base: &base,
            inputs: &[],
        };
        let mut ctx = FlowContext::new("signup", FlowType::Registration, "provision");

        let response = execute(&deps, &node, &mut ctx).await.unwrap();
        assert_eq!(response.status(), crate::response::ExecutorStatus::Failure);
    }
}
