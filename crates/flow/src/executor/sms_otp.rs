//! SMS one-time-password verification.
//!
//! First visit resolves the target mobile number, issues a 6-digit code
//! through the [`super::OtpSender`] seam and suspends on the `otp` input.
//! Resumption verifies the code against its stored hash with a bounded
//! attempt budget.

use rand::Rng;
use serde_json::json;
use shared::codec::{constant_time_eq, sha256_hex};
use shared::error::CommonError;

use crate::context::{FAILURE_REASON_KEY, FlowContext};
use crate::definition::{FlowType, InputDefinition};
use crate::response::{AuthenticatedUser, ExecutorResponse};

use super::{ExecutorDeps, TaskNode};

const OTP_HASH_KEY: &str = "otpHash";
const OTP_ATTEMPTS_KEY: &str = "otpAttempts";
const OTP_MOBILE_KEY: &str = "otpMobile";
const USER_ID_KEY: &str = "userId";

const OTP_INPUT: &str = "otp";
const USERNAME_INPUT: &str = "username";
const MOBILE_INPUT: &str = "mobile";

pub async fn execute(
    deps: &ExecutorDeps,
    node: &TaskNode<'_>,
    context: &mut FlowContext,
) -> Result<ExecutorResponse, CommonError> {
    let has_pending_otp = context.runtime_data.contains_key(OTP_HASH_KEY);
    let otp_supplied = context
        .user_inputs
        .get(OTP_INPUT)
        .is_some_and(|v| !v.is_empty());

    if has_pending_otp && otp_supplied {
        return verify(node, context);
    }
    issue(deps, node, context).await
}

async fn issue(
    deps: &ExecutorDeps,
    node: &TaskNode<'_>,
    context: &mut FlowContext,
) -> Result<ExecutorResponse, CommonError> {
    // Resolve the mobile number: an already-identified user wins, then an
    // explicit username lookup, then (registration) a raw mobile input.
    let resolved = resolve_mobile(deps, context).await?;
    let (mobile, user_id) = match resolved {
        Resolved::Mobile { mobile, user_id } => (mobile, user_id),
        Resolved::NeedInput(input) => {
            return Ok(ExecutorResponse::input_required(vec![input]));
        }
        Resolved::Failure(response) => return Ok(*response),
    };

    let otp: u32 = rand::rngs::OsRng.gen_range(100_000..=999_999);
    let otp = otp.to_string();

    deps.otp_sender.send(&mobile, &otp).await?;

    let mut response = ExecutorResponse::input_required(vec![otp_input()]);
    response
        .runtime_data
        .insert(OTP_HASH_KEY.to_string(), sha256_hex(&otp));
    response
        .runtime_data
        .insert(OTP_ATTEMPTS_KEY.to_string(), "0".to_string());
    response
        .runtime_data
        .insert(OTP_MOBILE_KEY.to_string(), mobile);
    if let Some(user_id) = user_id {
        response
            .runtime_data
            .insert(USER_ID_KEY.to_string(), user_id);
    }
    response
        .additional_data
        .insert("otpSent".to_string(), json!(true));
    Ok(response)
}

enum Resolved {
    Mobile {
        mobile: String,
        user_id: Option<String>,
    },
    NeedInput(InputDefinition),
    Failure(Box<ExecutorResponse>),
}

async fn resolve_mobile(
    deps: &ExecutorDeps,
    context: &FlowContext,
) -> Result<Resolved, CommonError> {
    // A previous step already authenticated or identified the user.
    let known_user_id = context
        .authenticated_user
        .as_ref()
        .and_then(|u| u.user_id.clone())
        .or_else(|| context.runtime_data.get(USER_ID_KEY).cloned());

    if let Some(user_id) = known_user_id {
        let attributes = deps
            .users
            .get_attributes(&user_id, Some(&[MOBILE_INPUT.to_string()]))
            .await?;
        let Some(mobile) = attributes.get(MOBILE_INPUT).and_then(|v| v.as_str()) else {
            return Ok(Resolved::Failure(Box::new(ExecutorResponse::failure(
                "User has no mobile number",
            ))));
        };
        return Ok(Resolved::Mobile {
            mobile: mobile.to_string(),
            user_id: Some(user_id),
        });
    }

    // Identify by username.
    if let Some(username) = context.user_inputs.get(USERNAME_INPUT)
        && !username.is_empty()
    {
        let mut filters = serde_json::Map::new();
        filters.insert(USERNAME_INPUT.to_string(), json!(username));
        match deps.users.identify(&filters).await {
            Ok(user) => {
                if context.flow_type == FlowType::Registration {
                    return Ok(Resolved::Failure(Box::new(ExecutorResponse::failure(
                        "User already exists",
                    ))));
                }
                let Some(mobile) = user.attribute(MOBILE_INPUT).and_then(|v| v.as_str()) else {
                    return Ok(Resolved::Failure(Box::new(ExecutorResponse::failure(
                        "User has no mobile number",
                    ))));
                };
                return Ok(Resolved::Mobile {
                    mobile: mobile.to_string(),
                    user_id: Some(user.id),
                });
            }
            Err(CommonError::NotFound { .. }) => match context.flow_type {
                // Unknown user registering verifies a fresh mobile number.
                FlowType::Registration => {}
                FlowType::Authentication => {
                    return Ok(Resolved::Failure(Box::new(ExecutorResponse::failure(
                        "User not found",
                    ))));
                }
            },
            Err(other) => return Err(other),
        }
    } else if context.flow_type == FlowType::Authentication {
        return Ok(Resolved::NeedInput(InputDefinition {
            identifier: USERNAME_INPUT.to_string(),
            input_type: "text".to_string(),
            required: true,
            options: vec![],
        }));
    }

    // Registration: the mobile number itself is the input.
    match context.user_inputs.get(MOBILE_INPUT) {
        Some(mobile) if !mobile.is_empty() => Ok(Resolved::Mobile {
            mobile: mobile.clone(),
            user_id: None,
        }),
        _ => Ok(Resolved::NeedInput(InputDefinition {
            identifier: MOBILE_INPUT.to_string(),
            input_type: "text".to_string(),
            required: true,
            options: vec![],
        })),
    }
}

fn verify(node: &TaskNode<'_>, context: &mut FlowContext) -> Result<ExecutorResponse, CommonError> {
    let supplied = context
        .user_inputs
        .get(OTP_INPUT)
        .cloned()
        .unwrap_or_default();
    let stored_hash = context
        .runtime_data
        .get(OTP_HASH_KEY)
        .cloned()
        .unwrap_or_default();

    if constant_time_eq(sha256_hex(&supplied).as_bytes(), stored_hash.as_bytes()) {
        let mut response = match context.flow_type {
            FlowType::Authentication => {
                let user_id = context
                    .authenticated_user
                    .as_ref()
                    .and_then(|u| u.user_id.clone())
                    .or_else(|| context.runtime_data.get(USER_ID_KEY).cloned());
                ExecutorResponse::complete(AuthenticatedUser {
                    is_authenticated: true,
                    user_id,
                    attributes: serde_json::Map::new(),
                })
            }
            FlowType::Registration => {
                let mut response =
                    ExecutorResponse::complete(AuthenticatedUser::unauthenticated());
                response
                    .runtime_data
                    .insert("mobileVerified".to_string(), "true".to_string());
                if let Some(mobile) = context.runtime_data.get(OTP_MOBILE_KEY) {
                    response
                        .runtime_data
                        .insert(OTP_MOBILE_KEY.to_string(), mobile.clone());
                }
                response
            }
        };
        // The one-time secret is spent.
        context.runtime_data.remove(OTP_HASH_KEY);
        context.user_inputs.remove(OTP_INPUT);
        response
            .runtime_data
            .insert(OTP_ATTEMPTS_KEY.to_string(), "0".to_string());
        return Ok(response);
    }

    let attempts: u32 = context
        .runtime_data
        .get(OTP_ATTEMPTS_KEY)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
        + 1;

    if attempts >= node.max_retries() {
        return Ok(ExecutorResponse::failure("Maximum OTP attempts exceeded"));
    }

    context.user_inputs.remove(OTP_INPUT);
    let mut response = ExecutorResponse::input_required(vec![otp_input()]);
    response
        .runtime_data
        .insert(OTP_ATTEMPTS_KEY.to_string(), attempts.to_string());
    response
        .runtime_data
        .insert(FAILURE_REASON_KEY.to_string(), "Invalid OTP".to_string());
    Ok(response)
}

fn otp_input() -> InputDefinition {
    InputDefinition {
        identifier: OTP_INPUT.to_string(),
        input_type: "otp".to_string(),
        required: true,
        options: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testsupport::{deps_with_user, task_node};
    use crate::response::ExecutorStatus;

    fn merge(response: &ExecutorResponse, context: &mut FlowContext) {
        for (key, value) in &response.runtime_data {
            context
                .runtime_data
                .insert(key.clone(), value.clone());
        }
    }

    #[tokio::test]
    async fn test_issue_then_verify_roundtrip() {
        let deps = deps_with_user("jdoe", "pw").await;
        let base = task_node("otp");
        let node = TaskNode {
            base: &base,
            inputs: &[],
        };

        let mut ctx = FlowContext::new("login", FlowType::Authentication, "otp");
        ctx.user_inputs
            .insert("username".to_string(), "jdoe".to_string());

        let response = execute(&deps, &node, &mut ctx).await.unwrap();
        assert_eq!(response.status(), ExecutorStatus::UserInputRequired);
        assert_eq!(response.required_inputs[0].identifier, "otp");
        assert!(response.runtime_data.contains_key(OTP_HASH_KEY));
        assert!(response.runtime_data.contains_key(USER_ID_KEY));
        merge(&response, &mut ctx);

        // The hash is a 6-digit code; brute-force it in the test to avoid
        // reaching into the sender.
        let otp = (100_000..=999_999u32)
            .map(|n| n.to_string())
            .find(|candidate| {
                sha256_hex(candidate) == *ctx.runtime_data.get(OTP_HASH_KEY).unwrap()
            })
            .expect("stored hash must correspond to a 6-digit code");

        ctx.user_inputs.insert("otp".to_string(), otp);
        let response = execute(&deps, &node, &mut ctx).await.unwrap();
        assert_eq!(response.status(), ExecutorStatus::Complete);
        let user = response.authenticated_user.unwrap();
        assert!(user.is_authenticated);
        assert!(user.user_id.is_some());
    }

    #[tokio::test]
    async fn test_wrong_otp_retries_then_fails() {
        let deps = deps_with_user("jdoe", "pw").await;
        let base = task_node("otp");
        let node = TaskNode {
            base: &base,
            inputs: &[],
        };

        let mut ctx = FlowContext::new("login", FlowType::Authentication, "otp");
        ctx.user_inputs
            .insert("username".to_string(), "jdoe".to_string());
        let response = execute(&deps, &node, &mut ctx).await.unwrap();
        merge(&response, &mut ctx);

        for _ in 0..2 {
            ctx.user_inputs
                .insert("otp".to_string(), "000000".to_string());
            let response = execute(&deps, &node, &mut ctx).await.unwrap();
            assert_eq!(response.status(), ExecutorStatus::UserInputRequired);
            assert_eq!(
                response.runtime_data.get(FAILURE_REASON_KEY).unwrap(),
                "Invalid OTP"
            );
            merge(&response, &mut ctx);
        }

        ctx.user_inputs
            .insert("otp".to_string(), "000000".to_string());
        let response = execute(&deps, &node, &mut ctx).await.unwrap();
        assert_eq!(response.status(), ExecutorStatus::Failure);
    }

    #[tokio::test]
    async fn test_unknown_user_fails_authentication() {
        let deps = deps_with_user("jdoe", "pw").await;
        let base = task_node("otp");
        let node = TaskNode {
            base: &base,
            inputs: &[],
        };

        let mut ctx = FlowContext::new("login", FlowType::Authentication, "otp");
        ctx.user_inputs
            .insert("username".to_string(), "ghost".to_string());
        let response = execute(&deps, &node, &mut ctx).await.unwrap();
        assert_eq!(response.status(), ExecutorStatus::Failure);
        assert_eq!(response.failure_reason.as_deref(), Some("User not found"));
    }

    #[tokio::test]
    async fn test_registration_verifies_fresh_mobile() {
        let deps = deps_with_user("jdoe", "pw").await;
        let base = task_node("otp");
        let node = TaskNode {
            base: &base,
            inputs: &[],
        };

        let mut ctx = FlowContext::new("signup", FlowType::Registration, "otp");
        // No mobile yet: the executor must ask for it.
        let response = execute(&deps, &node, &mut ctx).await.unwrap();
        assert_eq!(response.status(), ExecutorStatus::UserInputRequired);
        assert_eq!(response.required_inputs[0].identifier, "mobile");

        ctx.user_inputs
            .insert("mobile".to_string(), "+14155550123".to_string());
        let response = execute(&deps, &node, &mut ctx).await.unwrap();
        assert_eq!(response.status(), ExecutorStatus::UserInputRequired);
        assert_eq!(response.required_inputs[0].identifier, "otp");
        merge(&response, &mut ctx);

        let otp = (100_000..=999_999u32)
            .map(|n| n.to_string())
            .find(|candidate| {
                sha256_hex(candidate) == *ctx.runtime_data.get(OTP_HASH_KEY).unwrap()
            })
            .unwrap();
        ctx.user_inputs.insert("otp".to_string(), otp);
        let response = execute(&deps, &node, &mut ctx).await.unwrap();
        assert_eq!(response.status(), ExecutorStatus::Complete);
        assert!(!response.authenticated_user.unwrap().is_authenticated);
        assert_eq!(
            response.runtime_data.get("mobileVerified").map(String::as_str),
            Some("true")
        );
    }
}
