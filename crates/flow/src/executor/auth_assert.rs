//! Final assertion node: confirms the ceremony actually produced what its
//! flow type promises.

use shared::error::CommonError;

use crate::context::FlowContext;
use crate::definition::FlowType;
use crate::response::ExecutorResponse;

use super::TaskNode;

pub fn execute(
    _node: &TaskNode<'_>,
    context: &mut FlowContext,
) -> Result<ExecutorResponse, CommonError> {
    match context.flow_type {
        FlowType::Authentication => match &context.authenticated_user {
            Some(user) if user.is_authenticated && user.user_id.is_some() => {
                Ok(ExecutorResponse::complete(user.clone()))
            }
            _ => Ok(ExecutorResponse::failure(
                "Authentication has not been completed",
            )),
        },
        FlowType::Registration => match &context.authenticated_user {
            Some(user) if user.user_id.is_some() => Ok(ExecutorResponse::complete(user.clone())),
            _ => Ok(ExecutorResponse::failure(
                "Registration has not been completed",
            )),
        },
    }
}
