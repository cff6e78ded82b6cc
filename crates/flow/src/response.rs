//! Executor and flow step result types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::definition::{ActionDefinition, InputDefinition};

/// Outcome of one executor invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorStatus {
    Complete,
    UserInputRequired,
    ExternalRedirection,
    Failure,
}

/// The user assertion a completed ceremony hands to its consumer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub is_authenticated: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub attributes: Map<String, Value>,
}

impl AuthenticatedUser {
    pub fn unauthenticated() -> Self {
        Self {
            is_authenticated: false,
            user_id: None,
            attributes: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorResponse {
    pub status: Option<ExecutorStatus>,
    /// Inputs the client must still supply (UserInputRequired).
    pub required_inputs: Vec<InputDefinition>,
    /// Non-empty iff status is ExternalRedirection.
    pub redirect_url: Option<String>,
    /// Client-visible data (e.g. `idpName`) to resume the step.
    pub additional_data: Map<String, Value>,
    /// Merged into the context after the call.
    pub runtime_data: HashMap<String, String>,
    pub failure_reason: Option<String>,
    pub authenticated_user: Option<AuthenticatedUser>,
}

impl ExecutorResponse {
    pub fn status(&self) -> ExecutorStatus {
        self.status.unwrap_or(ExecutorStatus::Failure)
    }

    pub fn complete(authenticated_user: AuthenticatedUser) -> Self {
        Self {
            status: Some(ExecutorStatus::Complete),
            authenticated_user: Some(authenticated_user),
            ..Default::default()
        }
    }

    pub fn input_required(inputs: Vec<InputDefinition>) -> Self {
        Self {
            status: Some(ExecutorStatus::UserInputRequired),
            required_inputs: inputs,
            ..Default::default()
        }
    }

    pub fn redirection(url: String) -> Self {
        Self {
            status: Some(ExecutorStatus::ExternalRedirection),
            redirect_url: Some(url),
            ..Default::default()
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            status: Some(ExecutorStatus::Failure),
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    Incomplete,
    Complete,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    View,
    Redirection,
}

/// What one `execute` call hands back to the handler layer.
#[derive(Debug, Clone)]
pub struct FlowStepResult {
    pub flow_status: FlowStatus,
    pub step_type: StepType,
    pub inputs: Vec<InputDefinition>,
    pub actions: Vec<ActionDefinition>,
    pub redirect_url: Option<String>,
    pub data: Map<String, Value>,
    pub failure_reason: Option<String>,
    pub authenticated_user: Option<AuthenticatedUser>,
}

impl FlowStepResult {
    pub fn view() -> Self {
        Self {
            flow_status: FlowStatus::Incomplete,
            step_type: StepType::View,
            inputs: Vec::new(),
            actions: Vec::new(),
            redirect_url: None,
            data: Map::new(),
            failure_reason: None,
            authenticated_user: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            flow_status: FlowStatus::Failure,
            failure_reason: Some(reason.into()),
            ..Self::view()
        }
    }
}

/// Wire shape of the flow step payload.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowStepResponse {
    pub flow_id: String,
    pub flow_status: FlowStatus,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub inputs: Vec<InputDefinition>,
    pub actions: Vec<ActionDefinition>,
    #[serde(rename = "redirectURL", skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    #[schema(value_type = Object)]
    pub data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl FlowStepResponse {
    pub fn from_result(ceremony_id: String, result: &FlowStepResult) -> Self {
        Self {
            flow_id: ceremony_id,
            flow_status: result.flow_status,
            step_type: result.step_type,
            inputs: result.inputs.clone(),
            actions: result.actions.clone(),
            redirect_url: result.redirect_url.clone(),
            data: result.data.clone(),
            failure_reason: result.failure_reason.clone(),
        }
    }
}
