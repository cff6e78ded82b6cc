//! Flow executors: the discrete steps task nodes perform.
//!
//! The set is a closed enumeration; unknown executor names are rejected at
//! graph compile time.

pub mod attribute_collector;
pub mod auth_assert;
pub mod basic_auth;
pub mod external_idp;
pub mod provisioning;
pub mod sms_otp;

#[cfg(test)]
pub(crate) mod testsupport;

use std::sync::Arc;

use async_trait::async_trait;
use directory::authn::AuthnProvider;
use directory::user::UserService;
use resources::idp::IdpService;
use shared::error::CommonError;

use crate::context::FlowContext;
use crate::definition::InputDefinition;
use crate::graph::NodeBase;
use crate::response::ExecutorResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    BasicAuth,
    SmsOtp,
    GithubOAuth,
    GoogleOAuth,
    AttributeCollector,
    Provisioning,
    AuthAssert,
}

impl ExecutorKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "BasicAuthExecutor" => Some(ExecutorKind::BasicAuth),
            "SMSOTPExecutor" => Some(ExecutorKind::SmsOtp),
            "GithubOAuthExecutor" => Some(ExecutorKind::GithubOAuth),
            "GoogleOAuthExecutor" => Some(ExecutorKind::GoogleOAuth),
            "AttributeCollector" => Some(ExecutorKind::AttributeCollector),
            "ProvisioningExecutor" => Some(ExecutorKind::Provisioning),
            "AuthAssertExecutor" => Some(ExecutorKind::AuthAssert),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecutorKind::BasicAuth => "BasicAuthExecutor",
            ExecutorKind::SmsOtp => "SMSOTPExecutor",
            ExecutorKind::GithubOAuth => "GithubOAuthExecutor",
            ExecutorKind::GoogleOAuth => "GoogleOAuthExecutor",
            ExecutorKind::AttributeCollector => "AttributeCollector",
            ExecutorKind::Provisioning => "ProvisioningExecutor",
            ExecutorKind::AuthAssert => "AuthAssertExecutor",
        }
    }

    /// Whether the node must name an identity provider.
    pub fn requires_idp(&self) -> bool {
        matches!(self, ExecutorKind::GithubOAuth | ExecutorKind::GoogleOAuth)
    }
}

/// The task node as an executor sees it.
pub struct TaskNode<'a> {
    pub base: &'a NodeBase,
    pub inputs: &'a [InputDefinition],
}

impl TaskNode<'_> {
    /// Bounded retry count for retryable prompt errors.
    pub fn max_retries(&self) -> u32 {
        self.base
            .properties
            .get("maxRetries")
            .and_then(|v| v.parse().ok())
            .unwrap_or(3)
    }
}

/// Delivery seam for one-time passwords. Actual transports live in the
/// notification system; the default implementation only logs.
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn send(&self, recipient: &str, otp: &str) -> Result<(), CommonError>;
}

pub struct LogOtpSender;

#[async_trait]
impl OtpSender for LogOtpSender {
    async fn send(&self, recipient: &str, _otp: &str) -> Result<(), CommonError> {
        tracing::info!(recipient, "one-time password issued (log-only sender)");
        Ok(())
    }
}

/// Dependencies injected into every executor.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub authn: AuthnProvider,
    pub users: UserService,
    pub idps: IdpService,
    pub otp_sender: Arc<dyn OtpSender>,
    pub http: reqwest::Client,
}

/// Dispatch table over the closed executor set.
#[derive(Clone)]
pub struct Executors {
    deps: ExecutorDeps,
}

impl Executors {
    pub fn new(deps: ExecutorDeps) -> Self {
        Self { deps }
    }

    pub async fn execute(
        &self,
        kind: ExecutorKind,
        node: &TaskNode<'_>,
        context: &mut FlowContext,
    ) -> Result<ExecutorResponse, CommonError> {
        tracing::debug!(executor = kind.name(), node = %node.base.id, "executing task node");
        match kind {
            ExecutorKind::BasicAuth => basic_auth::execute(&self.deps, node, context).await,
            ExecutorKind::SmsOtp => sms_otp::execute(&self.deps, node, context).await,
            ExecutorKind::GithubOAuth => {
                external_idp::execute(&self.deps, node, context, &external_idp::GITHUB).await
            }
            ExecutorKind::GoogleOAuth => {
                external_idp::execute(&self.deps, node, context, &external_idp::GOOGLE).await
            }
            ExecutorKind::AttributeCollector => {
                attribute_collector::execute(&self.deps, node, context).await
            }
            ExecutorKind::Provisioning => provisioning::execute(&self.deps, node, context).await,
            ExecutorKind::AuthAssert => auth_assert::execute(node, context),
        }
    }
}

/// Required inputs not yet present (or empty) in the accumulated user
/// inputs.
pub(crate) fn missing_required_inputs(
    inputs: &[InputDefinition],
    context: &FlowContext,
) -> Vec<InputDefinition> {
    inputs
        .iter()
        .filter(|input| {
            input.required
                && context
                    .user_inputs
                    .get(&input.identifier)
                    .is_none_or(|v| v.is_empty())
        })
        .cloned()
        .collect()
}
