//! OIDC claims requests and scope-to-claim resolution.

use std::collections::{BTreeSet, HashMap};

use resources::application::Application;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// The `claims` authorization request parameter (OIDC Core §5.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ClaimsRequest {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[schema(value_type = HashMap<String, Object>)]
    pub userinfo: HashMap<String, Option<IndividualClaimRequest>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[schema(value_type = HashMap<String, Object>)]
    pub id_token: HashMap<String, Option<IndividualClaimRequest>>,
}

impl ClaimsRequest {
    pub fn is_empty(&self) -> bool {
        self.userinfo.is_empty() && self.id_token.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct IndividualClaimRequest {
    #[serde(default)]
    pub essential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<Object>>)]
    pub values: Option<Vec<Value>>,
}

impl IndividualClaimRequest {
    /// Whether a user's value satisfies the request's value constraints.
    fn matches(&self, value: &Value) -> bool {
        if let Some(expected) = &self.value {
            return expected == value;
        }
        if let Some(expected) = &self.values {
            return expected.contains(value);
        }
        true
    }
}

/// Assemble the userinfo claim set for a user.
///
/// The emitted claims are (i) the union of the application's
/// `scope_claims` over the granted scopes and (ii) the claims named by the
/// request's `userinfo` member, both intersected with the application's
/// allowed userinfo attributes. An empty allowed list places no
/// restriction. Requested claims with `value`/`values` constraints are
/// only returned when the user's value matches.
pub fn resolve_userinfo_claims(
    application: &Application,
    scopes: &[String],
    claims_request: Option<&ClaimsRequest>,
    user_attributes: &Map<String, Value>,
) -> Map<String, Value> {
    let allowed = &application.user_info.user_attributes;
    let is_allowed = |name: &str| allowed.is_empty() || allowed.iter().any(|a| a == name);

    let mut names: BTreeSet<String> = BTreeSet::new();
    for scope in scopes {
        if let Some(claims) = application.scope_claims.get(scope) {
            names.extend(claims.iter().cloned());
        }
    }
    if let Some(request) = claims_request {
        names.extend(request.userinfo.keys().cloned());
    }

    let mut resolved = Map::new();
    for name in names {
        if name == "sub" || !is_allowed(&name) {
            continue;
        }
        let Some(value) = user_attributes.get(&name) else {
            continue;
        };
        if let Some(Some(individual)) =
            claims_request.and_then(|request| request.userinfo.get(&name))
            && !individual.matches(value)
        {
            continue;
        }
        resolved.insert(name, value.clone());
    }

    resolved
}
