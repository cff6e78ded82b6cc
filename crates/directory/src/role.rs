//! Roles and permission aggregation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::group::GroupService;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RolePermission {
    pub resource_server_id: String,
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssigneeType {
    User,
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    /// User or group id, per `assignee_type`.
    pub id: String,
    #[serde(rename = "type")]
    pub assignee_type: AssigneeType,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ou_id: Option<String>,
    #[serde(default)]
    pub permissions: Vec<RolePermission>,
    #[serde(default)]
    pub assignments: Vec<RoleAssignment>,
}

#[async_trait]
pub trait RoleStoreLike: Send + Sync {
    async fn create_role(&self, role: &Role) -> Result<(), CommonError>;
    async fn get_role_by_id(&self, id: &str) -> Result<Option<Role>, CommonError>;
    async fn update_role(&self, role: &Role) -> Result<(), CommonError>;
    async fn delete_role(&self, id: &str) -> Result<(), CommonError>;
    async fn list_roles(&self) -> Result<Vec<Role>, CommonError>;
}

#[derive(Clone, Default)]
pub struct MemoryRoleStore {
    roles: Arc<DashMap<String, Role>>,
}

impl MemoryRoleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoleStoreLike for MemoryRoleStore {
    async fn create_role(&self, role: &Role) -> Result<(), CommonError> {
        match self.roles.entry(role.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CommonError::conflict(format!(
                "role '{}' already exists",
                role.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(role.clone());
                Ok(())
            }
        }
    }

    async fn get_role_by_id(&self, id: &str) -> Result<Option<Role>, CommonError> {
        Ok(self.roles.get(id).map(|r| r.value().clone()))
    }

    async fn update_role(&self, role: &Role) -> Result<(), CommonError> {
        match self.roles.get_mut(&role.id) {
            Some(mut entry) => {
                *entry.value_mut() = role.clone();
                Ok(())
            }
            None => Err(CommonError::not_found("role not found", role.id.clone())),
        }
    }

    async fn delete_role(&self, id: &str) -> Result<(), CommonError> {
        self.roles.remove(id);
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<Role>, CommonError> {
        Ok(self.roles.iter().map(|r| r.value().clone()).collect())
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ou_id: Option<String>,
    #[serde(default)]
    pub permissions: Vec<RolePermission>,
    #[serde(default)]
    pub assignments: Vec<RoleAssignment>,
}

#[derive(Clone)]
pub struct RoleService {
    store: Arc<dyn RoleStoreLike>,
    groups: GroupService,
}

impl RoleService {
    pub fn new(store: Arc<dyn RoleStoreLike>, groups: GroupService) -> Self {
        Self { store, groups }
    }

    pub fn in_memory(groups: GroupService) -> Self {
        Self::new(Arc::new(MemoryRoleStore::new()), groups)
    }

    pub async fn create(&self, request: RoleRequest) -> Result<Role, CommonError> {
        if request.name.is_empty() {
            return Err(CommonError::invalid_request("role name is required"));
        }
        let duplicate = self
            .store
            .list_roles()
            .await?
            .into_iter()
            .any(|r| r.name == request.name && r.ou_id == request.ou_id);
        if duplicate {
            return Err(CommonError::conflict(format!(
                "role named '{}' already exists in this organizational unit",
                request.name
            )));
        }

        let role = Role {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            description: request.description,
            ou_id: request.ou_id,
            permissions: request.permissions,
            assignments: request.assignments,
        };
        self.store.create_role(&role).await?;
        Ok(role)
    }

    pub async fn get(&self, id: &str) -> Result<Role, CommonError> {
        self.store
            .get_role_by_id(id)
            .await?
            .ok_or_else(|| CommonError::not_found("role not found", id))
    }

    pub async fn update(&self, id: &str, request: RoleRequest) -> Result<Role, CommonError> {
        self.get(id).await?;
        let role = Role {
            id: id.to_string(),
            name: request.name,
            description: request.description,
            ou_id: request.ou_id,
            permissions: request.permissions,
            assignments: request.assignments,
        };
        self.store.update_role(&role).await?;
        Ok(role)
    }

    pub async fn delete(&self, id: &str) -> Result<(), CommonError> {
        self.store.delete_role(id).await
    }

    pub async fn list(&self) -> Result<Vec<Role>, CommonError> {
        self.store.list_roles().await
    }

    /// Aggregate the user's permissions from direct USER assignments and
    /// GROUP assignments (through transitive group membership), merged per
    /// resource server and deduplicated.
    pub async fn permissions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<RolePermission>, CommonError> {
        let group_ids: BTreeSet<String> = self
            .groups
            .groups_for_user(user_id)
            .await?
            .into_iter()
            .map(|g| g.id)
            .collect();

        let mut merged: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for role in self.store.list_roles().await? {
            let assigned = role.assignments.iter().any(|a| match a.assignee_type {
                AssigneeType::User => a.id == user_id,
                AssigneeType::Group => group_ids.contains(&a.id),
            });
            if !assigned {
                continue;
            }
            for permission in role.permissions {
                merged
                    .entry(permission.resource_server_id)
                    .or_default()
                    .extend(permission.permissions);
            }
        }

        Ok(merged
            .into_iter()
            .map(|(resource_server_id, permissions)| RolePermission {
                resource_server_id,
                permissions: permissions.into_iter().collect(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupRequest;

    fn permission(server: &str, scopes: &[&str]) -> RolePermission {
        RolePermission {
            resource_server_id: server.to_string(),
            permissions: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_permissions_aggregate_direct_and_group_assignments() {
        let groups = GroupService::in_memory();
        let engineers = groups
            .create(GroupRequest {
                name: "engineers".to_string(),
                ou_id: None,
                users: vec!["u-1".to_string()],
                groups: vec![],
            })
            .await
            .unwrap();

        let roles = RoleService::in_memory(groups);
        roles
            .create(RoleRequest {
                name: "direct-role".to_string(),
                description: None,
                ou_id: None,
                permissions: vec![permission("api", &["read", "write"])],
                assignments: vec![RoleAssignment {
                    id: "u-1".to_string(),
                    assignee_type: AssigneeType::User,
                }],
            })
            .await
            .unwrap();
        roles
            .create(RoleRequest {
                name: "group-role".to_string(),
                description: None,
                ou_id: None,
                // Overlapping "read" permission must not duplicate.
                permissions: vec![permission("api", &["read", "admin"]), permission("billing", &["view"])],
                assignments: vec![RoleAssignment {
                    id: engineers.id.clone(),
                    assignee_type: AssigneeType::Group,
                }],
            })
            .await
            .unwrap();
        roles
            .create(RoleRequest {
                name: "unassigned".to_string(),
                description: None,
                ou_id: None,
                permissions: vec![permission("secret", &["all"])],
                assignments: vec![],
            })
            .await
            .unwrap();

        let permissions = roles.permissions_for_user("u-1").await.unwrap();
        assert_eq!(permissions.len(), 2);

        let api = permissions
            .iter()
            .find(|p| p.resource_server_id == "api")
            .unwrap();
        assert_eq!(api.permissions, vec!["admin", "read", "write"]);

        let billing = permissions
            .iter()
            .find(|p| p.resource_server_id == "billing")
            .unwrap();
        assert_eq!(billing.permissions, vec!["view"]);
    }

    #[tokio::test]
    async fn test_role_name_unique_per_ou() {
        let roles = RoleService::in_memory(GroupService::in_memory());
        roles
            .create(RoleRequest {
                name: "admin".to_string(),
                description: None,
                ou_id: Some("ou-1".to_string()),
                permissions: vec![],
                assignments: vec![],
            })
            .await
            .unwrap();
        let err = roles
            .create(RoleRequest {
                name: "admin".to_string(),
                description: None,
                ou_id: Some("ou-1".to_string()),
                permissions: vec![],
                assignments: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommonError::Conflict { .. }));
    }
}
