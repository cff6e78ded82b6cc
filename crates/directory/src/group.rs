//! Groups with nested membership.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ou_id: Option<String>,
    /// Direct user members.
    #[serde(default)]
    pub users: Vec<String>,
    /// Nested member groups.
    #[serde(default)]
    pub groups: Vec<String>,
}

#[async_trait]
pub trait GroupStoreLike: Send + Sync {
    async fn create_group(&self, group: &Group) -> Result<(), CommonError>;
    async fn get_group_by_id(&self, id: &str) -> Result<Option<Group>, CommonError>;
    async fn update_group(&self, group: &Group) -> Result<(), CommonError>;
    async fn delete_group(&self, id: &str) -> Result<(), CommonError>;
    async fn list_groups(&self) -> Result<Vec<Group>, CommonError>;
}

#[derive(Clone, Default)]
pub struct MemoryGroupStore {
    groups: Arc<DashMap<String, Group>>,
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupStoreLike for MemoryGroupStore {
    async fn create_group(&self, group: &Group) -> Result<(), CommonError> {
        match self.groups.entry(group.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CommonError::conflict(format!(
                "group '{}' already exists",
                group.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(group.clone());
                Ok(())
            }
        }
    }

    async fn get_group_by_id(&self, id: &str) -> Result<Option<Group>, CommonError> {
        Ok(self.groups.get(id).map(|g| g.value().clone()))
    }

    async fn update_group(&self, group: &Group) -> Result<(), CommonError> {
        match self.groups.get_mut(&group.id) {
            Some(mut entry) => {
                *entry.value_mut() = group.clone();
                Ok(())
            }
            None => Err(CommonError::not_found("group not found", group.id.clone())),
        }
    }

    async fn delete_group(&self, id: &str) -> Result<(), CommonError> {
        self.groups.remove(id);
        Ok(())
    }

    async fn list_groups(&self) -> Result<Vec<Group>, CommonError> {
        Ok(self.groups.iter().map(|g| g.value().clone()).collect())
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupRequest {
    pub name: String,
    #[serde(default)]
    pub ou_id: Option<String>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Clone)]
pub struct GroupService {
    store: Arc<dyn GroupStoreLike>,
}

impl GroupService {
    pub fn new(store: Arc<dyn GroupStoreLike>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryGroupStore::new()))
    }

    pub async fn create(&self, request: GroupRequest) -> Result<Group, CommonError> {
        if request.name.is_empty() {
            return Err(CommonError::invalid_request("group name is required"));
        }
        let duplicate = self
            .store
            .list_groups()
            .await?
            .into_iter()
            .any(|g| g.name == request.name && g.ou_id == request.ou_id);
        if duplicate {
            return Err(CommonError::conflict(format!(
                "group named '{}' already exists in this organizational unit",
                request.name
            )));
        }

        let group = Group {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            ou_id: request.ou_id,
            users: request.users,
            groups: request.groups,
        };
        self.store.create_group(&group).await?;
        Ok(group)
    }

    pub async fn get(&self, id: &str) -> Result<Group, CommonError> {
        self.store
            .get_group_by_id(id)
            .await?
            .ok_or_else(|| CommonError::not_found("group not found", id))
    }

    pub async fn update(&self, id: &str, request: GroupRequest) -> Result<Group, CommonError> {
        self.get(id).await?;
        let group = Group {
            id: id.to_string(),
            name: request.name,
            ou_id: request.ou_id,
            users: request.users,
            groups: request.groups,
        };
        self.store.update_group(&group).await?;
        Ok(group)
    }

    pub async fn delete(&self, id: &str) -> Result<(), CommonError> {
        self.store.delete_group(id).await
    }

    pub async fn list(&self) -> Result<Vec<Group>, CommonError> {
        self.store.list_groups().await
    }

    /// Every group the user belongs to, including groups reached through
    /// nested group membership. Cycles are tolerated via the visited set.
    pub async fn groups_for_user(&self, user_id: &str) -> Result<Vec<Group>, CommonError> {
        let all = self.store.list_groups().await?;

        let mut member_ids: HashSet<String> = all
            .iter()
            .filter(|g| g.users.iter().any(|u| u == user_id))
            .map(|g| g.id.clone())
            .collect();

        // Expand upward: a group containing a member group inherits its
        // members.
        loop {
            let before = member_ids.len();
            for group in &all {
                if member_ids.contains(&group.id) {
                    continue;
                }
                if group.groups.iter().any(|g| member_ids.contains(g)) {
                    member_ids.insert(group.id.clone());
                }
            }
            if member_ids.len() == before {
                break;
            }
        }

        Ok(all
            .into_iter()
            .filter(|g| member_ids.contains(&g.id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_name_unique_per_ou() {
        let service = GroupService::in_memory();
        service
            .create(GroupRequest {
                name: "admins".to_string(),
                ou_id: Some("ou-1".to_string()),
                users: vec![],
                groups: vec![],
            })
            .await
            .unwrap();

        // Same name in another OU is fine.
        service
            .create(GroupRequest {
                name: "admins".to_string(),
                ou_id: Some("ou-2".to_string()),
                users: vec![],
                groups: vec![],
            })
            .await
            .unwrap();

        // Same name in the same OU conflicts.
        let err = service
            .create(GroupRequest {
                name: "admins".to_string(),
                ou_id: Some("ou-1".to_string()),
                users: vec![],
                groups: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CommonError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_groups_for_user_includes_nested() {
        let service = GroupService::in_memory();
        let engineers = service
            .create(GroupRequest {
                name: "engineers".to_string(),
                ou_id: None,
                users: vec!["u-1".to_string()],
                groups: vec![],
            })
            .await
            .unwrap();
        let staff = service
            .create(GroupRequest {
                name: "staff".to_string(),
                ou_id: None,
                users: vec![],
                groups: vec![engineers.id.clone()],
            })
            .await
            .unwrap();
        service
            .create(GroupRequest {
                name: "unrelated".to_string(),
                ou_id: None,
                users: vec!["u-2".to_string()],
                groups: vec![],
            })
            .await
            .unwrap();

        let mut names: Vec<String> = service
            .groups_for_user("u-1")
            .await
            .unwrap()
            .into_iter()
            .map(|g| g.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["engineers", "staff"]);
        assert_eq!(staff.users.len(), 0);
    }
}
