//! Per-ceremony execution state and its versioned store.
//!
//! A context lives for exactly one ceremony. The store enforces that
//! concurrent submissions for the same ceremony cannot interleave: saves
//! are compare-and-swap on a version counter, and a stale writer is
//! rejected.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::error::CommonError;
use uuid::Uuid;

use crate::definition::FlowType;
use crate::response::AuthenticatedUser;

/// Runtime-data key an executor uses to surface a retryable prompt error;
/// the engine lifts it into the next response and removes it.
pub const FAILURE_REASON_KEY: &str = "failureReason";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowContext {
    /// Ceremony instance id; the store key.
    pub ceremony_id: String,
    /// Flow definition id in the registry.
    pub flow_id: String,
    pub flow_type: FlowType,
    pub current_node_id: String,
    /// Accumulated user-supplied values.
    pub user_inputs: HashMap<String, String>,
    /// Executor scratch space carried across round trips.
    pub runtime_data: HashMap<String, String>,
    /// Enrichment passed in by the caller (e.g. dynamic input options).
    pub forwarded_data: Map<String, Value>,
    pub current_action: Option<String>,
    pub authenticated_user: Option<AuthenticatedUser>,
    pub verbose: bool,
}

impl FlowContext {
    pub fn new(flow_id: &str, flow_type: FlowType, start_node_id: &str) -> Self {
        Self {
            ceremony_id: Uuid::new_v4().to_string(),
            flow_id: flow_id.to_string(),
            flow_type,
            current_node_id: start_node_id.to_string(),
            user_inputs: HashMap::new(),
            runtime_data: HashMap::new(),
            forwarded_data: Map::new(),
            current_action: None,
            authenticated_user: None,
            verbose: false,
        }
    }
}

struct VersionedContext {
    version: u64,
    context: FlowContext,
    expires_at: DateTime<Utc>,
}

/// Ceremony store with optimistic concurrency.
pub struct ContextStore {
    entries: DashMap<String, VersionedContext>,
    ttl: Duration,
}

impl ContextStore {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Insert a fresh context at version 1.
    pub fn create(&self, context: FlowContext) -> u64 {
        let ceremony_id = context.ceremony_id.clone();
        self.entries.insert(
            ceremony_id,
            VersionedContext {
                version: 1,
                context,
                expires_at: Utc::now() + self.ttl,
            },
        );
        1
    }

    /// Load a context and its version for a subsequent CAS save.
    pub fn load(&self, ceremony_id: &str) -> Result<(FlowContext, u64), CommonError> {
        let entry = self
            .entries
            .get(ceremony_id)
            .ok_or_else(|| CommonError::not_found("unknown or expired ceremony", ceremony_id))?;
        if entry.expires_at < Utc::now() {
            drop(entry);
            self.entries.remove(ceremony_id);
            return Err(CommonError::not_found(
                "unknown or expired ceremony",
                ceremony_id,
            ));
        }
        Ok((entry.context.clone(), entry.version))
    }

    /// Persist a mutated context if nobody else saved since `expected`.
    pub fn save(
        &self,
        context: FlowContext,
        expected_version: u64,
    ) -> Result<u64, CommonError> {
        let mut entry = self
            .entries
            .get_mut(&context.ceremony_id)
            .ok_or_else(|| {
                CommonError::not_found("unknown or expired ceremony", context.ceremony_id.clone())
            })?;
        if entry.version != expected_version {
            return Err(CommonError::conflict(
                "a concurrent submission already advanced this ceremony",
            ));
        }
        entry.version += 1;
        entry.context = context;
        entry.expires_at = Utc::now() + self.ttl;
        Ok(entry.version)
    }

    /// Drop a ceremony once it completed or failed.
    pub fn retire(&self, ceremony_id: &str) {
        self.entries.remove(ceremony_id);
    }

    /// Remove expired ceremonies; returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at >= now);
        before - self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> FlowContext {
        FlowContext::new("login", FlowType::Authentication, "start")
    }

    #[test]
    fn test_create_load_save_cycle() {
        let store = ContextStore::new(600);
        let ctx = context();
        let ceremony_id = ctx.ceremony_id.clone();
        store.create(ctx);

        let (mut loaded, version) = store.load(&ceremony_id).unwrap();
        assert_eq!(version, 1);
        loaded.current_node_id = "next".to_string();
        let new_version = store.save(loaded, version).unwrap();
        assert_eq!(new_version, 2);

        let (reloaded, _) = store.load(&ceremony_id).unwrap();
        assert_eq!(reloaded.current_node_id, "next");
    }

    #[test]
    fn test_stale_save_rejected() {
        let store = ContextStore::new(600);
        let ctx = context();
        let ceremony_id = ctx.ceremony_id.clone();
        store.create(ctx);

        let (first, v1) = store.load(&ceremony_id).unwrap();
        let (second, v2) = store.load(&ceremony_id).unwrap();
        assert_eq!(v1, v2);

        store.save(first, v1).unwrap();
        // The second writer raced and must be rejected.
        let err = store.save(second, v2).unwrap_err();
        assert!(matches!(err, CommonError::Conflict { .. }));
    }

    #[test]
    fn test_retired_ceremony_not_loadable() {
        let store = ContextStore::new(600);
        let ctx = context();
        let ceremony_id = ctx.ceremony_id.clone();
        store.create(ctx);
        store.retire(&ceremony_id);
        assert!(store.load(&ceremony_id).is_err());
    }

    #[test]
    fn test_expired_ceremony_not_loadable() {
        let store = ContextStore::new(-1);
        let ctx = context();
        let ceremony_id = ctx.ceremony_id.clone();
        store.create(ctx);
        assert!(store.load(&ceremony_id).is_err());
        assert_eq!(store.sweep_expired(), 0); // already dropped by load
    }

    #[test]
    fn test_sweep_expired() {
        let store = ContextStore::new(-1);
        store.create(context());
        store.create(context());
        assert_eq!(store.sweep_expired(), 2);
    }
}
