//! Instance storage boundary and the in-memory implementation
//!
//! Every write is a compare-and-set against the instance version the caller
//! read. A manual action and an SLA-triggered escalation racing on the same
//! instance therefore cannot both land: the second writer gets
//! [`StoreError::VersionConflict`].

use approval_types::{ApprovalError, ApprovalInstance, ApprovalStatus, InstanceId, TenantId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Errors raised by an instance store
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Instance not found: {0}")]
    NotFound(InstanceId),

    #[error("Instance already exists: {0}")]
    AlreadyExists(InstanceId),

    #[error("Version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: InstanceId,
        expected: u64,
        actual: u64,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for ApprovalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ApprovalError::InstanceNotFound(id),
            StoreError::VersionConflict {
                id,
                expected,
                actual,
            } => ApprovalError::StaleVersion {
                id,
                expected,
                actual,
            },
            other => ApprovalError::Store(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for approval instances
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Insert a new instance. Returns it with its first version.
    async fn create(&self, instance: ApprovalInstance) -> StoreResult<ApprovalInstance>;

    async fn get(&self, id: &InstanceId) -> StoreResult<Option<ApprovalInstance>>;

    /// Replace an instance if its stored version is still `expected_version`.
    /// Returns the stored copy with the advanced version.
    async fn update(
        &self,
        instance: ApprovalInstance,
        expected_version: u64,
    ) -> StoreResult<ApprovalInstance>;

    /// Atomically update an escalated instance and insert its successor.
    /// Neither write happens if the version check fails.
    async fn commit_escalation(
        &self,
        original: ApprovalInstance,
        expected_version: u64,
        successor: ApprovalInstance,
    ) -> StoreResult<(ApprovalInstance, ApprovalInstance)>;

    /// Open instances across all tenants
    async fn list_open(&self) -> StoreResult<Vec<ApprovalInstance>>;

    /// Instances of one tenant, optionally filtered by status
    async fn query(
        &self,
        tenant: &TenantId,
        status: Option<ApprovalStatus>,
    ) -> StoreResult<Vec<ApprovalInstance>>;
}

/// In-memory store for development and testing
#[derive(Debug, Default, Clone)]
pub struct InMemoryInstanceStore {
    instances: Arc<RwLock<HashMap<InstanceId, ApprovalInstance>>>,
}

impl InMemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    fn check_version(
        stored: &ApprovalInstance,
        expected_version: u64,
    ) -> StoreResult<()> {
        if stored.version == expected_version {
            Ok(())
        } else {
            Err(StoreError::VersionConflict {
                id: stored.id.clone(),
                expected: expected_version,
                actual: stored.version,
            })
        }
    }
}

#[async_trait]
impl InstanceStore for InMemoryInstanceStore {
    async fn create(&self, mut instance: ApprovalInstance) -> StoreResult<ApprovalInstance> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Err(StoreError::AlreadyExists(instance.id));
        }
        instance.version = 1;
        instances.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn get(&self, id: &InstanceId) -> StoreResult<Option<ApprovalInstance>> {
        let instances = self.instances.read().await;
        Ok(instances.get(id).cloned())
    }

    async fn update(
        &self,
        mut instance: ApprovalInstance,
        expected_version: u64,
    ) -> StoreResult<ApprovalInstance> {
        let mut instances = self.instances.write().await;
        let stored = instances
            .get(&instance.id)
            .ok_or_else(|| StoreError::NotFound(instance.id.clone()))?;
        Self::check_version(stored, expected_version)?;

        instance.version = expected_version + 1;
        instances.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    async fn commit_escalation(
        &self,
        mut original: ApprovalInstance,
        expected_version: u64,
        mut successor: ApprovalInstance,
    ) -> StoreResult<(ApprovalInstance, ApprovalInstance)> {
        let mut instances = self.instances.write().await;
        let stored = instances
            .get(&original.id)
            .ok_or_else(|| StoreError::NotFound(original.id.clone()))?;
        Self::check_version(stored, expected_version)?;
        if instances.contains_key(&successor.id) {
            return Err(StoreError::AlreadyExists(successor.id));
        }

        original.version = expected_version + 1;
        successor.version = 1;
        instances.insert(original.id.clone(), original.clone());
        instances.insert(successor.id.clone(), successor.clone());
        Ok((original, successor))
    }

    async fn list_open(&self) -> StoreResult<Vec<ApprovalInstance>> {
        let instances = self.instances.read().await;
        Ok(instances.values().filter(|i| i.is_open()).cloned().collect())
    }

    async fn query(
        &self,
        tenant: &TenantId,
        status: Option<ApprovalStatus>,
    ) -> StoreResult<Vec<ApprovalInstance>> {
        let instances = self.instances.read().await;
        let mut found: Vec<ApprovalInstance> = instances
            .values()
            .filter(|i| &i.tenant_id == tenant)
            .filter(|i| status.map_or(true, |s| i.status == s))
            .cloned()
            .collect();
        found.sort_by_key(|i| i.created_at);
        Ok(found)
    }
}
