//! In-memory resource and descriptor storage.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use bytes::Bytes;
use session_relay_core::{
    DescriptorStorage, ResourceId, ResourceStore, SessionDescriptor, SessionId, StorageError,
    StoredResource,
};

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// In-memory resource store.
///
/// Useful for development and single-process deployments.
/// Data is lost on restart.
#[derive(Default)]
pub struct MemoryResourceStore {
    resources: RwLock<HashMap<ResourceId, StoredResource>>,
}

impl MemoryResourceStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored resources.
    ///
    /// # Errors
    /// Returns error if the lock is poisoned.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self
            .resources
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .len())
    }

    /// Whether the store is empty.
    ///
    /// # Errors
    /// Returns error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        self.len().map(|n| n == 0)
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn put(&self, content_type: &str, content: Bytes) -> Result<ResourceId, StorageError> {
        let id = ResourceId::generate();
        let resource = StoredResource {
            id: id.clone(),
            content_type: content_type.to_string(),
            content,
            created_at: now(),
        };

        self.resources
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .insert(id.clone(), resource);

        Ok(id)
    }

    async fn get(&self, id: &ResourceId) -> Result<Option<StoredResource>, StorageError> {
        Ok(self
            .resources
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(id)
            .cloned())
    }
}

/// In-memory record of the latest descriptor per session.
#[derive(Default)]
pub struct MemoryDescriptorStorage {
    descriptors: RwLock<HashMap<SessionId, SessionDescriptor>>,
}

impl MemoryDescriptorStorage {
    /// Create a new in-memory descriptor storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DescriptorStorage for MemoryDescriptorStorage {
    async fn get(&self, id: &SessionId) -> Result<Option<SessionDescriptor>, StorageError> {
        Ok(self
            .descriptors
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(id)
            .cloned())
    }

    async fn save(
        &self,
        descriptor: SessionDescriptor,
    ) -> Result<Option<SessionDescriptor>, StorageError> {
        Ok(self
            .descriptors
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .insert(descriptor.id().clone(), descriptor))
    }

    async fn list(&self) -> Result<Vec<SessionId>, StorageError> {
        let mut ids: Vec<SessionId> = self
            .descriptors
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }
}
