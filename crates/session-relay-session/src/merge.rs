//! Appending newly produced content to a session descriptor.

use bytes::Bytes;
use serde_json::Value;
use session_relay_core::{ContentReference, Message, SessionDescriptor, StorageError};
use session_relay_resolver::LocalResources;
use thiserror::Error;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Merge configuration.
#[derive(Clone, Debug)]
pub struct MergeConfig {
    /// Serialized content up to this size is embedded inline; anything
    /// larger is written to the local resource store. Zero stores
    /// everything.
    pub inline_threshold: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            inline_threshold: 4096,
        }
    }
}

/// Merge error.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Failed to serialize content: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to store content: {0}")]
    Storage(#[from] StorageError),
}

/// Stores new content and produces the next descriptor.
///
/// There is no cross-server locking: two servers merging onto the same
/// prior descriptor produce two divergent descriptors.
#[derive(Clone)]
pub struct MergeCoordinator {
    local: LocalResources,
    config: MergeConfig,
}

impl MergeCoordinator {
    #[must_use]
    pub const fn new(local: LocalResources, config: MergeConfig) -> Self {
        Self { local, config }
    }

    /// Return a copy of `prior` with `messages` appended to its history
    /// and, if given, `new_state` as its state. `prior` is left untouched.
    ///
    /// # Errors
    /// Returns error if content cannot be serialized or stored.
    pub async fn merge(
        &self,
        prior: &SessionDescriptor,
        messages: &[Message],
        new_state: Option<&Value>,
    ) -> Result<SessionDescriptor, MergeError> {
        let mut next = prior.clone();

        for message in messages {
            let reference = self.store(serde_json::to_value(message)?).await?;
            next.push_history(reference);
        }

        if let Some(state) = new_state {
            next.set_state(Some(self.store(state.clone()).await?));
        }

        tracing::debug!(
            session = %next.id(),
            appended = messages.len(),
            state_updated = new_state.is_some(),
            history = next.len(),
            "Merged run output into descriptor"
        );

        Ok(next)
    }

    /// Obtain a reference for `value`, embedding small content and storing
    /// the rest. Strings and null are always stored since they cannot be
    /// carried inline in a descriptor.
    async fn store(&self, value: Value) -> Result<ContentReference, MergeError> {
        let bytes = serde_json::to_vec(&value)?;
        if bytes.len() <= self.config.inline_threshold && !value.is_string() && !value.is_null() {
            return Ok(ContentReference::Inline(value));
        }

        let id = self
            .local
            .store()
            .put(JSON_CONTENT_TYPE, Bytes::from(bytes))
            .await?;
        Ok(ContentReference::Remote(self.local.resource_url(&id)))
    }
}
