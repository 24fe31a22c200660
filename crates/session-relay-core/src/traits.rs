//! Core traits and error types shared by the relay crates.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::{ResolvedMessage, RunContext, RunOutput, SessionDescriptor, SessionId};

/// Identifier of a resource owned by this server, independent of the
/// storage backend holding it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content held in the local resource store.
#[derive(Debug, Clone)]
pub struct StoredResource {
    pub id: ResourceId,
    /// MIME type served back to readers.
    pub content_type: String,
    pub content: Bytes,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Local store for content this server produces and owns.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Store content and return its new identifier.
    async fn put(&self, content_type: &str, content: Bytes) -> Result<ResourceId, StorageError>;

    /// Read a resource by id.
    async fn get(&self, id: &ResourceId) -> Result<Option<StoredResource>, StorageError>;
}

/// This server's record of the latest descriptor it produced or received
/// per session. It is a local view, not a canonical copy.
#[async_trait]
pub trait DescriptorStorage: Send + Sync {
    /// Get the last recorded descriptor for a session.
    async fn get(&self, id: &SessionId) -> Result<Option<SessionDescriptor>, StorageError>;

    /// Record a descriptor, returning the one it replaced.
    async fn save(
        &self,
        descriptor: SessionDescriptor,
    ) -> Result<Option<SessionDescriptor>, StorageError>;

    /// List recorded session ids.
    async fn list(&self) -> Result<Vec<SessionId>, StorageError>;
}

/// Kind of a resolution failure, without its detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionErrorKind {
    Unreachable,
    NotFound,
    MalformedContent,
    Timeout,
    Unauthorized,
}

/// Failure to resolve a single reference. Never fatal to a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("Unreachable: {0}")]
    Unreachable(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Malformed content: {0}")]
    MalformedContent(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl ResolutionError {
    #[must_use]
    pub const fn kind(&self) -> ResolutionErrorKind {
        match self {
            Self::Unreachable(_) => ResolutionErrorKind::Unreachable,
            Self::NotFound(_) => ResolutionErrorKind::NotFound,
            Self::MalformedContent(_) => ResolutionErrorKind::MalformedContent,
            Self::Timeout(_) => ResolutionErrorKind::Timeout,
            Self::Unauthorized(_) => ResolutionErrorKind::Unauthorized,
        }
    }

    /// Whether a short negative-cache window may remember this failure.
    /// Authorization and parse failures are always retried.
    #[must_use]
    pub const fn is_negatively_cacheable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::NotFound(_) | Self::Timeout(_)
        )
    }
}

/// Authorization error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,
    #[error("Access denied: {0}")]
    Denied(String),
}

/// What an inbound request wants to read or do.
#[derive(Debug, Clone, Copy)]
pub enum Access<'a> {
    Session(&'a SessionId),
    Resource(&'a ResourceId),
    Run(Option<&'a SessionId>),
}

/// Hook into the external authentication layer.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Bearer credentials to attach to an outbound fetch of `url`.
    async fn outbound_credentials(&self, url: &Url) -> Result<Option<String>, AuthError>;

    /// Verify an inbound request before it is served.
    async fn verify_inbound(&self, access: Access<'_>, token: Option<&str>)
    -> Result<(), AuthError>;
}

/// Lazy, ordered sequence of resolved history entries.
pub type HistoryStream = BoxStream<'static, ResolvedMessage>;

/// Result of a run.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    /// New session state, if the run produced one.
    pub state: Option<Value>,
}

/// Run engine error.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Run failed: {0}")]
    Failed(String),
    #[error("Run cancelled")]
    Cancelled,
}

/// The external engine that executes a run against a session.
#[async_trait]
pub trait RunEngine: Send + Sync {
    /// Execute a run.
    ///
    /// `history` resolves prior entries only as it is pulled. New messages
    /// are written to `output`.
    async fn run(
        &self,
        ctx: RunContext,
        history: HistoryStream,
        output: Arc<RunOutput>,
    ) -> Result<RunOutcome, RunError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_cache_policy() {
        assert!(ResolutionError::Unreachable("x".into()).is_negatively_cacheable());
        assert!(ResolutionError::Timeout(Duration::from_secs(1)).is_negatively_cacheable());
        assert!(!ResolutionError::Unauthorized("x".into()).is_negatively_cacheable());
        assert!(!ResolutionError::MalformedContent("x".into()).is_negatively_cacheable());
    }

    #[test]
    fn test_error_kind_serialization() {
        let kind = ResolutionError::NotFound("gone".into()).kind();
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"not_found\"");
    }
}
