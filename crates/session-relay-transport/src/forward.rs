//! Table of upstream resources this server proxies for its peers.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use session_relay_core::ResourceId;
use url::Url;

/// An upstream resource reachable by this server but not by its peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedResource {
    pub upstream: Url,
    /// Content type served to readers.
    pub content_type: String,
}

/// Explicitly registered forwards. The gateway serves nothing else.
#[derive(Debug, Default)]
pub struct ForwardTable {
    entries: RwLock<HashMap<ResourceId, ForwardedResource>>,
}

impl ForwardTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `upstream` under a chosen id, replacing any previous entry.
    pub fn register(&self, id: ResourceId, upstream: Url, content_type: impl Into<String>) {
        tracing::debug!(%id, %upstream, "Registered forwarded resource");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                ForwardedResource {
                    upstream,
                    content_type: content_type.into(),
                },
            );
    }

    /// Register `upstream` under a fresh id.
    pub fn insert(&self, upstream: Url, content_type: impl Into<String>) -> ResourceId {
        let id = ResourceId::generate();
        self.register(id.clone(), upstream, content_type);
        id
    }

    #[must_use]
    pub fn lookup(&self, id: &ResourceId) -> Option<ForwardedResource> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn remove(&self, id: &ResourceId) -> Option<ForwardedResource> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup_remove() {
        let table = ForwardTable::new();
        let upstream = Url::parse("http://10.0.0.5:9000/bucket/obj").unwrap();

        let id = table.insert(upstream.clone(), "application/json");
        assert_eq!(table.lookup(&id).unwrap().upstream, upstream);
        assert!(table.lookup(&ResourceId::new("other")).is_none());

        assert!(table.remove(&id).is_some());
        assert!(table.is_empty());
    }
}
