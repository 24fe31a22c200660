//! Resolution of content references to content.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use session_relay_core::{
    AllowAll, Authorizer, ContentReference, Message, MessagePart, ResolutionError, ResourceId,
    ResourceStore,
};
use url::Url;

use crate::{
    cache::{CacheConfig, ResolutionCache},
    fetch::ContentFetcher,
};

/// Resolver configuration.
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// Limit for a single remote fetch.
    pub fetch_timeout: Duration,
    /// How long unreachable/not-found/timeout outcomes are remembered.
    /// Zero disables negative caching.
    pub negative_ttl: Duration,
    pub cache: CacheConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            negative_ttl: Duration::from_secs(2),
            cache: CacheConfig::default(),
        }
    }
}

/// Resources owned by this server and the public URL they are served under.
#[derive(Clone)]
pub struct LocalResources {
    base: Url,
    store: Arc<dyn ResourceStore>,
}

impl LocalResources {
    /// `public_base` is the URL peers use to reach this server.
    #[must_use]
    pub fn new(mut public_base: Url, store: Arc<dyn ResourceStore>) -> Self {
        if !public_base.path().ends_with('/') {
            let path = format!("{}/", public_base.path());
            public_base.set_path(&path);
        }
        Self {
            base: public_base,
            store,
        }
    }

    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    /// Public URL of a resource served by this server.
    #[must_use]
    pub fn resource_url(&self, id: &ResourceId) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("resources").push(id.as_str());
        }
        url
    }

    /// Resource id if `url` points at this server's resource endpoint.
    #[must_use]
    pub fn resource_id(&self, url: &Url) -> Option<ResourceId> {
        if url.origin() != self.base.origin() {
            return None;
        }
        let rest = url.path().strip_prefix(self.base.path())?;
        let id = rest.strip_prefix("resources/")?;
        (!id.is_empty() && !id.contains('/')).then(|| ResourceId::new(id))
    }
}

/// Resolves references through the cache, local storage or the network.
pub struct Resolver {
    fetcher: Arc<dyn ContentFetcher>,
    cache: Arc<ResolutionCache>,
    authorizer: Arc<dyn Authorizer>,
    local: Option<LocalResources>,
    negative: Mutex<HashMap<Url, (Instant, ResolutionError)>>,
    config: ResolverConfig,
}

impl Resolver {
    /// Create a resolver with its own cache and no outbound credentials.
    #[must_use]
    pub fn new(fetcher: Arc<dyn ContentFetcher>, config: ResolverConfig) -> Self {
        Self {
            fetcher,
            cache: Arc::new(ResolutionCache::new(config.cache.clone())),
            authorizer: Arc::new(AllowAll),
            local: None,
            negative: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Share an existing cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ResolutionCache>) -> Self {
        self.cache = cache;
        self
    }

    #[must_use]
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Read this server's own resources from storage instead of over HTTP.
    #[must_use]
    pub fn with_local(mut self, local: LocalResources) -> Self {
        self.local = Some(local);
        self
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    #[must_use]
    pub const fn local(&self) -> Option<&LocalResources> {
        self.local.as_ref()
    }

    #[must_use]
    pub const fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve a reference to JSON content.
    ///
    /// # Errors
    /// Returns a `ResolutionError` scoped to this reference.
    pub async fn resolve(&self, reference: &ContentReference) -> Result<Value, ResolutionError> {
        self.resolve_as(reference).await
    }

    /// Resolve a reference and parse it as a history message.
    ///
    /// # Errors
    /// Returns `MalformedContent` if the content is not a message.
    pub async fn resolve_message(
        &self,
        reference: &ContentReference,
    ) -> Result<Message, ResolutionError> {
        self.resolve_as(reference).await
    }

    /// Resolve a reference to raw bytes without decoding.
    ///
    /// # Errors
    /// Returns a `ResolutionError` scoped to this reference.
    pub async fn resolve_raw(&self, reference: &ContentReference) -> Result<Bytes, ResolutionError> {
        match reference {
            ContentReference::Inline(Value::String(text)) => Ok(Bytes::from(text.clone())),
            ContentReference::Inline(value) => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| ResolutionError::MalformedContent(e.to_string())),
            ContentReference::Remote(url) => self.load(url, |bytes| Ok(bytes.clone())).await,
        }
    }

    /// Resolve the content of one message part, inline or behind its
    /// `content_url`.
    ///
    /// # Errors
    /// Returns `MalformedContent` for a part without content, otherwise a
    /// `ResolutionError` scoped to the part's URL.
    pub async fn resolve_part(&self, part: &MessagePart) -> Result<Bytes, ResolutionError> {
        let reference = part.reference().ok_or_else(|| {
            ResolutionError::MalformedContent("message part has no content".to_string())
        })?;
        self.resolve_raw(&reference).await
    }

    async fn resolve_as<T: DeserializeOwned>(
        &self,
        reference: &ContentReference,
    ) -> Result<T, ResolutionError> {
        match reference {
            ContentReference::Inline(value) => serde_json::from_value(value.clone())
                .map_err(|e| ResolutionError::MalformedContent(format!("{reference}: {e}"))),
            ContentReference::Remote(url) => {
                self.load(url, |bytes| {
                    serde_json::from_slice(bytes)
                        .map_err(|e| ResolutionError::MalformedContent(format!("{url}: {e}")))
                })
                .await
            }
        }
    }

    /// Forget any cached outcome for a reference.
    pub fn invalidate(&self, reference: &ContentReference) {
        if let ContentReference::Remote(url) = reference {
            self.cache.invalidate(url);
            self.negative
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(url);
        }
    }

    async fn load<T>(
        &self,
        url: &Url,
        parse: impl Fn(&Bytes) -> Result<T, ResolutionError>,
    ) -> Result<T, ResolutionError> {
        if let Some(bytes) = self.cache.get(url) {
            match parse(&bytes) {
                Ok(parsed) => {
                    tracing::debug!(%url, "Cache hit");
                    return Ok(parsed);
                }
                Err(error) => {
                    // Cached for a different schema; refetch.
                    tracing::debug!(%url, %error, "Cached content does not parse, refetching");
                    self.cache.invalidate(url);
                }
            }
        }

        if let Some(error) = self.recent_failure(url) {
            tracing::debug!(%url, %error, "Negative cache hit");
            return Err(error);
        }

        if let Some(local) = &self.local {
            if let Some(id) = local.resource_id(url) {
                match local.store.get(&id).await {
                    Ok(Some(resource)) => return parse(&resource.content),
                    Ok(None) => {
                        // Not stored here; may be a forwarded resource served
                        // by this server's gateway.
                        tracing::debug!(%url, "Local resource missing, fetching over HTTP");
                    }
                    Err(e) => return Err(ResolutionError::Unreachable(format!("{url}: {e}"))),
                }
            }
        }

        match self.fetch(url).await {
            Ok(bytes) => {
                let parsed = parse(&bytes)?;
                self.cache.put(url.clone(), bytes);
                Ok(parsed)
            }
            Err(error) => {
                tracing::warn!(%url, %error, "Failed to fetch remote content");
                self.remember_failure(url, &error);
                Err(error)
            }
        }
    }

    async fn fetch(&self, url: &Url) -> Result<Bytes, ResolutionError> {
        let credentials = self
            .authorizer
            .outbound_credentials(url)
            .await
            .map_err(|e| ResolutionError::Unauthorized(e.to_string()))?;

        let timeout = self.config.fetch_timeout;
        tracing::debug!(%url, "Fetching remote content");

        match tokio::time::timeout(timeout, self.fetcher.fetch(url, credentials.as_deref())).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(e.into_resolution(url, timeout)),
            Err(_) => Err(ResolutionError::Timeout(timeout)),
        }
    }

    fn recent_failure(&self, url: &Url) -> Option<ResolutionError> {
        let mut negative = self.negative.lock().unwrap_or_else(PoisonError::into_inner);
        match negative.get(url) {
            Some((at, error)) if at.elapsed() < self.config.negative_ttl => Some(error.clone()),
            Some(_) => {
                negative.remove(url);
                None
            }
            None => None,
        }
    }

    fn remember_failure(&self, url: &Url, error: &ResolutionError) {
        if self.config.negative_ttl.is_zero() || !error.is_negatively_cacheable() {
            return;
        }
        let ttl = self.config.negative_ttl;
        let mut negative = self.negative.lock().unwrap_or_else(PoisonError::into_inner);
        negative.retain(|_, (at, _)| at.elapsed() < ttl);
        negative.insert(url.clone(), (Instant::now(), error.clone()));
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use session_relay_core::{ResolutionErrorKind, StorageError, StoredResource};
    use tokio_test::assert_ok;

    use super::*;
    use crate::fetch::{FetchError, MapFetcher};

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://store.example/{path}")).unwrap()
    }

    fn resolver(fetcher: &Arc<MapFetcher>, config: ResolverConfig) -> Resolver {
        Resolver::new(Arc::clone(fetcher) as Arc<dyn ContentFetcher>, config)
    }

    #[tokio::test]
    async fn test_inline_needs_no_fetch() {
        let fetcher = Arc::new(MapFetcher::new());
        let resolver = resolver(&fetcher, ResolverConfig::default());

        let value = resolver
            .resolve(&ContentReference::Inline(json!({"a": 1})))
            .await
            .unwrap();
        assert_eq!(value, json!({"a": 1}));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_second_resolution_served_from_cache() {
        let fetcher = Arc::new(MapFetcher::new());
        fetcher.insert(url("a"), r#"{"role":"user","parts":[{"content":"hi"}]}"#);
        let resolver = resolver(&fetcher, ResolverConfig::default());
        let reference = ContentReference::Remote(url("a"));

        let first = resolver.resolve_message(&reference).await.unwrap();
        let second = resolver.resolve_message(&reference).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.text(), "hi");
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(resolver.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let fetcher = Arc::new(MapFetcher::new());
        fetcher.fail(url("a"), FetchError::Connect("refused".into()));
        let resolver = resolver(
            &fetcher,
            ResolverConfig {
                negative_ttl: Duration::ZERO,
                ..ResolverConfig::default()
            },
        );
        let reference = ContentReference::Remote(url("a"));

        let err = resolver.resolve(&reference).await.unwrap_err();
        assert_eq!(err.kind(), ResolutionErrorKind::Unreachable);

        fetcher.insert(url("a"), "{}");
        assert_ok!(resolver.resolve(&reference).await);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_negative_cache_window() {
        let fetcher = Arc::new(MapFetcher::new());
        let resolver = resolver(
            &fetcher,
            ResolverConfig {
                negative_ttl: Duration::from_secs(60),
                ..ResolverConfig::default()
            },
        );
        let reference = ContentReference::Remote(url("missing"));

        for _ in 0..3 {
            let err = resolver.resolve(&reference).await.unwrap_err();
            assert_eq!(err.kind(), ResolutionErrorKind::NotFound);
        }
        assert_eq!(fetcher.calls(), 1);

        resolver.invalidate(&reference);
        let _ = resolver.resolve(&reference).await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_malformed_content_not_cached() {
        let fetcher = Arc::new(MapFetcher::new());
        fetcher.insert(url("bad"), "not json");
        let resolver = resolver(&fetcher, ResolverConfig::default());
        let reference = ContentReference::Remote(url("bad"));

        let err = resolver.resolve(&reference).await.unwrap_err();
        assert_eq!(err.kind(), ResolutionErrorKind::MalformedContent);
        assert_eq!(resolver.cache().stats().entries, 0);
    }

    #[tokio::test]
    async fn test_non_message_json_is_malformed() {
        let fetcher = Arc::new(MapFetcher::new());
        fetcher.insert(url("n"), "[1, 2, 3]");
        let resolver = resolver(&fetcher, ResolverConfig::default());

        let err = resolver
            .resolve_message(&ContentReference::Remote(url("n")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ResolutionErrorKind::MalformedContent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_times_out() {
        let fetcher = Arc::new(MapFetcher::new());
        fetcher.insert_delayed(url("slow"), "{}", Duration::from_secs(30));
        let resolver = resolver(
            &fetcher,
            ResolverConfig {
                fetch_timeout: Duration::from_secs(1),
                ..ResolverConfig::default()
            },
        );

        let err = resolver
            .resolve(&ContentReference::Remote(url("slow")))
            .await
            .unwrap_err();
        assert_eq!(err, ResolutionError::Timeout(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_raw_resolution() {
        let fetcher = Arc::new(MapFetcher::new());
        fetcher.insert(url("blob"), "raw text");
        let resolver = resolver(&fetcher, ResolverConfig::default());

        let raw = resolver
            .resolve_raw(&ContentReference::Remote(url("blob")))
            .await
            .unwrap();
        assert_eq!(raw, "raw text");

        let inline = resolver
            .resolve_raw(&ContentReference::Inline(json!("x")))
            .await
            .unwrap();
        assert_eq!(inline, "x");
    }

    #[tokio::test]
    async fn test_malformed_message_refetched_after_recovery() {
        let fetcher = Arc::new(MapFetcher::new());
        fetcher.insert(url("flaky"), r#"{"error":"temporarily unavailable"}"#);
        let resolver = resolver(&fetcher, ResolverConfig::default());
        let reference = ContentReference::Remote(url("flaky"));

        let err = resolver.resolve_message(&reference).await.unwrap_err();
        assert_eq!(err.kind(), ResolutionErrorKind::MalformedContent);
        assert_eq!(resolver.cache().stats().entries, 0);

        fetcher.insert(url("flaky"), r#"{"role":"agent","parts":[{"content":"back"}]}"#);
        let message = assert_ok!(resolver.resolve_message(&reference).await);
        assert_eq!(message.text(), "back");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_raw_cache_entry_does_not_poison_json() {
        let fetcher = Arc::new(MapFetcher::new());
        fetcher.insert(url("page"), "<html>502</html>");
        let resolver = resolver(&fetcher, ResolverConfig::default());
        let reference = ContentReference::Remote(url("page"));

        assert_ok!(resolver.resolve_raw(&reference).await);

        fetcher.insert(url("page"), "{}");
        let value = assert_ok!(resolver.resolve(&reference).await);
        assert_eq!(value, json!({}));
        assert_eq!(fetcher.calls(), 2);

        // The parsed JSON is cached now.
        assert_ok!(resolver.resolve(&reference).await);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_resolve_part() {
        let fetcher = Arc::new(MapFetcher::new());
        fetcher.insert(url("image"), "png bytes");
        fetcher.fail(url("down"), FetchError::Connect("refused".into()));
        let resolver = resolver(&fetcher, ResolverConfig::default());

        let inline = MessagePart::text("inline text");
        assert_eq!(resolver.resolve_part(&inline).await.unwrap(), "inline text");

        let remote = MessagePart::remote("image/png", url("image"));
        assert_eq!(resolver.resolve_part(&remote).await.unwrap(), "png bytes");

        let failing = MessagePart::remote("image/png", url("down"));
        let err = resolver.resolve_part(&failing).await.unwrap_err();
        assert_eq!(err.kind(), ResolutionErrorKind::Unreachable);
        assert_eq!(fetcher.calls(), 2);
    }

    struct OneResource;

    #[async_trait]
    impl ResourceStore for OneResource {
        async fn put(&self, _content_type: &str, _content: Bytes) -> Result<ResourceId, StorageError> {
            Err(StorageError::Internal("read only".into()))
        }

        async fn get(&self, id: &ResourceId) -> Result<Option<StoredResource>, StorageError> {
            Ok((id.as_str() == "r1").then(|| StoredResource {
                id: id.clone(),
                content_type: "application/json".into(),
                content: Bytes::from_static(br#"{"local": true}"#),
                created_at: 0,
            }))
        }
    }

    #[tokio::test]
    async fn test_local_resources_skip_network() {
        let fetcher = Arc::new(MapFetcher::new());
        let base = Url::parse("http://relay.local:8080/api").unwrap();
        let local = LocalResources::new(base, Arc::new(OneResource));
        let resource_url = local.resource_url(&ResourceId::new("r1"));
        assert_eq!(resource_url.as_str(), "http://relay.local:8080/api/resources/r1");

        let resolver = resolver(&fetcher, ResolverConfig::default()).with_local(local);
        let value = resolver
            .resolve(&ContentReference::Remote(resource_url))
            .await
            .unwrap();

        assert_eq!(value, json!({"local": true}));
        assert_eq!(fetcher.calls(), 0);
    }

    #[test]
    fn test_local_resource_id_matching() {
        let local = LocalResources::new(
            Url::parse("http://relay.local/").unwrap(),
            Arc::new(OneResource),
        );
        let id = |s: &str| local.resource_id(&Url::parse(s).unwrap());

        assert_eq!(id("http://relay.local/resources/abc"), Some(ResourceId::new("abc")));
        assert_eq!(id("http://other.host/resources/abc"), None);
        assert_eq!(id("http://relay.local/resources/a/b"), None);
        assert_eq!(id("http://relay.local/sessions/abc"), None);
    }
}
