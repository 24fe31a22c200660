//! Lazy, ordered assembly of session history.

use std::sync::Arc;

use futures::{StreamExt, stream};
use serde_json::Value;
use session_relay_core::{
    ContentReference, HistoryStream, ResolutionError, ResolvedMessage, SessionDescriptor,
    SessionId,
};
use session_relay_resolver::Resolver;

/// Assembler configuration.
#[derive(Clone, Debug)]
pub struct AssemblerConfig {
    /// Maximum number of history entries resolved ahead of the consumer.
    pub fan_out: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self { fan_out: 8 }
    }
}

/// Turns a descriptor's history into a stream of resolved messages.
///
/// The stream yields entries in descriptor order no matter which fetch
/// finishes first. Nothing is fetched until the stream is polled, at most
/// `fan_out` entries are in flight, and dropping the stream abandons
/// whatever is still pending.
#[derive(Clone)]
pub struct HistoryAssembler {
    resolver: Arc<Resolver>,
    config: AssemblerConfig,
}

impl HistoryAssembler {
    #[must_use]
    pub const fn new(resolver: Arc<Resolver>, config: AssemblerConfig) -> Self {
        Self { resolver, config }
    }

    #[must_use]
    pub const fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Build a fresh history stream. Each call starts over, so a second
    /// stream may see different results if remote content went away.
    #[must_use]
    pub fn assemble(&self, descriptor: &SessionDescriptor) -> HistoryStream {
        let resolver = Arc::clone(&self.resolver);
        let session = descriptor.id().clone();
        let entries: Vec<(usize, ContentReference)> =
            descriptor.history().iter().cloned().enumerate().collect();

        stream::iter(entries)
            .map(move |(index, reference)| {
                let resolver = Arc::clone(&resolver);
                let session = session.clone();
                async move { resolve_entry(&resolver, &session, index, reference).await }
            })
            .buffered(self.config.fan_out.max(1))
            .boxed()
    }

    /// Resolve the whole history eagerly.
    pub async fn load_history(&self, descriptor: &SessionDescriptor) -> Vec<ResolvedMessage> {
        self.assemble(descriptor).collect().await
    }

    /// Resolve the session state.
    ///
    /// # Errors
    /// Unlike history entries, state failures are returned to the caller.
    pub async fn load_state(
        &self,
        descriptor: &SessionDescriptor,
    ) -> Result<Option<Value>, ResolutionError> {
        match descriptor.state() {
            Some(reference) => self.resolver.resolve(reference).await.map(Some),
            None => Ok(None),
        }
    }
}

async fn resolve_entry(
    resolver: &Resolver,
    session: &SessionId,
    index: usize,
    reference: ContentReference,
) -> ResolvedMessage {
    match resolver.resolve_message(&reference).await {
        Ok(message) => ResolvedMessage::Resolved {
            index,
            reference,
            message,
        },
        Err(error) => {
            tracing::warn!(
                session = %session,
                index,
                reference = %reference,
                error = %error,
                "History entry unavailable"
            );
            ResolvedMessage::Failed {
                index,
                reference,
                error,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::Rng;
    use serde_json::json;
    use session_relay_core::{Message, ResolutionErrorKind};
    use session_relay_resolver::{ContentFetcher, FetchError, MapFetcher, ResolverConfig};
    use url::Url;

    use super::*;

    fn url(n: usize) -> Url {
        Url::parse(&format!("https://store{}.example/msg/{n}", n % 3)).unwrap()
    }

    fn message_body(text: &str) -> String {
        serde_json::to_string(&Message::user(text)).unwrap()
    }

    fn assembler(fetcher: &Arc<MapFetcher>, fan_out: usize) -> HistoryAssembler {
        let resolver = Resolver::new(
            Arc::clone(fetcher) as Arc<dyn ContentFetcher>,
            ResolverConfig::default(),
        );
        HistoryAssembler::new(Arc::new(resolver), AssemblerConfig { fan_out })
    }

    fn descriptor(refs: Vec<ContentReference>) -> SessionDescriptor {
        SessionDescriptor::with_parts(SessionId::new("s1"), refs, None)
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_preserved_under_random_latency() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let fetcher = Arc::new(MapFetcher::new());
            let n = rng.gen_range(1..16);
            let mut refs = Vec::with_capacity(n);
            for i in 0..n {
                let delay = Duration::from_millis(rng.gen_range(0..500));
                fetcher.insert_delayed(url(i), message_body(&format!("m{i}")), delay);
                refs.push(ContentReference::Remote(url(i)));
            }

            let fan_out = rng.gen_range(1..8);
            let history = assembler(&fetcher, fan_out)
                .load_history(&descriptor(refs))
                .await;

            assert_eq!(history.len(), n);
            for (i, entry) in history.iter().enumerate() {
                assert_eq!(entry.index(), i);
                assert_eq!(entry.message().unwrap().text(), format!("m{i}"));
            }
        }
    }

    #[tokio::test]
    async fn test_one_unreachable_entry_is_isolated() {
        let fetcher = Arc::new(MapFetcher::new());
        let mut refs = Vec::new();
        for i in 0..5 {
            if i == 2 {
                fetcher.fail(url(i), FetchError::Connect("refused".into()));
            } else {
                fetcher.insert(url(i), message_body("ok"));
            }
            refs.push(ContentReference::Remote(url(i)));
        }

        let history = assembler(&fetcher, 4).load_history(&descriptor(refs)).await;

        assert_eq!(history.len(), 5);
        let failures: Vec<_> = history.iter().filter(|e| e.is_failure()).collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index(), 2);
        assert_eq!(
            failures[0].error().unwrap().kind(),
            ResolutionErrorKind::Unreachable
        );
        assert_eq!(failures[0].reference(), &ContentReference::Remote(url(2)));
    }

    #[tokio::test]
    async fn test_nothing_fetched_until_polled() {
        let fetcher = Arc::new(MapFetcher::new());
        let refs = (0..10)
            .map(|i| {
                fetcher.insert(url(i), message_body("x"));
                ContentReference::Remote(url(i))
            })
            .collect();
        let descriptor = descriptor(refs);

        let mut stream = assembler(&fetcher, 2).assemble(&descriptor);
        assert_eq!(fetcher.calls(), 0);

        let first = stream.next().await.unwrap();
        assert_eq!(first.index(), 0);
        assert!(fetcher.calls() <= 2);

        drop(stream);
        assert!(fetcher.calls() <= 2);
    }

    #[tokio::test]
    async fn test_inline_and_remote_mixed() {
        let fetcher = Arc::new(MapFetcher::new());
        fetcher.insert(url(1), message_body("remote"));
        let refs = vec![
            ContentReference::Inline(serde_json::to_value(Message::agent("inline")).unwrap()),
            ContentReference::Remote(url(1)),
            ContentReference::Inline(json!({"no": "role"})),
        ];

        let history = assembler(&fetcher, 8).load_history(&descriptor(refs)).await;

        assert_eq!(history[0].message().unwrap().text(), "inline");
        assert_eq!(history[1].message().unwrap().text(), "remote");
        assert_eq!(
            history[2].error().unwrap().kind(),
            ResolutionErrorKind::MalformedContent
        );
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_state_errors_escalate() {
        let fetcher = Arc::new(MapFetcher::new());
        let assembler = assembler(&fetcher, 1);

        let mut with_state = descriptor(vec![]);
        with_state.set_state(Some(ContentReference::Remote(url(9))));
        let err = assembler.load_state(&with_state).await.unwrap_err();
        assert_eq!(err.kind(), ResolutionErrorKind::NotFound);

        let mut inline_state = descriptor(vec![]);
        inline_state.set_state(Some(ContentReference::Inline(json!({"step": 3}))));
        assert_eq!(
            assembler.load_state(&inline_state).await.unwrap(),
            Some(json!({"step": 3}))
        );
        assert_eq!(assembler.load_state(&descriptor(vec![])).await.unwrap(), None);
    }
}
