//! Write sink for messages produced by a run.

use std::sync::{Arc, PoisonError, RwLock};

use futures::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::Message;

/// Event published to live listeners of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Message(Message),
    Finished,
}

struct Inner {
    messages: Vec<Message>,
    total_bytes: usize,
    finished: bool,
}

/// Collects the messages a run produces and broadcasts them live.
///
/// Unlike a log buffer nothing is ever evicted: every message pushed here
/// is merged into the session history when the run completes.
pub struct RunOutput {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<OutputEvent>,
}

impl Default for RunOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl RunOutput {
    /// Create an empty output sink.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                messages: Vec::with_capacity(8),
                total_bytes: 0,
                finished: false,
            }),
            sender,
        }
    }

    /// Record a message and publish it to live listeners.
    ///
    /// Messages pushed after `finish` are ignored.
    pub fn push(&self, msg: Message) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.finished {
            tracing::warn!("Dropping message pushed after run output finished");
            return;
        }
        inner.total_bytes = inner.total_bytes.saturating_add(msg.approx_bytes());
        inner.messages.push(msg.clone());
        // Publish before releasing the lock so `message_stream` never sees a
        // message both in its snapshot and on its receiver.
        let _ = self.sender.send(OutputEvent::Message(msg));
    }

    /// Mark the output complete.
    pub fn finish(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if !inner.finished {
            inner.finished = true;
            let _ = self.sender.send(OutputEvent::Finished);
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .finished
    }

    /// Snapshot of all messages produced so far.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .messages
            .clone()
    }

    /// Approximate size of the produced messages.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .total_bytes
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OutputEvent> {
        self.sender.subscribe()
    }

    /// Stream of messages: everything produced so far, then live messages
    /// until the output finishes.
    #[must_use]
    pub fn message_stream(&self) -> futures::stream::BoxStream<'static, Message> {
        // Snapshot and subscribe under one lock.
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let (history, finished, rx) = (inner.messages.clone(), inner.finished, self.subscribe());
        drop(inner);

        let hist = futures::stream::iter(history);
        if finished {
            return hist.boxed();
        }

        let live = BroadcastStream::new(rx)
            .filter_map(|res| future::ready(res.ok()))
            .take_while(|event| future::ready(!matches!(event, OutputEvent::Finished)))
            .filter_map(|event| {
                future::ready(match event {
                    OutputEvent::Message(msg) => Some(msg),
                    OutputEvent::Finished => None,
                })
            });

        hist.chain(live).boxed()
    }

    /// Forward a stream of messages into this output, finishing it when the
    /// stream ends.
    pub fn spawn_forwarder<S, E>(self: Arc<Self>, stream: S) -> tokio::task::JoinHandle<()>
    where
        S: futures::Stream<Item = Result<Message, E>> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        tokio::spawn(async move {
            tokio::pin!(stream);

            while let Some(next) = stream.next().await {
                match next {
                    Ok(msg) => self.push(msg),
                    Err(e) => tracing::warn!(error = %e, "Run output stream error"),
                }
            }
            self.finish();
        })
    }
}
