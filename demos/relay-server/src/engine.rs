//! Demo run engine: echoes input and keeps a turn counter in session state.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use session_relay_core::{
    HistoryStream, Message, MessagePart, RunContext, RunEngine, RunError, RunOutcome, RunOutput,
};
use session_relay_resolver::Resolver;

pub struct EchoEngine {
    resolver: Arc<Resolver>,
}

impl EchoEngine {
    pub const fn new(resolver: Arc<Resolver>) -> Self {
        Self { resolver }
    }

    /// Text of one input part. Parts behind a `content_url` are fetched;
    /// a part that cannot be read is echoed as a marker, never dropped.
    async fn part_text(&self, part: &MessagePart) -> String {
        match self.resolver.resolve_part(part).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(error) => {
                tracing::warn!(content_url = ?part.content_url, %error, "Input part unavailable");
                format!("[unavailable: {:?}]", error.kind())
            }
        }
    }
}

#[async_trait]
impl RunEngine for EchoEngine {
    async fn run(
        &self,
        ctx: RunContext,
        mut history: HistoryStream,
        output: Arc<RunOutput>,
    ) -> Result<RunOutcome, RunError> {
        let mut resolved = 0usize;
        let mut unavailable = 0usize;
        while let Some(entry) = history.next().await {
            if entry.is_failure() {
                unavailable += 1;
            } else {
                resolved += 1;
            }
        }

        let turns = ctx
            .state
            .as_ref()
            .and_then(|state| state.get("turns"))
            .and_then(Value::as_u64)
            .unwrap_or(0)
            + 1;

        let mut lines = Vec::with_capacity(ctx.input.len());
        for message in &ctx.input {
            let mut line = String::new();
            for part in &message.parts {
                line.push_str(&self.part_text(part).await);
            }
            lines.push(line);
        }
        let text = lines.join("\n");
        tracing::debug!(session_id = %ctx.session_id, turns, resolved, unavailable, "Echo run");

        let mut reply = format!("turn {turns}: {text}");
        if unavailable > 0 {
            reply.push_str(&format!(
                " ({unavailable} of {} entries unavailable)",
                resolved + unavailable
            ));
        }
        output.push(Message::agent(reply));

        Ok(RunOutcome {
            state: Some(json!({ "turns": turns })),
        })
    }
}
