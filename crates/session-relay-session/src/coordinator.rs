//! Run orchestration: resolve, execute, merge.

use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use session_relay_core::{
    DescriptorError, DescriptorStorage, Divergence, Message, ResolutionError, RunContext,
    RunEngine, RunError, RunOutput, SessionDescriptor, SessionId, StorageError,
};

use crate::{
    assembler::HistoryAssembler,
    merge::{MergeCoordinator, MergeError},
};

/// Coordinator error.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Invalid descriptor: {0}")]
    DescriptorInvalid(#[from] DescriptorError),
    #[error("Failed to resolve session state: {0}")]
    State(ResolutionError),
    #[error("Run error: {0}")]
    Run(#[from] RunError),
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// A request to run against a session.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Descriptor of an existing session; `None` starts a new one.
    pub session: Option<SessionDescriptor>,
    /// New input messages.
    pub input: Vec<Message>,
    /// Metadata passed through to the run engine.
    pub metadata: HashMap<String, Value>,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// The updated descriptor. The caller forwards it onward.
    pub session: SessionDescriptor,
    /// Messages the run produced.
    pub output: Vec<Message>,
    /// Set when the inbound descriptor lacks entries this server recorded
    /// for the same session.
    pub divergence: Option<Divergence>,
}

/// Coordinates runs over distributed sessions.
pub struct SessionCoordinator {
    descriptors: Arc<dyn DescriptorStorage>,
    engine: Arc<dyn RunEngine>,
    assembler: HistoryAssembler,
    merger: MergeCoordinator,
}

impl SessionCoordinator {
    /// Create a new session coordinator.
    #[must_use]
    pub fn new(
        descriptors: Arc<dyn DescriptorStorage>,
        engine: Arc<dyn RunEngine>,
        assembler: HistoryAssembler,
        merger: MergeCoordinator,
    ) -> Self {
        Self {
            descriptors,
            engine,
            assembler,
            merger,
        }
    }

    #[must_use]
    pub const fn assembler(&self) -> &HistoryAssembler {
        &self.assembler
    }

    /// This server's last recorded descriptor for a session.
    ///
    /// # Errors
    /// Returns error if descriptor storage fails.
    pub async fn descriptor(
        &self,
        id: &SessionId,
    ) -> Result<Option<SessionDescriptor>, StorageError> {
        self.descriptors.get(id).await
    }

    /// Execute a run and return the updated descriptor.
    ///
    /// # Errors
    /// Returns error if the descriptor is invalid, the session state cannot
    /// be resolved, the run fails, or its output cannot be stored.
    /// Unavailable history entries are not errors; the engine sees them as
    /// failure markers.
    pub async fn run(&self, request: RunRequest) -> Result<RunResult, CoordinatorError> {
        let prior = match request.session {
            Some(descriptor) => {
                descriptor.validate()?;
                descriptor
            }
            None => SessionDescriptor::new(SessionId::generate()),
        };

        let divergence = self.check_divergence(&prior).await?;
        let state = self
            .assembler
            .load_state(&prior)
            .await
            .map_err(CoordinatorError::State)?;

        tracing::info!(
            session = %prior.id(),
            history = prior.len(),
            input = request.input.len(),
            "Starting run"
        );

        let ctx = RunContext::new(prior.id().clone(), request.input.clone())
            .with_state(state)
            .with_metadata(request.metadata);
        let output = Arc::new(RunOutput::new());
        let history = self.assembler.assemble(&prior);

        let outcome = self.engine.run(ctx, history, Arc::clone(&output)).await;
        output.finish();
        let outcome = outcome.inspect_err(|e| {
            tracing::warn!(session = %prior.id(), error = %e, "Run failed");
        })?;

        let produced = output.messages();
        let appended: Vec<Message> = request
            .input
            .into_iter()
            .chain(produced.iter().cloned())
            .collect();
        let session = self
            .merger
            .merge(&prior, &appended, outcome.state.as_ref())
            .await?;

        self.descriptors.save(session.clone()).await?;

        tracing::info!(
            session = %session.id(),
            history = session.len(),
            produced = produced.len(),
            "Run completed"
        );

        Ok(RunResult {
            session,
            output: produced,
            divergence,
        })
    }

    /// Compare `inbound` with the descriptor last recorded for its id.
    ///
    /// Only `Behind` and `Diverged` are reported. Neither is reconciled:
    /// the run proceeds on `inbound`, and its result replaces the recorded
    /// descriptor, so entries only the older record held are no longer
    /// visible through `descriptor`. The caller learns about this from
    /// `RunResult::divergence`.
    async fn check_divergence(
        &self,
        inbound: &SessionDescriptor,
    ) -> Result<Option<Divergence>, StorageError> {
        let Some(known) = self.descriptors.get(inbound.id()).await? else {
            return Ok(None);
        };

        match inbound.divergence(&known) {
            Divergence::Identical | Divergence::Ahead { .. } => Ok(None),
            divergence => {
                tracing::warn!(
                    session = %inbound.id(),
                    ?divergence,
                    "Inbound descriptor diverges from locally recorded history"
                );
                Ok(Some(divergence))
            }
        }
    }
}
