//! Run context handed to the run engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Message, SessionId};

/// Everything a run engine needs besides the history stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    /// Session the run belongs to.
    pub session_id: SessionId,

    /// New input messages for this run. They are appended to history
    /// ahead of the run's output.
    #[serde(default)]
    pub input: Vec<Message>,

    /// Resolved session state, if the session has one.
    #[serde(default)]
    pub state: Option<Value>,

    /// Arbitrary metadata for app-specific needs.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl RunContext {
    /// Create a context with just a session id and input.
    #[must_use]
    pub fn new(session_id: SessionId, input: Vec<Message>) -> Self {
        Self {
            session_id,
            input,
            state: None,
            metadata: HashMap::new(),
        }
    }

    /// Attach resolved state.
    #[must_use]
    pub fn with_state(mut self, state: Option<Value>) -> Self {
        self.state = state;
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Get a metadata value by key.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Set a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}
