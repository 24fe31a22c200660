//! Wire protocol for the relay HTTP interface.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use session_relay_core::{DescriptorError, Divergence, Message, SessionDescriptor, SessionId};
use session_relay_session::{RunRequest, RunResult};

/// Body of `POST /runs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequestBody {
    /// Descriptor of an existing session. Kept as raw JSON so descriptor
    /// problems are reported as such rather than as a generic body error.
    #[serde(default)]
    pub session: Option<Value>,
    #[serde(default)]
    pub input: Vec<Message>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl RunRequestBody {
    /// Session id named by the descriptor, read without validating it.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session
            .as_ref()
            .and_then(|session| session.get("id"))
            .and_then(Value::as_str)
            .map(SessionId::new)
    }

    /// Validate the descriptor and build a run request.
    ///
    /// # Errors
    /// Returns `DescriptorError` if the descriptor is malformed or invalid.
    pub fn into_request(self) -> Result<RunRequest, DescriptorError> {
        let session = match self.session {
            None | Some(Value::Null) => None,
            Some(raw) => {
                let descriptor: SessionDescriptor = serde_json::from_value(raw)
                    .map_err(|e| DescriptorError::Malformed(e.to_string()))?;
                descriptor.validate()?;
                Some(descriptor)
            }
        };

        Ok(RunRequest {
            session,
            input: self.input,
            metadata: self.metadata,
        })
    }
}

/// Response of `POST /runs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponseBody {
    /// Updated descriptor for the client to keep or forward.
    pub session: SessionDescriptor,
    pub output: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence: Option<Divergence>,
}

impl From<RunResult> for RunResponseBody {
    fn from(result: RunResult) -> Self {
        Self {
            session: result.session,
            output: result.output,
            divergence: result.divergence,
        }
    }
}

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BadRequest,
    DescriptorInvalid,
    Unauthorized,
    Forbidden,
    NotFound,
    UpstreamUnavailable,
    RunFailed,
    Internal,
}

/// Error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_run_request_without_session() {
        let body: RunRequestBody = serde_json::from_value(json!({
            "input": [{"role": "user", "parts": [{"content": "hi"}]}]
        }))
        .unwrap();

        let request = body.into_request().unwrap();
        assert!(request.session.is_none());
        assert_eq!(request.input[0].text(), "hi");
    }

    #[test]
    fn test_run_request_rejects_bad_descriptor() {
        let body = RunRequestBody {
            session: Some(json!({"id": "s1", "history": ["::not a url::"]})),
            ..RunRequestBody::default()
        };

        assert!(matches!(
            body.into_request(),
            Err(DescriptorError::Malformed(_))
        ));
    }

    #[test]
    fn test_session_id_read_before_validation() {
        let body = RunRequestBody {
            session: Some(json!({"id": "s1", "history": ["::not a url::"]})),
            ..RunRequestBody::default()
        };
        assert_eq!(body.session_id(), Some(SessionId::new("s1")));

        let body = RunRequestBody {
            session: Some(json!({"history": []})),
            ..RunRequestBody::default()
        };
        assert_eq!(body.session_id(), None);
        assert_eq!(RunRequestBody::default().session_id(), None);
    }

    #[test]
    fn test_error_body_serialization() {
        let body = ErrorBody {
            kind: ErrorKind::DescriptorInvalid,
            message: "Session id must not be empty".into(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "descriptor_invalid");
    }
}
