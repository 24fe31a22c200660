//! Message content schema and resolution results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::{ContentReference, traits::ResolutionError};

/// Role of the author of a user message.
pub const ROLE_USER: &str = "user";
/// Role of the author of an agent message.
pub const ROLE_AGENT: &str = "agent";

const TEXT_PLAIN: &str = "text/plain";

/// Rejected message part.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessagePartError {
    #[error("Message part carries both content and content_url")]
    BothContents,
    #[error("Message part carries neither content nor content_url")]
    NoContent,
}

/// One part of a message. Carries either inline `content` or a
/// `content_url` pointing at the content elsewhere, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMessagePart")]
pub struct MessagePart {
    /// MIME type of the content.
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

fn default_content_type() -> String {
    TEXT_PLAIN.to_string()
}

#[derive(Deserialize)]
struct RawMessagePart {
    #[serde(default = "default_content_type")]
    content_type: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    content_url: Option<Url>,
    #[serde(default)]
    metadata: Option<Value>,
}

impl TryFrom<RawMessagePart> for MessagePart {
    type Error = MessagePartError;

    fn try_from(raw: RawMessagePart) -> Result<Self, Self::Error> {
        match (&raw.content, &raw.content_url) {
            (Some(_), Some(_)) => Err(MessagePartError::BothContents),
            (None, None) => Err(MessagePartError::NoContent),
            _ => Ok(Self {
                content_type: raw.content_type,
                content: raw.content,
                content_url: raw.content_url,
                metadata: raw.metadata,
            }),
        }
    }
}

impl MessagePart {
    /// Plain text part.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: TEXT_PLAIN.to_string(),
            content: Some(text.into()),
            content_url: None,
            metadata: None,
        }
    }

    /// Part whose content lives at `url`.
    #[must_use]
    pub fn remote(content_type: impl Into<String>, url: Url) -> Self {
        Self {
            content_type: content_type.into(),
            content: None,
            content_url: Some(url),
            metadata: None,
        }
    }

    /// The part's content as a reference, so inline and URL content are
    /// resolved the same way. Inline content wins if a hand-built part
    /// carries both.
    #[must_use]
    pub fn reference(&self) -> Option<ContentReference> {
        match (&self.content, &self.content_url) {
            (Some(content), _) => Some(ContentReference::Inline(Value::String(content.clone()))),
            (None, Some(url)) => Some(ContentReference::Remote(url.clone())),
            (None, None) => None,
        }
    }
}

/// A single history message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl Message {
    #[must_use]
    pub fn new(role: impl Into<String>, parts: Vec<MessagePart>) -> Self {
        Self {
            role: role.into(),
            parts,
        }
    }

    /// Single-part user text message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(ROLE_USER, vec![MessagePart::text(text)])
    }

    /// Single-part agent text message.
    #[must_use]
    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(ROLE_AGENT, vec![MessagePart::text(text)])
    }

    /// Concatenated inline text of all parts. Parts stored behind a
    /// `content_url` are skipped; resolve those with the resolver.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| part.content.as_deref())
            .collect()
    }

    /// Approximate serialized size, used for output accounting.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        self.role.len()
            + self
                .parts
                .iter()
                .map(|p| {
                    p.content_type.len()
                        + p.content.as_ref().map_or(0, String::len)
                        + p.content_url.as_ref().map_or(0, |u| u.as_str().len())
                })
                .sum::<usize>()
    }
}

/// Outcome of resolving one history entry.
///
/// Failures are surfaced as markers instead of being dropped, so consumers
/// can tell a short history from a partially unavailable one.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedMessage {
    Resolved {
        index: usize,
        reference: ContentReference,
        message: Message,
    },
    Failed {
        index: usize,
        reference: ContentReference,
        error: ResolutionError,
    },
}

impl ResolvedMessage {
    /// Position of the entry in the descriptor history.
    #[must_use]
    pub const fn index(&self) -> usize {
        match self {
            Self::Resolved { index, .. } | Self::Failed { index, .. } => *index,
        }
    }

    #[must_use]
    pub const fn reference(&self) -> &ContentReference {
        match self {
            Self::Resolved { reference, .. } | Self::Failed { reference, .. } => reference,
        }
    }

    #[must_use]
    pub const fn message(&self) -> Option<&Message> {
        match self {
            Self::Resolved { message, .. } => Some(message),
            Self::Failed { .. } => None,
        }
    }

    #[must_use]
    pub const fn error(&self) -> Option<&ResolutionError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            Self::Resolved { .. } => None,
        }
    }

    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_message_parses_minimal_parts() {
        let message: Message = serde_json::from_value(json!({
            "role": "user",
            "parts": [{"content": "hi"}]
        }))
        .unwrap();

        assert_eq!(message, Message::user("hi"));
        assert_eq!(message.text(), "hi");
    }

    #[test]
    fn test_part_reference_variants() {
        let url = Url::parse("https://files.example/blob").unwrap();
        let inline = MessagePart::text("x");
        let remote = MessagePart::remote("image/png", url.clone());

        assert_eq!(
            inline.reference(),
            Some(ContentReference::Inline(json!("x")))
        );
        assert_eq!(remote.reference(), Some(ContentReference::Remote(url)));

        let json = serde_json::to_value(&remote).unwrap();
        assert!(json.get("content").is_none());
        assert_eq!(json["content_type"], "image/png");
    }

    #[test]
    fn test_text_skips_remote_parts() {
        let url = Url::parse("https://files.example/blob").unwrap();
        let message = Message::new(
            ROLE_AGENT,
            vec![
                MessagePart::text("a"),
                MessagePart::remote("text/plain", url),
                MessagePart::text("b"),
            ],
        );
        assert_eq!(message.text(), "ab");
    }

    #[test]
    fn test_part_needs_exactly_one_content() {
        let both = json!({"content": "a", "content_url": "https://x.example/b"});
        let err = serde_json::from_value::<MessagePart>(both).unwrap_err();
        assert!(err.to_string().contains("both content and content_url"));

        let neither = serde_json::from_value::<MessagePart>(json!({"content_type": "text/plain"}));
        assert!(neither.is_err());

        let message = serde_json::from_value::<Message>(json!({
            "role": "user",
            "parts": [{"content": "a"}, {}]
        }));
        assert!(message.is_err());
    }
}
