//! Session descriptors and content references.
//!
//! A descriptor never contains message content itself, only references to
//! it. Descriptors are plain values: every server that receives one derives
//! its own view and hands an updated copy back to the caller.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use serde_json::Value;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Opaque session identifier, stable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an existing identifier.
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

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Descriptor validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("Session id must not be empty")]
    EmptyId,
    #[error("Invalid content URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Inline content must not be null")]
    NullInline,
    #[error("Malformed descriptor: {0}")]
    Malformed(String),
}

/// Reference to a piece of content: either the content itself or a URL
/// where it can be fetched.
///
/// On the wire a JSON string is always read as a URL, so inline content
/// carried in a descriptor is expected to be a non-string JSON value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentReference {
    /// Content embedded directly in the reference.
    Inline(Value),
    /// Content owned by a resource server, retrievable with HTTP GET.
    Remote(Url),
}

impl ContentReference {
    /// Parse a remote reference, rejecting anything but `http`/`https`.
    ///
    /// # Errors
    /// Returns an error if the URL does not parse or uses another scheme.
    pub fn remote(url: &str) -> Result<Self, DescriptorError> {
        parse_remote_url(url).map(Self::Remote)
    }

    #[must_use]
    pub const fn inline(value: Value) -> Self {
        Self::Inline(value)
    }

    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// URL of a remote reference.
    #[must_use]
    pub const fn url(&self) -> Option<&Url> {
        match self {
            Self::Remote(url) => Some(url),
            Self::Inline(_) => None,
        }
    }

    /// Check that the reference is well formed.
    ///
    /// # Errors
    /// Returns an error for null inline payloads or non-HTTP URLs.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        match self {
            Self::Inline(Value::Null) => Err(DescriptorError::NullInline),
            Self::Inline(_) => Ok(()),
            Self::Remote(url) => check_scheme(url),
        }
    }
}

impl fmt::Display for ContentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("<inline>"),
            Self::Remote(url) => write!(f, "{url}"),
        }
    }
}

impl TryFrom<Value> for ContentReference {
    type Error = DescriptorError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Err(DescriptorError::NullInline),
            Value::String(url) => Self::remote(&url),
            other => Ok(Self::Inline(other)),
        }
    }
}

impl Serialize for ContentReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Inline(value) => value.serialize(serializer),
            Self::Remote(url) => serializer.serialize_str(url.as_str()),
        }
    }
}

impl<'de> Deserialize<'de> for ContentReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::try_from(value).map_err(D::Error::custom)
    }
}

fn parse_remote_url(raw: &str) -> Result<Url, DescriptorError> {
    let url = Url::parse(raw).map_err(|e| DescriptorError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    check_scheme(&url)?;
    Ok(url)
}

fn check_scheme(url: &Url) -> Result<(), DescriptorError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(DescriptorError::UnsupportedScheme(other.to_string())),
    }
}

/// How one descriptor's history relates to another's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Divergence {
    /// Both histories hold the same references.
    Identical,
    /// This history extends the other by `extra` entries.
    Ahead { extra: usize },
    /// The other history extends this one by `missing` entries.
    Behind { missing: usize },
    /// Histories share `common_prefix` entries and then disagree.
    Diverged { common_prefix: usize },
}

/// Portable record of a session: identity, ordered history references and
/// an optional state reference.
///
/// History is append-only. There is no API to remove or reorder entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    id: SessionId,
    #[serde(default)]
    history: Vec<ContentReference>,
    #[serde(default)]
    state: Option<ContentReference>,
}

impl SessionDescriptor {
    /// Create an empty descriptor.
    #[must_use]
    pub const fn new(id: SessionId) -> Self {
        Self {
            id,
            history: Vec::new(),
            state: None,
        }
    }

    /// Create a descriptor with existing history and state.
    #[must_use]
    pub const fn with_parts(
        id: SessionId,
        history: Vec<ContentReference>,
        state: Option<ContentReference>,
    ) -> Self {
        Self { id, history, state }
    }

    /// Parse and validate a descriptor from JSON.
    ///
    /// # Errors
    /// Returns `DescriptorError` if the JSON is malformed or any reference
    /// is invalid.
    pub fn from_json(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let descriptor: Self =
            serde_json::from_slice(bytes).map_err(|e| DescriptorError::Malformed(e.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub fn history(&self) -> &[ContentReference] {
        &self.history
    }

    #[must_use]
    pub const fn state(&self) -> Option<&ContentReference> {
        self.state.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Append a reference after the current history.
    pub fn push_history(&mut self, reference: ContentReference) {
        self.history.push(reference);
    }

    /// Replace the state reference.
    pub fn set_state(&mut self, state: Option<ContentReference>) {
        self.state = state;
    }

    /// Check identity and every reference.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.id.as_str().trim().is_empty() {
            return Err(DescriptorError::EmptyId);
        }
        for reference in self.history.iter().chain(self.state.iter()) {
            reference.validate()?;
        }
        Ok(())
    }

    /// Number of leading history entries shared with `other`.
    #[must_use]
    pub fn common_prefix_len(&self, other: &Self) -> usize {
        self.history
            .iter()
            .zip(&other.history)
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Compare this history with `other`. Only histories are compared;
    /// callers decide whether the ids must match.
    #[must_use]
    pub fn divergence(&self, other: &Self) -> Divergence {
        let common = self.common_prefix_len(other);
        let (ours, theirs) = (self.history.len(), other.history.len());

        if common == ours && common == theirs {
            Divergence::Identical
        } else if common == theirs {
            Divergence::Ahead {
                extra: ours - theirs,
            }
        } else if common == ours {
            Divergence::Behind {
                missing: theirs - ours,
            }
        } else {
            Divergence::Diverged {
                common_prefix: common,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn remote(url: &str) -> ContentReference {
        ContentReference::remote(url).unwrap()
    }

    #[test]
    fn test_descriptor_wire_format() {
        let raw = br#"{
            "id": "s1",
            "history": ["https://store.example/a", {"role": "user", "parts": []}],
            "state": null
        }"#;
        let descriptor = SessionDescriptor::from_json(raw).unwrap();

        assert_eq!(descriptor.id().as_str(), "s1");
        assert_eq!(descriptor.len(), 2);
        assert!(descriptor.history()[0].is_remote());
        assert!(matches!(descriptor.history()[1], ContentReference::Inline(_)));
        assert!(descriptor.state().is_none());

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["history"][0], json!("https://store.example/a"));
        assert_eq!(json["state"], Value::Null);
    }

    #[test]
    fn test_missing_history_defaults_to_empty() {
        let descriptor = SessionDescriptor::from_json(br#"{"id": "s2"}"#).unwrap();
        assert!(descriptor.is_empty());
    }

    #[test]
    fn test_invalid_descriptors_rejected() {
        let cases: [&[u8]; 4] = [
            br#"{"id": "", "history": []}"#,
            br#"{"id": "s", "history": ["not a url"]}"#,
            br#"{"id": "s", "history": ["ftp://host/file"]}"#,
            br#"{"id": "s", "history": [null]}"#,
        ];
        for raw in cases {
            assert!(SessionDescriptor::from_json(raw).is_err());
        }
    }

    #[test]
    fn test_unsupported_scheme_reported() {
        let err = ContentReference::remote("file:///etc/passwd").unwrap_err();
        assert_eq!(err, DescriptorError::UnsupportedScheme("file".into()));
    }

    #[test]
    fn test_divergence() {
        let id = SessionId::new("s");
        let base = SessionDescriptor::with_parts(
            id.clone(),
            vec![remote("http://a/1"), remote("http://a/2")],
            None,
        );

        let mut ahead = base.clone();
        ahead.push_history(remote("http://b/3"));

        let mut other = base.clone();
        other.push_history(remote("http://c/3"));

        assert_eq!(base.divergence(&base), Divergence::Identical);
        assert_eq!(ahead.divergence(&base), Divergence::Ahead { extra: 1 });
        assert_eq!(base.divergence(&ahead), Divergence::Behind { missing: 1 });
        assert_eq!(
            ahead.divergence(&other),
            Divergence::Diverged { common_prefix: 2 }
        );
    }
}
