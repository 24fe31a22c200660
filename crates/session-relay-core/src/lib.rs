//! Core abstractions for distributed session resolution.
//!
//! This crate provides the fundamental building blocks:
//! - `SessionDescriptor` / `ContentReference` - Portable session records
//! - `Message` / `ResolvedMessage` - Content schema and resolution results
//! - `RunContext` / `RunOutput` - What a run engine receives and writes to
//! - Storage, authorization and run engine traits

pub mod auth;
pub mod context;
pub mod descriptor;
pub mod message;
pub mod output;
pub mod traits;

pub use auth::{AllowAll, SharedToken};
pub use context::RunContext;
pub use descriptor::{ContentReference, DescriptorError, Divergence, SessionDescriptor, SessionId};
pub use message::{Message, MessagePart, MessagePartError, ResolvedMessage};
pub use output::{OutputEvent, RunOutput};
pub use traits::{
    Access, AuthError, Authorizer, DescriptorStorage, HistoryStream, ResolutionError,
    ResolutionErrorKind, ResourceId, ResourceStore, RunEngine, RunError, RunOutcome,
    StorageError, StoredResource,
};
