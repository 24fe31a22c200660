//! History assembly, merging and run orchestration for session relays.
//!
//! Provides:
//! - `HistoryAssembler` - Lazy, ordered history with bounded fan-out
//! - `MergeCoordinator` - Append run output to a descriptor copy
//! - `SessionCoordinator` - Resolve, run, merge
//! - Storage implementations (memory)

pub mod assembler;
pub mod coordinator;
pub mod merge;
pub mod storage;

pub use assembler::{AssemblerConfig, HistoryAssembler};
pub use coordinator::{CoordinatorError, RunRequest, RunResult, SessionCoordinator};
pub use merge::{MergeConfig, MergeCoordinator, MergeError};
