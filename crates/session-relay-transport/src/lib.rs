//! HTTP gateway and wire protocol for session relays.
//!
//! Provides:
//! - Wire protocol (run request/response, error bodies)
//! - Forward table for upstreams peers cannot reach
//! - Axum gateway router (feature: gateway)

pub mod forward;
pub mod protocol;

#[cfg(feature = "gateway")]
pub mod gateway;

pub use forward::{ForwardTable, ForwardedResource};
#[cfg(feature = "gateway")]
pub use gateway::{ApiError, GatewayState, gateway_router};
pub use protocol::{ErrorBody, ErrorKind, RunRequestBody, RunResponseBody};
