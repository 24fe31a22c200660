//! HTTP gateway: session descriptors, forwarded resources and runs.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use session_relay_core::{
    Access, AuthError, Authorizer, ContentReference, DescriptorError, ResolutionError, ResourceId,
    SessionDescriptor, SessionId, StorageError,
};
use session_relay_resolver::{LocalResources, Resolver};
use session_relay_session::{CoordinatorError, SessionCoordinator};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::{
    forward::ForwardTable,
    protocol::{ErrorBody, ErrorKind, RunRequestBody, RunResponseBody},
};

/// Gateway error, rendered as an `ErrorBody`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Invalid descriptor: {0}")]
    DescriptorInvalid(#[from] DescriptorError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Upstream unavailable: {0}")]
    Upstream(ResolutionError),
    #[error("Run failed: {0}")]
    RunFailed(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => Self::NotFound(id),
            StorageError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::DescriptorInvalid(e) => Self::DescriptorInvalid(e),
            CoordinatorError::State(e) => Self::Upstream(e),
            CoordinatorError::Run(e) => Self::RunFailed(e.to_string()),
            CoordinatorError::Merge(e) => Self::Internal(e.to_string()),
            CoordinatorError::Storage(e) => e.into(),
        }
    }
}

impl ApiError {
    const fn status_and_kind(&self) -> (StatusCode, ErrorKind) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, ErrorKind::BadRequest),
            Self::DescriptorInvalid(_) => (StatusCode::BAD_REQUEST, ErrorKind::DescriptorInvalid),
            Self::Auth(AuthError::MissingCredentials) => {
                (StatusCode::UNAUTHORIZED, ErrorKind::Unauthorized)
            }
            Self::Auth(AuthError::Denied(_)) => (StatusCode::FORBIDDEN, ErrorKind::Forbidden),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, ErrorKind::NotFound),
            Self::Upstream(ResolutionError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, ErrorKind::NotFound)
            }
            Self::Upstream(ResolutionError::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, ErrorKind::UpstreamUnavailable)
            }
            Self::Upstream(_) => (StatusCode::BAD_GATEWAY, ErrorKind::UpstreamUnavailable),
            Self::RunFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::RunFailed),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            kind,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Gateway handler state.
#[derive(Clone)]
pub struct GatewayState {
    coordinator: Arc<SessionCoordinator>,
    local: LocalResources,
    forwards: Arc<ForwardTable>,
    authorizer: Arc<dyn Authorizer>,
}

impl GatewayState {
    /// Create gateway state. `local` must be the same resource set the
    /// coordinator stores run output in.
    #[must_use]
    pub fn new(
        coordinator: Arc<SessionCoordinator>,
        local: LocalResources,
        forwards: Arc<ForwardTable>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            coordinator,
            local,
            forwards,
            authorizer,
        }
    }

    fn resolver(&self) -> &Arc<Resolver> {
        self.coordinator.assembler().resolver()
    }

    /// Make an upstream peers cannot reach readable through this server and
    /// return the public URL to hand out instead.
    ///
    /// # Errors
    /// Returns error if `upstream` already points at this gateway.
    pub fn expose(&self, upstream: Url, content_type: &str) -> Result<Url, ApiError> {
        if self.local.resource_id(&upstream).is_some() {
            return Err(ApiError::BadRequest(format!(
                "{upstream} is already served by this gateway"
            )));
        }
        let id = self.forwards.insert(upstream, content_type);
        Ok(self.local.resource_url(&id))
    }

    async fn authorize(&self, access: Access<'_>, headers: &HeaderMap) -> Result<(), ApiError> {
        let token = bearer_token(headers);
        self.authorizer
            .verify_inbound(access, token)
            .await
            .map_err(|e| {
                tracing::warn!(?access, error = %e, "Rejected inbound request");
                ApiError::Auth(e)
            })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// `GET /sessions/{session_id}`
async fn get_session(
    State(state): State<GatewayState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SessionDescriptor>, ApiError> {
    let id = SessionId::new(session_id);
    state.authorize(Access::Session(&id), &headers).await?;

    state
        .coordinator
        .descriptor(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("session {id}")))
}

/// `GET /resources/{resource_id}`
///
/// Serves locally stored content first, then registered forwards. Anything
/// else is unknown to this gateway.
async fn get_resource(
    State(state): State<GatewayState>,
    Path(resource_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let id = ResourceId::new(resource_id);
    state.authorize(Access::Resource(&id), &headers).await?;

    if let Some(resource) = state.local.store().get(&id).await? {
        return Ok((
            [(header::CONTENT_TYPE, resource.content_type)],
            resource.content,
        )
            .into_response());
    }

    let Some(forward) = state.forwards.lookup(&id) else {
        return Err(ApiError::NotFound(format!("resource {id}")));
    };

    tracing::debug!(%id, upstream = %forward.upstream, "Proxying forwarded resource");
    let content = state
        .resolver()
        .resolve_raw(&ContentReference::Remote(forward.upstream))
        .await
        .map_err(ApiError::Upstream)?;

    Ok(([(header::CONTENT_TYPE, forward.content_type)], content).into_response())
}

/// `POST /runs`
async fn create_run(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RunResponseBody>, ApiError> {
    let parsed: Result<RunRequestBody, _> = serde_json::from_slice(&body);
    // Callers learn nothing about the body until they are authorized.
    let session_id = parsed.as_ref().ok().and_then(RunRequestBody::session_id);
    state
        .authorize(Access::Run(session_id.as_ref()), &headers)
        .await?;

    let request = parsed
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
        .into_request()?;
    let result = state.coordinator.run(request).await?;
    Ok(Json(result.into()))
}

/// Create the gateway router.
///
/// # Example
/// ```ignore
/// let app = Router::new().merge(gateway_router(state));
/// ```
#[must_use]
pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/sessions/{session_id}", get(get_session))
        .route("/resources/{resource_id}", get(get_resource))
        .route("/runs", post(create_run))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
