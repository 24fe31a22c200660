//! Standalone session relay server.
//!
//! Run with: cargo run -p relay-server
//!
//! Reads `relay.toml` (or the file named by `SESSION_RELAY_CONFIG`), falling
//! back to `SESSION_RELAY_*` environment variables.

mod config;
mod engine;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use session_relay_core::{
    AllowAll, Authorizer, DescriptorStorage, ResourceId, ResourceStore, SharedToken,
};
use session_relay_resolver::{ContentFetcher, HttpFetcher, LocalResources, Resolver};
use session_relay_session::{
    HistoryAssembler, MergeCoordinator, SessionCoordinator,
    storage::{MemoryDescriptorStorage, MemoryResourceStore},
};
use session_relay_transport::{ForwardTable, GatewayState, gateway_router};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{config::RelayConfig, engine::EchoEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = RelayConfig::load()?;

    let authorizer: Arc<dyn Authorizer> = match &config.token {
        Some(token) => Arc::new(SharedToken::new(token.clone(), config.trusted_hosts.clone())),
        None => {
            tracing::warn!("No token configured, accepting unauthenticated requests");
            Arc::new(AllowAll)
        }
    };

    let store: Arc<dyn ResourceStore> = Arc::new(MemoryResourceStore::new());
    let local = LocalResources::new(config.public_url.clone(), store);

    let resolver = Arc::new(
        Resolver::new(
            Arc::new(HttpFetcher::new()) as Arc<dyn ContentFetcher>,
            config.resolver.clone(),
        )
        .with_authorizer(Arc::clone(&authorizer))
        .with_local(local.clone()),
    );

    let coordinator = SessionCoordinator::new(
        Arc::new(MemoryDescriptorStorage::new()) as Arc<dyn DescriptorStorage>,
        Arc::new(EchoEngine::new(Arc::clone(&resolver))),
        HistoryAssembler::new(resolver, config.assembler.clone()),
        MergeCoordinator::new(local.clone(), config.merge.clone()),
    );

    let forwards = Arc::new(ForwardTable::new());
    for forward in &config.forwards {
        if local.resource_id(&forward.upstream).is_some() {
            anyhow::bail!(
                "Forward {} points back at this server ({})",
                forward.id,
                forward.upstream
            );
        }
        let id = ResourceId::new(forward.id.clone());
        tracing::info!(
            id = %id,
            upstream = %forward.upstream,
            public = %local.resource_url(&id),
            "Exposing upstream resource"
        );
        forwards.register(id, forward.upstream.clone(), forward.content_type.clone());
    }

    let state = GatewayState::new(Arc::new(coordinator), local, forwards, authorizer);
    let app = gateway_router(state).layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, public_url = %config.public_url, "Relay listening");

    axum::serve(listener, app).await?;
    Ok(())
}
