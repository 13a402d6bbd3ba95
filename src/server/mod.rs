//! Read-only HTTP API over the archive and the derived artifacts.
//!
//! Everything under `/api` requires a bearer token. What a caller sees is
//! narrowed by their [`Grant`](crate::access::Grant): sites outside it are
//! missing from listings, 404 on direct reads, and replaced by the
//! placeholder on image reads. Nothing here triggers derivation.

pub mod auth;
pub mod errors;
pub mod handlers;

use anyhow::{Context, Result};
use axum::{middleware, routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::access::{IdentityStore, TokenVerifier, UserDirectory};
use crate::archive::ArchiveIndex;
use crate::config::Config;
use crate::pipeline::{Placeholder, SnapshotStore};

pub use errors::{AppError, AppResult};

#[derive(Clone)]
pub struct AppState {
    pub index: Arc<ArchiveIndex>,
    pub snapshots: SnapshotStore,
    pub thumbnail_dir: PathBuf,
    pub placeholder: Placeholder,
    pub identity: Arc<dyn IdentityStore>,
    pub tokens: Arc<dyn TokenVerifier>,
}

impl AppState {
    pub fn new(
        config: &Config,
        index: Arc<ArchiveIndex>,
        placeholder: Placeholder,
        users: Arc<UserDirectory>,
    ) -> Self {
        Self {
            index,
            snapshots: SnapshotStore::new(&config.snapshot.path),
            thumbnail_dir: config.thumbnails.dir.clone(),
            placeholder,
            identity: users.clone(),
            tokens: users,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/sites", get(handlers::list_sites))
        .route("/sites/{site}/dates", get(handlers::list_dates))
        .route("/sites/{site}/dates/{date}/photos", get(handlers::list_photos))
        .route("/sites/{site}/dates/{date}/photos/{name}", get(handlers::photo))
        .route("/sites/{site}/latest", get(handlers::latest_photo))
        .route("/sites/{site}/videos", get(handlers::list_videos))
        .route("/sites/{site}/videos/{name}", get(handlers::video))
        .route("/snapshot", get(handlers::snapshot))
        .route("/snapshot/{site}", get(handlers::site_snapshot))
        .route("/thumbnails", get(handlers::list_thumbnails))
        .route("/thumbnails/{site}", get(handlers::thumbnail))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_caller));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves, then finish in-flight requests.
pub async fn serve<F>(addr: SocketAddr, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped");
    Ok(())
}
