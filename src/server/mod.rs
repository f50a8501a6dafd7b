/// HTTP API for the snapshot ledger.
///
/// A thin routing layer over the pipeline. Project and snapshot data live
/// in the workspace on disk; the chain is reached only through the
/// optional registry capabilities:
/// - without a reader, `verify` and the ledger listing are unavailable
/// - without a signer, anchoring is unavailable
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::Mutex;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::anchor::{RegistryReader, RegistrySigner};
use crate::error::{LedgerError, Result};
use crate::project::Workspace;

/// Shared application state available to all handlers.
pub struct AppState {
    pub workspace: Workspace,
    pub reader: Option<Arc<dyn RegistryReader>>,
    pub signer: Option<Arc<dyn RegistrySigner>>,
    /// Held for every workspace mutation so manifest updates never
    /// interleave.
    pub write_lock: Mutex<()>,
}

impl AppState {
    pub fn new(
        workspace: Workspace,
        reader: Option<Arc<dyn RegistryReader>>,
        signer: Option<Arc<dyn RegistrySigner>>,
    ) -> Self {
        Self {
            workspace,
            reader,
            signer,
            write_lock: Mutex::new(()),
        }
    }
}

/// Build the Axum application with all routes and middleware.
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::project_routes())
        .merge(routes::snapshot_routes())
        .merge(routes::ledger_routes())
        .with_state(Arc::new(state))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the API server.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(LedgerError::Io)?;

    tracing::info!("assured-ledger API listening on {addr}");

    axum::serve(listener, app).await.map_err(LedgerError::Io)?;

    Ok(())
}
