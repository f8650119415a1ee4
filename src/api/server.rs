//! HTTP server for the upload endpoint.
//!
//! Mounts the handler on an axum router and serves it over the
//! pre-shared-key TLS listener until the cancellation token fires.

use std::sync::Arc;

use axum::routing::any;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::handler::{upload_and_run, AppState};
use crate::transport::psk::{PskAcceptor, PskListener};
use crate::{AppError, Result};

/// Path of the only endpoint.
pub const UPLOAD_PATH: &str = "/api/upload-and-run";

/// Build the application router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(UPLOAD_PATH, any(upload_and_run))
        .with_state(state)
}

/// Serve the upload endpoint on `config.listen_address`.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener cannot be bound or the TLS
/// context cannot be built, and `AppError::Transport` if the server fails.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind = state.config.listen_socket_addr()?;
    let acceptor = PskAcceptor::new(state.config.token.as_bytes())?;
    let listener = PskListener::bind(bind, acceptor, ct.clone()).await?;

    info!(
        bind = %listener.bound_addr(),
        delve_listen = %state.config.delve.listen_address,
        "listening for uploads over tls-psk"
    );

    serve_on(listener, state, ct).await
}

/// Serve the router on an already bound listener.
///
/// # Errors
///
/// Returns `AppError::Transport` if the server fails.
pub async fn serve_on(
    listener: PskListener,
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Transport(format!("http server error: {err}")))?;

    info!("upload server shut down");
    Ok(())
}
