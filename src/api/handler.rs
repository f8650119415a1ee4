//! Upload-and-run request handler.
//!
//! Decodes the upload metadata, evicts the identity's previous generation,
//! persists the body as an artifact, launches the debugger or runtime, and
//! commits the new generation to the registry. Until the process is
//! committed the handler owns the artifact and removes it on failure.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, info, info_span, warn, Instrument};

use crate::artifact::ArtifactStore;
use crate::config::ServerConfig;
use crate::models::response::ErrorResponse;
use crate::models::upload::{ProgramKind, UploadRequest};
use crate::orchestrator::launcher::{LaunchRequest, LaunchSettings, Launcher};
use crate::orchestrator::registry::SessionRegistry;
use crate::{AppError, Result};

/// JSON content type sent with every response.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Shared state for all request handlers.
#[derive(Debug)]
pub struct AppState {
    /// Validated server configuration.
    pub config: Arc<ServerConfig>,
    /// One live generation per identity.
    pub registry: Arc<SessionRegistry>,
    /// Where uploads are written.
    pub store: ArtifactStore,
    /// Builds and starts debugger/runtime processes.
    pub launcher: Launcher,
}

impl AppState {
    /// Build state from a validated configuration.
    #[must_use]
    pub fn from_config(config: Arc<ServerConfig>) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new(config.replace_timeout())),
            store: ArtifactStore::new(config.artifact_dir()),
            launcher: Launcher::new(LaunchSettings::from_config(&config)),
            config,
        }
    }
}

/// `POST /api/upload-and-run`.
///
/// Any method is routed here so that a wrong one gets the JSON error body.
pub async fn upload_and_run(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let span = info_span!("upload_and_run", identity = tracing::field::Empty);
    match handle_upload(&state, &method, &headers, body)
        .instrument(span)
        .await
    {
        Ok(()) => json_response(StatusCode::OK, "{}".to_owned()),
        Err(err) => {
            error!(%err, "upload-and-run failed");
            error_response(&err)
        }
    }
}

async fn handle_upload(
    state: &AppState,
    method: &Method,
    headers: &HeaderMap,
    body: Body,
) -> Result<()> {
    if *method != Method::POST {
        return Err(AppError::Protocol(format!("invalid method: {method}")));
    }

    let request = UploadRequest::from_headers(headers)?;
    tracing::Span::current().record("identity", request.kind.identity());
    if request.skip_debugger {
        warn!("skip-debugger requested; launching under the debugger anyway");
    }

    // Evict first so the previous artifact is gone before the new one exists.
    let lease = state.registry.prepare(request.kind.identity()).await?;

    let artifact = state
        .store
        .persist(&request.program_name, body.into_data_stream())
        .await?;

    let tool_args = match request.kind {
        ProgramKind::Go => &request.debugger_args,
        ProgramKind::Java => &request.jvm_args,
    };
    let launch = LaunchRequest {
        kind: request.kind,
        artifact: artifact.path(),
        run_args: &request.run_args,
        tool_args,
    };

    // On failure the guard removes the artifact; no reaper will ever own it.
    let child = state.launcher.start(&launch)?;
    let generation = lease.commit(child, artifact.release());
    info!(%generation, "upload running");
    Ok(())
}

fn json_response(status: StatusCode, body: String) -> Response {
    let mut response = (status, body).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(JSON_CONTENT_TYPE),
    );
    response
}

/// Map an error to `500 {"message": ...}`.
#[must_use]
pub fn error_response(err: &AppError) -> Response {
    let body = serde_json::to_string(&ErrorResponse::new(err.to_string()))
        .unwrap_or_else(|_| r#"{"message":"internal error"}"#.to_owned());
    json_response(StatusCode::INTERNAL_SERVER_ERROR, body)
}
