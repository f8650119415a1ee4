//! Client side of the upload protocol.
//!
//! Opens a PSK-TLS connection to the server, posts the program bytes with
//! the metadata headers, and turns a non-200 reply into
//! [`AppError::Remote`] carrying the server's message.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::api::server::UPLOAD_PATH;
use crate::models::response::ErrorResponse;
use crate::models::upload::{
    encode_arg_list, ProgramKind, HEADER_ARGS, HEADER_DEBUGGER_ARGS, HEADER_JVM_ARGS,
    HEADER_NAME, HEADER_NO_DEBUG, HEADER_TYPE,
};
use crate::transport::psk::PskConnector;
use crate::{AppError, Result};

/// Metadata sent alongside the program bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Program kind selecting the launcher.
    pub kind: ProgramKind,
    /// Display name, normally the local file name.
    pub program_name: String,
    /// Program arguments.
    pub run_args: Vec<String>,
    /// Extra debugger arguments.
    pub debugger_args: Vec<String>,
    /// Extra JVM options.
    pub jvm_args: Vec<String>,
    /// Ask the server to skip the debugger.
    pub skip_debugger: bool,
}

/// Build the upload request for `options` and `program`.
///
/// # Errors
///
/// Returns `AppError::Protocol` if a header cannot be encoded.
pub fn build_request(
    authority: &str,
    options: &UploadOptions,
    program: Bytes,
) -> Result<Request<Full<Bytes>>> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(UPLOAD_PATH)
        .header(HOST, authority)
        .header(CONTENT_TYPE, "application/octet-stream")
        .header(HEADER_NAME, options.program_name.as_str())
        .header(HEADER_TYPE, options.kind.identity())
        .header(HEADER_ARGS, encode_arg_list(&options.run_args)?)
        .header(HEADER_DEBUGGER_ARGS, encode_arg_list(&options.debugger_args)?)
        .header(HEADER_JVM_ARGS, encode_arg_list(&options.jvm_args)?);
    if options.skip_debugger {
        builder = builder.header(HEADER_NO_DEBUG, "true");
    }

    builder
        .body(Full::new(program))
        .map_err(|err| AppError::Protocol(format!("cannot build upload request: {err}")))
}

/// Upload `program` to the server at `connect` and start it.
///
/// Returns the raw response body on success.
///
/// # Errors
///
/// Returns `AppError::Transport` on connection or handshake failure and
/// `AppError::Remote` when the server reports an error.
pub async fn upload_and_run(
    connect: &str,
    token: &str,
    options: &UploadOptions,
    program: Bytes,
) -> Result<String> {
    let connector = PskConnector::new(token.as_bytes())?;
    let tcp = TcpStream::connect(connect)
        .await
        .map_err(|err| AppError::Transport(format!("cannot connect to {connect}: {err}")))?;
    let tls = connector.connect(tcp).await?;

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(tls))
        .await
        .map_err(|err| AppError::Transport(format!("http handshake failed: {err}")))?;
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            warn!(%err, "upload connection closed with error");
        }
    });

    let request = build_request(connect, options, program)?;
    debug!(connect, kind = %options.kind, "sending upload");
    let response = sender
        .send_request(request)
        .await
        .map_err(|err| AppError::Transport(format!("upload request failed: {err}")))?;

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|err| AppError::Transport(format!("cannot read response: {err}")))?
        .to_bytes();
    let text = String::from_utf8_lossy(&body).into_owned();

    if status == StatusCode::OK {
        Ok(text)
    } else {
        Err(AppError::Remote(remote_message(status, &text)))
    }
}

fn remote_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(error) => error.message,
        Err(_) => format!("{status}: {body}"),
    }
}
