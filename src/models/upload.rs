//! Upload request model and the header codec shared by server and client.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{AppError, Result};

/// Display name of the uploaded program, used for artifact naming.
pub const HEADER_NAME: &str = "x-program-name";
/// Program kind selector (`go` or `java`).
pub const HEADER_TYPE: &str = "x-program-type";
/// Run arguments, base64(JSON array of strings).
pub const HEADER_ARGS: &str = "x-program-args";
/// Extra debugger arguments, base64(JSON array of strings).
pub const HEADER_DEBUGGER_ARGS: &str = "x-debugger-args";
/// Extra JVM options, base64(JSON array of strings).
pub const HEADER_JVM_ARGS: &str = "x-jvm-args";
/// Skip-debugger flag.
pub const HEADER_NO_DEBUG: &str = "x-no-debug";

/// Kind of uploaded program; doubles as the registry identity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProgramKind {
    /// Native binary run under the headless delve debugger.
    #[default]
    Go,
    /// Jar run on a JVM with the JDWP agent attached.
    Java,
}

impl ProgramKind {
    /// Registry identity for this kind.
    #[must_use]
    pub fn identity(self) -> &'static str {
        match self {
            Self::Go => "go",
            Self::Java => "java",
        }
    }
}

impl Display for ProgramKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.identity())
    }
}

impl FromStr for ProgramKind {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "" | "go" => Ok(Self::Go),
            "java" => Ok(Self::Java),
            other => Err(AppError::Protocol(format!("unknown type: {other}"))),
        }
    }
}

/// Decoded request metadata for one upload; the body is streamed separately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRequest {
    /// Program kind (and registry identity).
    pub kind: ProgramKind,
    /// Display name from [`HEADER_NAME`], empty when absent.
    pub program_name: String,
    /// Arguments passed to the program itself.
    pub run_args: Vec<String>,
    /// Extra arguments for the debugger invocation.
    pub debugger_args: Vec<String>,
    /// Extra JVM options placed after the debug agent.
    pub jvm_args: Vec<String>,
    /// Client asked to run without a debugger.
    pub skip_debugger: bool,
}

impl UploadRequest {
    /// Decode upload metadata from request headers.
    ///
    /// Argument lists that are absent or fail to decode degrade to an empty
    /// list; only an unknown program kind is rejected.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` for an unknown program kind or a type or
    /// flag header that is not valid visible ASCII.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self> {
        let kind: ProgramKind = header_str(headers, HEADER_TYPE)?.trim().parse()?;

        Ok(Self {
            kind,
            program_name: lossy_header(headers, HEADER_NAME),
            run_args: optional_arg_list(headers, HEADER_ARGS),
            debugger_args: optional_arg_list(headers, HEADER_DEBUGGER_ARGS),
            jvm_args: optional_arg_list(headers, HEADER_JVM_ARGS),
            skip_debugger: parse_flag(header_str(headers, HEADER_NO_DEBUG)?),
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str> {
    headers.get(name).map_or(Ok(""), |value| {
        value
            .to_str()
            .map_err(|err| AppError::Protocol(format!("header {name} is not ascii: {err}")))
    })
}

/// The name only feeds artifact naming, which sanitises it anyway.
fn lossy_header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default()
}

fn optional_arg_list(headers: &HeaderMap, name: &str) -> Vec<String> {
    let raw = match header_str(headers, name) {
        Ok(raw) if !raw.trim().is_empty() => raw,
        Ok(_) => return Vec::new(),
        Err(err) => {
            warn!(header = name, %err, "ignoring undecodable argument header");
            return Vec::new();
        }
    };

    decode_arg_list(raw).unwrap_or_else(|err| {
        warn!(header = name, %err, "ignoring malformed argument header");
        Vec::new()
    })
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

/// Decode a base64-wrapped JSON array of strings.
///
/// # Errors
///
/// Returns `AppError::Protocol` if the value is not valid base64 or the
/// payload is not a JSON array of strings.
pub fn decode_arg_list(raw: &str) -> Result<Vec<String>> {
    let decoded = STANDARD
        .decode(raw.trim())
        .map_err(|err| AppError::Protocol(format!("invalid base64 argument list: {err}")))?;
    serde_json::from_slice(&decoded)
        .map_err(|err| AppError::Protocol(format!("invalid json argument list: {err}")))
}

/// Encode an argument list as base64(JSON), the inverse of [`decode_arg_list`].
///
/// # Errors
///
/// Returns `AppError::Protocol` if serialization fails.
pub fn encode_arg_list(args: &[String]) -> Result<String> {
    let json = serde_json::to_vec(args)
        .map_err(|err| AppError::Protocol(format!("cannot encode argument list: {err}")))?;
    Ok(STANDARD.encode(json))
}
