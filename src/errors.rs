//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Malformed upload request (method, program type, header encoding).
    Protocol(String),
    /// Artifact could not be created, written, or marked executable.
    Artifact(String),
    /// Debugger or runtime process failed to start.
    Launch(String),
    /// Previous generation was not reaped within the configured limit.
    Replace(String),
    /// TLS handshake or HTTP connection failure.
    Transport(String),
    /// Server answered an upload with an error response.
    Remote(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Artifact(msg) => write!(f, "artifact: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Replace(msg) => write!(f, "replace: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Remote(msg) => write!(f, "remote: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<openssl::error::ErrorStack> for AppError {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::Transport(format!("openssl: {err}"))
    }
}
