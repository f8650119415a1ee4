//! Server configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Environment variable consulted when no `--token` flag is given.
pub const TOKEN_ENV_VAR: &str = "REMOTE_RUN_TOKEN";

/// Debugger (delve) invocation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DelveConfig {
    /// Debugger executable name or path.
    #[serde(default = "default_delve_binary")]
    pub binary: String,
    /// Address the headless debugger listens on.
    #[serde(default = "default_delve_listen")]
    pub listen_address: String,
}

impl Default for DelveConfig {
    fn default() -> Self {
        Self {
            binary: default_delve_binary(),
            listen_address: default_delve_listen(),
        }
    }
}

/// JVM invocation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct JavaConfig {
    /// JVM executable name or path.
    #[serde(default = "default_java_binary")]
    pub binary: String,
    /// Value passed to the JVM as `-agentlib:<agentlib>`.
    #[serde(default = "default_java_agentlib")]
    pub agentlib: String,
}

impl Default for JavaConfig {
    fn default() -> Self {
        Self {
            binary: default_java_binary(),
            agentlib: default_java_agentlib(),
        }
    }
}

fn default_listen_address() -> String {
    "127.0.0.1:2344".into()
}

fn default_delve_binary() -> String {
    "dlv".into()
}

fn default_delve_listen() -> String {
    "127.0.0.1:2345".into()
}

fn default_java_binary() -> String {
    "java".into()
}

fn default_java_agentlib() -> String {
    "jdwp=transport=dt_socket,server=y,suspend=n,address=*:5005".into()
}

/// Server configuration parsed from an optional `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Address of the PSK-TLS HTTP listener.
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Working directory of spawned programs; defaults to the process cwd.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Directory uploaded artifacts are written to; defaults to the OS temp dir.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
    /// Upper bound on waiting for a replaced generation to be reaped; 0 means
    /// wait forever.
    #[serde(default)]
    pub replace_timeout_seconds: u64,
    /// Debugger settings for `go` uploads.
    #[serde(default)]
    pub delve: DelveConfig,
    /// Runtime settings for `java` uploads.
    #[serde(default)]
    pub java: JavaConfig,
    /// Pre-shared key (populated at runtime, never from TOML).
    #[serde(skip)]
    pub token: String,
}

impl ServerConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the pre-shared key from the CLI value with env-var fallback.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither source provides a non-empty token.
    pub fn load_credentials(&mut self, cli_token: Option<String>) -> Result<()> {
        self.token = resolve_token(cli_token)?;
        Ok(())
    }

    /// Working directory handed to spawned programs.
    ///
    /// Always set after validation.
    #[must_use]
    pub fn working_directory(&self) -> &Path {
        self.working_directory.as_deref().unwrap_or(Path::new("."))
    }

    /// Directory uploaded artifacts are written to.
    #[must_use]
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(env::temp_dir)
    }

    /// `None` when evictions may wait indefinitely.
    #[must_use]
    pub fn replace_timeout(&self) -> Option<Duration> {
        (self.replace_timeout_seconds > 0).then(|| Duration::from_secs(self.replace_timeout_seconds))
    }

    /// Parsed listen address.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the address does not parse.
    pub fn listen_socket_addr(&self) -> Result<SocketAddr> {
        self.listen_address.parse().map_err(|err| {
            AppError::Config(format!(
                "listen_address '{}' invalid: {err}",
                self.listen_address
            ))
        })
    }

    /// Re-run validation after CLI overrides have been applied.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any setting is invalid.
    pub fn validate(&mut self) -> Result<()> {
        self.listen_socket_addr()?;

        if self.delve.listen_address.trim().is_empty() {
            return Err(AppError::Config(
                "delve.listen_address must not be empty".into(),
            ));
        }

        if self.delve.binary.trim().is_empty() || self.java.binary.trim().is_empty() {
            return Err(AppError::Config("launcher binaries must not be empty".into()));
        }

        let working = match self.working_directory.take() {
            Some(path) => path,
            None => env::current_dir()
                .map_err(|err| AppError::Config(format!("cannot resolve cwd: {err}")))?,
        };
        let canonical = working
            .canonicalize()
            .map_err(|err| AppError::Config(format!("working_directory invalid: {err}")))?;
        if !canonical.is_dir() {
            return Err(AppError::Config(format!(
                "working_directory {} is not a directory",
                canonical.display()
            )));
        }
        self.working_directory = Some(canonical);

        if let Some(ref dir) = self.artifact_dir {
            if !dir.is_dir() {
                return Err(AppError::Config(format!(
                    "artifact_dir {} is not a directory",
                    dir.display()
                )));
            }
        }

        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            working_directory: None,
            artifact_dir: None,
            replace_timeout_seconds: 0,
            delve: DelveConfig::default(),
            java: JavaConfig::default(),
            token: String::new(),
        }
    }
}

/// Pick the pre-shared key from an explicit value or [`TOKEN_ENV_VAR`].
///
/// # Errors
///
/// Returns `AppError::Config` if no non-empty token is available.
pub fn resolve_token(cli_token: Option<String>) -> Result<String> {
    if let Some(token) = cli_token {
        if !token.is_empty() {
            return Ok(token);
        }
        warn!("--token is empty, trying env var");
    }

    match env::var(TOKEN_ENV_VAR) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(AppError::Config(format!(
            "pre-shared key not provided via --token or {TOKEN_ENV_VAR} env var"
        ))),
    }
}
