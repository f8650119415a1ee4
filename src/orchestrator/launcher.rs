//! Debugger and runtime process launcher.
//!
//! Builds the debugger (`go`) or JVM (`java`) invocation for an artifact
//! and starts it without waiting for it to exit. Children inherit the
//! server's stdout/stderr, run in the configured working directory, and
//! lead their own process group so a kill reaches the debuggee too.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

use crate::config::ServerConfig;
use crate::models::upload::ProgramKind;
use crate::{AppError, Result};

/// Static launcher settings taken from [`ServerConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSettings {
    /// Debugger executable.
    pub delve_binary: String,
    /// Headless debugger listen address.
    pub delve_listen_address: String,
    /// JVM executable.
    pub java_binary: String,
    /// Value of the `-agentlib:` option.
    pub java_agentlib: String,
    /// Working directory of every child.
    pub working_directory: PathBuf,
}

impl LaunchSettings {
    /// Extract launcher settings from a validated configuration.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            delve_binary: config.delve.binary.clone(),
            delve_listen_address: config.delve.listen_address.clone(),
            java_binary: config.java.binary.clone(),
            java_agentlib: config.java.agentlib.clone(),
            working_directory: config.working_directory().to_path_buf(),
        }
    }
}

/// Arguments for one launch.
#[derive(Debug, Clone, Copy)]
pub struct LaunchRequest<'a> {
    /// Which invocation to build.
    pub kind: ProgramKind,
    /// Executable artifact to run.
    pub artifact: &'a Path,
    /// Program arguments.
    pub run_args: &'a [String],
    /// Debugger arguments (`go`) or JVM options (`java`).
    pub tool_args: &'a [String],
}

/// Fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable to start.
    pub program: String,
    /// Arguments in order.
    pub args: Vec<String>,
    /// Working directory.
    pub working_directory: PathBuf,
}

/// Starts debugger-wrapped processes for artifacts.
#[derive(Debug, Clone)]
pub struct Launcher {
    settings: LaunchSettings,
}

impl Launcher {
    /// Create a launcher with fixed settings.
    #[must_use]
    pub fn new(settings: LaunchSettings) -> Self {
        Self { settings }
    }

    /// Launcher settings.
    #[must_use]
    pub fn settings(&self) -> &LaunchSettings {
        &self.settings
    }

    /// Build the command line for `request` without starting anything.
    #[must_use]
    pub fn command_for(&self, request: &LaunchRequest<'_>) -> CommandSpec {
        let artifact = request.artifact.to_string_lossy().into_owned();
        let (program, args) = match request.kind {
            ProgramKind::Go => {
                let mut args: Vec<String> = vec![
                    "exec".into(),
                    "--headless".into(),
                    "--accept-multiclient".into(),
                    "--api-version=2".into(),
                    "--listen".into(),
                    self.settings.delve_listen_address.clone(),
                ];
                args.extend(request.tool_args.iter().cloned());
                args.push(artifact);
                if !request.run_args.is_empty() {
                    args.push("--".into());
                    args.extend(request.run_args.iter().cloned());
                }
                (self.settings.delve_binary.clone(), args)
            }
            ProgramKind::Java => {
                let mut args = vec![format!("-agentlib:{}", self.settings.java_agentlib)];
                args.extend(request.tool_args.iter().cloned());
                args.push("-jar".into());
                args.push(artifact);
                args.extend(request.run_args.iter().cloned());
                (self.settings.java_binary.clone(), args)
            }
        };

        CommandSpec {
            program,
            args,
            working_directory: self.settings.working_directory.clone(),
        }
    }

    /// Start the process for `request` and return its handle immediately.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Launch` if the process cannot be spawned.
    pub fn start(&self, request: &LaunchRequest<'_>) -> Result<Child> {
        let spec = self.command_for(request);
        let child = spawn(&spec)?;
        info!(
            kind = %request.kind,
            pid = child.id().unwrap_or(0),
            program = spec.program,
            args = ?spec.args,
            "process started"
        );
        Ok(child)
    }
}

/// Spawn `spec` with inherited output and a fresh process group.
///
/// # Errors
///
/// Returns `AppError::Launch` if the OS refuses to start the process.
pub fn spawn(spec: &CommandSpec) -> Result<Child> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .current_dir(&spec.working_directory)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn()
        .map_err(|err| AppError::Launch(format!("failed to start {}: {err}", spec.program)))
}
