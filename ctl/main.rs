#![forbid(unsafe_code)]

//! `remote-run-ctl`: client companion for `remote-run`.
//!
//! Uploads a local executable to a `remote-run` server over PSK-TLS and
//! has it started under the debugger, replacing the previous run.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use bytes::Bytes;
use clap::{Parser, Subcommand};

use remote_run::client::{upload_and_run, UploadOptions};
use remote_run::config::resolve_token;
use remote_run::models::upload::ProgramKind;
use remote_run::{AppError, Result};

#[derive(Debug, Parser)]
#[command(
    name = "remote-run-ctl",
    about = "Client for the remote-run server",
    version,
    long_about = None
)]
struct Cli {
    /// Pre-shared key; falls back to the REMOTE_RUN_TOKEN env var.
    #[arg(long, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload an executable and run it on the server.
    Exec {
        /// Server address (`host:port`).
        #[arg(long, default_value = "127.0.0.1:2344")]
        connect: String,

        /// Program type: go or java.
        #[arg(long = "type", default_value = "go")]
        kind: String,

        /// Start the program without waiting for a debugger client.
        #[arg(long = "continue")]
        continue_: bool,

        /// Ask the server to run without the debugger.
        #[arg(long)]
        no_debug: bool,

        /// Extra debugger argument (repeatable).
        #[arg(long = "dlv-arg", allow_hyphen_values = true)]
        dlv_args: Vec<String>,

        /// Extra JVM option (repeatable).
        #[arg(long = "jvm-arg", allow_hyphen_values = true)]
        jvm_args: Vec<String>,

        /// Executable or jar to upload.
        file: PathBuf,

        /// Arguments passed to the program.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        run_args: Vec<String>,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to build tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(body) => {
            println!("{body}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<String> {
    let token = resolve_token(args.token)?;

    match args.command {
        Command::Exec {
            connect,
            kind,
            continue_,
            no_debug,
            mut dlv_args,
            jvm_args,
            file,
            run_args,
        } => {
            let kind: ProgramKind = kind.parse()?;
            if continue_ {
                dlv_args.push("--continue".into());
            }

            let program = tokio::fs::read(&file).await.map_err(|err| {
                AppError::Io(format!("cannot read {}: {err}", file.display()))
            })?;

            let options = UploadOptions {
                kind,
                program_name: file_name(&file),
                run_args,
                debugger_args: dlv_args,
                jvm_args,
                skip_debugger: no_debug,
            };
            upload_and_run(&connect, &token, &options, Bytes::from(program)).await
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
