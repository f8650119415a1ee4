//! Unit tests for debugger/runtime command construction.

use std::path::{Path, PathBuf};

use remote_run::config::ServerConfig;
use remote_run::models::upload::ProgramKind;
use remote_run::orchestrator::launcher::{spawn, CommandSpec, LaunchRequest, LaunchSettings, Launcher};
use remote_run::AppError;

fn launcher() -> Launcher {
    Launcher::new(LaunchSettings {
        delve_binary: "/usr/local/bin/dlv".into(),
        delve_listen_address: "0.0.0.0:2345".into(),
        java_binary: "/usr/bin/java".into(),
        java_agentlib: "jdwp=transport=dt_socket,server=y,suspend=n,address=*:5005".into(),
        working_directory: PathBuf::from("/srv/work"),
    })
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_owned()).collect()
}

#[test]
fn go_places_debugger_args_before_artifact_and_run_args_after_separator() {
    let run_args = strings(&["-v", "--port", "8080"]);
    let tool_args = strings(&["--continue", "--log"]);
    let spec = launcher().command_for(&LaunchRequest {
        kind: ProgramKind::Go,
        artifact: Path::new("/tmp/rr-prog-0.bin"),
        run_args: &run_args,
        tool_args: &tool_args,
    });

    assert_eq!(spec.program, "/usr/local/bin/dlv");
    assert_eq!(
        spec.args,
        strings(&[
            "exec",
            "--headless",
            "--accept-multiclient",
            "--api-version=2",
            "--listen",
            "0.0.0.0:2345",
            "--continue",
            "--log",
            "/tmp/rr-prog-0.bin",
            "--",
            "-v",
            "--port",
            "8080",
        ])
    );
}

#[test]
fn java_places_agent_then_jvm_args_then_jar_then_run_args() {
    let run_args = strings(&["--port", "8080"]);
    let tool_args = strings(&["-Xmx512m", "-Dprofile=dev"]);
    let spec = launcher().command_for(&LaunchRequest {
        kind: ProgramKind::Java,
        artifact: Path::new("/tmp/rr-service-0.jar"),
        run_args: &run_args,
        tool_args: &tool_args,
    });

    assert_eq!(spec.program, "/usr/bin/java");
    assert_eq!(
        spec.args,
        strings(&[
            "-agentlib:jdwp=transport=dt_socket,server=y,suspend=n,address=*:5005",
            "-Xmx512m",
            "-Dprofile=dev",
            "-jar",
            "/tmp/rr-service-0.jar",
            "--port",
            "8080",
        ])
    );
    assert_eq!(spec.working_directory, PathBuf::from("/srv/work"));
}

#[test]
fn settings_follow_config() {
    let mut config = ServerConfig::default();
    config.delve.binary = "dlv-1.22".into();
    config.java.agentlib = "jdwp=custom".into();

    let settings = LaunchSettings::from_config(&config);
    assert_eq!(settings.delve_binary, "dlv-1.22");
    assert_eq!(settings.java_agentlib, "jdwp=custom");
    assert_eq!(settings.delve_listen_address, config.delve.listen_address);
    assert_eq!(settings.working_directory, config.working_directory());
}

#[tokio::test]
async fn missing_binary_is_launch_error() {
    let spec = CommandSpec {
        program: "/definitely/not/a/debugger".into(),
        args: Vec::new(),
        working_directory: std::env::temp_dir(),
    };

    let err = spawn(&spec).expect_err("spawn fails");
    assert!(matches!(err, AppError::Launch(_)));
    assert!(err
        .to_string()
        .starts_with("launch: failed to start /definitely/not/a/debugger"));
}
