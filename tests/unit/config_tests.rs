//! Unit tests for server configuration parsing and token loading.

use std::path::Path;
use std::time::Duration;

use remote_run::config::{resolve_token, ServerConfig, TOKEN_ENV_VAR};
use remote_run::AppError;
use serial_test::serial;

fn sample_toml(working: &str) -> String {
    format!(
        r#"
listen_address = "0.0.0.0:9000"
working_directory = '{working}'
replace_timeout_seconds = 15

[delve]
binary = "/opt/go/bin/dlv"
listen_address = "0.0.0.0:9001"

[java]
binary = "/usr/lib/jvm/bin/java"
agentlib = "jdwp=transport=dt_socket,server=y,suspend=y,address=*:9002"
"#
    )
}

#[test]
fn parses_valid_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = sample_toml(temp.path().to_str().expect("utf8 path"));

    let config = ServerConfig::from_toml_str(&toml).expect("config parses");

    assert_eq!(config.listen_address, "0.0.0.0:9000");
    assert_eq!(config.delve.binary, "/opt/go/bin/dlv");
    assert_eq!(config.delve.listen_address, "0.0.0.0:9001");
    assert_eq!(config.java.binary, "/usr/lib/jvm/bin/java");
    assert!(config.java.agentlib.contains("suspend=y"));
    assert_eq!(config.replace_timeout(), Some(Duration::from_secs(15)));
    assert_eq!(
        config.working_directory(),
        temp.path().canonicalize().expect("canonical")
    );
    assert!(config.token.is_empty(), "token is never read from TOML");
}

#[test]
fn empty_config_uses_defaults() {
    let config = ServerConfig::from_toml_str("").expect("empty config parses");

    assert_eq!(config.listen_address, "127.0.0.1:2344");
    assert_eq!(config.delve.binary, "dlv");
    assert_eq!(config.delve.listen_address, "127.0.0.1:2345");
    assert_eq!(config.java.binary, "java");
    assert_eq!(
        config.java.agentlib,
        "jdwp=transport=dt_socket,server=y,suspend=n,address=*:5005"
    );
    assert_eq!(
        config.working_directory(),
        std::env::current_dir()
            .expect("cwd")
            .canonicalize()
            .expect("canonical")
    );
    assert_eq!(config.artifact_dir(), std::env::temp_dir());
}

#[test]
fn zero_replace_timeout_means_wait_forever() {
    let config = ServerConfig::from_toml_str("replace_timeout_seconds = 0").expect("parses");
    assert_eq!(config.replace_timeout(), None);
}

#[test]
fn invalid_listen_address_is_rejected() {
    let result = ServerConfig::from_toml_str(r#"listen_address = "not-an-address""#);
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn missing_working_directory_is_rejected() {
    let result = ServerConfig::from_toml_str(
        r#"working_directory = "/definitely/not/a/real/dir/remote-run""#,
    );
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn missing_artifact_dir_is_rejected() {
    let result =
        ServerConfig::from_toml_str(r#"artifact_dir = "/definitely/not/a/real/dir/artifacts""#);
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn empty_delve_listen_is_rejected() {
    let result = ServerConfig::from_toml_str(
        r#"
[delve]
listen_address = ""
"#,
    );
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn malformed_toml_is_rejected() {
    let result = ServerConfig::from_toml_str("listen_address = [");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn load_from_path_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("config.toml");
    std::fs::write(&path, sample_toml(temp.path().to_str().expect("utf8"))).expect("write");

    let config = ServerConfig::load_from_path(&path).expect("loads");
    assert_eq!(config.listen_address, "0.0.0.0:9000");
}

#[test]
fn load_from_missing_path_is_config_error() {
    let result = ServerConfig::load_from_path(Path::new("/no/such/remote-run.toml"));
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
#[serial]
fn explicit_token_wins_over_env() {
    std::env::set_var(TOKEN_ENV_VAR, "from-env");
    let token = resolve_token(Some("from-cli".into())).expect("token");
    std::env::remove_var(TOKEN_ENV_VAR);
    assert_eq!(token, "from-cli");
}

#[test]
#[serial]
fn env_token_is_used_as_fallback() {
    std::env::set_var(TOKEN_ENV_VAR, "from-env");
    let mut config = ServerConfig::default();
    let result = config.load_credentials(None);
    std::env::remove_var(TOKEN_ENV_VAR);
    result.expect("credentials load");
    assert_eq!(config.token, "from-env");
}

#[test]
#[serial]
fn missing_token_is_config_error() {
    std::env::remove_var(TOKEN_ENV_VAR);
    let result = resolve_token(Some(String::new()));
    assert!(matches!(result, Err(AppError::Config(_))));
}
