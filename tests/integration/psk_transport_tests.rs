//! End-to-end tests over the pre-shared-key TLS listener using the client.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use remote_run::api::handler::AppState;
use remote_run::api::server::serve_on;
use remote_run::client::{upload_and_run, UploadOptions};
use remote_run::models::upload::ProgramKind;
use remote_run::transport::psk::{PskAcceptor, PskConnector, PskListener};
use remote_run::AppError;
use serial_test::serial;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::test_helpers::{recorded_args, test_config, test_state, Workspace};

const TOKEN: &str = "test-psk-token";

async fn start_server(state: &Arc<AppState>) -> (SocketAddr, CancellationToken, JoinHandle<()>) {
    let ct = CancellationToken::new();
    let acceptor = PskAcceptor::new(TOKEN.as_bytes()).expect("acceptor");
    let listener = PskListener::bind("127.0.0.1:0".parse().expect("addr"), acceptor, ct.clone())
        .await
        .expect("bind");
    let addr = listener.bound_addr();

    let server_state = Arc::clone(state);
    let server_ct = ct.clone();
    let handle = tokio::spawn(async move {
        serve_on(listener, server_state, server_ct)
            .await
            .expect("server runs");
    });
    (addr, ct, handle)
}

#[tokio::test]
#[serial]
async fn upload_over_psk_starts_program() {
    let ws = Workspace::new();
    let state = test_state(test_config(&ws));
    let (addr, ct, handle) = start_server(&state).await;

    let options = UploadOptions {
        kind: ProgramKind::Go,
        program_name: "prog.bin".into(),
        run_args: vec!["--verbose".into()],
        ..UploadOptions::default()
    };
    let body = upload_and_run(
        &addr.to_string(),
        TOKEN,
        &options,
        Bytes::from_static(b"program"),
    )
    .await
    .expect("upload succeeds");

    assert_eq!(body, "{}");
    let recorded = recorded_args(&ws.dlv_log).await;
    assert_eq!(recorded.last().map(String::as_str), Some("--verbose"));
    assert!(state.registry.running_pid("go").is_some());

    ct.cancel();
    handle.await.expect("server task");
    state.registry.shutdown().await;
}

#[tokio::test]
#[serial]
async fn wrong_key_fails_handshake() {
    let ws = Workspace::new();
    let state = test_state(test_config(&ws));
    let (addr, ct, handle) = start_server(&state).await;

    let result = upload_and_run(
        &addr.to_string(),
        "not-the-token",
        &UploadOptions::default(),
        Bytes::from_static(b"program"),
    )
    .await;

    assert!(matches!(result, Err(AppError::Transport(_))), "{result:?}");
    assert!(state.registry.identities().is_empty());

    ct.cancel();
    handle.await.expect("server task");
}

#[tokio::test]
#[serial]
async fn server_error_surfaces_as_remote_error() {
    let ws = Workspace::new();
    let mut config = test_config(&ws);
    config.java.binary = ws.bin("no-such-java").display().to_string();
    let state = test_state(config);
    let (addr, ct, handle) = start_server(&state).await;

    let options = UploadOptions {
        kind: ProgramKind::Java,
        program_name: "svc.jar".into(),
        ..UploadOptions::default()
    };
    let result = upload_and_run(
        &addr.to_string(),
        TOKEN,
        &options,
        Bytes::from_static(b"jar"),
    )
    .await;

    match result {
        Err(AppError::Remote(message)) => {
            assert!(message.starts_with("launch: failed to start"), "{message}");
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    ct.cancel();
    handle.await.expect("server task");
}

#[test]
fn empty_key_is_rejected() {
    assert!(matches!(PskAcceptor::new(b""), Err(AppError::Config(_))));
    assert!(matches!(PskConnector::new(b""), Err(AppError::Config(_))));
}
