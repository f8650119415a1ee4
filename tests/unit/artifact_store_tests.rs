//! Unit tests for the artifact store.

use std::io;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use remote_run::artifact::{self, ArtifactStore};
use remote_run::AppError;

fn ok_body(chunks: &[&'static str]) -> impl Stream<Item = Result<Bytes, io::Error>> + Unpin {
    stream::iter(
        chunks
            .iter()
            .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
            .collect::<Vec<_>>(),
    )
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .expect("file name")
        .to_string_lossy()
        .into_owned()
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn persist_writes_body_to_derived_name() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(temp.path());

    let path = store
        .persist("prog.bin", ok_body(&["hello ", "world"]))
        .await
        .expect("persist")
        .release();

    assert_eq!(path.parent(), Some(temp.path()));
    assert_eq!(file_name(&path), "rr-prog-0.bin");
    assert_eq!(std::fs::read(&path).expect("read"), b"hello world");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}

#[tokio::test]
async fn taken_name_moves_to_next_index() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("rr-prog-0.bin"), b"old").expect("seed");
    let store = ArtifactStore::new(temp.path());

    let path = store
        .persist("prog.bin", ok_body(&["new"]))
        .await
        .expect("persist")
        .release();

    assert_eq!(file_name(&path), "rr-prog-1.bin");
    assert_eq!(
        std::fs::read(temp.path().join("rr-prog-0.bin")).expect("read"),
        b"old"
    );
}

#[tokio::test]
async fn all_derived_names_taken_falls_back_to_generated_name() {
    let temp = tempfile::tempdir().expect("tempdir");
    for i in 0..artifact::NAME_ATTEMPTS {
        std::fs::write(temp.path().join(format!("rr-prog-{i}.bin")), b"x").expect("seed");
    }
    let store = ArtifactStore::new(temp.path());

    let path = store
        .persist("prog.bin", ok_body(&["new"]))
        .await
        .expect("persist")
        .release();

    let name = file_name(&path);
    assert!(name.starts_with("rr"), "unexpected name {name}");
    assert!(name.ends_with(".bin"), "unexpected name {name}");
    assert!(!name.starts_with("rr-prog-"), "unexpected name {name}");
    assert_eq!(std::fs::read(&path).expect("read"), b"new");
}

#[tokio::test]
async fn empty_program_name_uses_generated_name_with_default_extension() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(temp.path());

    let path = store
        .persist("", ok_body(&["x"]))
        .await
        .expect("persist")
        .release();

    let name = file_name(&path);
    assert!(name.starts_with("rr"), "unexpected name {name}");
    assert!(name.ends_with(".exe"), "unexpected name {name}");
}

#[tokio::test]
async fn failing_body_removes_partial_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(temp.path());
    let body = stream::iter(vec![
        Ok(Bytes::from_static(b"partial")),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
    ]);

    let err = store.persist("prog.bin", body).await.expect_err("fails");

    assert!(matches!(err, AppError::Artifact(_)));
    assert!(err.to_string().contains("client went away"));
    assert!(dir_entries(temp.path()).is_empty());
}

#[tokio::test]
async fn missing_root_is_artifact_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(temp.path().join("gone"));

    let result = store.persist("prog.bin", ok_body(&["x"])).await;
    assert!(matches!(result, Err(AppError::Artifact(_))));
}

#[tokio::test]
async fn delete_is_idempotent() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("rr-prog-0.bin");
    std::fs::write(&path, b"x").expect("seed");

    artifact::delete(&path).await;
    assert!(!path.exists());
    artifact::delete(&path).await;
    assert!(!path.exists());
}

#[tokio::test]
async fn dropped_guard_deletes_artifact() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(temp.path());

    let guard = store
        .persist("prog.bin", ok_body(&["x"]))
        .await
        .expect("persist");
    assert!(guard.path().exists());

    drop(guard);
    assert!(dir_entries(temp.path()).is_empty());
}

#[tokio::test]
async fn abandoned_upload_leaves_no_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = ArtifactStore::new(temp.path());
    let stalled = ok_body(&["first chunk"]).chain(stream::pending());

    let result = tokio::time::timeout(
        Duration::from_millis(200),
        store.persist("prog.bin", stalled),
    )
    .await;

    assert!(result.is_err(), "stalled body should never finish");
    assert!(dir_entries(temp.path()).is_empty());
}
