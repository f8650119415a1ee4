//! Artifact store for uploaded programs.
//!
//! Each upload is streamed into a freshly created file in the artifact
//! directory and marked executable. Files are created with create-new
//! semantics so a name still owned by a live generation is never reused.
//! Until a process takes ownership the file is held by an [`ArtifactGuard`].
//! Deletion is idempotent.

use std::fmt::Display;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Prefix of every artifact file name.
pub const ARTIFACT_PREFIX: &str = "rr";

/// Extension used when the program name has none.
pub const DEFAULT_EXTENSION: &str = ".exe";

/// Number of `<stem>-<i>` candidates tried before a generated name.
pub const NAME_ATTEMPTS: usize = 10;

/// Writes uploads into executable files under a root directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store writing into `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory artifacts are created in.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist an upload body as an executable artifact.
    ///
    /// The file is owned by the returned guard and removed if the guard is
    /// dropped, including when this future itself is dropped mid-upload.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Artifact` if the file cannot be created, written,
    /// or made executable.
    pub async fn persist<S, E>(&self, program_name: &str, body: S) -> Result<ArtifactGuard>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let (file, path) = self.create(program_name).await?;
        let guard = ArtifactGuard::new(path);
        info!(artifact = %guard.path().display(), "saving upload");

        let bytes = write_body(file, body).await?;
        debug!(artifact = %guard.path().display(), bytes, "upload written");
        mark_executable(guard.path()).await?;
        Ok(guard)
    }

    /// Create a new, empty artifact file for `program_name`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Artifact` if neither a derived nor a generated
    /// name can be created.
    pub async fn create(&self, program_name: &str) -> Result<(File, PathBuf)> {
        let (stem, extension) = split_program_name(program_name);

        if !stem.is_empty() {
            for attempt in 0..NAME_ATTEMPTS {
                let path = self
                    .root
                    .join(format!("{ARTIFACT_PREFIX}-{stem}-{attempt}{extension}"));
                match OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .await
                {
                    Ok(file) => return Ok((file, path)),
                    Err(err) => {
                        debug!(candidate = %path.display(), %err, "artifact name unavailable");
                    }
                }
            }
            warn!(stem, "all derived artifact names taken, using generated name");
        }

        let named = tempfile::Builder::new()
            .prefix(ARTIFACT_PREFIX)
            .suffix(&extension)
            .tempfile_in(&self.root)
            .map_err(|err| AppError::Artifact(format!("failed to create temporary file: {err}")))?;
        let (file, path) = named
            .keep()
            .map_err(|err| AppError::Artifact(format!("failed to keep temporary file: {err}")))?;
        Ok((File::from_std(file), path))
    }
}

/// Artifact file that is deleted on drop until ownership is released.
#[derive(Debug)]
pub struct ArtifactGuard {
    path: PathBuf,
    armed: bool,
}

impl ArtifactGuard {
    /// Guard an existing artifact file.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Path of the guarded file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hand the file to a new owner; it is no longer deleted on drop.
    #[must_use]
    pub fn release(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(artifact = %self.path.display(), "abandoned artifact deleted"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(artifact = %self.path.display(), %err, "failed to delete artifact"),
        }
    }
}

/// Split a display name into a file-name-safe stem and an extension.
///
/// Only the final path component is used. The extension keeps its leading
/// dot and falls back to [`DEFAULT_EXTENSION`].
#[must_use]
pub fn split_program_name(program_name: &str) -> (String, String) {
    let base = program_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let (stem, extension) = match base.rfind('.') {
        Some(idx) => (&base[..idx], base[idx..].to_owned()),
        None => (base, String::new()),
    };
    let extension = if extension.len() <= 1 {
        DEFAULT_EXTENSION.to_owned()
    } else {
        sanitize(&extension)
    };

    (sanitize(stem), extension)
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn write_body<S, E>(mut file: File, mut body: S) -> Result<u64>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut total = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| AppError::Artifact(format!("upload interrupted: {err}")))?;
        file.write_all(&chunk)
            .await
            .map_err(|err| AppError::Artifact(format!("failed to write artifact: {err}")))?;
        total += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|err| AppError::Artifact(format!("failed to flush artifact: {err}")))?;
    file.sync_all()
        .await
        .map_err(|err| AppError::Artifact(format!("failed to sync artifact: {err}")))?;
    // The handle must be closed before exec or the kernel reports ETXTBSY.
    drop(file);
    Ok(total)
}

#[cfg(unix)]
async fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .await
        .map_err(|err| AppError::Artifact(format!("failed to mark artifact executable: {err}")))
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Remove an artifact, treating an already missing file as success.
///
/// Failures are logged; callers never act on them.
pub async fn delete(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(artifact = %path.display(), "artifact deleted"),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(artifact = %path.display(), "artifact already gone");
        }
        Err(err) => warn!(artifact = %path.display(), %err, "failed to delete artifact"),
    }
}
