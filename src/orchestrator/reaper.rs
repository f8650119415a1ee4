//! Background reaper: one task per live generation.
//!
//! Waits for the process to exit (or kills it on request), deletes the
//! artifact, records the exit in the slot, and fires the generation's
//! completion signal. The exit wait has no deadline.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::registry::Slot;
use crate::artifact;

/// Outcome reported to whoever waits on a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    /// Generation that was reaped.
    pub generation: Uuid,
    /// Exit code; `None` when killed by a signal or the wait failed.
    pub exit_code: Option<i32>,
}

/// Everything a reaper owns for one generation.
pub(crate) struct ReapJob {
    pub(crate) slot: Arc<Slot>,
    pub(crate) generation: Uuid,
    pub(crate) child: Child,
    pub(crate) artifact: PathBuf,
    pub(crate) kill: oneshot::Receiver<()>,
    pub(crate) done: oneshot::Sender<ReapReport>,
}

pub(crate) fn spawn_reaper(job: ReapJob) -> JoinHandle<()> {
    let span = info_span!(
        "reaper",
        identity = %job.slot.identity(),
        generation = %job.generation
    );
    tokio::spawn(reap(job).instrument(span))
}

async fn reap(job: ReapJob) {
    let ReapJob {
        slot,
        generation,
        mut child,
        artifact,
        mut kill,
        done,
    } = job;

    // A dropped kill sender disables the second branch; the exit wait stays.
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut kill => {
            terminate(&mut child);
            child.wait().await
        }
    };

    let exit_code = match status {
        Ok(status) => status.code(),
        Err(err) => {
            warn!(%err, "failed to wait for process");
            None
        }
    };
    info!(exit_code = exit_code.unwrap_or(-1), "session exited");

    artifact::delete(&artifact).await;
    slot.mark_reaped(generation);

    if done
        .send(ReapReport {
            generation,
            exit_code,
        })
        .is_err()
    {
        // Nobody is evicting this generation right now.
        tracing::debug!("no waiter for reap report");
    }
}

/// Forcefully kill the child and its process group.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(raw) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
                Ok(()) => return,
                Err(err) => warn!(pid = raw, %err, "process group kill failed, killing child"),
            }
        }
    }

    if let Err(err) = child.start_kill() {
        warn!(%err, "failed to kill child process");
    }
}
