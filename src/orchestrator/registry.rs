//! Session registry: one live process per identity.
//!
//! Every identity (program kind) owns a lazily created [`Slot`] that is
//! never removed; only its current generation is replaced. A new upload
//! first takes the slot's lease through [`SessionRegistry::prepare`], which
//! kills the running generation and waits until its reaper has confirmed
//! the exit and deleted the artifact. The lease is held until the new
//! generation is committed or the attempt is abandoned, so uploads for the
//! same identity are serialised while different identities proceed
//! independently.
//!
//! The registry-wide map lock only guards slot lookup/creation. Waiting for
//! an evicted process happens under the per-identity lease alone.
//!
//! A generation leaves its slot only after its reaper has reported, so a
//! `prepare` that is dropped mid-wait leaves the old process recorded and the
//! next `prepare` waits for it again.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{FutureExt, Shared};
use tokio::process::Child;
use tokio::sync::{oneshot, OwnedMutexGuard};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::reaper::{self, ReapJob, ReapReport};
use crate::{artifact, AppError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One run of a program for an identity, from launch to reap.
#[derive(Debug)]
struct Generation {
    id: Uuid,
    /// Cleared by the reaper once the process has exited.
    pid: Option<u32>,
    /// Cleared by the reaper once the artifact has been deleted.
    artifact: Option<PathBuf>,
    /// Taken when the kill request is sent.
    kill: Option<oneshot::Sender<()>>,
    /// Fires once the reaper has waited the process and removed the artifact.
    done: Shared<oneshot::Receiver<ReapReport>>,
}

/// Per-identity record.
#[derive(Debug)]
pub(crate) struct Slot {
    identity: String,
    lease: Arc<tokio::sync::Mutex<()>>,
    current: Mutex<Option<Generation>>,
}

impl Slot {
    fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_owned(),
            lease: Arc::new(tokio::sync::Mutex::new(())),
            current: Mutex::new(None),
        }
    }

    pub(crate) fn identity(&self) -> &str {
        &self.identity
    }

    /// Record that `generation`'s process has exited and its artifact is gone.
    pub(crate) fn mark_reaped(&self, generation: Uuid) {
        let mut current = lock(&self.current);
        if let Some(ref mut live) = *current {
            if live.id == generation {
                live.pid = None;
                live.artifact = None;
            }
        }
    }

    /// Remove `generation` if it is still the current one.
    fn clear(&self, generation: Uuid) {
        let mut current = lock(&self.current);
        if current.as_ref().is_some_and(|live| live.id == generation) {
            *current = None;
        }
    }

    fn install(&self, generation: Generation) {
        let previous = lock(&self.current).replace(generation);
        debug_assert!(previous.is_none(), "generation installed over a live one");
    }
}

/// Exclusive right to start the next generation for one identity.
///
/// Obtained from [`SessionRegistry::prepare`]. Dropping the lease without
/// calling [`SlotLease::commit`] leaves the identity idle.
#[derive(Debug)]
pub struct SlotLease {
    slot: Arc<Slot>,
    _guard: OwnedMutexGuard<()>,
}

impl SlotLease {
    /// Identity this lease belongs to.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.slot.identity
    }

    /// Record a started process as the identity's current generation and
    /// hand it to a background reaper.
    ///
    /// The reaper waits for the process to exit, deletes `artifact`, and
    /// then releases whoever evicts this generation next.
    pub fn commit(self, child: Child, artifact: PathBuf) -> Uuid {
        let id = Uuid::new_v4();
        let pid = child.id();
        let (kill_tx, kill_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        self.slot.install(Generation {
            id,
            pid,
            artifact: Some(artifact.clone()),
            kill: Some(kill_tx),
            done: done_rx.shared(),
        });

        info!(
            identity = %self.slot.identity,
            generation = %id,
            pid = pid.unwrap_or(0),
            artifact = %artifact.display(),
            "session starting"
        );

        reaper::spawn_reaper(ReapJob {
            slot: Arc::clone(&self.slot),
            generation: id,
            child,
            artifact,
            kill: kill_rx,
            done: done_tx,
        });
        id
    }
}

/// Registry of per-identity slots.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    replace_timeout: Option<Duration>,
}

impl SessionRegistry {
    /// Create a registry. `replace_timeout` bounds how long an eviction may
    /// wait for the previous generation; `None` waits forever.
    #[must_use]
    pub fn new(replace_timeout: Option<Duration>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            replace_timeout,
        }
    }

    /// Take the lease for `identity`, killing and reaping any running
    /// generation first.
    ///
    /// Blocks for as long as the previous process takes to die and be
    /// reaped. Without a replace timeout a process that never exits stalls
    /// every later upload for the identity.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Replace` if the replace timeout elapses before the
    /// previous generation is reaped. That generation stays recorded.
    pub async fn prepare(&self, identity: &str) -> Result<SlotLease> {
        let slot = self.slot(identity);
        let guard = Arc::clone(&slot.lease).lock_owned().await;

        let span = info_span!("prepare", identity);
        self.evict(&slot).instrument(span).await?;

        Ok(SlotLease {
            slot,
            _guard: guard,
        })
    }

    /// Pid of the live process for `identity`, if any.
    #[must_use]
    pub fn running_pid(&self, identity: &str) -> Option<u32> {
        let slot = lock(&self.slots).get(identity).cloned()?;
        let current = lock(&slot.current);
        current.as_ref().and_then(|generation| generation.pid)
    }

    /// Artifact of the identity's current generation while it has not yet
    /// been reaped.
    #[must_use]
    pub fn current_artifact(&self, identity: &str) -> Option<PathBuf> {
        let slot = lock(&self.slots).get(identity).cloned()?;
        let current = lock(&slot.current);
        current
            .as_ref()
            .and_then(|generation| generation.artifact.clone())
    }

    /// Identities that have been used at least once.
    #[must_use]
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = lock(&self.slots).keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Kill and reap every live generation.
    pub async fn shutdown(&self) {
        let slots: Vec<Arc<Slot>> = lock(&self.slots).values().cloned().collect();
        for slot in slots {
            let _guard = Arc::clone(&slot.lease).lock_owned().await;
            let span = info_span!("shutdown", identity = %slot.identity);
            if let Err(err) = self.evict(&slot).instrument(span).await {
                warn!(identity = %slot.identity, %err, "generation left running at shutdown");
            }
        }
    }

    fn slot(&self, identity: &str) -> Arc<Slot> {
        let mut slots = lock(&self.slots);
        Arc::clone(
            slots
                .entry(identity.to_owned())
                .or_insert_with(|| Arc::new(Slot::new(identity))),
        )
    }

    /// Kill the slot's current generation and wait for its reaper.
    ///
    /// Caller must hold the slot's lease. The generation stays in the slot
    /// until its report arrives, so dropping this future loses nothing.
    async fn evict(&self, slot: &Slot) -> Result<()> {
        let (id, pid, artifact, kill, done) = {
            let mut current = lock(&slot.current);
            let Some(generation) = current.as_mut() else {
                return Ok(());
            };
            (
                generation.id,
                generation.pid,
                generation.artifact.clone(),
                generation.kill.take(),
                generation.done.clone(),
            )
        };

        if let Some(kill) = kill {
            info!(generation = %id, pid = pid.unwrap_or(0), "killing previous generation");
            // The reaper may already be past its exit wait; it still reports.
            let _ = kill.send(());
        }

        let outcome = match self.replace_timeout {
            None => Ok(done.await),
            Some(limit) => tokio::time::timeout(limit, done).await,
        };

        match outcome {
            Ok(Ok(report)) => {
                slot.clear(id);
                info!(
                    generation = %report.generation,
                    exit_code = report.exit_code.unwrap_or(-1),
                    "previous generation reaped"
                );
                Ok(())
            }
            Ok(Err(_)) => {
                warn!(generation = %id, "reaper gone before reporting");
                slot.clear(id);
                if let Some(artifact) = artifact {
                    artifact::delete(&artifact).await;
                }
                Ok(())
            }
            Err(_) => {
                warn!(generation = %id, "replace timeout elapsed");
                Err(AppError::Replace(format!(
                    "previous {} generation {id} not reaped within {:?}",
                    slot.identity,
                    self.replace_timeout.unwrap_or_default()
                )))
            }
        }
    }
}
