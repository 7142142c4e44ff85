//! Background sync engine: drains the journal, injects queued synthetic
//! conflicts, and reconciles downloaded records through last-write-wins.
//!
//! Cycles are serialized by an in-flight flag; a cycle that arrives while
//! another is running is dropped, not queued. Connectivity is consumed as
//! an external signal: a transition back online schedules one cycle, going
//! offline never interrupts a cycle already running.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::models::ProgressId;
use crate::repo::EducationRepository;
use crate::state::{Connectivity, EngineStatus};
use crate::sync::gateway::{ProgressDocument, RemoteGateway};
use crate::util::unix_millis_now;

/// Upload failures after which a journal entry is shelved indefinitely.
pub const MAX_RETRY: u32 = 5;

/// Tuning knobs for [`SyncEngine`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Upload failures after which a journal entry is shelved
    pub max_retry: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_retry: MAX_RETRY,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CycleStats {
    uploaded: usize,
    conflicts_injected: usize,
    accepted: usize,
}

/// Connectivity-gated synchronization loop over the repository and gateway.
pub struct SyncEngine {
    repo: Arc<EducationRepository>,
    gateway: Arc<dyn RemoteGateway>,
    options: SyncOptions,
    connectivity: watch::Receiver<Connectivity>,
    status_tx: watch::Sender<EngineStatus>,
    conflict_queue: Mutex<Vec<String>>,
    in_flight: AtomicBool,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
    /// Unix ms of the last successful cycle; 0 means never
    last_synced_at: AtomicI64,
}

impl SyncEngine {
    /// Create the engine and start listening for connectivity transitions.
    ///
    /// Must be called from within a tokio runtime. If the connectivity
    /// signal is already online, one cycle is scheduled immediately.
    #[must_use]
    pub fn new(
        repo: Arc<EducationRepository>,
        gateway: Arc<dyn RemoteGateway>,
        connectivity: watch::Receiver<Connectivity>,
        options: SyncOptions,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(EngineStatus::Idle);
        let engine = Arc::new(Self {
            repo,
            gateway,
            options,
            connectivity,
            status_tx,
            conflict_queue: Mutex::new(Vec::new()),
            in_flight: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            last_synced_at: AtomicI64::new(0),
        });
        engine.spawn_connectivity_listener();
        engine
    }

    /// Current engine status.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        *self.status_tx.borrow()
    }

    /// Stream of engine status transitions; yields the current status
    /// immediately. Slow consumers see coalesced updates.
    #[must_use]
    pub fn status_stream(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    /// Current connectivity as last observed from the external signal.
    #[must_use]
    pub fn connectivity(&self) -> Connectivity {
        *self.connectivity.borrow()
    }

    /// Unix ms of the last successful cycle, if any.
    #[must_use]
    pub fn last_synced_at(&self) -> Option<i64> {
        match self.last_synced_at.load(Ordering::Acquire) {
            0 => None,
            at => Some(at),
        }
    }

    /// Queue a synthetic conflict for the given progress id.
    ///
    /// Drained FIFO during the next cycle's conflict phase.
    pub async fn queue_conflict_simulation(&self, progress_id: impl Into<String>) {
        self.conflict_queue.lock().await.push(progress_id.into());
    }

    /// Request a sync cycle right now.
    pub async fn trigger_sync(&self) {
        self.perform_full_sync().await;
    }

    /// Run one upload → conflict-injection → download cycle.
    ///
    /// Returns silently when the engine is shut down, a cycle is already
    /// running, or connectivity is offline. Publishes `Syncing` followed by
    /// exactly one of `Idle` or `Error`.
    pub async fn perform_full_sync(&self) {
        if self.shutdown.load(Ordering::Acquire) {
            debug!("Sync request rejected: engine is shut down");
            return;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Sync already in progress; dropping request");
            return;
        }
        if *self.connectivity.borrow() == Connectivity::Offline {
            debug!("Sync skipped: offline");
            self.in_flight.store(false, Ordering::Release);
            return;
        }

        self.status_tx.send_replace(EngineStatus::Syncing);

        match self.run_cycle().await {
            Ok(stats) => {
                self.last_synced_at
                    .store(unix_millis_now(), Ordering::Release);
                info!(
                    "Sync cycle complete: {} uploaded, {} conflicts injected, {} accepted",
                    stats.uploaded, stats.conflicts_injected, stats.accepted
                );
                self.status_tx.send_replace(EngineStatus::Idle);
            }
            Err(e) => {
                error!("Sync cycle failed: {e}");
                self.status_tx.send_replace(EngineStatus::Error);
            }
        }

        self.in_flight.store(false, Ordering::Release);
    }

    /// Stop reacting to connectivity and reject further cycles.
    ///
    /// A cycle already running is allowed to finish.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.shutdown_notify.notify_one();
        info!("Sync engine shut down");
    }

    fn spawn_connectivity_listener(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut connectivity = engine.connectivity.clone();
            let mut previous = *connectivity.borrow_and_update();

            // The signal may already be online when the engine starts
            if previous == Connectivity::Online {
                engine.perform_full_sync().await;
            }

            loop {
                tokio::select! {
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = *connectivity.borrow_and_update();
                        if previous == Connectivity::Offline && current == Connectivity::Online {
                            debug!("Connectivity restored; scheduling sync");
                            engine.perform_full_sync().await;
                        }
                        previous = current;
                    }
                    () = engine.shutdown_notify.notified() => break,
                }
            }
        });
    }

    async fn run_cycle(&self) -> Result<CycleStats> {
        let mut stats = CycleStats::default();

        // Upload: drain the pending journal in insertion order. Per-entry
        // failures count a retry and move on; only storage errors abort.
        let pending = self.repo.pending_journal(self.options.max_retry).await?;
        for entry in pending {
            if entry.retry_count >= self.options.max_retry {
                debug!(
                    "Skipping journal entry {} shelved after {} attempts",
                    entry.id, entry.retry_count
                );
                continue;
            }

            let doc = match serde_json::from_str::<ProgressDocument>(&entry.payload) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!("Journal entry {} has an unreadable payload: {e}", entry.id);
                    self.repo
                        .increment_retry_count(entry.id, entry.retry_count)
                        .await?;
                    continue;
                }
            };

            match self.gateway.upload_progress(&doc).await {
                Ok(()) => {
                    self.repo
                        .mark_progress_synced(&ProgressId::from(entry.entity_id.as_str()))
                        .await?;
                    self.repo.delete_journal_entry(entry.id).await?;
                    stats.uploaded += 1;
                }
                Err(e) => {
                    warn!(
                        "Upload of journal entry {} failed on attempt {}: {e}",
                        entry.id,
                        entry.retry_count + 1
                    );
                    self.repo
                        .increment_retry_count(entry.id, entry.retry_count)
                        .await?;
                }
            }
        }

        // Conflict injection: drain the queued synthetic conflicts, FIFO.
        // Running after the uploads guarantees the targeted documents exist
        // remotely; running before the download lets this same cycle pull
        // the injected timestamps back in.
        let queued: Vec<String> = {
            let mut queue = self.conflict_queue.lock().await;
            queue.drain(..).collect()
        };
        for progress_id in queued {
            match self.gateway.simulate_remote_conflict(&progress_id).await {
                Ok(()) => stats.conflicts_injected += 1,
                Err(e) => warn!("Conflict injection for {progress_id} failed: {e}"),
            }
        }

        // Download: seed users and lessons unconditionally, then route every
        // progress document through last-write-wins.
        let users = self.gateway.fetch_users().await?;
        self.repo.seed_users(users).await?;

        let lessons = self.gateway.fetch_lessons().await?;
        self.repo.seed_lessons(lessons).await?;

        for doc in self.gateway.fetch_all_progress().await? {
            if self.repo.upsert_progress_if_newer(&doc).await? {
                stats.accepted += 1;
            }
        }

        Ok(stats)
    }
}
