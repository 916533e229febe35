//! Process-wide registry of store groups, keyed by session.
//!
//! One [`StoreRegistry`] is constructed by the embedding process and shared
//! as an `Arc`. Besides handing out groups it runs a coarse sweeper task:
//! every `sweep_interval` it expires each group and drops sessions whose
//! groups have emptied, independently of the per-engine TTL checks.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use verdant_core::TelemetryRecord;

use crate::config::MetadataConfig;
use crate::error::{StoreError, StoreResult};
use crate::storage::factory::StoreFactory;
use crate::storage::group::StoreGroup;
use crate::storage::record_store::StoreHandle;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Engines evicted from their groups.
    pub evicted_stores: usize,
    /// Sessions removed because their group was empty.
    pub removed_sessions: usize,
}

/// Registry of per-session [`StoreGroup`]s.
pub struct StoreRegistry {
    factory: StoreFactory,
    groups: DashMap<String, Arc<StoreGroup>>,
    sweep_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl StoreRegistry {
    /// Creates an empty registry. The sweeper is not running until
    /// [`start()`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if `config` fails validation.
    pub fn new(config: MetadataConfig) -> StoreResult<Arc<Self>> {
        config.validate()?;
        let (shutdown_tx, _rx) = watch::channel(false);
        Ok(Arc::new(Self {
            sweep_interval: config.sweep_interval,
            factory: StoreFactory::new(Arc::new(config)),
            groups: DashMap::new(),
            shutdown_tx,
            sweeper: Mutex::new(None),
        }))
    }

    #[must_use]
    pub fn config(&self) -> &MetadataConfig {
        self.factory.config()
    }

    /// Group for `session_id`, created on first access.
    ///
    /// The returned group may be retired by a later sweep; prefer
    /// [`get()`](Self::get), which moves on to the session's new group.
    pub fn group(&self, session_id: &str) -> Arc<StoreGroup> {
        if let Some(group) = self.groups.get(session_id) {
            return Arc::clone(group.value());
        }
        let group = self
            .groups
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, "session registered");
                Arc::new(StoreGroup::new(session_id, self.factory.clone()))
            });
        Arc::clone(group.value())
    }

    /// Engine for `T` in `session_id`, creating the session's group and the
    /// engine as needed.
    ///
    /// # Errors
    ///
    /// See [`StoreGroup::get`].
    pub fn get<T: TelemetryRecord>(&self, session_id: &str) -> StoreResult<StoreHandle<T>> {
        loop {
            let group = self.group(session_id);
            match group.get::<T>() {
                // Retired groups leave the map in the same step, so the next
                // lookup finds or creates the live one.
                Err(StoreError::SessionRetired { .. }) => {
                    debug!(session_id, "session group retired; retrying");
                }
                result => return result,
            }
        }
    }

    /// Number of sessions with a live group.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.groups.len()
    }

    /// Runs one sweep pass over every session.
    pub async fn sweep(&self) -> SweepReport {
        let groups: Vec<(String, Arc<StoreGroup>)> = self
            .groups
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut report = SweepReport::default();
        for (session_id, group) in groups {
            report.evicted_stores += group.expire().await;
            if !group.is_empty() {
                continue;
            }
            // Retired under the shard lock: a producer may have just added a
            // store to this group, and none can once it is retired.
            let removed = self.groups.remove_if(&session_id, |_, current| {
                Arc::ptr_eq(current, &group) && current.retire_if_empty()
            });
            if removed.is_some() {
                debug!(session_id = %session_id, "idle session removed");
                report.removed_sessions += 1;
            }
        }
        report
    }

    /// Starts the background sweeper. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoRuntime`] outside a tokio runtime.
    pub fn start(self: &Arc<Self>) -> StoreResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| StoreError::NoRuntime {
            store: "store registry sweeper".to_string(),
        })?;
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            warn!("registry sweeper already running; ignoring");
            return Ok(());
        }
        let task = run_sweeper(
            Arc::downgrade(self),
            self.sweep_interval,
            self.shutdown_tx.subscribe(),
        );
        *sweeper = Some(runtime.spawn(task));
        info!(interval_secs = self.sweep_interval.as_secs(), "registry sweeper started");
        Ok(())
    }

    /// Stops the sweeper and force-expires every session's stores.
    ///
    /// When this returns no writer task is left and every temp file is gone.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                warn!(error = %e, "registry sweeper ended abnormally");
            }
        }

        let session_ids: Vec<String> = self.groups.iter().map(|e| e.key().clone()).collect();
        for session_id in session_ids {
            if let Some((_, group)) = self.groups.remove(&session_id) {
                group.shutdown().await;
            }
        }
        info!("store registry shut down");
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("sessions", &self.groups.len())
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

/// Sweeper loop. Holds only a weak reference so a dropped registry ends it.
async fn run_sweeper(
    registry: Weak<StoreRegistry>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let report = registry.sweep().await;
                if report != SweepReport::default() {
                    debug!(
                        evicted_stores = report.evicted_stores,
                        removed_sessions = report.removed_sessions,
                        sessions = registry.session_count(),
                        "sweep complete"
                    );
                }
            }
        }
    }
    debug!("registry sweeper stopped");
}
