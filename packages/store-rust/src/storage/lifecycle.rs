//! Lifecycle flags, inactivity clock, and guarded cleanup for one store.
//!
//! State machine: Uninitialized -> Running -> Expiring -> Closed.
//!
//! Three atomic flags drive it: `initialized` (set once by `begin()`),
//! `running` (cleared by a stop request or TTL expiry) and `cleaned_up`
//! (set once by the single cleanup run). The reported [`EngineState`] is
//! derived from them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{info, warn};
use verdant_core::StoreKey;

use super::record_store::{CleanupHook, EngineState};

/// Shared lifecycle state of one store engine.
///
/// Held in an `Arc` by both the engine and its writer task.
pub(crate) struct Lifecycle {
    key: StoreKey,
    ttl: Duration,
    initialized: AtomicBool,
    running: AtomicBool,
    cleaned_up: AtomicBool,
    born: Instant,
    /// Millis since `born` of the last `store()` or read.
    last_access_ms: AtomicU64,
    stop: Notify,
    on_cleanup: Mutex<Option<CleanupHook>>,
}

impl Lifecycle {
    pub(crate) fn new(key: StoreKey, ttl: Duration) -> Self {
        Self {
            key,
            ttl,
            initialized: AtomicBool::new(false),
            running: AtomicBool::new(false),
            cleaned_up: AtomicBool::new(false),
            born: Instant::now(),
            last_access_ms: AtomicU64::new(0),
            stop: Notify::new(),
            on_cleanup: Mutex::new(None),
        }
    }

    pub(crate) fn key(&self) -> &StoreKey {
        &self.key
    }

    pub(crate) fn state(&self) -> EngineState {
        if self.cleaned_up.load(Ordering::Acquire) {
            EngineState::Closed
        } else if !self.initialized.load(Ordering::Acquire) {
            EngineState::Uninitialized
        } else if self.running.load(Ordering::Acquire) {
            EngineState::Running
        } else {
            EngineState::Expiring
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Transitions Uninitialized -> Running.
    ///
    /// Returns `false` (and logs) when already initialized or closed.
    pub(crate) fn begin(&self, on_cleanup: Option<CleanupHook>) -> bool {
        if self.cleaned_up.load(Ordering::Acquire) {
            warn!(store = %self.key, "initialize called on a closed store; ignoring");
            return false;
        }
        if self.initialized.swap(true, Ordering::AcqRel) {
            warn!(store = %self.key, "store already initialized; ignoring");
            return false;
        }
        *self.on_cleanup.lock() = on_cleanup;
        self.touch();
        self.running.store(true, Ordering::Release);
        info!(store = %self.key, ttl_secs = self.ttl.as_secs(), "store running");
        true
    }

    /// Whether `store()` should enqueue: before start or while running.
    pub(crate) fn accepts_records(&self) -> bool {
        matches!(
            self.state(),
            EngineState::Uninitialized | EngineState::Running
        )
    }

    /// Resets the inactivity clock.
    pub(crate) fn touch(&self) {
        self.last_access_ms
            .store(self.elapsed_ms(), Ordering::Relaxed);
    }

    /// Time since the last `touch()`.
    pub(crate) fn idle(&self) -> Duration {
        let last = self.last_access_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    /// Clears `running` and wakes the writer.
    pub(crate) fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
        self.stop.notify_one();
    }

    /// Resolves when a stop is requested. A request made while nobody
    /// waits is remembered for the next call.
    pub(crate) async fn stop_requested(&self) {
        self.stop.notified().await;
    }

    /// Applies the TTL and reports whether the store is no longer running.
    ///
    /// A running store idle for longer than its TTL is flipped to stopping
    /// here; the writer notices on its next poll.
    pub(crate) fn check_expiry(&self) -> bool {
        if self.is_running() && self.idle() > self.ttl {
            info!(
                store = %self.key,
                idle_ms = u64::try_from(self.idle().as_millis()).unwrap_or(u64::MAX),
                "store idle past ttl; expiring"
            );
            self.request_stop();
        }
        !self.is_running()
    }

    /// Runs `cleanup` and then the cleanup hook, at most once per store.
    ///
    /// Returns `false` if another caller already ran it.
    pub(crate) fn run_cleanup(&self, cleanup: impl FnOnce()) -> bool {
        if self.cleaned_up.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.running.store(false, Ordering::Release);
        cleanup();
        let hook = self.on_cleanup.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        info!(store = %self.key, "store closed");
        true
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.born.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use super::*;

    fn lifecycle(ttl: Duration) -> Lifecycle {
        Lifecycle::new(StoreKey::new("s", "T"), ttl)
    }

    #[test]
    fn initial_state_is_uninitialized() {
        let lc = lifecycle(Duration::from_secs(1));
        assert_eq!(lc.state(), EngineState::Uninitialized);
        assert!(!lc.is_running());
        assert!(lc.accepts_records());
    }

    #[test]
    fn begin_transitions_to_running_once() {
        let lc = lifecycle(Duration::from_secs(1));
        assert!(lc.begin(None));
        assert_eq!(lc.state(), EngineState::Running);
        assert!(!lc.begin(None));
        assert_eq!(lc.state(), EngineState::Running);
    }

    #[test]
    fn stop_request_moves_to_expiring() {
        let lc = lifecycle(Duration::from_secs(1));
        lc.begin(None);
        lc.request_stop();
        assert_eq!(lc.state(), EngineState::Expiring);
        assert!(!lc.accepts_records());
    }

    #[test]
    fn check_expiry_flips_idle_store() {
        let lc = lifecycle(Duration::from_millis(20));
        lc.begin(None);
        assert!(!lc.check_expiry());
        std::thread::sleep(Duration::from_millis(40));
        assert!(lc.check_expiry());
        assert_eq!(lc.state(), EngineState::Expiring);
    }

    #[test]
    fn touch_resets_idle_clock() {
        let lc = lifecycle(Duration::from_millis(60));
        lc.begin(None);
        std::thread::sleep(Duration::from_millis(40));
        lc.touch();
        std::thread::sleep(Duration::from_millis(40));
        assert!(!lc.check_expiry());
    }

    #[test]
    fn cleanup_runs_exactly_once() {
        let lc = Arc::new(lifecycle(Duration::from_secs(1)));
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hook_calls);
        lc.begin(Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })));

        let cleanups = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let lc = Arc::clone(&lc);
                let cleanups = Arc::clone(&cleanups);
                std::thread::spawn(move || {
                    lc.run_cleanup(|| {
                        cleanups.fetch_add(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        let winners = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert_eq!(lc.state(), EngineState::Closed);
    }

    #[test]
    fn closed_store_cannot_begin() {
        let lc = lifecycle(Duration::from_secs(1));
        lc.run_cleanup(|| {});
        assert!(!lc.begin(None));
        assert_eq!(lc.state(), EngineState::Closed);
    }

    #[tokio::test]
    async fn stop_request_is_remembered() {
        let lc = lifecycle(Duration::from_secs(1));
        lc.request_stop();
        tokio::time::timeout(Duration::from_secs(1), lc.stop_requested())
            .await
            .unwrap();
    }
}
