//! Background writer shared by the indexed and streaming engines.
//!
//! A [`Pipeline`] owns the unbounded record queue and the single writer
//! task that drains it into a [`RecordSink`]. The task:
//! 1. Waits up to the poll interval for the next record (or a stop request)
//! 2. Hands each record to [`RecordSink::write`]
//! 3. Re-checks the TTL and the stop flag after every wake-up
//! 4. Runs the guarded cleanup once it decides to stop

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use verdant_core::StoreKey;

use super::lifecycle::Lifecycle;
use super::record_store::{CleanupHook, EngineState};
use crate::error::{StoreError, StoreResult};

/// Destination of a writer task.
pub(crate) trait RecordSink<T>: Send + Sync + 'static {
    /// Persists one record. Failures are logged by the sink, never returned:
    /// producers do not observe storage errors.
    fn write(&self, record: T);

    /// Releases files and in-memory state. Called at most once.
    fn cleanup(&self);
}

/// Record queue, writer task, and lifecycle of one engine.
pub(crate) struct Pipeline<T> {
    lifecycle: Arc<Lifecycle>,
    tx: mpsc::UnboundedSender<T>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<T>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    /// Moved into the writer task, which sets it once cleanup is done.
    exited_tx: Mutex<Option<watch::Sender<bool>>>,
    exited: watch::Receiver<bool>,
    poll_interval: Duration,
}

impl<T: Send + 'static> Pipeline<T> {
    pub(crate) fn new(key: StoreKey, ttl: Duration, poll_interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (exited_tx, exited) = watch::channel(false);
        Self {
            lifecycle: Arc::new(Lifecycle::new(key, ttl)),
            tx,
            rx: Mutex::new(Some(rx)),
            writer: Mutex::new(None),
            exited_tx: Mutex::new(Some(exited_tx)),
            exited,
            poll_interval,
        }
    }

    pub(crate) fn key(&self) -> &StoreKey {
        self.lifecycle.key()
    }

    pub(crate) fn state(&self) -> EngineState {
        self.lifecycle.state()
    }

    pub(crate) fn touch(&self) {
        self.lifecycle.touch();
    }

    /// Starts the writer task draining into `sink`.
    pub(crate) fn start<S: RecordSink<T>>(
        &self,
        sink: Arc<S>,
        on_cleanup: Option<CleanupHook>,
    ) -> StoreResult<()> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| StoreError::NoRuntime {
                store: self.key().to_string(),
            })?;
        if !self.lifecycle.begin(on_cleanup) {
            return Ok(());
        }
        let (Some(rx), Some(exited)) = (self.rx.lock().take(), self.exited_tx.lock().take()) else {
            return Ok(());
        };
        let handle = runtime.spawn(run_writer(
            sink,
            rx,
            Arc::clone(&self.lifecycle),
            self.poll_interval,
            exited,
        ));
        *self.writer.lock() = Some(handle);
        Ok(())
    }

    /// Enqueues a record. Dropped silently once the engine stops.
    pub(crate) fn submit(&self, record: T) {
        if !self.lifecycle.accepts_records() {
            debug!(store = %self.key(), "store not running; record dropped");
            return;
        }
        self.lifecycle.touch();
        if self.tx.send(record).is_err() {
            debug!(store = %self.key(), "writer gone; record dropped");
        }
    }

    /// See [`ManagedStore::expire`](super::ManagedStore::expire).
    pub(crate) async fn expire<S: RecordSink<T>>(&self, sink: &S, force: bool) -> bool {
        if !force {
            return self.lifecycle.check_expiry();
        }

        let was_stopped = !self.lifecycle.is_running();
        self.lifecycle.request_stop();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(store = %self.key(), error = %e, "writer task ended abnormally");
            }
        }
        // Only one caller gets the join handle; the rest wait on the exit
        // signal. A dropped sender means the task is gone as well.
        let spawned = self.exited_tx.lock().is_none();
        if spawned {
            let mut exited = self.exited.clone();
            if exited.wait_for(|done| *done).await.is_err() {
                debug!(store = %self.key(), "writer exited without signalling");
            }
        }
        // Covers engines that were never initialized and writers that panicked.
        self.lifecycle.run_cleanup(|| sink.cleanup());
        was_stopped
    }
}

impl<T> Drop for Pipeline<T> {
    fn drop(&mut self) {
        self.lifecycle.request_stop();
    }
}

async fn run_writer<T, S>(
    sink: Arc<S>,
    mut rx: mpsc::UnboundedReceiver<T>,
    lifecycle: Arc<Lifecycle>,
    poll_interval: Duration,
    exited: watch::Sender<bool>,
) where
    T: Send + 'static,
    S: RecordSink<T>,
{
    debug!(store = %lifecycle.key(), "writer started");

    while !lifecycle.check_expiry() {
        tokio::select! {
            biased;
            () = lifecycle.stop_requested() => {}
            received = tokio::time::timeout(poll_interval, rx.recv()) => match received {
                Ok(Some(record)) => sink.write(record),
                // Every sender is gone: the engine itself was dropped.
                Ok(None) => lifecycle.request_stop(),
                Err(_elapsed) => {}
            }
        }
    }

    rx.close();
    let discarded = std::iter::from_fn(|| rx.try_recv().ok()).count();
    if discarded > 0 {
        debug!(store = %lifecycle.key(), discarded, "dropped queued records on stop");
    }
    lifecycle.run_cleanup(|| sink.cleanup());
    exited.send_replace(true);
    debug!(store = %lifecycle.key(), "writer stopped");
}
