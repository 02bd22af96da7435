//! Mutex + Condvar wrapper around the ring buffer
//!
//! One lock guards the ring cursors, the watermark machine, error slots and
//! flags. One condvar wakes blocked readers, blocked writers and the
//! producer's backoff sleep; every wait re-checks the closed flag so
//! `close()` releases them all with a single `notify_all`. A read parked on
//! the network is outside the lock, so `close()` also runs the live
//! connection's shutdown hook.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, info, trace};

use crate::error::RadioError;
use crate::stream::ring::RingBuffer;
use crate::stream::source::Shutdown;
use crate::stream::state::{BufferState, BufferStats, WatermarkMachine};
use crate::stream::types::BufferConfig;

/// State behind the mutex
struct Inner {
    ring: RingBuffer,
    machine: WatermarkMachine,
    /// Latest error, visible in stats (transient or fatal)
    last_error: Option<Arc<RadioError>>,
    /// Fatal error not yet handed to a reader
    pending_error: Option<Arc<RadioError>>,
    /// `close()` was called
    closed: bool,
    /// A live connection exists (false while reconnecting)
    connected: bool,
    /// Aborts the live connection; taken by `close()`
    shutdown: Option<Shutdown>,
    /// The producer thread has left its loop
    producer_exited: bool,
    /// `write()` calls since the last periodic snapshot
    write_count: u32,
    stats_interval: u32,
    /// Dropped on close, which disconnects the receiver exactly once
    stats_tx: Option<Sender<BufferStats>>,
}

impl Inner {
    /// Closed or failed: nothing more will be produced
    fn is_stopped(&self) -> bool {
        self.closed || self.machine.state().is_terminal()
    }

    fn snapshot(&self) -> BufferStats {
        BufferStats {
            fill_level: self.ring.fill_level(),
            state: self.machine.state(),
            last_error: self.last_error.clone(),
        }
    }

    /// Non-blocking publish; a full channel drops the update.
    fn emit(&self) {
        let Some(tx) = &self.stats_tx else {
            return;
        };
        match tx.try_send(self.snapshot()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("stats channel full, update dropped"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn on_transition(&self, next: Option<BufferState>) {
        let Some(state) = next else {
            return;
        };
        debug!(state = %state, fill = self.ring.filled(), "buffer state changed");
        self.emit();
    }
}

/// Shared between the facade (reader/closer) and the producer thread
pub(crate) struct SharedBuffer {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl SharedBuffer {
    pub(crate) fn new(config: &BufferConfig, stats_tx: Sender<BufferStats>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                ring: RingBuffer::new(config.capacity),
                machine: WatermarkMachine::new(config.watermarks),
                last_error: None,
                pending_error: None,
                closed: false,
                connected: false,
                shutdown: None,
                producer_exited: false,
                write_count: 0,
                stats_interval: config.stats_interval,
                stats_tx: Some(stats_tx),
            }),
            changed: Condvar::new(),
        }
    }

    // A panic while holding the lock can't leave the ring half-updated in a
    // way that breaks its invariants, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Inner>) -> MutexGuard<'a, Inner> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, Inner>,
        timeout: Duration,
    ) -> MutexGuard<'a, Inner> {
        match self.changed.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    /// Store all of `data`, waiting for free space as needed.
    ///
    /// Returns false if the stream was closed or failed before everything
    /// was written; the producer should exit.
    pub(crate) fn write(&self, mut data: &[u8]) -> bool {
        let mut inner = self.lock();
        while !data.is_empty() {
            if inner.is_stopped() {
                return false;
            }
            if inner.ring.is_full() {
                inner = self.wait(inner);
                continue;
            }

            let n = inner.ring.write(data);
            data = &data[n..];

            let filled = inner.ring.filled();
            let prerolled = inner.machine.has_prerolled();
            let next = inner.machine.on_fill(filled);
            if !prerolled && inner.machine.has_prerolled() {
                info!(bytes = filled, "initial buffer fill complete");
            }
            inner.on_transition(next);
            self.changed.notify_all();
        }

        inner.write_count += 1;
        if inner.write_count >= inner.stats_interval {
            inner.write_count = 0;
            trace!(fill = inner.ring.filled(), "periodic stats");
            inner.emit();
        }
        true
    }

    /// Blocking read with the initial-fill gate.
    ///
    /// Returns `Ok(0)` at end of stream, or the stored fatal error exactly once.
    pub(crate) fn read(&self, dest: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        loop {
            if inner.is_stopped() {
                if let Some(err) = inner.pending_error.take() {
                    return Err(io::Error::other(err));
                }
                return Ok(0);
            }
            if dest.is_empty() {
                return Ok(0);
            }

            if !inner.machine.gate_closed() {
                if !inner.ring.is_empty() {
                    break;
                }
                let next = inner.machine.on_drained();
                inner.on_transition(next);
            }
            inner = self.wait(inner);
        }

        let n = inner.ring.read(dest);
        drop(inner);
        self.changed.notify_all();
        Ok(n)
    }

    /// Sleep for `duration` unless stopped first.
    ///
    /// Returns true if the full duration elapsed, false if stopped early.
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut inner = self.lock();
        loop {
            if inner.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            inner = self.wait_timeout(inner, deadline - now);
        }
    }

    pub(crate) fn set_connected(&self) {
        self.lock().connected = true;
    }

    /// Register the abort hook of a fresh connection.
    ///
    /// If the stream already stopped, the hook runs at once and false is
    /// returned; the caller should drop the connection and exit.
    pub(crate) fn attach_shutdown(&self, shutdown: Option<Shutdown>) -> bool {
        let mut inner = self.lock();
        if inner.is_stopped() {
            drop(inner);
            if let Some(hook) = shutdown {
                hook();
            }
            return false;
        }
        inner.shutdown = shutdown;
        true
    }

    /// Called once as the producer thread leaves its loop
    pub(crate) fn mark_producer_exited(&self) {
        let mut inner = self.lock();
        inner.producer_exited = true;
        inner.shutdown = None;
        drop(inner);
        self.changed.notify_all();
    }

    /// Wait up to `timeout` for the producer to exit. True if it did.
    pub(crate) fn wait_producer_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if inner.producer_exited {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            inner = self.wait_timeout(inner, deadline - now);
        }
    }

    /// The live connection failed with a transient error
    pub(crate) fn connection_lost(&self, err: RadioError) {
        let mut inner = self.lock();
        if inner.is_stopped() {
            return;
        }
        inner.connected = false;
        inner.shutdown = None;
        inner.last_error = Some(Arc::new(err));
        let next = inner.machine.on_connection_lost();
        inner.on_transition(next);
    }

    /// A reconnect attempt failed but more attempts will follow
    pub(crate) fn record_transient(&self, err: RadioError) {
        let mut inner = self.lock();
        if !inner.is_stopped() {
            inner.last_error = Some(Arc::new(err));
        }
    }

    /// A reconnect succeeded; pick Healthy or Buffering from the fill level
    pub(crate) fn reconnected(&self) {
        let mut inner = self.lock();
        if inner.is_stopped() {
            return;
        }
        inner.connected = true;
        inner.last_error = None;
        let filled = inner.ring.filled();
        let next = inner.machine.on_reconnected(filled);
        inner.on_transition(next);
        drop(inner);
        self.changed.notify_all();
    }

    /// Record a fatal error and move to `Error`. Ignored after `close()`.
    pub(crate) fn fail(&self, err: RadioError) {
        let mut inner = self.lock();
        if inner.is_stopped() {
            return;
        }
        let err = Arc::new(err);
        inner.connected = false;
        inner.shutdown = None;
        inner.last_error = Some(err.clone());
        inner.pending_error = Some(err);
        let next = inner.machine.on_fatal();
        inner.on_transition(next);
        drop(inner);
        self.changed.notify_all();
    }

    /// Mark closed, emit once, disconnect the stats channel, wake everyone
    /// and abort the live connection.
    ///
    /// Returns true only for the call that performed the close.
    pub(crate) fn close(&self) -> bool {
        let mut inner = self.lock();
        if inner.closed {
            return false;
        }
        inner.closed = true;
        inner.connected = false;
        let next = inner.machine.on_close();
        inner.on_transition(next);
        inner.stats_tx = None;
        let shutdown = inner.shutdown.take();
        drop(inner);
        self.changed.notify_all();
        if let Some(hook) = shutdown {
            debug!("aborting live connection");
            hook();
        }
        true
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.lock().is_stopped()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub(crate) fn stats(&self) -> BufferStats {
        self.lock().snapshot()
    }
}
