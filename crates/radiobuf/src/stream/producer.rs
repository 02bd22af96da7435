//! Background producer: network → ring buffer
//!
//! Reads fixed-size chunks from the live connection and writes them into
//! the shared buffer. On a read failure it drops the connection, reports
//! the underrun, and reconnects with exponential backoff. A clean end of
//! stream is fatal: radio streams are not expected to end.
//!
//! Each connection's shutdown hook is registered with the shared buffer so
//! `close()` can abort a read parked on the network.

use std::io::{ErrorKind, Read};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::RadioError;
use crate::stream::backoff::{Backoff, ReconnectConfig, RetryDecision};
use crate::stream::shared::SharedBuffer;
use crate::stream::source::{Connection, StreamSource};

/// Marks the producer exited on every way out of `run`, panics included
struct ExitGuard<'a>(&'a SharedBuffer);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.mark_producer_exited();
    }
}

/// Everything the producer thread owns
pub(crate) struct Producer {
    pub(crate) source: Arc<dyn StreamSource>,
    pub(crate) shared: Arc<SharedBuffer>,
    pub(crate) chunk_size: usize,
    pub(crate) reconnect: ReconnectConfig,
}

impl Producer {
    /// Run until closed or a fatal error. Always returns normally; fatal
    /// conditions are recorded in the shared buffer, never propagated.
    pub(crate) fn run(self, initial: Connection) {
        let _exit = ExitGuard(&self.shared);
        let mut chunk = vec![0u8; self.chunk_size];
        let mut backoff = Backoff::new(self.reconnect.clone());
        let mut conn = self.attach(initial);

        loop {
            if self.shared.is_stopped() {
                break;
            }

            let Some(reader) = conn.as_mut() else {
                match self.reconnect(&mut backoff) {
                    Some(fresh) => {
                        conn = self.attach(fresh);
                        if conn.is_none() {
                            break;
                        }
                        continue;
                    }
                    None => break,
                }
            };

            match reader.read(&mut chunk) {
                Ok(0) => {
                    if !self.shared.is_stopped() {
                        warn!(source = %self.source.describe(), "stream ended unexpectedly");
                        self.shared.fail(RadioError::StreamEnded);
                    }
                    break;
                }
                Ok(n) => {
                    if !self.shared.write(&chunk[..n]) {
                        break;
                    }
                    backoff.reset();
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    conn = None;
                    if self.shared.is_stopped() {
                        break;
                    }
                    warn!(source = %self.source.describe(), error = %e, "connection lost");
                    self.shared.connection_lost(RadioError::Io(e));
                }
            }
        }

        debug!(source = %self.source.describe(), "producer exiting");
    }

    /// Hand the shutdown hook to the shared buffer; `None` if already stopped.
    fn attach(&self, conn: Connection) -> Option<Box<dyn Read + Send>> {
        let (reader, shutdown) = conn.into_parts();
        self.shared.attach_shutdown(shutdown).then_some(reader)
    }

    /// Sleep-then-connect until success or retry exhaustion; `None` once stopped.
    fn reconnect(&self, backoff: &mut Backoff) -> Option<Connection> {
        loop {
            let delay = backoff.current();
            debug!(delay = ?delay, retries = backoff.retries(), "waiting to reconnect");
            if !self.shared.sleep(delay) {
                return None;
            }

            match self.source.connect() {
                Ok(conn) => {
                    info!(
                        source = %self.source.describe(),
                        attempts = backoff.retries() + 1,
                        "reconnected"
                    );
                    backoff.reset();
                    self.shared.reconnected();
                    return Some(conn);
                }
                Err(err) => match backoff.record_failure() {
                    RetryDecision::Retry(next) => {
                        warn!(error = %err, retry_in = ?next, "reconnect failed");
                        self.shared.record_transient(err);
                    }
                    RetryDecision::GiveUp(attempts) => {
                        warn!(error = %err, attempts, "giving up on reconnect");
                        self.shared.fail(RadioError::RetriesExhausted {
                            attempts,
                            source: Arc::new(err),
                        });
                        return None;
                    }
                },
            }
        }
    }
}
