//! `BufferedStream`: the consumer-facing facade
//!
//! Owns the shared ring buffer and the producer thread handle. Reads block
//! on the initial fill gate; `close()` wakes every waiter, aborts the live
//! connection and joins the producer with a bounded wait.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver};
use tracing::{info, warn};

use crate::config::buffer::PRODUCER_JOIN_TIMEOUT_MS;
use crate::error::{RadioError, Result};
use crate::stream::producer::Producer;
use crate::stream::shared::SharedBuffer;
use crate::stream::source::{HttpSource, StreamSource};
use crate::stream::state::BufferStats;
use crate::stream::types::BufferConfig;

/// A ring-buffered, self-reconnecting audio byte stream.
///
/// `Send + Sync`: a decoder thread can read through `&BufferedStream` while
/// another thread calls [`close`](Self::close).
pub struct BufferedStream {
    shared: Arc<SharedBuffer>,
    source: Arc<dyn StreamSource>,
    config: BufferConfig,
    /// Handed out by the first successful `start()`
    stats_rx: Mutex<Option<Receiver<BufferStats>>>,
    started: AtomicBool,
    producer: Mutex<Option<JoinHandle<()>>>,
}

impl BufferedStream {
    /// HTTP stream with default buffering
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, BufferConfig::default())
    }

    pub fn with_config(url: &str, config: BufferConfig) -> Result<Self> {
        Self::with_source(HttpSource::new(url)?, config)
    }

    /// Stream from any connection source. Fails if `config` is invalid.
    pub fn with_source(source: impl StreamSource + 'static, config: BufferConfig) -> Result<Self> {
        config.validate()?;
        let (stats_tx, stats_rx) = bounded(config.stats_channel_size);
        Ok(Self {
            shared: Arc::new(SharedBuffer::new(&config, stats_tx)),
            source: Arc::new(source),
            config,
            stats_rx: Mutex::new(Some(stats_rx)),
            started: AtomicBool::new(false),
            producer: Mutex::new(None),
        })
    }

    /// Connect once and start the producer thread.
    ///
    /// The initial connection is not retried; its failure is returned here
    /// and `start()` may be called again.
    pub fn start(&self) -> Result<Receiver<BufferStats>> {
        if self.shared.is_closed() {
            return Err(RadioError::Closed);
        }
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RadioError::AlreadyStarted);
        }

        let conn = match self.source.connect() {
            Ok(conn) => conn,
            Err(err) => {
                warn!(source = %self.source.describe(), error = %err, "initial connect failed");
                self.started.store(false, Ordering::Release);
                return Err(err);
            }
        };
        if self.shared.is_closed() {
            return Err(RadioError::Closed);
        }
        info!(source = %self.source.describe(), "connected");
        self.shared.set_connected();

        let Some(stats_rx) = self
            .stats_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Err(RadioError::AlreadyStarted);
        };

        let producer = Producer {
            source: self.source.clone(),
            shared: self.shared.clone(),
            chunk_size: self.config.read_chunk_size,
            reconnect: self.config.reconnect.clone(),
        };
        let handle = thread::Builder::new()
            .name("stream-producer".to_string())
            .spawn(move || producer.run(conn))
            .map_err(|e| {
                self.shared.fail(RadioError::Io(io::Error::new(e.kind(), e.to_string())));
                RadioError::Io(e)
            })?;
        *self.producer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(stats_rx)
    }

    /// Blocking read; see [`Read`] for the contract.
    ///
    /// On a fatal condition, audio still resident in the buffer is discarded.
    /// Waits while the initial fill is incomplete and while the buffer is
    /// empty. Returns `Ok(0)` once closed or after a fatal error has been
    /// reported.
    pub fn read(&self, dest: &mut [u8]) -> io::Result<usize> {
        self.shared.read(dest)
    }

    /// Stop streaming, wake all blocked callers and release the live
    /// connection. Idempotent.
    ///
    /// Waits up to [`PRODUCER_JOIN_TIMEOUT_MS`] for the producer thread. A
    /// source whose connections have no shutdown hook may outlast that; the
    /// thread is then detached and exits when its read returns.
    pub fn close(&self) {
        if self.shared.close() {
            info!(source = %self.source.describe(), "stream closed");
        }

        let handle = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        let timeout = Duration::from_millis(PRODUCER_JOIN_TIMEOUT_MS);
        if self.shared.wait_producer_exit(timeout) {
            if handle.join().is_err() {
                warn!("producer thread panicked");
            }
        } else {
            warn!(timeout = ?timeout, "producer still busy after close, detaching");
        }
    }

    pub fn stats(&self) -> BufferStats {
        self.shared.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// A live connection exists; false while reconnecting or after a fatal error.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }
}

impl Read for BufferedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.shared.read(buf)
    }
}

impl Read for &BufferedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.shared.read(buf)
    }
}

impl Drop for BufferedStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    use crate::stream::backoff::ReconnectConfig;
    use crate::stream::source::Connection;
    use crate::stream::state::BufferState;
    use crate::test_support::http::{serve, Reply};
    use crate::test_support::{ChannelReader, Connect, ScriptedSource};

    fn quick_config(max_retries: u32) -> BufferConfig {
        BufferConfig::default()
            .with_capacity(4096)
            .with_watermarks(256, 128)
            .with_read_chunk_size(64)
            .with_reconnect(ReconnectConfig {
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(20),
                backoff_factor: 2.0,
                max_retries,
            })
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn facade_is_send_and_sync() {
        assert_send_sync::<BufferedStream>();
    }

    #[test]
    fn invalid_config_rejected() {
        let config = BufferConfig::default().with_watermarks(1024, 2048);
        let result = BufferedStream::with_source(ScriptedSource::new(vec![]), config);
        assert!(matches!(result, Err(RadioError::Config(_))));
    }

    #[test]
    fn initial_connect_failure_returned_and_not_retried() {
        let source = ScriptedSource::new(vec![Connect::Fail(RadioError::HttpStatus(404))]);
        let attempts = source.attempts();
        let stream = BufferedStream::with_source(source, quick_config(0)).unwrap();

        let err = stream.start().unwrap_err();
        assert!(matches!(err, RadioError::HttpStatus(404)));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(!stream.is_connected());
    }

    #[test]
    fn start_can_be_retried_after_initial_failure() {
        let (tx, reader) = ChannelReader::new();
        let source = ScriptedSource::new(vec![
            Connect::Fail(RadioError::HttpStatus(503)),
            Connect::Ok(reader.connection()),
        ]);
        let stream = BufferedStream::with_source(source, quick_config(0)).unwrap();

        assert!(stream.start().is_err());
        let _stats = stream.start().unwrap();
        assert!(stream.is_connected());
        drop(tx);
        stream.close();
    }

    #[test]
    fn start_twice_is_already_started() {
        let (_tx, reader) = ChannelReader::new();
        let source = ScriptedSource::new(vec![Connect::Ok(reader.connection())]);
        let stream = BufferedStream::with_source(source, quick_config(0)).unwrap();

        let _stats = stream.start().unwrap();
        assert!(matches!(stream.start(), Err(RadioError::AlreadyStarted)));
        stream.close();
    }

    #[test]
    fn start_after_close_is_closed() {
        let stream =
            BufferedStream::with_source(ScriptedSource::new(vec![]), quick_config(0)).unwrap();
        stream.close();
        assert!(matches!(stream.start(), Err(RadioError::Closed)));
    }

    #[test]
    fn reads_whole_stream_in_order() {
        let (tx, reader) = ChannelReader::new();
        let source = ScriptedSource::new(vec![Connect::Ok(reader.connection())]);
        let stream = BufferedStream::with_source(source, quick_config(0)).unwrap();
        let stats = stream.start().unwrap();

        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let feeder = {
            let data = data.clone();
            thread::spawn(move || {
                for chunk in data.chunks(700) {
                    tx.send(Ok(chunk.to_vec())).unwrap();
                }
                tx
            })
        };

        let mut got = vec![0u8; data.len()];
        (&stream).read_exact(&mut got).unwrap();
        assert_eq!(got, data);
        assert!(stats.iter().take(1).all(|s| s.state == BufferState::Healthy));

        let _tx = feeder.join().unwrap();
        stream.close();
    }

    #[test]
    fn retries_exhausted_reported_once_then_eof() {
        // max_retries = 3 and 4 consecutive failures
        let (tx, reader) = ChannelReader::new();
        let source = ScriptedSource::new(vec![
            Connect::Ok(reader.connection()),
            Connect::Fail(RadioError::HttpStatus(500)),
            Connect::Fail(RadioError::HttpStatus(502)),
            Connect::Fail(RadioError::HttpStatus(503)),
            Connect::Fail(RadioError::HttpStatus(504)),
        ]);
        let attempts = source.attempts();
        let stream = BufferedStream::with_source(source, quick_config(3)).unwrap();
        let stats = stream.start().unwrap();

        tx.send(Ok(vec![9u8; 300])).unwrap();
        let mut buf = [0u8; 300];
        (&stream).read_exact(&mut buf).unwrap();
        drop(tx);

        let err = loop {
            match stream.read(&mut buf) {
                Ok(0) => panic!("end of stream before the error was reported"),
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert_eq!(attempts.load(Ordering::SeqCst), 5);

        let inner = err
            .get_ref()
            .and_then(|e| e.downcast_ref::<Arc<RadioError>>())
            .map(|e| e.as_ref());
        match inner {
            Some(RadioError::RetriesExhausted { attempts, source }) => {
                assert_eq!(*attempts, 4);
                assert!(matches!(**source, RadioError::HttpStatus(504)));
            }
            other => panic!("unexpected error payload: {other:?}"),
        }
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);

        let last = stream.stats();
        assert_eq!(last.state, BufferState::Error);
        assert!(last.last_error.is_some());
        assert!(!stream.is_connected());

        stream.close();
        let seen: Vec<BufferState> = stats.iter().map(|s| s.state).collect();
        let error_at = seen.iter().position(|s| *s == BufferState::Error).unwrap();
        assert!(seen[error_at..]
            .iter()
            .all(|s| matches!(s, BufferState::Error | BufferState::Closed)));
        assert_eq!(seen.last(), Some(&BufferState::Closed));
    }

    #[test]
    fn clean_end_of_stream_is_an_error() {
        let source = ScriptedSource::new(vec![Connect::Ok(Connection::new(Cursor::new(
            vec![1u8; 512],
        )))]);
        let stream = BufferedStream::with_source(source, quick_config(0)).unwrap();
        let _stats = stream.start().unwrap();

        let mut buf = [0u8; 1024];
        let err = loop {
            match stream.read(&mut buf) {
                Ok(0) => panic!("clean end of stream must not look like EOF first"),
                Ok(_) => continue,
                Err(e) => break e,
            }
        };
        assert_eq!(err.to_string(), "Stream ended unexpectedly");
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn concurrent_close_releases_blocked_reader() {
        let (tx, reader) = ChannelReader::new();
        let source = ScriptedSource::new(vec![Connect::Ok(reader.connection())]);
        let stream = Arc::new(BufferedStream::with_source(source, quick_config(0)).unwrap());
        let stats = stream.start().unwrap();

        // Below the high watermark: the read stays gated
        tx.send(Ok(vec![0u8; 100])).unwrap();
        let reader = {
            let stream = stream.clone();
            thread::spawn(move || {
                let mut buf = [0u8; 64];
                stream.read(&mut buf)
            })
        };
        thread::sleep(Duration::from_millis(100));
        assert!(!reader.is_finished());

        let closers: Vec<_> = (0..2)
            .map(|_| {
                let stream = stream.clone();
                thread::spawn(move || stream.close())
            })
            .collect();
        for closer in closers {
            closer.join().unwrap();
        }
        assert_eq!(reader.join().unwrap().unwrap(), 0);

        let closed: Vec<BufferState> = stats
            .iter()
            .map(|s| s.state)
            .filter(|s| *s == BufferState::Closed)
            .collect();
        assert_eq!(closed.len(), 1);
        assert!(stats.recv().is_err());
        assert_eq!(stream.stats().state, BufferState::Closed);
        drop(tx);
    }

    #[test]
    fn close_returns_promptly_during_backoff() {
        let config = quick_config(0).with_reconnect(ReconnectConfig {
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_retries: 0,
        });
        let (tx, reader) = ChannelReader::new();
        let source = ScriptedSource::new(vec![Connect::Ok(reader.connection())]);
        let stream = BufferedStream::with_source(source, config).unwrap();
        let _stats = stream.start().unwrap();

        drop(tx);
        thread::sleep(Duration::from_millis(50));
        assert!(!stream.is_connected());

        let start = Instant::now();
        stream.close();
        assert!(start.elapsed() < Duration::from_secs(1));
        let mut buf = [0u8; 16];
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn close_releases_connection_stalled_in_read() {
        let (tx, reader) = ChannelReader::new();
        let dropped = reader.dropped_flag();
        let source = ScriptedSource::new(vec![Connect::Ok(reader.connection())]);
        let stream = BufferedStream::with_source(source, quick_config(0)).unwrap();
        let _stats = stream.start().unwrap();

        // The server never sends a byte; the producer is parked in read()
        thread::sleep(Duration::from_millis(100));
        assert!(stream.is_connected());

        let start = Instant::now();
        stream.close();
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(dropped.load(Ordering::SeqCst), "connection still open after close");
        assert!(stream.producer.lock().unwrap().is_none());
        drop(tx);
    }

    #[test]
    fn close_releases_stalled_http_connection() {
        let server = serve(vec![Reply::ok(b"ID3".to_vec()).hold_open()]);
        let stream = BufferedStream::with_config(&server.url(), quick_config(0)).unwrap();
        let _stats = stream.start().unwrap();
        thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        stream.close();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(
            server.client_disconnected(Duration::from_secs(5)),
            "socket still open after close"
        );
    }

    #[test]
    fn drop_closes_stream() {
        let (tx, reader) = ChannelReader::new();
        let source = ScriptedSource::new(vec![Connect::Ok(reader.connection())]);
        let stream = BufferedStream::with_source(source, quick_config(0)).unwrap();
        let stats = stream.start().unwrap();

        drop(stream);
        let last = stats.iter().last().map(|s| s.state);
        assert_eq!(last, Some(BufferState::Closed));
        drop(tx);
    }

    #[test]
    fn http_stream_end_to_end() {
        let body: Vec<u8> = (0..2048u32).map(|i| (i % 256) as u8).collect();
        let server = serve(vec![Reply::ok(body.clone())
            .header("content-type", "audio/mpeg")
            .header("icy-name", "Test FM")]);
        let stream = BufferedStream::with_config(&server.url(), quick_config(0)).unwrap();
        let stats = stream.start().unwrap();

        // The server closes after the body, which ends the stream with an
        // error; whatever was read before it must match the body.
        let mut got = Vec::new();
        let mut buf = [0u8; 100];
        let err = loop {
            match stream.read(&mut buf) {
                Ok(0) => panic!("end of stream before the error was reported"),
                Ok(n) => got.extend_from_slice(&buf[..n]),
                Err(e) => break e,
            }
        };
        assert_eq!(err.to_string(), "Stream ended unexpectedly");
        assert!(body.starts_with(&got));
        assert!(stats
            .try_iter()
            .any(|s| s.state == BufferState::Healthy));

        let head = server.request();
        assert!(head.starts_with("GET /stream"));
        assert!(head.to_ascii_lowercase().contains("user-agent: radiobuf/"));
        assert!(!head.to_ascii_lowercase().contains("icy-metadata"));
        stream.close();
    }

    #[test]
    fn http_error_status_fails_start() {
        let server = serve(vec![Reply::status(404, "Not Found")]);
        let stream = BufferedStream::with_config(&server.url(), quick_config(0)).unwrap();
        assert!(matches!(stream.start(), Err(RadioError::HttpStatus(404))));
    }
}
