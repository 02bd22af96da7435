//! Connection seam for the producer
//!
//! `StreamSource` opens a fresh byte stream each time it's asked. The
//! production implementation issues a plain HTTP GET (no ICY metadata
//! interleaving, so the audio path never has to strip metadata frames).
//!
//! A [`Connection`] may carry a shutdown hook. `close()` runs it from the
//! closing thread, which makes a read blocked on the network return at once
//! and lets the producer drop the socket.

use std::fmt;
use std::io::{self, ErrorKind, Read};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tracing::debug;

use crate::config::network::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, USER_AGENT};
use crate::error::{RadioError, Result};
use crate::stream::icy::IcyHeaders;

/// Aborts a live connection from another thread
pub type Shutdown = Box<dyn FnOnce() + Send>;

/// An open audio byte stream
pub struct Connection {
    reader: Box<dyn Read + Send>,
    shutdown: Option<Shutdown>,
}

impl Connection {
    /// A connection with no way to interrupt a blocked read
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            shutdown: None,
        }
    }

    /// `shutdown` must make a pending or future `read` return promptly.
    pub fn with_shutdown(
        reader: impl Read + Send + 'static,
        shutdown: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            shutdown: Some(Box::new(shutdown)),
        }
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Read + Send>, Option<Shutdown>) {
        (self.reader, self.shutdown)
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("shutdown", &self.shutdown.is_some())
            .finish_non_exhaustive()
    }
}

/// Something the producer can (re)connect to
pub trait StreamSource: Send + Sync {
    /// Open a new connection. Called once by `start()` and again after
    /// every connection loss.
    fn connect(&self) -> Result<Connection>;

    /// Human-readable name for logs
    fn describe(&self) -> String {
        "stream".to_string()
    }
}

/// HTTP(S) stream endpoint.
///
/// Requests run on a small private tokio runtime so a body read can be
/// raced against the connection's shutdown signal.
pub struct HttpSource {
    url: String,
    client: reqwest::Client,
    runtime: Arc<Runtime>,
}

impl HttpSource {
    pub fn new(url: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("radiobuf-http")
            .enable_all()
            .build()?;
        // No whole-request timeout: the body is indefinite. Stalls are
        // bounded per read instead.
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            url: url.to_string(),
            client,
            runtime: Arc::new(runtime),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl StreamSource for HttpSource {
    fn connect(&self) -> Result<Connection> {
        let read_timeout = Duration::from_secs(READ_TIMEOUT_SECS);
        let response = self
            .runtime
            .block_on(tokio::time::timeout(
                read_timeout,
                self.client.get(&self.url).send(),
            ))
            .map_err(|_| {
                RadioError::Io(io::Error::new(
                    ErrorKind::TimedOut,
                    "timed out waiting for response headers",
                ))
            })??;

        if !response.status().is_success() {
            return Err(RadioError::HttpStatus(response.status().as_u16()));
        }

        let headers = IcyHeaders::from_headers(response.headers());
        debug!(
            url = %self.url,
            station = headers.station_name.as_deref().unwrap_or("-"),
            content_type = headers.content_type.as_deref().unwrap_or("-"),
            bitrate = ?headers.bitrate,
            "stream response headers"
        );

        let abort = Arc::new(Notify::new());
        let body = HttpBody {
            runtime: self.runtime.clone(),
            response,
            pending: Vec::new(),
            pos: 0,
            abort: abort.clone(),
            read_timeout,
        };
        // notify_one keeps a permit, so an abort racing ahead of the next
        // read is still seen.
        Ok(Connection::with_shutdown(body, move || abort.notify_one()))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Blocking `Read` over an async response body
struct HttpBody {
    runtime: Arc<Runtime>,
    response: reqwest::Response,
    /// Unconsumed tail of the last chunk
    pending: Vec<u8>,
    pos: usize,
    abort: Arc<Notify>,
    read_timeout: Duration,
}

impl Read for HttpBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos < self.pending.len() {
            let n = buf.len().min(self.pending.len() - self.pos);
            buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }

        let response = &mut self.response;
        let abort = &self.abort;
        let read_timeout = self.read_timeout;
        let next = self.runtime.block_on(async {
            tokio::select! {
                _ = abort.notified() => {
                    Err(io::Error::new(ErrorKind::ConnectionAborted, "connection shut down"))
                }
                chunk = tokio::time::timeout(read_timeout, response.chunk()) => match chunk {
                    Ok(Ok(chunk)) => Ok(chunk),
                    Ok(Err(e)) => Err(io::Error::other(e)),
                    Err(_) => Err(io::Error::new(ErrorKind::TimedOut, "no data within read timeout")),
                },
            }
        })?;

        let Some(chunk) = next else {
            return Ok(0);
        };
        let n = buf.len().min(chunk.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        self.pending.clear();
        self.pos = 0;
        if n < chunk.len() {
            self.pending.extend_from_slice(&chunk[n..]);
        }
        Ok(n)
    }
}
