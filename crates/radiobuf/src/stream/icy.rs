//! ICY title poller
//!
//! Periodically opens a short-lived connection with `Icy-MetaData: 1`,
//! skips the first audio block, and reads the metadata record that follows.
//! Independent of the buffered audio connection.

use std::io::{self, Read};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use reqwest::header::HeaderMap;
use tracing::{debug, trace, warn};

use crate::config::metadata::{POLL_INTERVAL_SECS, REQUEST_TIMEOUT_SECS};
use crate::config::network::{CONNECT_TIMEOUT_SECS, USER_AGENT};
use crate::error::{RadioError, Result};
use crate::stream::metadata::{extract_icy_title, TrackInfo};

const METAINT_HEADER: &str = "icy-metaint";

/// Headers parsed from an ICY stream response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IcyHeaders {
    /// Audio bytes between metadata blocks (only sent when requested)
    pub metaint: Option<usize>,
    pub station_name: Option<String>,
    pub content_type: Option<String>,
    pub bitrate: Option<u32>,
}

impl IcyHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.trim().to_string())
        };

        Self {
            metaint: text(METAINT_HEADER).and_then(|v| v.parse::<usize>().ok()),
            station_name: text("icy-name"),
            content_type: text("content-type"),
            bitrate: text("icy-br").and_then(|v| v.parse::<u32>().ok()),
        }
    }
}

/// Read one metadata record from an ICY body.
///
/// Skips `metaint` audio bytes, reads the length byte (units of 16 bytes),
/// then the NUL-padded record, and extracts `StreamTitle`.
pub fn read_icy_title<R: Read>(reader: &mut R, metaint: usize) -> Result<TrackInfo> {
    let skipped = io::copy(&mut reader.by_ref().take(metaint as u64), &mut io::sink())?;
    if skipped < metaint as u64 {
        return Err(RadioError::Metadata(format!(
            "stream ended after {skipped} of {metaint} audio bytes"
        )));
    }

    let mut len_byte = [0u8; 1];
    reader.read_exact(&mut len_byte)?;
    let meta_len = len_byte[0] as usize * 16;
    if meta_len == 0 {
        return Err(RadioError::Metadata("no metadata in this block".into()));
    }

    let mut block = vec![0u8; meta_len];
    reader.read_exact(&mut block)?;

    extract_icy_title(&block)
        .map(TrackInfo::new)
        .ok_or_else(|| RadioError::Metadata("no StreamTitle in metadata".into()))
}

/// One complete poll: request, validate, read the first record.
fn fetch_title(client: &reqwest::blocking::Client, url: &str) -> Result<TrackInfo> {
    let mut response = client.get(url).header("Icy-MetaData", "1").send()?;

    if !response.status().is_success() {
        return Err(RadioError::HttpStatus(response.status().as_u16()));
    }

    let raw = response
        .headers()
        .get(METAINT_HEADER)
        .ok_or_else(|| RadioError::Metadata("stream does not support ICY metadata".into()))?;
    let metaint = raw
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .ok_or_else(|| RadioError::Metadata(format!("invalid icy-metaint value: {raw:?}")))?;

    read_icy_title(&mut response, metaint)
}

/// Replace any unread value with `info`; never blocks.
fn publish(tx: &Sender<TrackInfo>, rx: &Receiver<TrackInfo>, info: TrackInfo) {
    match tx.try_send(info) {
        Ok(()) => {}
        Err(TrySendError::Full(info)) => {
            let _ = rx.try_recv();
            let _ = tx.try_send(info);
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

/// Background poller delivering the station's current title.
///
/// Updates arrive on a single-slot channel holding only the latest value.
pub struct MetadataPoller {
    url: String,
    interval: Duration,
    client: reqwest::blocking::Client,
    updates_tx: Sender<TrackInfo>,
    updates_rx: Receiver<TrackInfo>,
    /// Dropping the sender wakes the poll thread's `select!`
    stop_tx: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MetadataPoller {
    pub fn new(url: &str) -> Result<Self> {
        Self::with_interval(url, Duration::from_secs(POLL_INTERVAL_SECS))
    }

    pub fn with_interval(url: &str, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(RadioError::Config("poll interval must be non-zero".into()));
        }
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let (updates_tx, updates_rx) = bounded(1);
        Ok(Self {
            url: url.to_string(),
            interval,
            client,
            updates_tx,
            updates_rx,
            stop_tx: Mutex::new(None),
            handle: Mutex::new(None),
        })
    }

    /// Receiver for title updates. Clones share the single slot.
    pub fn updates(&self) -> Receiver<TrackInfo> {
        self.updates_rx.clone()
    }

    /// Fetch the current title once, synchronously
    pub fn poll_once(&self) -> Result<TrackInfo> {
        fetch_title(&self.client, &self.url)
    }

    /// Poll immediately, then every interval, until `stop()`.
    pub fn start(&self) -> Result<()> {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stop_slot = self.stop_tx.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_some() {
            return Err(RadioError::AlreadyStarted);
        }

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let client = self.client.clone();
        let url = self.url.clone();
        let interval = self.interval;
        let tx = self.updates_tx.clone();
        let rx = self.updates_rx.clone();

        let spawned = thread::Builder::new()
            .name("icy-metadata-poller".to_string())
            .spawn(move || {
                let poll = || match fetch_title(&client, &url) {
                    Ok(info) => {
                        trace!(title = %info.title, "metadata poll");
                        publish(&tx, &rx, info);
                    }
                    Err(e) => debug!(url = %url, error = %e, "metadata poll skipped"),
                };

                let ticker = tick(interval);
                poll();
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => poll(),
                    }
                }
            })?;

        *stop_slot = Some(stop_tx);
        *handle = Some(spawned);
        Ok(())
    }

    /// Stop polling. Safe to call repeatedly or before `start()`, and the
    /// poller may be started again afterwards.
    ///
    /// A thread caught mid-request is detached; it exits once the request
    /// returns.
    pub fn stop(&self) {
        self.stop_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(h) = handle {
            if h.is_finished() && h.join().is_err() {
                warn!("metadata poller panicked");
            }
        }
    }
}

impl Drop for MetadataPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
