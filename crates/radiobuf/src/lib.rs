//! radiobuf: adaptive buffering for internet radio streams
//!
//! A ring buffer sits between a network-fed producer thread and a
//! playback-paced reader. The producer reconnects with exponential backoff,
//! the buffer tracks watermark states, and telemetry is published on a
//! bounded channel that never blocks the network side.
//!
//! ## Quick start
//!
//! ```no_run
//! use radiobuf::stream::BufferedStream;
//!
//! let stream = BufferedStream::new("http://ice1.somafm.com/groovesalad-128-mp3")?;
//! let stats = stream.start()?;
//! let mut buf = [0u8; 4096];
//! let n = stream.read(&mut buf)?;
//! # let _ = (stats, n);
//! stream.close();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod error;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;
