//! radiobuf CLI: pipe a buffered internet radio stream to stdout or a file
//!
//! Audio bytes go to the output untouched, ready for an external decoder
//! (`radiobuf URL | ffplay -`). Logs go to stderr.

mod error;
mod settings;

use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use crossbeam_channel::Receiver;
use radiobuf::stream::{BufferState, BufferStats, BufferedStream, MetadataPoller, TrackInfo};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::{CliError, Result};
use crate::settings::{Overrides, Settings};

#[derive(Parser, Debug)]
#[command(name = "radiobuf", about = "Buffered internet radio stream relay", version)]
struct Cli {
    /// Stream URL
    #[arg(env = "RADIOBUF_URL")]
    url: String,

    /// Write audio here instead of stdout ("-" for stdout)
    #[arg(short, long, env = "RADIOBUF_OUTPUT")]
    output: Option<PathBuf>,

    /// Poll ICY metadata and log track titles
    #[arg(short, long)]
    metadata: bool,

    /// JSON settings file with buffer and reconnect options
    #[arg(short, long, env = "RADIOBUF_SETTINGS")]
    settings: Option<PathBuf>,

    /// Ring buffer capacity in bytes
    #[arg(long)]
    capacity: Option<usize>,

    /// Fill level (bytes) before audio is released
    #[arg(long)]
    high_watermark: Option<usize>,

    /// Fill level (bytes) that recovers an underrun
    #[arg(long)]
    low_watermark: Option<usize>,

    /// Bytes per network read
    #[arg(long)]
    chunk_size: Option<usize>,

    /// First reconnect delay in milliseconds
    #[arg(long)]
    initial_backoff_ms: Option<u64>,

    /// Reconnect delay cap in milliseconds
    #[arg(long)]
    max_backoff_ms: Option<u64>,

    /// Give up after this many failed reconnects (0 = never)
    #[arg(long, env = "RADIOBUF_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Seconds between title polls
    #[arg(long)]
    metadata_interval: Option<u64>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            capacity: self.capacity,
            high_watermark: self.high_watermark,
            low_watermark: self.low_watermark,
            read_chunk_size: self.chunk_size,
            initial_backoff_ms: self.initial_backoff_ms,
            max_backoff_ms: self.max_backoff_ms,
            max_retries: self.max_retries,
            metadata_interval_secs: self.metadata_interval,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut settings = match &cli.settings {
        Some(path) => Settings::load_from(path)?,
        None => Settings::default(),
    };
    settings.apply(&cli.overrides());
    debug!(?settings, "effective settings");

    let stream = BufferedStream::with_config(&cli.url, settings.buffer_config())?;
    let stats = stream.start()?;
    let stats_logger = thread::spawn(move || log_stats(stats));

    let poller = if cli.metadata {
        let poller = MetadataPoller::with_interval(&cli.url, settings.metadata_interval())?;
        poller.start()?;
        let updates = poller.updates();
        // Detached: ends when the poller thread drops its handles.
        thread::spawn(move || log_titles(updates));
        Some(poller)
    } else {
        None
    };

    let mut output = open_output(cli.output.as_ref())?;
    let result = relay(&mut &stream, &mut output);

    stream.close();
    if let Some(poller) = &poller {
        poller.stop();
    }
    if stats_logger.join().is_err() {
        warn!("stats logger panicked");
    }

    let bytes = result?;
    info!(bytes, "stream finished");
    Ok(())
}

fn open_output(path: Option<&PathBuf>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) if path.as_os_str() != "-" => {
            let file = File::create(path).map_err(|source| CliError::Output {
                path: path.clone(),
                source,
            })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        _ => Ok(Box::new(io::stdout().lock())),
    }
}

/// Copy until end of stream. A closed downstream pipe ends the relay cleanly.
fn relay<R: Read, W: Write>(input: &mut R, output: &mut W) -> Result<u64> {
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(CliError::Read(e)),
        };
        match output.write_all(&buf[..n]) {
            Ok(()) => total += n as u64,
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                info!("output closed");
                return Ok(total);
            }
            Err(e) => return Err(CliError::Write(e)),
        }
    }
    match output.flush() {
        Ok(()) => Ok(total),
        Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(total),
        Err(e) => Err(CliError::Write(e)),
    }
}

/// Log state changes at info and periodic snapshots at debug, until the
/// stream closes its telemetry channel. Fatal errors log at error.
fn log_stats(stats: Receiver<BufferStats>) {
    let mut last = BufferState::Buffering;
    for snapshot in stats {
        let fill = format!("{:.1}%", snapshot.fill_level * 100.0);
        if snapshot.state == last {
            debug!(state = %snapshot.state, fill, "buffer");
            continue;
        }
        last = snapshot.state;
        match (&snapshot.last_error, snapshot.state) {
            (Some(err), BufferState::Underrun | BufferState::Error) if err.is_fatal() => {
                error!(state = %snapshot.state, fill, error = %err, "stream failed")
            }
            (Some(err), BufferState::Underrun | BufferState::Error) => {
                warn!(state = %snapshot.state, fill, error = %err, "buffer state changed")
            }
            _ => info!(state = %snapshot.state, fill, "buffer state changed"),
        }
    }
}

fn log_titles(updates: Receiver<TrackInfo>) {
    for track in updates {
        match track.split() {
            (Some(artist), Some(title)) => info!(%artist, %title, "now playing"),
            _ => info!(title = %track.title, "now playing"),
        }
    }
}
