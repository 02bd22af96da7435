//! Watermark state machine
//!
//! Pure-logic state tracking over fill level and connection events.
//! No I/O and no locking; `SharedBuffer` drives it under its mutex.

use std::fmt;
use std::sync::Arc;

use crate::error::{RadioError, Result};

/// Buffer states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// Waiting for enough data to start (or restart) playback
    Buffering,
    /// Fill level adequate for playback
    Healthy,
    /// Data exhausted or connection lost after having been healthy
    Underrun,
    /// Terminal: unrecoverable failure
    Error,
    /// Terminal: closed by the owner
    Closed,
}

impl BufferState {
    /// `Error` and `Closed` accept no further transitions (except `Error → Closed`)
    pub fn is_terminal(self) -> bool {
        matches!(self, BufferState::Error | BufferState::Closed)
    }

    /// Does this edge exist in the state graph?
    pub fn can_transition_to(self, next: BufferState) -> bool {
        use BufferState::*;
        match (self, next) {
            (Closed, _) => false,
            (Error, Closed) => true,
            (Error, _) => false,
            (Buffering, Healthy) => true,
            (Healthy, Underrun) => true,
            (Underrun, Healthy) | (Underrun, Buffering) => true,
            (_, Error) | (_, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BufferState::Buffering => "Buffering",
            BufferState::Healthy => "Healthy",
            BufferState::Underrun => "Underrun",
            BufferState::Error => "Error",
            BufferState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Fill thresholds (bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    /// Opens the initial-fill gate
    pub high: usize,
    /// Recovers an underrun
    pub low: usize,
}

impl Watermarks {
    /// Check `low < high <= capacity`
    pub fn validate(&self, capacity: usize) -> Result<()> {
        if self.low >= self.high {
            return Err(RadioError::Config(format!(
                "low watermark ({}) must be below high watermark ({})",
                self.low, self.high
            )));
        }
        if self.high > capacity {
            return Err(RadioError::Config(format!(
                "high watermark ({}) exceeds buffer capacity ({})",
                self.high, capacity
            )));
        }
        Ok(())
    }
}

/// Telemetry snapshot, passed by value
#[derive(Debug, Clone)]
pub struct BufferStats {
    /// filled / capacity, in [0, 1]
    pub fill_level: f64,
    pub state: BufferState,
    pub last_error: Option<Arc<RadioError>>,
}

/// Tracks the current `BufferState` and whether preroll ever completed.
///
/// Every event method returns `Some(new_state)` when the state changed,
/// so the caller can emit telemetry exactly on transitions.
#[derive(Debug)]
pub struct WatermarkMachine {
    state: BufferState,
    watermarks: Watermarks,
    prerolled: bool,
}

impl WatermarkMachine {
    pub fn new(watermarks: Watermarks) -> Self {
        Self {
            state: BufferState::Buffering,
            watermarks,
            prerolled: false,
        }
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    /// True once the high watermark has been reached at least once
    pub fn has_prerolled(&self) -> bool {
        self.prerolled
    }

    /// Reads must wait while buffering, even with data resident
    pub fn gate_closed(&self) -> bool {
        self.state == BufferState::Buffering
    }

    /// Bytes were written; `filled` is the new fill count.
    pub fn on_fill(&mut self, filled: usize) -> Option<BufferState> {
        match self.state {
            BufferState::Buffering if filled >= self.watermarks.high => {
                self.prerolled = true;
                self.transition(BufferState::Healthy)
            }
            BufferState::Underrun if filled >= self.watermarks.low => {
                self.transition(BufferState::Healthy)
            }
            _ => None,
        }
    }

    /// A reader found the buffer empty
    pub fn on_drained(&mut self) -> Option<BufferState> {
        match self.state {
            BufferState::Healthy => self.transition(BufferState::Underrun),
            _ => None,
        }
    }

    /// The network connection failed
    pub fn on_connection_lost(&mut self) -> Option<BufferState> {
        match self.state {
            BufferState::Healthy => self.transition(BufferState::Underrun),
            _ => None,
        }
    }

    /// A reconnect succeeded with `filled` bytes resident
    pub fn on_reconnected(&mut self, filled: usize) -> Option<BufferState> {
        match self.state {
            BufferState::Underrun if filled >= self.watermarks.low => {
                self.transition(BufferState::Healthy)
            }
            BufferState::Underrun => self.transition(BufferState::Buffering),
            _ => None,
        }
    }

    /// Stream ended or retries exhausted
    pub fn on_fatal(&mut self) -> Option<BufferState> {
        self.transition(BufferState::Error)
    }

    /// Explicit close
    pub fn on_close(&mut self) -> Option<BufferState> {
        self.transition(BufferState::Closed)
    }

    fn transition(&mut self, next: BufferState) -> Option<BufferState> {
        if self.state == next || !self.state.can_transition_to(next) {
            return None;
        }
        self.state = next;
        Some(next)
    }
}
