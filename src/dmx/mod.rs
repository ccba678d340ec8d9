// SPDX-License-Identifier: GPL-3.0-only

//! DMX universe management
//!
//! The engine owns one 512-channel buffer and pushes it through a
//! [`DmxTransport`] whenever it changed. Five consecutive transport failures
//! latch the engine into `Degraded`, where flushes become cheap no-ops until
//! an explicit `reset()`; a flaky OLA daemon must not stall the tick.

mod transport;

pub use transport::{DmxTransport, NullTransport, OlaTransport};

use crate::constants::{DMX_DEGRADED_LOG_EVERY, DMX_MAX_CONSECUTIVE_FAILURES, DMX_UNIVERSE_SIZE};
use crate::errors::DmxError;
use std::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Transport health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmxState {
    Normal,
    /// Too many consecutive transport failures; flush is a no-op
    Degraded,
}

/// Maintains the universe buffer and emits it on change
pub struct DmxEngine {
    universe: u8,
    /// Commanded channel state; the only lock in the hot path
    buffer: Mutex<[u8; DMX_UNIVERSE_SIZE]>,
    /// What the transport last accepted; None forces the next flush out
    last_sent: Option<[u8; DMX_UNIVERSE_SIZE]>,
    consecutive_failures: u32,
    state: DmxState,
    suppressed_flushes: u64,
    transport: Box<dyn DmxTransport>,
}

impl DmxEngine {
    pub fn new(universe: u8, transport: Box<dyn DmxTransport>) -> Self {
        Self {
            universe,
            buffer: Mutex::new([0u8; DMX_UNIVERSE_SIZE]),
            last_sent: None,
            consecutive_failures: 0,
            state: DmxState::Normal,
            suppressed_flushes: 0,
            transport,
        }
    }

    pub fn state(&self) -> DmxState {
        self.state
    }

    /// Snapshot of the commanded buffer
    pub fn buffer(&self) -> [u8; DMX_UNIVERSE_SIZE] {
        *self.buffer.lock().expect("dmx buffer lock poisoned")
    }

    /// Write `values` starting at a 1-based address.
    ///
    /// Address 0 is not a channel; writes running past channel 512 are
    /// truncated there.
    pub fn set_channels(&self, start_address: u16, values: &[u8]) {
        if start_address == 0 {
            warn!("Ignoring DMX write at address 0 (addresses are 1-based)");
            return;
        }
        let start = start_address as usize - 1;
        if start >= DMX_UNIVERSE_SIZE {
            warn!(address = start_address, "Ignoring DMX write past the universe");
            return;
        }

        let mut buffer = self.buffer.lock().expect("dmx buffer lock poisoned");
        let span = values.len().min(DMX_UNIVERSE_SIZE - start);
        buffer[start..start + span].copy_from_slice(&values[..span]);
    }

    /// Transmit the buffer if it changed since the last successful send.
    ///
    /// In `Degraded` this is a no-op that logs at a heavily reduced rate.
    pub fn flush(&mut self) -> Result<(), DmxError> {
        if self.state == DmxState::Degraded {
            self.suppressed_flushes += 1;
            if self.suppressed_flushes % DMX_DEGRADED_LOG_EVERY == 1 {
                warn!(
                    suppressed = self.suppressed_flushes,
                    "DMX degraded, flushes suppressed (reset() to recover)"
                );
            }
            return Ok(());
        }

        let snapshot = self.buffer();
        if self.last_sent.as_ref() == Some(&snapshot) {
            return Ok(());
        }

        match self.transport.send(self.universe, &snapshot) {
            Ok(()) => {
                self.last_sent = Some(snapshot);
                self.consecutive_failures = 0;
                debug!(universe = self.universe, "DMX universe flushed");
                Ok(())
            }
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    error = %e,
                    consecutive = self.consecutive_failures,
                    "DMX transmit failed"
                );
                if self.consecutive_failures >= DMX_MAX_CONSECUTIVE_FAILURES {
                    self.state = DmxState::Degraded;
                    self.suppressed_flushes = 0;
                    error!(
                        failures = self.consecutive_failures,
                        "DMX transport degraded after repeated failures"
                    );
                }
                Err(e)
            }
        }
    }

    /// Zero every channel and flush
    pub fn blackout(&mut self) -> Result<(), DmxError> {
        {
            let mut buffer = self.buffer.lock().expect("dmx buffer lock poisoned");
            buffer.fill(0);
        }
        self.flush()
    }

    /// Leave `Degraded`; the next flush retransmits the whole buffer so the
    /// fixture state cannot stay stale
    pub fn reset(&mut self) {
        info!("DMX engine reset");
        self.state = DmxState::Normal;
        self.consecutive_failures = 0;
        self.suppressed_flushes = 0;
        self.last_sent = None;
    }
}
