// SPDX-License-Identifier: GPL-3.0-only

//! DMX transports
//!
//! The engine does not assume transport semantics beyond "hand over 512
//! bytes for one universe". The default implementation shells out to OLA's
//! `ola_set_dmx`, which is what actually drives the Enttec interface on the
//! installation machine.

use crate::constants::DMX_UNIVERSE_SIZE;
use crate::errors::DmxError;
use std::process::Command;
use tracing::debug;

/// One-universe DMX sink
pub trait DmxTransport: Send {
    fn send(&mut self, universe: u8, data: &[u8; DMX_UNIVERSE_SIZE]) -> Result<(), DmxError>;

    /// Transport name for logging
    fn name(&self) -> &'static str;
}

/// Transport via the OLA command line client.
///
/// Requires a running olad and `ola_set_dmx` in PATH. One process per flush
/// is fine at tick rate; the change-driven engine only flushes on
/// transitions.
#[derive(Debug, Default)]
pub struct OlaTransport {
    /// Reused formatting buffer for the channel list
    csv: String,
}

impl OlaTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DmxTransport for OlaTransport {
    fn send(&mut self, universe: u8, data: &[u8; DMX_UNIVERSE_SIZE]) -> Result<(), DmxError> {
        self.csv.clear();
        for (i, value) in data.iter().enumerate() {
            if i > 0 {
                self.csv.push(',');
            }
            // u8 formatting never exceeds three digits
            self.csv.push_str(itoa_buffer(*value).as_str());
        }

        let output = Command::new("ola_set_dmx")
            .arg("--universe")
            .arg(universe.to_string())
            .arg("--dmx")
            .arg(&self.csv)
            .output()
            .map_err(|e| DmxError::Transport(format!("ola_set_dmx not runnable: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DmxError::Transport(format!(
                "ola_set_dmx exited {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        debug!(universe, "Universe sent via ola_set_dmx");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ola"
    }
}

/// Small stack formatter so the CSV loop never allocates per channel
fn itoa_buffer(value: u8) -> ItoaBuf {
    let mut buf = ItoaBuf {
        bytes: [0u8; 3],
        len: 0,
    };
    let mut v = value;
    if v >= 100 {
        buf.bytes[buf.len] = b'0' + v / 100;
        buf.len += 1;
        v %= 100;
    }
    if v >= 10 || value >= 100 {
        buf.bytes[buf.len] = b'0' + v / 10;
        buf.len += 1;
        v %= 10;
    }
    buf.bytes[buf.len] = b'0' + v;
    buf.len += 1;
    buf
}

struct ItoaBuf {
    bytes: [u8; 3],
    len: usize,
}

impl ItoaBuf {
    fn as_str(&self) -> &str {
        // Only ASCII digits ever land in the buffer
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or("0")
    }
}

/// Discards everything. Used by audio-only installs and tests.
#[derive(Debug, Default)]
pub struct NullTransport;

impl DmxTransport for NullTransport {
    fn send(&mut self, _universe: u8, _data: &[u8; DMX_UNIVERSE_SIZE]) -> Result<(), DmxError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}
