// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the Sound Room engine
//!
//! Every stage of the tick catches its own errors and records the fault kind;
//! nothing here propagates out of the engine loop except a sensor that cannot
//! be opened at startup.

use std::fmt;

/// Result type alias using EngineError
pub type EngineResult<T> = Result<T, EngineError>;

/// Main engine error type
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Depth sensor errors
    Sensor(SensorError),
    /// Configuration errors
    Config(ConfigError),
    /// Audio engine errors
    Audio(AudioError),
    /// DMX engine errors
    Dmx(DmxError),
    /// Calibration errors
    Calibration(CalibrationError),
    /// Generic error with message
    Other(String),
}

/// Depth sensor errors
#[derive(Debug, Clone)]
pub enum SensorError {
    /// The device cannot be opened or disappeared mid-stream
    Unavailable(String),
    /// No frame became ready within the poll timeout
    Timeout,
    /// Buffer size or metadata does not match the negotiated stream
    Malformed(String),
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Geometry or cell configuration rejected by validation
    Invalid(String),
    /// Reading or writing the configuration document failed
    Storage(String),
}

/// Audio engine errors
#[derive(Debug, Clone)]
pub enum AudioError {
    /// No output device / stream could not be opened
    Unavailable(String),
    /// No free channel and nothing to steal; the note-on was dropped
    VoiceExhausted,
    /// Sample file could not be decoded
    Decode(String),
}

/// DMX engine errors
#[derive(Debug, Clone)]
pub enum DmxError {
    /// Transmitting the universe buffer failed
    Transport(String),
}

/// Calibration errors
#[derive(Debug, Clone)]
pub enum CalibrationError {
    /// Computing phase reached with no retained ground cloud
    NoData,
    /// A calibration run is already in progress
    Busy,
}

/// Stable fault classification used by the engine's per-kind counters.
///
/// Mirrors the error taxonomy but is `Copy` and carries no payload, so the
/// hot path can count faults without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    SensorUnavailable,
    FrameTimeout,
    FrameMalformed,
    ConfigInvalid,
    VoiceExhausted,
    DmxTransport,
    CalibrationNoData,
}

impl EngineError {
    /// Classify this error for fault counting; `None` for errors that have
    /// no runtime counter (storage, busy, decode, other).
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            EngineError::Sensor(SensorError::Unavailable(_)) => {
                Some(FaultKind::SensorUnavailable)
            }
            EngineError::Sensor(SensorError::Timeout) => Some(FaultKind::FrameTimeout),
            EngineError::Sensor(SensorError::Malformed(_)) => Some(FaultKind::FrameMalformed),
            EngineError::Config(ConfigError::Invalid(_)) => Some(FaultKind::ConfigInvalid),
            EngineError::Audio(AudioError::VoiceExhausted) => Some(FaultKind::VoiceExhausted),
            EngineError::Dmx(DmxError::Transport(_)) => Some(FaultKind::DmxTransport),
            EngineError::Calibration(CalibrationError::NoData) => {
                Some(FaultKind::CalibrationNoData)
            }
            _ => None,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Sensor(e) => write!(f, "Sensor error: {}", e),
            EngineError::Config(e) => write!(f, "Configuration error: {}", e),
            EngineError::Audio(e) => write!(f, "Audio error: {}", e),
            EngineError::Dmx(e) => write!(f, "DMX error: {}", e),
            EngineError::Calibration(e) => write!(f, "Calibration error: {}", e),
            EngineError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::Unavailable(msg) => write!(f, "Device unavailable: {}", msg),
            SensorError::Timeout => write!(f, "No frame within timeout"),
            SensorError::Malformed(msg) => write!(f, "Malformed frame: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid(msg) => write!(f, "Invalid: {}", msg),
            ConfigError::Storage(msg) => write!(f, "Storage: {}", msg),
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::Unavailable(msg) => write!(f, "Output unavailable: {}", msg),
            AudioError::VoiceExhausted => write!(f, "No free voice channel"),
            AudioError::Decode(msg) => write!(f, "Sample decode failed: {}", msg),
        }
    }
}

impl fmt::Display for DmxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DmxError::Transport(msg) => write!(f, "Transport failed: {}", msg),
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::NoData => write!(f, "No ground data retained"),
            CalibrationError::Busy => write!(f, "Calibration already running"),
        }
    }
}

impl std::error::Error for EngineError {}
impl std::error::Error for SensorError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for AudioError {}
impl std::error::Error for DmxError {}
impl std::error::Error for CalibrationError {}

// Conversions from sub-errors to EngineError
impl From<SensorError> for EngineError {
    fn from(err: SensorError) -> Self {
        EngineError::Sensor(err)
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

impl From<AudioError> for EngineError {
    fn from(err: AudioError) -> Self {
        EngineError::Audio(err)
    }
}

impl From<DmxError> for EngineError {
    fn from(err: DmxError) -> Self {
        EngineError::Dmx(err)
    }
}

impl From<CalibrationError> for EngineError {
    fn from(err: CalibrationError) -> Self {
        EngineError::Calibration(err)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Storage(err.to_string())
    }
}

impl From<String> for EngineError {
    fn from(msg: String) -> Self {
        EngineError::Other(msg)
    }
}

impl From<&str> for EngineError {
    fn from(msg: &str) -> Self {
        EngineError::Other(msg.to_string())
    }
}
