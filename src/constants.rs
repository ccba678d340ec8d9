// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants
//!
//! Defaults live here so the engine, the configuration layer, and the tests
//! agree on one set of numbers. Anything that is genuinely tunable per
//! installation also has a field in the configuration document; these are the
//! values used when the document is silent.

use std::time::Duration;

// =============================================================================
// Engine tick
// =============================================================================

/// Default tick rate in Hz (nominal band is 15-30)
pub const DEFAULT_TICK_HZ: u32 = 20;

/// Poll timeout handed to the depth source each tick
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(30);

/// Consecutive raw detections required to activate a cell
pub const DEFAULT_ACTIVATE_N: u8 = 3;

/// Consecutive absences required to deactivate the active cell
pub const DEFAULT_DEACTIVATE_N: u8 = 6;

// =============================================================================
// Depth sensor
// =============================================================================

/// Default depth stream width in pixels (Gemini-class sensors)
pub const DEFAULT_SENSOR_WIDTH: u32 = 640;

/// Default depth stream height in pixels
pub const DEFAULT_SENSOR_HEIGHT: u32 = 400;

/// Default depth stream rate in frames per second
pub const DEFAULT_SENSOR_FPS: u32 = 30;

/// Y16 streams encode depth left-shifted; shift right by this to get mm
pub const DEFAULT_SHIFT_BITS: u8 = 2;

/// Depth readings closer than this are sensor noise and are discarded (m)
pub const MIN_VALID_DEPTH_M: f32 = 0.2;

/// Depth readings beyond this are outside any usable room (m)
pub const MAX_VALID_DEPTH_M: f32 = 6.0;

// =============================================================================
// Camera model
// =============================================================================

/// Focal length X (pixels) at the 640x400 base resolution
pub const DEFAULT_FX: f32 = 580.0;
/// Focal length Y (pixels) at the 640x400 base resolution
pub const DEFAULT_FY: f32 = 580.0;
/// Principal point X (pixels) at the 640x400 base resolution
pub const DEFAULT_CX: f32 = 320.0;
/// Principal point Y (pixels) at the 640x400 base resolution
pub const DEFAULT_CY: f32 = 200.0;

/// Default camera mounting height above the floor (m)
pub const DEFAULT_CAM_HEIGHT_M: f32 = 1.8;
/// Default downward pitch (degrees, positive looks at the floor)
pub const DEFAULT_CAM_PITCH_DEG: f32 = 10.0;
/// Default distance between the camera and the side wall (m)
pub const DEFAULT_CAM_WALL_DIST_M: f32 = 0.30;

/// Camera pitch domain (degrees)
pub const CAM_PITCH_MIN_DEG: f32 = -30.0;
pub const CAM_PITCH_MAX_DEG: f32 = 90.0;

// =============================================================================
// Person localization
// =============================================================================

/// Body points must sit at least this far above the floor (m)
pub const BODY_MIN_HEIGHT_M: f32 = 0.1;

/// Body points above this are ceiling / fixtures, not a person (m)
pub const BODY_MAX_HEIGHT_M: f32 = 2.2;

/// Minimum surviving ground points for a localization to count
pub const MIN_GROUND_POINTS: usize = 20;

/// Width of the near band kept around the closest depth percentile (m)
pub const NEAR_BAND_M: f32 = 0.7;

/// Percentile of y used as the near-band anchor
pub const NEAR_BAND_PERCENTILE: f32 = 30.0;

// =============================================================================
// Room / grid
// =============================================================================

/// Default room dimensions (m)
pub const DEFAULT_ROOM_WIDTH_M: f32 = 6.0;
pub const DEFAULT_ROOM_DEPTH_M: f32 = 6.0;

/// Default grid size
pub const DEFAULT_ROWS: usize = 6;
pub const DEFAULT_COLS: usize = 6;

// =============================================================================
// Audio
// =============================================================================

/// Number of mixer voice slots
pub const AUDIO_VOICES: usize = 32;

/// Linear fade-in on note-on (ms)
pub const AUDIO_ATTACK_MS: u32 = 5;

/// Linear fade-out on note-off (ms)
pub const AUDIO_RELEASE_MS: u32 = 120;

/// Bounded command queue into the mixer callback
pub const AUDIO_COMMAND_QUEUE: usize = 256;

/// Per-cell volume domain
pub const VOLUME_MAX: f32 = 2.0;

// =============================================================================
// DMX
// =============================================================================

/// Channels in one DMX universe
pub const DMX_UNIVERSE_SIZE: usize = 512;

/// Highest accepted universe number in cell configuration
pub const DMX_UNIVERSE_MAX: u8 = 10;

/// Most channels a single fixture may span
pub const DMX_CHANNELS_MAX: u8 = 16;

/// Consecutive transport failures before the engine degrades
pub const DMX_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Accent color written on activation when the cell has no color configured
pub const DMX_ACCENT_COLOR: (u8, u8, u8) = (255, 50, 0);

/// Log at most one degraded-flush message per this many suppressed flushes
pub const DMX_DEGRADED_LOG_EVERY: u64 = 100;

// =============================================================================
// Calibration
// =============================================================================

/// Grace period for the subject to reach the target spot (s)
pub const CALIBRATION_PREPARE_SECS: u32 = 5;

/// Averaging window once the subject is in place (s)
pub const CALIBRATION_COUNT_SECS: u32 = 10;

// =============================================================================
// Events
// =============================================================================

/// Bounded event channel capacity; oldest events are dropped when full
pub const EVENT_QUEUE: usize = 256;

/// Log at most one frame-timeout warning per this many timeouts
pub const TIMEOUT_LOG_EVERY: u64 = 64;
