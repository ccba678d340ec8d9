// SPDX-License-Identifier: GPL-3.0-only

//! Configuration document
//!
//! One JSON document holds everything an installation needs: camera pose,
//! room geometry, grid size, per-cell settings, sensor stream parameters
//! and engine tuning. The engine reads it at startup and on explicit
//! reload; writes happen at calibration commit and shell-triggered save.
//! Unknown fields are ignored, missing fields take defaults, so documents
//! survive version skew in both directions.

use crate::constants::{
    DEFAULT_ACTIVATE_N, DEFAULT_CAM_HEIGHT_M, DEFAULT_CAM_PITCH_DEG, DEFAULT_CAM_WALL_DIST_M,
    DEFAULT_DEACTIVATE_N, DEFAULT_ROOM_DEPTH_M, DEFAULT_ROOM_WIDTH_M, DEFAULT_ROWS, DEFAULT_COLS,
    DEFAULT_SENSOR_FPS, DEFAULT_SENSOR_HEIGHT, DEFAULT_SENSOR_WIDTH, DEFAULT_SHIFT_BITS,
    DEFAULT_TICK_HZ, MAX_VALID_DEPTH_M, MIN_VALID_DEPTH_M,
};
use crate::errors::ConfigError;
use crate::grid::{CellConfig, CellRegistry, RoomConfig, Validated, validate_room_and_matrix};
use crate::tracking::{CalibrationOffset, CameraPose};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Camera mounting section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSection {
    pub height_m: f32,
    /// Downward pitch; the document keeps the historical name
    pub angle_deg: f32,
    pub wall_dist_m: f32,
    /// Legacy additive offset; superseded by `calibration_offset` and
    /// zeroed when building the pose
    pub offset_m: f32,
    pub calibration_offset: CalibrationOffset,
    /// RFC 3339 instant of the last calibration commit
    pub calibrated_at: Option<String>,
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            height_m: DEFAULT_CAM_HEIGHT_M,
            angle_deg: DEFAULT_CAM_PITCH_DEG,
            wall_dist_m: DEFAULT_CAM_WALL_DIST_M,
            offset_m: 0.0,
            calibration_offset: CalibrationOffset::default(),
            calibrated_at: None,
        }
    }
}

/// Room dimensions section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomSection {
    pub width_m: f32,
    pub depth_m: f32,
}

impl Default for RoomSection {
    fn default() -> Self {
        Self {
            width_m: DEFAULT_ROOM_WIDTH_M,
            depth_m: DEFAULT_ROOM_DEPTH_M,
        }
    }
}

/// Grid subdivision section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSection {
    pub rows: usize,
    pub cols: usize,
}

impl Default for GridSection {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
        }
    }
}

/// Depth stream section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSection {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Y16 encoding shift undone by the converter
    pub shift_bits: u8,
    pub min_depth_m: f32,
    pub max_depth_m: f32,
    pub smoothing: bool,
    /// Device node override; None picks the first Y16-capable device
    pub device: Option<String>,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            width: DEFAULT_SENSOR_WIDTH,
            height: DEFAULT_SENSOR_HEIGHT,
            fps: DEFAULT_SENSOR_FPS,
            shift_bits: DEFAULT_SHIFT_BITS,
            min_depth_m: MIN_VALID_DEPTH_M,
            max_depth_m: MAX_VALID_DEPTH_M,
            smoothing: false,
            device: None,
        }
    }
}

/// Engine tuning section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub tick_hz: u32,
    pub activate_n: u8,
    pub deactivate_n: u8,
    /// Keep only the nearest band of ground points before the median
    pub near_band_filter: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            tick_hz: DEFAULT_TICK_HZ,
            activate_n: DEFAULT_ACTIVATE_N,
            deactivate_n: DEFAULT_DEACTIVATE_N,
            near_band_filter: true,
        }
    }
}

/// Audio section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    pub enabled: bool,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// The whole configuration document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraSection,
    pub room: RoomSection,
    pub grid: GridSection,
    pub sensor: SensorSection,
    pub engine: EngineSection,
    pub audio: AudioSection,
    /// Cells keyed "r,c"
    pub cells: HashMap<String, CellConfig>,
}

impl Config {
    /// Validate the stored room/grid, yielding corrected geometry and the
    /// correction message (empty when the document was already consistent)
    pub fn validated_room(&self) -> Validated {
        validate_room_and_matrix(
            self.room.width_m,
            self.room.depth_m,
            self.grid.cols,
            self.grid.rows,
        )
    }

    /// Camera pose for the mapper. `offset_m` is legacy and deliberately
    /// not folded in; corrections flow through `calibration_offset`.
    pub fn pose(&self) -> CameraPose {
        CameraPose {
            height_m: self.camera.height_m,
            pitch_deg: self.camera.angle_deg,
            wall_dist_m: self.camera.wall_dist_m,
        }
        .sanitized()
    }

    /// Build the cell registry for the validated room
    pub fn registry(&self, room: RoomConfig) -> CellRegistry {
        CellRegistry::from_document(room, self.cells.clone())
    }

    /// Write the registry and room back into the document before saving
    pub fn absorb_registry(&mut self, registry: &CellRegistry) {
        let room = registry.room();
        self.room.width_m = room.width_m;
        self.room.depth_m = room.depth_m;
        self.grid.rows = room.rows;
        self.grid.cols = room.cols;
        self.cells = registry.to_document();
    }

    /// Record a calibration commit
    pub fn set_calibration(&mut self, offset: CalibrationOffset) {
        self.camera.calibration_offset = offset;
        self.camera.calibrated_at = Some(chrono::Local::now().to_rfc3339());
    }
}

/// On-disk home of the configuration document
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store at the platform config directory
    /// (`~/.config/soundroom/config.json` on Linux)
    pub fn default_location() -> Result<Self, ConfigError> {
        let base = dirs::config_dir()
            .ok_or_else(|| ConfigError::Storage("no config directory on this platform".into()))?;
        Ok(Self {
            path: base.join("soundroom").join("config.json"),
        })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, or start from defaults when it does not exist.
    /// A present-but-unreadable document is an error: silently replacing a
    /// curated installation config would be worse than refusing to start.
    pub fn load_or_default(&self) -> Result<Config, ConfigError> {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "No configuration document, using defaults");
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| ConfigError::Storage(format!("parse {}: {}", self.path.display(), e)))?;
        tracing::info!(path = %self.path.display(), cells = config.cells.len(), "Configuration loaded");
        Ok(config)
    }

    /// Persist the document, creating parent directories as needed
    pub fn save(&self, config: &Config) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(config)
            .map_err(|e| ConfigError::Storage(e.to_string()))?;
        std::fs::write(&self.path, text)?;
        tracing::info!(path = %self.path.display(), "Configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_document_is_valid() {
        let config = Config::default();
        let validated = config.validated_room();
        assert!(validated.message.is_empty());
        assert_eq!(validated.rows, DEFAULT_ROWS);
        assert_eq!(validated.cols, DEFAULT_COLS);
    }

    #[test]
    fn test_round_trip_through_json() {
        let mut config = Config::default();
        config.camera.angle_deg = 12.5;
        config.set_calibration(CalibrationOffset { dx: 0.3, dy: -0.1 });

        let registry = config.registry(config.validated_room().room());
        config.absorb_registry(&registry);

        let text = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"room": {"width_m": 4.0}, "future_field": 1}"#).unwrap();
        assert_eq!(config.room.width_m, 4.0);
        assert_eq!(config.room.depth_m, DEFAULT_ROOM_DEPTH_M);
        assert_eq!(config.engine.tick_hz, DEFAULT_TICK_HZ);
    }

    #[test]
    fn test_oversized_grid_corrected_on_validation() {
        let config: Config = serde_json::from_str(
            r#"{"room": {"width_m": 2.5, "depth_m": 3.0}, "grid": {"rows": 2, "cols": 4}}"#,
        )
        .unwrap();
        let validated = config.validated_room();
        assert_eq!(validated.cols, 2);
        assert_eq!(validated.rows, 2);
        assert!(!validated.message.is_empty());
    }

    #[test]
    fn test_store_load_missing_gives_defaults() {
        let dir = std::env::temp_dir().join("soundroom-test-missing");
        let store = ConfigStore::at(dir.join("nope").join("config.json"));
        let config = store.load_or_default().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_store_save_then_load() {
        let dir = std::env::temp_dir().join(format!("soundroom-test-{}", std::process::id()));
        let store = ConfigStore::at(dir.join("config.json"));

        let mut config = Config::default();
        config.room.width_m = 5.0;
        store.save(&config).unwrap();

        let back = store.load_or_default().unwrap();
        assert_eq!(back.room.width_m, 5.0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let dir = std::env::temp_dir().join(format!("soundroom-corrupt-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = ConfigStore::at(&path);
        assert!(store.load_or_default().is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
