// SPDX-License-Identifier: GPL-3.0-only

//! Per-cell configuration registry
//!
//! Each grid cell owns its audio sample, volume, DMX fixture, and the world
//! bounds computed from the room geometry. The registry rebuilds bounds
//! whenever the room changes and can carry audio/DMX settings across a
//! rebuild for cell ids that survive.

use super::{Cell, RoomConfig};
use crate::constants::{DMX_CHANNELS_MAX, DMX_UNIVERSE_MAX, DMX_UNIVERSE_SIZE, VOLUME_MAX};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// DMX fixture assignment for one cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmxFixture {
    /// Universe number (0..=10)
    pub universe: u8,
    /// First channel, 1-based on the wire
    pub address: u16,
    /// Channels the fixture spans (RGB fixtures use 3)
    #[serde(rename = "channels")]
    pub channel_count: u8,
    /// Configured RGB color
    pub color: (u8, u8, u8),
}

impl Default for DmxFixture {
    fn default() -> Self {
        Self {
            universe: 0,
            address: 1,
            channel_count: 3,
            color: (255, 255, 255),
        }
    }
}

impl DmxFixture {
    /// Check the §address arithmetic: the fixture must fit the universe
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.universe > DMX_UNIVERSE_MAX {
            return Err(ConfigError::Invalid(format!(
                "universe {} out of range 0..={}",
                self.universe, DMX_UNIVERSE_MAX
            )));
        }
        if self.address == 0 {
            return Err(ConfigError::Invalid("address must be >= 1".into()));
        }
        if self.channel_count == 0 || self.channel_count > DMX_CHANNELS_MAX {
            return Err(ConfigError::Invalid(format!(
                "channel count {} out of range 1..={}",
                self.channel_count, DMX_CHANNELS_MAX
            )));
        }
        let last = self.address as usize + self.channel_count as usize - 1;
        if last > DMX_UNIVERSE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "fixture at address {} spans past channel {}",
                self.address, DMX_UNIVERSE_SIZE
            )));
        }
        Ok(())
    }
}

/// World-space extent of a cell, recomputed from the room on every rebuild
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellBounds {
    pub x_min: f32,
    pub x_max: f32,
    pub y_min: f32,
    pub y_max: f32,
}

impl CellBounds {
    fn for_cell(room: &RoomConfig, cell: Cell) -> Self {
        let cw = room.cell_width();
        let cd = room.cell_depth();
        Self {
            x_min: cell.col as f32 * cw,
            x_max: (cell.col + 1) as f32 * cw,
            y_min: cell.row as f32 * cd,
            y_max: (cell.row + 1) as f32 * cd,
        }
    }
}

/// Everything configurable about one cell
///
/// Hand-edited documents may omit fields; everything defaults, and bounds
/// are recomputed from the room on load regardless of what the file says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellConfig {
    /// Human-readable name shown by the shell
    pub name: String,
    /// Path to the looped sample; empty means silent cell
    pub sample_path: String,
    /// Playback volume, 0.0..=2.0
    pub volume: f32,
    pub dmx: DmxFixture,
    /// Inactive cells trigger nothing even when occupied
    pub active: bool,
    /// World bounds, owned by the registry
    pub bounds: CellBounds,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            sample_path: String::new(),
            volume: 1.0,
            dmx: DmxFixture::default(),
            active: true,
            bounds: CellBounds {
                x_min: 0.0,
                x_max: 0.0,
                y_min: 0.0,
                y_max: 0.0,
            },
        }
    }
}

impl CellConfig {
    fn default_for(room: &RoomConfig, cell: Cell) -> Self {
        Self {
            name: format!("cell_{}", cell.key()),
            sample_path: String::new(),
            volume: 1.0,
            dmx: DmxFixture::default(),
            active: true,
            bounds: CellBounds::for_cell(room, cell),
        }
    }

    /// Copy the user-editable fields from another cell, keeping bounds.
    /// This is the paste half of the shell's copy/paste.
    pub fn apply_from(&mut self, other: &CellConfig) {
        self.name = other.name.clone();
        self.sample_path = other.sample_path.clone();
        self.volume = other.volume;
        self.dmx = other.dmx.clone();
        self.active = other.active;
    }
}

/// In-memory map (row, col) -> CellConfig
#[derive(Debug, Clone)]
pub struct CellRegistry {
    room: RoomConfig,
    cells: HashMap<Cell, CellConfig>,
}

impl CellRegistry {
    /// Build a fresh default grid for a room
    pub fn build_default(room: RoomConfig) -> Self {
        let mut cells = HashMap::with_capacity(room.rows * room.cols);
        for row in 0..room.rows {
            for col in 0..room.cols {
                let cell = Cell::new(row, col);
                cells.insert(cell, CellConfig::default_for(&room, cell));
            }
        }
        Self { room, cells }
    }

    /// Restore a registry from a persisted document.
    ///
    /// A document whose cell count disagrees with rows x cols is stale;
    /// the grid is rebuilt from defaults in that case. Bounds are always
    /// recomputed, never trusted from disk.
    pub fn from_document(room: RoomConfig, stored: HashMap<String, CellConfig>) -> Self {
        let mut registry = Self::build_default(room);
        if stored.len() != room.rows * room.cols {
            tracing::warn!(
                stored = stored.len(),
                expected = room.rows * room.cols,
                "Stored cell count disagrees with grid size, rebuilding defaults"
            );
            return registry;
        }
        for (key, mut config) in stored {
            let Some(cell) = Cell::from_key(&key) else {
                tracing::warn!(key = %key, "Ignoring cell with unparseable key");
                continue;
            };
            if cell.row >= room.rows || cell.col >= room.cols {
                tracing::warn!(cell = %cell, "Ignoring cell outside the grid");
                continue;
            }
            config.bounds = CellBounds::for_cell(&room, cell);
            config.volume = config.volume.clamp(0.0, VOLUME_MAX);
            if config.dmx.validate().is_err() {
                tracing::warn!(cell = %cell, "Stored DMX fixture invalid, using default");
                config.dmx = DmxFixture::default();
            }
            registry.cells.insert(cell, config);
        }
        registry
    }

    /// Serialize to the "r,c" keyed map used by the configuration document
    pub fn to_document(&self) -> HashMap<String, CellConfig> {
        self.cells
            .iter()
            .map(|(cell, config)| (cell.key(), config.clone()))
            .collect()
    }

    pub fn room(&self) -> &RoomConfig {
        &self.room
    }

    pub fn get(&self, cell: Cell) -> Option<&CellConfig> {
        self.cells.get(&cell)
    }

    /// Replace a cell's configuration.
    ///
    /// Volume is clamped into range; an invalid DMX fixture or an
    /// out-of-grid cell is rejected. Bounds are recomputed, not taken from
    /// the caller.
    pub fn set(&mut self, cell: Cell, mut config: CellConfig) -> Result<(), ConfigError> {
        if cell.row >= self.room.rows || cell.col >= self.room.cols {
            return Err(ConfigError::Invalid(format!(
                "cell {} outside {}x{} grid",
                cell, self.room.rows, self.room.cols
            )));
        }
        config.dmx.validate()?;
        config.volume = config.volume.clamp(0.0, VOLUME_MAX);
        config.bounds = CellBounds::for_cell(&self.room, cell);
        self.cells.insert(cell, config);
        Ok(())
    }

    /// Clone a cell's configuration for copy/paste in the shell
    pub fn clone_cell(&self, cell: Cell) -> Option<CellConfig> {
        self.cells.get(&cell).cloned()
    }

    /// Paste previously copied settings onto a target cell, keeping the
    /// target's bounds
    pub fn paste(&mut self, target: Cell, source: &CellConfig) -> Result<(), ConfigError> {
        let Some(existing) = self.cells.get_mut(&target) else {
            return Err(ConfigError::Invalid(format!("cell {} not in grid", target)));
        };
        source.dmx.validate()?;
        existing.apply_from(source);
        existing.volume = existing.volume.clamp(0.0, VOLUME_MAX);
        Ok(())
    }

    /// Rebuild for a new room geometry.
    ///
    /// World bounds are always recomputed. When `keep_existing` is set,
    /// audio/DMX settings are inherited for any (row, col) present in both
    /// the old and new grid.
    pub fn rebuild(&mut self, room: RoomConfig, keep_existing: bool) {
        let old = if keep_existing {
            std::mem::take(&mut self.cells)
        } else {
            self.cells.clear();
            HashMap::new()
        };

        self.room = room;
        for row in 0..room.rows {
            for col in 0..room.cols {
                let cell = Cell::new(row, col);
                let mut config = CellConfig::default_for(&room, cell);
                if let Some(previous) = old.get(&cell) {
                    config.apply_from(previous);
                }
                self.cells.insert(cell, config);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Cell, &CellConfig)> {
        self.cells.iter()
    }
}
