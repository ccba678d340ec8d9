// SPDX-License-Identifier: GPL-3.0-only

//! Engine orchestration
//!
//! One single-threaded tick drives the whole chain: poll -> convert ->
//! project -> locate -> map -> debounce -> fan out to audio and DMX. The
//! shell talks to a running engine exclusively through the command channel
//! and listens on the event channel; no callbacks ever reach back into the
//! tick. Every stage recovers locally: a failing stage yields its neutral
//! output and the loop keeps going. Only a sensor that cannot be opened at
//! startup, or an explicit stop, ends the run.

mod calibrator;
mod filter;

pub use calibrator::{CalibrationPhase, CalibrationResult, Calibrator};
pub use filter::{ActivationFilter, Transition};

use crate::audio::AudioEngine;
use crate::config::{Config, ConfigStore};
use crate::constants::{
    DEFAULT_POLL_TIMEOUT, DMX_ACCENT_COLOR, DMX_CHANNELS_MAX, EVENT_QUEUE, TIMEOUT_LOG_EVERY,
};
use crate::dmx::{DmxEngine, DmxTransport};
use crate::errors::{EngineError, EngineResult, FaultKind, SensorError};
use crate::grid::{
    Cell, CellConfig, DmxFixture, GridModel, Position, validate_room_and_matrix,
};
use crate::sensor::{DepthMap, DepthSource, FrameConverter, SensorProperties};
use crate::tracking::{CameraIntrinsics, Localizer, SpatialMapper};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Commands the engine accepts from the shell
#[derive(Debug, Clone)]
pub enum Command {
    /// Re-read the configuration document and rebuild every stage from it
    ReloadConfig,
    /// Re-grid the room; `keep_existing` carries cell settings over
    RebuildGrid {
        width_m: f32,
        depth_m: f32,
        rows: usize,
        cols: usize,
        keep_existing: bool,
    },
    /// Replace one cell's configuration and persist
    SetCell { cell: Cell, config: CellConfig },
    StartCalibration,
    /// Force a one-shot activation, bypassing the filter
    TestCell { cell: Cell },
    Blackout,
    Stop,
}

/// Events the engine publishes; the shell is a pure subscriber
#[derive(Debug, Clone)]
pub enum Event {
    ActiveCellChanged {
        previous: Option<Cell>,
        current: Option<Cell>,
    },
    PositionUpdated {
        position: Option<Position>,
        tick: u64,
    },
    CalibrationState(CalibrationPhase),
    CalibrationCommitted {
        offset: crate::tracking::CalibrationOffset,
    },
    Fault(FaultKind),
    /// Validation corrections and command rejections, human-readable
    ValidationMessage(String),
    /// Emitted instead of PositionUpdated on ticks with no fresh frame
    Heartbeat {
        tick: u64,
    },
}

/// Counters kept by the loop; snapshot-readable after a run
#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    pub ticks: u64,
    pub frames: u64,
    pub timeouts: u64,
    pub malformed: u64,
    pub faults: HashMap<FaultKind, u64>,
    pub dropped_events: u64,
}

impl EngineStats {
    fn record(&mut self, kind: FaultKind) {
        *self.faults.entry(kind).or_insert(0) += 1;
    }
}

/// Shell-side endpoints of a constructed engine
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: Sender<Command>,
    events: Receiver<Event>,
    stop: Arc<AtomicBool>,
}

impl EngineHandle {
    /// Queue a command; false when the engine is gone
    pub fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Request a graceful stop at the next tick boundary
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }
}

/// The perception-and-dispatch engine
///
/// Owns every subsystem; nothing here is process-global. Constructed and
/// run on the same thread (the audio output stream is not `Send`).
pub struct Engine {
    store: ConfigStore,
    config: Config,
    source: Box<dyn DepthSource>,
    converter: FrameConverter,
    mapper: SpatialMapper,
    localizer: Localizer,
    grid: GridModel,
    registry: crate::grid::CellRegistry,
    filter: ActivationFilter,
    audio: AudioEngine,
    dmx: DmxEngine,
    calibrator: Calibrator,
    /// Reused frame buffer; sized once at stream start
    frame: DepthMap,
    /// Last non-empty ground cloud, kept for the calibrator across sensor
    /// dropouts
    last_ground: Vec<Position>,
    props: Option<SensorProperties>,
    stats: EngineStats,
    commands: Receiver<Command>,
    events_tx: Sender<Event>,
    /// Second consumer used to drop the oldest event when the queue is full
    events_drain: Receiver<Event>,
    stop: Arc<AtomicBool>,
    tick: u64,
    pending_messages: Vec<String>,
}

impl Engine {
    /// Build an engine from its collaborators.
    ///
    /// The configuration document is read once here; geometry is validated
    /// before anything runs and corrections surface as a
    /// [`Event::ValidationMessage`] right after startup.
    pub fn new(
        store: ConfigStore,
        source: Box<dyn DepthSource>,
        transport: Box<dyn DmxTransport>,
        audio: AudioEngine,
    ) -> EngineResult<(Self, EngineHandle)> {
        let config = store.load_or_default()?;

        let validated = config.validated_room();
        let mut pending_messages = Vec::new();
        if !validated.message.is_empty() {
            warn!(message = %validated.message, "Room/grid configuration corrected");
            pending_messages.push(validated.message.clone());
        }
        let room = validated.room();

        let grid = GridModel::new(room).map_err(EngineError::Config)?;
        let registry = config.registry(room);
        let mapper = SpatialMapper::new(
            CameraIntrinsics::default(),
            config.pose(),
            config.camera.calibration_offset,
            room,
            config.sensor.min_depth_m,
            config.sensor.max_depth_m,
        );
        let localizer = Localizer::new(config.engine.near_band_filter);
        let converter = FrameConverter::new(config.sensor.shift_bits, config.sensor.smoothing);
        let filter = ActivationFilter::new(
            room.rows,
            room.cols,
            config.engine.activate_n,
            config.engine.deactivate_n,
        );
        let dmx = DmxEngine::new(0, transport);

        let (commands_tx, commands_rx) = bounded(64);
        let (events_tx, events_rx) = bounded(EVENT_QUEUE);
        let stop = Arc::new(AtomicBool::new(false));

        let handle = EngineHandle {
            commands: commands_tx,
            events: events_rx.clone(),
            stop: Arc::clone(&stop),
        };

        let mut engine = Self {
            store,
            config,
            source,
            converter,
            mapper,
            localizer,
            grid,
            registry,
            filter,
            audio,
            dmx,
            calibrator: Calibrator::new(),
            frame: DepthMap::new(),
            last_ground: Vec::new(),
            props: None,
            stats: EngineStats::default(),
            commands: commands_rx,
            events_tx,
            events_drain: events_rx,
            stop,
            tick: 0,
            pending_messages,
        };
        engine.preload_samples();

        Ok((engine, handle))
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn active_cell(&self) -> Option<Cell> {
        self.filter.active_cell()
    }

    /// Run until stopped. Fails only when the sensor cannot be opened.
    pub fn run(&mut self) -> EngineResult<()> {
        let props = self.source.start().map_err(|e| {
            warn!(error = %e, source = self.source.name(), "Depth source failed to start");
            EngineError::Sensor(e)
        })?;
        info!(
            source = self.source.name(),
            width = props.width,
            height = props.height,
            fps = props.fps,
            "Depth stream up"
        );
        self.frame.prepare(&props);
        self.mapper.prepare(props.width, props.height);
        self.props = Some(props);

        for message in std::mem::take(&mut self.pending_messages) {
            self.emit(Event::ValidationMessage(message));
        }

        let period = Duration::from_secs_f64(1.0 / self.config.engine.tick_hz.max(1) as f64);
        let mut next_deadline = Instant::now() + period;

        while !self.stop.load(Ordering::SeqCst) {
            if !self.process_commands() {
                break;
            }
            self.run_tick(next_deadline);

            // Cadence: sleep to the deadline, rebase instead of accumulating
            // drift when a tick overran
            let now = Instant::now();
            if now >= next_deadline {
                next_deadline = now + period;
            } else {
                std::thread::sleep(next_deadline - now);
                next_deadline += period;
            }
        }

        self.shutdown();
        Ok(())
    }

    /// One tick of the perception chain
    fn run_tick(&mut self, deadline: Instant) {
        self.tick += 1;
        self.stats.ticks += 1;

        let now = Instant::now();
        let timeout = deadline
            .saturating_duration_since(now)
            .min(DEFAULT_POLL_TIMEOUT)
            .max(Duration::from_millis(1));

        let fresh = match self.source.poll(timeout, &mut self.frame) {
            Ok(true) => {
                self.stats.frames += 1;
                true
            }
            Ok(false) | Err(SensorError::Timeout) => {
                self.stats.timeouts += 1;
                self.stats.record(FaultKind::FrameTimeout);
                if self.stats.timeouts % TIMEOUT_LOG_EVERY == 1 {
                    warn!(timeouts = self.stats.timeouts, "Depth frames not arriving");
                }
                false
            }
            Err(SensorError::Malformed(msg)) => {
                self.stats.malformed += 1;
                self.stats.record(FaultKind::FrameMalformed);
                warn!(error = %msg, "Dropped malformed frame");
                self.emit(Event::Fault(FaultKind::FrameMalformed));
                false
            }
            Err(e @ SensorError::Unavailable(_)) => {
                // Recoverable at runtime: keep ticking on stale data and
                // let the operator decide about restarting
                self.stats.record(FaultKind::SensorUnavailable);
                warn!(error = %e, "Depth source unavailable, continuing degraded");
                self.emit(Event::Fault(FaultKind::SensorUnavailable));
                false
            }
        };

        if !fresh {
            self.emit(Event::Heartbeat { tick: self.tick });
            self.advance_calibrator(None);
            return;
        }

        self.converter.convert(&mut self.frame);

        let ground = self.mapper.project(&self.frame);
        if !ground.is_empty() {
            self.last_ground.clear();
            self.last_ground.extend_from_slice(ground);
        }
        let position = self.localizer.locate(ground);

        let raw = position.and_then(|p| self.grid.position_to_cell(p));
        if let Some(transition) = self.filter.update(raw) {
            self.apply_transition(transition);
        }
        self.flush_dmx();

        self.emit(Event::PositionUpdated {
            position,
            tick: self.tick,
        });
        self.advance_calibrator(position);

        let dropped = self.audio.drain_exhausted();
        if dropped > 0 {
            warn!(dropped, "Audio note-ons dropped, all voices busy");
            self.stats.record(FaultKind::VoiceExhausted);
            self.emit(Event::Fault(FaultKind::VoiceExhausted));
        }
    }

    /// Issue actuator commands for a stable-cell change. A handover sends
    /// the outgoing note-off before the incoming note-on.
    fn apply_transition(&mut self, transition: Transition) {
        let (previous, current) = match transition {
            Transition::Activated(cell) => {
                self.note_on(cell);
                (None, Some(cell))
            }
            Transition::Deactivated(cell) => {
                self.note_off(cell);
                (Some(cell), None)
            }
            Transition::Handover { from, to } => {
                self.note_off(from);
                self.note_on(to);
                (Some(from), Some(to))
            }
        };
        info!(?previous, ?current, "Active cell changed");
        self.emit(Event::ActiveCellChanged { previous, current });
    }

    fn note_on(&mut self, cell: Cell) {
        let Some(config) = self.registry.get(cell) else {
            return;
        };
        if !config.active {
            debug!(cell = %cell, "Cell inactive, activation suppressed");
            return;
        }

        let pan = self.grid.pan_for(cell);
        if let Err(e) = self
            .audio
            .play_for_cell(cell, &config.sample_path, config.volume, pan)
        {
            warn!(cell = %cell, error = %e, "Note-on failed");
        }

        // Accent color unless the cell has a color of its own
        let color = if config.dmx.color == (255, 255, 255) {
            DMX_ACCENT_COLOR
        } else {
            config.dmx.color
        };
        Self::write_fixture(&self.dmx, &config.dmx, Some(color));
    }

    fn note_off(&mut self, cell: Cell) {
        self.audio.release_cell(cell);
        if let Some(config) = self.registry.get(cell) {
            Self::write_fixture(&self.dmx, &config.dmx, None);
        }
    }

    /// Write a fixture's span: RGB into the first three channels, zeroes
    /// across the rest; `None` darkens the whole span
    fn write_fixture(dmx: &DmxEngine, fixture: &DmxFixture, color: Option<(u8, u8, u8)>) {
        let mut values = [0u8; DMX_CHANNELS_MAX as usize];
        let span = fixture.channel_count.min(DMX_CHANNELS_MAX) as usize;
        if let Some((r, g, b)) = color {
            let rgb = [r, g, b];
            values[..span.min(3)].copy_from_slice(&rgb[..span.min(3)]);
        }
        dmx.set_channels(fixture.address, &values[..span]);
    }

    fn flush_dmx(&mut self) {
        if self.dmx.flush().is_err() {
            self.stats.record(FaultKind::DmxTransport);
            self.emit(Event::Fault(FaultKind::DmxTransport));
        }
    }

    fn advance_calibrator(&mut self, position: Option<Position>) {
        if !self.calibrator.is_running() {
            return;
        }
        let now = Instant::now();
        let phase_before = self.calibrator.phase(now);

        match self.calibrator.advance(now, position, &self.last_ground) {
            Some(CalibrationResult::Committed { offset, observed }) => {
                self.mapper.set_offset(offset);
                self.config.set_calibration(offset);
                self.config.absorb_registry(&self.registry);
                if let Err(e) = self.store.save(&self.config) {
                    warn!(error = %e, "Calibration computed but not persisted");
                }
                info!(
                    dx = offset.dx,
                    dy = offset.dy,
                    observed_x = observed.x,
                    observed_y = observed.y,
                    "Calibration committed"
                );
                self.emit(Event::CalibrationCommitted { offset });
                self.emit(Event::CalibrationState(CalibrationPhase::Idle));
            }
            Some(CalibrationResult::NoData) => {
                self.stats.record(FaultKind::CalibrationNoData);
                self.emit(Event::Fault(FaultKind::CalibrationNoData));
                self.emit(Event::CalibrationState(CalibrationPhase::Idle));
            }
            None => {
                let phase_after = self.calibrator.phase(now);
                if phase_after != phase_before {
                    self.emit(Event::CalibrationState(phase_after));
                }
            }
        }
    }

    /// Drain queued commands; false means Stop arrived
    fn process_commands(&mut self) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            debug!(?command, "Engine command");
            match command {
                Command::Stop => return false,
                Command::ReloadConfig => self.reload_config(),
                Command::RebuildGrid {
                    width_m,
                    depth_m,
                    rows,
                    cols,
                    keep_existing,
                } => self.rebuild_grid(width_m, depth_m, rows, cols, keep_existing),
                Command::SetCell { cell, config } => self.set_cell(cell, config),
                Command::StartCalibration => self.start_calibration(),
                Command::TestCell { cell } => {
                    if let Some(transition) = self.filter.force(Some(cell)) {
                        self.apply_transition(transition);
                        self.flush_dmx();
                    }
                }
                Command::Blackout => {
                    if self.dmx.blackout().is_err() {
                        self.stats.record(FaultKind::DmxTransport);
                        self.emit(Event::Fault(FaultKind::DmxTransport));
                    }
                }
            }
        }
        true
    }

    fn reload_config(&mut self) {
        match self.store.load_or_default() {
            Ok(config) => {
                info!("Configuration reloaded");
                self.apply_config(config);
            }
            Err(e) => {
                warn!(error = %e, "Reload failed, keeping the running configuration");
                self.emit(Event::ValidationMessage(e.to_string()));
            }
        }
    }

    /// Rebuild every stage from a fresh document. The active cell is
    /// retired first so no voice or fixture survives a geometry change.
    fn apply_config(&mut self, config: Config) {
        if let Some(transition) = self.filter.force(None) {
            self.apply_transition(transition);
            self.flush_dmx();
        }

        let validated = config.validated_room();
        if !validated.message.is_empty() {
            warn!(message = %validated.message, "Room/grid configuration corrected");
            self.emit(Event::ValidationMessage(validated.message.clone()));
        }
        let room = validated.room();

        match GridModel::new(room) {
            Ok(grid) => self.grid = grid,
            Err(e) => {
                // Validation makes this unreachable; refuse the document
                // rather than run with broken geometry
                warn!(error = %e, "Rejecting configuration with invalid geometry");
                self.stats.record(FaultKind::ConfigInvalid);
                return;
            }
        }

        self.registry = config.registry(room);
        self.mapper = SpatialMapper::new(
            CameraIntrinsics::default(),
            config.pose(),
            config.camera.calibration_offset,
            room,
            config.sensor.min_depth_m,
            config.sensor.max_depth_m,
        );
        if let Some(props) = self.props {
            self.mapper.prepare(props.width, props.height);
        }
        self.localizer = Localizer::new(config.engine.near_band_filter);
        self.converter = FrameConverter::new(config.sensor.shift_bits, config.sensor.smoothing);
        self.filter.reconfigure(
            room.rows,
            room.cols,
            config.engine.activate_n,
            config.engine.deactivate_n,
        );
        self.config = config;
        self.preload_samples();
    }

    fn rebuild_grid(
        &mut self,
        width_m: f32,
        depth_m: f32,
        rows: usize,
        cols: usize,
        keep_existing: bool,
    ) {
        let validated = validate_room_and_matrix(width_m, depth_m, cols, rows);
        if !validated.message.is_empty() {
            warn!(message = %validated.message, "Requested grid corrected");
            self.emit(Event::ValidationMessage(validated.message.clone()));
        }
        let room = validated.room();

        if let Some(transition) = self.filter.force(None) {
            self.apply_transition(transition);
            self.flush_dmx();
        }

        let Ok(grid) = GridModel::new(room) else {
            self.stats.record(FaultKind::ConfigInvalid);
            return;
        };
        self.grid = grid;
        self.registry.rebuild(room, keep_existing);
        self.mapper.set_room(room);
        self.filter.reconfigure(
            room.rows,
            room.cols,
            self.config.engine.activate_n,
            self.config.engine.deactivate_n,
        );

        self.config.absorb_registry(&self.registry);
        if let Err(e) = self.store.save(&self.config) {
            warn!(error = %e, "Grid rebuilt but not persisted");
        }
        info!(rows = room.rows, cols = room.cols, keep_existing, "Grid rebuilt");
    }

    fn set_cell(&mut self, cell: Cell, config: CellConfig) {
        let sample_path = config.sample_path.clone();
        match self.registry.set(cell, config) {
            Ok(()) => {
                if let Err(e) = self.audio.preload(&sample_path) {
                    warn!(cell = %cell, error = %e, "Cell sample not loadable");
                }
                self.config.absorb_registry(&self.registry);
                if let Err(e) = self.store.save(&self.config) {
                    warn!(error = %e, "Cell updated but not persisted");
                }
            }
            Err(e) => {
                warn!(cell = %cell, error = %e, "Cell update rejected");
                self.stats.record(FaultKind::ConfigInvalid);
                self.emit(Event::ValidationMessage(e.to_string()));
            }
        }
    }

    fn start_calibration(&mut self) {
        let room = *self.grid.room();
        if room.rows < 2 || room.cols < 3 {
            let message =
                "Grid too small for calibration: the target spot needs at least 2 rows and 3 columns.";
            warn!("{}", message);
            self.emit(Event::ValidationMessage(message.to_string()));
            return;
        }
        let target = self.grid.midpoint_between(Cell::new(1, 1), Cell::new(1, 2));
        match self.calibrator.start(target, Instant::now()) {
            Ok(()) => self.emit(Event::CalibrationState(
                self.calibrator.phase(Instant::now()),
            )),
            Err(e) => warn!(error = %e, "Calibration not started"),
        }
    }

    fn preload_samples(&mut self) {
        let paths: Vec<String> = self
            .registry
            .iter()
            .map(|(_, config)| config.sample_path.clone())
            .filter(|path| !path.is_empty())
            .collect();
        for path in paths {
            if let Err(e) = self.audio.preload(&path) {
                warn!(path = %path, error = %e, "Sample preload failed");
            }
        }
    }

    /// Graceful teardown: fade the active voice, silence, blackout, stop
    /// the stream
    fn shutdown(&mut self) {
        info!("Engine stopping");
        if let Some(active) = self.filter.active_cell() {
            self.note_off(active);
        }
        if self.audio.is_active() {
            // Give the release envelope room to drain before hard silence
            std::thread::sleep(Duration::from_millis(
                crate::constants::AUDIO_RELEASE_MS as u64 + 30,
            ));
        }
        self.audio.stop_all();
        if self.dmx.blackout().is_err() {
            warn!("Final blackout not delivered");
        }
        self.source.stop();

        info!(
            ticks = self.stats.ticks,
            frames = self.stats.frames,
            timeouts = self.stats.timeouts,
            malformed = self.stats.malformed,
            dropped_events = self.stats.dropped_events,
            "Engine stopped"
        );
    }

    /// Publish an event, dropping the oldest queued one when the shell is
    /// not keeping up
    fn emit(&mut self, event: Event) {
        if let Err(TrySendError::Full(event)) = self.events_tx.try_send(event) {
            let _ = self.events_drain.try_recv();
            self.stats.dropped_events += 1;
            let _ = self.events_tx.try_send(event);
        }
    }
}
