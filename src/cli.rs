// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for headless operation
//!
//! This module provides command-line functionality for:
//! - Running the engine against a real or synthetic depth source
//! - Listing depth-capable devices
//! - Validating room/grid geometry
//! - Forcing a cell active for actuator checks
//! - Blacking out the DMX universe

use soundroom::audio::AudioEngine;
use soundroom::config::ConfigStore;
use soundroom::dmx::{DmxEngine, DmxTransport, NullTransport, OlaTransport};
use soundroom::engine::{Command, Engine, EngineHandle, Event};
use soundroom::errors::EngineResult;
use soundroom::grid::Cell;
use soundroom::sensor::{DepthSource, SyntheticSource};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Options for the `run` (and `calibrate`) subcommands
#[derive(Debug, Default)]
pub struct RunOptions {
    pub source: Option<String>,
    pub config: Option<PathBuf>,
    pub show_grid: bool,
    pub no_audio: bool,
    pub null_dmx: bool,
    pub calibrate: bool,
}

/// Run the engine until Ctrl-C
pub fn run(options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(options.config.as_deref())?;
    let document = store.load_or_default()?;
    let validated = document.validated_room();
    let (rows, cols) = (validated.rows, validated.cols);

    let source = pick_source(options.source.as_deref(), &document)?;
    let transport: Box<dyn DmxTransport> = if options.null_dmx {
        Box::new(NullTransport)
    } else {
        Box::new(OlaTransport::new())
    };
    let audio = open_audio(options.no_audio || !document.audio.enabled);

    let (mut engine, handle) = Engine::new(store, source, transport, audio)?;

    // Ctrl-C requests a graceful stop at the next tick boundary
    let ctrlc_handle = handle.clone();
    ctrlc::set_handler(move || {
        info!("Interrupt received, stopping");
        ctrlc_handle.stop();
    })?;

    if options.calibrate {
        handle.send(Command::StartCalibration);
    }

    let subscriber = spawn_event_printer(handle.clone(), options.show_grid, rows, cols);

    let result = engine.run();
    drop(engine); // closes the event channel so the printer exits
    let _ = subscriber.join();
    result?;
    Ok(())
}

/// List all depth-capable devices
pub fn list_devices() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(target_os = "linux")]
    {
        let devices = soundroom::sensor::V4l2DepthSource::enumerate();
        if devices.is_empty() {
            println!("No Y16-capable V4L2 devices found.");
        } else {
            println!("Depth-capable devices:");
            for device in devices {
                println!("  {}", device);
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        println!("Device enumeration is only supported on Linux (V4L2).");
    }
    println!("  synthetic (always available, --source synthetic)");
    Ok(())
}

/// Validate room dimensions against a requested grid and print the result
pub fn validate(
    width: f32,
    depth: f32,
    cols: usize,
    rows: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let validated = soundroom::validate_room_and_matrix(width, depth, cols, rows);
    println!(
        "room {:.1} x {:.1} m, grid {} x {} (rows x cols)",
        validated.width_m, validated.depth_m, validated.rows, validated.cols
    );
    if validated.message.is_empty() {
        println!("ok");
    } else {
        println!("{}", validated.message);
    }
    Ok(())
}

/// Force one cell active for `duration` seconds, bypassing the filter.
///
/// Uses the synthetic source so the check works with no sensor attached;
/// audio and DMX are the real thing unless disabled.
pub fn test_cell(
    row: usize,
    col: usize,
    duration: u64,
    config: Option<PathBuf>,
    no_audio: bool,
    null_dmx: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(config.as_deref())?;
    let document = store.load_or_default()?;

    let source: Box<dyn DepthSource> = Box::new(SyntheticSource::new(
        document.sensor.width,
        document.sensor.height,
        document.sensor.fps,
        document.sensor.shift_bits,
    ));
    let transport: Box<dyn DmxTransport> = if null_dmx {
        Box::new(NullTransport)
    } else {
        Box::new(OlaTransport::new())
    };
    let audio = open_audio(no_audio || !document.audio.enabled);

    let (mut engine, handle) = Engine::new(store, source, transport, audio)?;

    handle.send(Command::TestCell {
        cell: Cell::new(row, col),
    });

    let stop_handle = handle.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(duration));
        stop_handle.stop();
    });

    println!("Holding cell ({},{}) for {} s...", row, col, duration);
    engine.run()?;
    Ok(())
}

/// Zero the universe and flush once
pub fn blackout() -> Result<(), Box<dyn std::error::Error>> {
    let mut dmx = DmxEngine::new(0, Box::new(OlaTransport::new()));
    dmx.blackout()?;
    println!("Universe blacked out.");
    Ok(())
}

fn open_store(path: Option<&std::path::Path>) -> EngineResult<ConfigStore> {
    Ok(match path {
        Some(path) => ConfigStore::at(path),
        None => ConfigStore::default_location().map_err(soundroom::EngineError::Config)?,
    })
}

/// Start audio, or fall back to the silent engine; a machine without a
/// sound card still tracks and lights correctly
fn open_audio(disabled: bool) -> AudioEngine {
    if disabled {
        return AudioEngine::disabled();
    }
    match AudioEngine::start() {
        Ok(audio) => audio,
        Err(e) => {
            warn!(error = %e, "Audio unavailable, running silent");
            AudioEngine::disabled()
        }
    }
}

/// Pick the depth source adapter at startup
fn pick_source(
    requested: Option<&str>,
    document: &soundroom::Config,
) -> Result<Box<dyn DepthSource>, Box<dyn std::error::Error>> {
    let sensor = &document.sensor;

    match requested {
        Some("synthetic") => {
            return Ok(Box::new(SyntheticSource::new(
                sensor.width,
                sensor.height,
                sensor.fps,
                sensor.shift_bits,
            )));
        }
        Some(other) => {
            if let Some(path) = other.strip_prefix("v4l2:") {
                return v4l2_source(path, sensor);
            }
            return Err(format!(
                "unknown source '{}' (expected 'synthetic' or 'v4l2:/dev/videoN')",
                other
            )
            .into());
        }
        None => {}
    }

    // No override: the configured device, else the first Y16-capable one
    if let Some(device) = sensor.device.as_deref() {
        return v4l2_source(device, sensor);
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(device) = soundroom::sensor::V4l2DepthSource::enumerate().into_iter().next() {
            info!(device = %device, "Using first Y16-capable device");
            return v4l2_source(&device, sensor);
        }
    }

    Err("no depth device found; pass --source synthetic to run without hardware".into())
}

#[cfg(target_os = "linux")]
fn v4l2_source(
    path: &str,
    sensor: &soundroom::config::SensorSection,
) -> Result<Box<dyn DepthSource>, Box<dyn std::error::Error>> {
    Ok(Box::new(soundroom::sensor::V4l2DepthSource::new(
        path,
        sensor.width,
        sensor.height,
        sensor.fps,
    )))
}

#[cfg(not(target_os = "linux"))]
fn v4l2_source(
    path: &str,
    _sensor: &soundroom::config::SensorSection,
) -> Result<Box<dyn DepthSource>, Box<dyn std::error::Error>> {
    Err(format!("V4L2 source '{}' is only supported on Linux", path).into())
}

/// Print engine events; with `show_grid`, draw the floor on every change
fn spawn_event_printer(
    handle: EngineHandle,
    show_grid: bool,
    rows: usize,
    cols: usize,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let events = handle.events().clone();
        while let Ok(event) = events.recv() {
            match event {
                Event::ActiveCellChanged { previous, current } => {
                    match (previous, current) {
                        (_, Some(cell)) => println!("active: {}", cell),
                        (Some(cell), None) => println!("released: {}", cell),
                        _ => {}
                    }
                    if show_grid {
                        print_grid(rows, cols, current.map(|c| (c.row, c.col)));
                    }
                }
                Event::ValidationMessage(message) => println!("config: {}", message),
                Event::CalibrationState(phase) => println!("calibration: {:?}", phase),
                Event::CalibrationCommitted { offset } => {
                    println!("calibration: offset ({:+.2}, {:+.2}) committed", offset.dx, offset.dy);
                }
                // Positions and heartbeats are high-rate; the log has them
                Event::PositionUpdated { .. } | Event::Heartbeat { .. } | Event::Fault(_) => {}
            }
        }
    })
}

fn print_grid(rows: usize, cols: usize, active: Option<(usize, usize)>) {
    for row in 0..rows {
        let mut line = String::with_capacity(cols * 2);
        for col in 0..cols {
            line.push(if active == Some((row, col)) { '#' } else { '.' });
            line.push(' ');
        }
        println!("  {}", line);
    }
    println!();
}
