// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end engine tests
//!
//! A scripted depth source walks a synthetic person on and off a cell while
//! a recording transport captures every DMX frame. Audio runs in disabled
//! mode (no sound card on CI).

use soundroom::audio::AudioEngine;
use soundroom::config::{Config, ConfigStore};
use soundroom::dmx::DmxTransport;
use soundroom::engine::{Command, Engine, Event};
use soundroom::errors::{DmxError, SensorError};
use soundroom::grid::Cell;
use soundroom::sensor::{DepthMap, DepthSource, SensorProperties};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Depth source that replays a script of person placements.
///
/// Each script entry is the person's pixel position and depth (mm), or None
/// for an empty room. The final entry repeats forever.
struct ScriptedSource {
    script: Vec<Option<(u32, u32, u16)>>,
    index: usize,
    started: bool,
}

impl ScriptedSource {
    fn new(script: Vec<Option<(u32, u32, u16)>>) -> Self {
        Self {
            script,
            index: 0,
            started: false,
        }
    }

    fn props() -> SensorProperties {
        SensorProperties {
            width: 640,
            height: 400,
            fps: 30,
            scale_mm_per_unit: 1.0,
        }
    }
}

impl DepthSource for ScriptedSource {
    fn start(&mut self) -> Result<SensorProperties, SensorError> {
        self.started = true;
        Ok(Self::props())
    }

    fn poll(&mut self, _timeout: Duration, frame: &mut DepthMap) -> Result<bool, SensorError> {
        if !self.started {
            return Err(SensorError::Unavailable("not started".into()));
        }
        // Past the end of the script the room stays empty
        let entry = self.script.get(self.index).copied().flatten();
        if self.index < self.script.len() {
            self.index += 1;
        }

        frame.data_mut().fill(0);
        if let Some((u0, v0, depth_mm)) = entry {
            // Person-sized blob, comfortably above the 20-point minimum
            for dv in 0..17u32 {
                for du in 0..17u32 {
                    let u = u0 + du - 8;
                    let v = v0 + dv - 8;
                    let index = (v * 640 + u) as usize;
                    frame.data_mut()[index] = depth_mm;
                }
            }
        }
        frame.sequence = self.index as u64;
        Ok(true)
    }

    fn stop(&mut self) {
        self.started = false;
    }

    fn properties(&self) -> Option<SensorProperties> {
        self.started.then(Self::props)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Transport capturing every transmitted universe frame
struct RecordingTransport {
    frames: Arc<Mutex<Vec<[u8; 512]>>>,
}

impl DmxTransport for RecordingTransport {
    fn send(&mut self, _universe: u8, data: &[u8; 512]) -> Result<(), DmxError> {
        self.frames.lock().unwrap().push(*data);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// A level-camera test document with a fixture on cell (1,0) at address 10
fn test_store(tag: &str) -> ConfigStore {
    let dir = std::env::temp_dir().join(format!("soundroom-it-{}-{}", tag, std::process::id()));
    let store = ConfigStore::at(dir.join("config.json"));

    let mut config = Config::default();
    config.camera.angle_deg = 0.0;
    config.sensor.shift_bits = 0;
    config.engine.tick_hz = 30;

    let room = config.validated_room().room();
    let mut registry = config.registry(room);
    let mut cell = registry.clone_cell(Cell::new(1, 0)).unwrap();
    cell.dmx.address = 10;
    registry.set(Cell::new(1, 0), cell).unwrap();
    config.absorb_registry(&registry);

    store.save(&config).unwrap();
    store
}

#[test]
fn test_activation_lifecycle_end_to_end() {
    // Person at the principal point, 1.5 m out: room position (0.3, 1.5),
    // which is cell (1,0) of the default 6x6 grid. Three sightings
    // activate, six absences deactivate.
    let person = Some((320u32, 200u32, 1500u16));
    let mut script = vec![person; 3];
    script.extend(vec![None; 10]);

    let frames = Arc::new(Mutex::new(Vec::new()));
    let transport = RecordingTransport {
        frames: Arc::clone(&frames),
    };

    let (mut engine, handle) = Engine::new(
        test_store("lifecycle"),
        Box::new(ScriptedSource::new(script)),
        Box::new(transport),
        AudioEngine::disabled(),
    )
    .unwrap();

    let transitions: Arc<Mutex<Vec<(Option<Cell>, Option<Cell>)>>> =
        Arc::new(Mutex::new(Vec::new()));
    let seen_deactivation = Arc::new(AtomicBool::new(false));

    let watcher_transitions = Arc::clone(&transitions);
    let watcher_done = Arc::clone(&seen_deactivation);
    let watcher_handle = handle.clone();
    let watcher = std::thread::spawn(move || {
        let events = watcher_handle.events().clone();
        while let Ok(event) = events.recv() {
            if let Event::ActiveCellChanged { previous, current } = event {
                watcher_transitions.lock().unwrap().push((previous, current));
                if current.is_none() {
                    watcher_done.store(true, Ordering::SeqCst);
                    watcher_handle.stop();
                }
            }
        }
    });

    // Safety net so a broken engine cannot hang the suite
    let safety_handle = handle.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(15));
        safety_handle.stop();
    });

    engine.run().unwrap();
    let stats = engine.stats().clone();
    drop(engine);
    let _ = watcher.join();

    assert!(
        seen_deactivation.load(Ordering::SeqCst),
        "engine never deactivated; stats: {:?}",
        stats
    );

    let transitions = transitions.lock().unwrap();
    let cell = Cell::new(1, 0);
    assert_eq!(transitions[0], (None, Some(cell)), "activation first");
    assert!(
        transitions.contains(&(Some(cell), None)),
        "deactivation expected, got {:?}",
        *transitions
    );

    // DMX: the accent color went out on activation, zeros on deactivation
    let frames = frames.lock().unwrap();
    assert!(frames.len() >= 2, "expected at least two universe sends");
    let accent = frames
        .iter()
        .find(|f| f[9] != 0)
        .expect("no frame carried the activation color");
    assert_eq!(&accent[9..12], &[255, 50, 0]);
    let last = frames.last().unwrap();
    assert_eq!(&last[9..12], &[0, 0, 0]);

    assert!(stats.frames >= 9, "stats: {:?}", stats);
}

#[test]
fn test_test_cell_command_bypasses_filter() {
    // No person in the frames at all; the forced cell still activates once
    let script = vec![None; 12];

    let frames = Arc::new(Mutex::new(Vec::new()));
    let transport = RecordingTransport {
        frames: Arc::clone(&frames),
    };

    let (mut engine, handle) = Engine::new(
        test_store("testcell"),
        Box::new(ScriptedSource::new(script)),
        Box::new(transport),
        AudioEngine::disabled(),
    )
    .unwrap();

    handle.send(Command::TestCell {
        cell: Cell::new(1, 0),
    });

    let watcher_handle = handle.clone();
    let watcher = std::thread::spawn(move || {
        let events = watcher_handle.events().clone();
        while let Ok(event) = events.recv() {
            if let Event::ActiveCellChanged { current: None, .. } = event {
                watcher_handle.stop();
            }
        }
    });

    let safety_handle = handle.clone();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(15));
        safety_handle.stop();
    });

    engine.run().unwrap();
    drop(engine);
    let _ = watcher.join();

    let frames = frames.lock().unwrap();
    let accent = frames
        .iter()
        .find(|f| f[9] != 0)
        .expect("forced activation never reached the transport");
    assert_eq!(&accent[9..12], &[255, 50, 0]);
    // The forced cell retired naturally: the final frame is dark
    assert_eq!(&frames.last().unwrap()[9..12], &[0, 0, 0]);
}
