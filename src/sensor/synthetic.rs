// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic depth source
//!
//! Produces deterministic frames with a person-sized blob drifting across
//! the field of view. Stands in for real hardware in tests, demos and
//! `run --source synthetic`; plays the role the file-backed preview source
//! plays for the camera preview.

use super::{DepthMap, DepthSource, SensorProperties};
use crate::errors::SensorError;
use std::time::{Duration, Instant};

/// Deterministic walking-person frame generator
pub struct SyntheticSource {
    props: SensorProperties,
    shift_bits: u8,
    started: bool,
    sequence: u64,
    next_due: Instant,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32, shift_bits: u8) -> Self {
        Self {
            props: SensorProperties {
                width,
                height,
                fps: fps.max(1),
                scale_mm_per_unit: 1.0,
            },
            shift_bits,
            started: false,
            sequence: 0,
            next_due: Instant::now(),
        }
    }

    /// Paint one frame: background holes, a floor band, and the person blob
    fn paint(&self, frame: &mut DepthMap) {
        let width = self.props.width;
        let height = self.props.height;
        let t = self.sequence as f32 / self.props.fps as f32;

        // Person drifts left-right across the middle of the image and
        // breathes in depth between ~1.5 m and ~3.5 m.
        let sweep = (t * 0.4).sin();
        let person_u = (width as f32 / 2.0) + sweep * (width as f32 / 4.0);
        let person_v = height as f32 * 0.55;
        let person_depth_mm = 2500.0 + (t * 0.23).cos() * 1000.0;
        let radius = width as f32 * 0.07;

        for v in 0..height {
            for u in 0..width {
                let du = u as f32 - person_u;
                let dv = (v as f32 - person_v) / 2.0; // person is taller than wide
                let mm = if (du * du + dv * dv).sqrt() < radius {
                    person_depth_mm as u16
                } else if v > height * 3 / 4 {
                    // floor band in the lower quarter
                    4000 + (v as u16 % 16)
                } else {
                    0 // no measurement
                };
                frame.data_mut()[(v * width + u) as usize] = mm << self.shift_bits;
            }
        }
    }
}

impl DepthSource for SyntheticSource {
    fn start(&mut self) -> Result<SensorProperties, SensorError> {
        self.started = true;
        self.sequence = 0;
        self.next_due = Instant::now();
        tracing::info!(
            width = self.props.width,
            height = self.props.height,
            fps = self.props.fps,
            "Synthetic depth source started"
        );
        Ok(self.props)
    }

    fn poll(&mut self, timeout: Duration, frame: &mut DepthMap) -> Result<bool, SensorError> {
        if !self.started {
            return Err(SensorError::Unavailable("source not started".into()));
        }

        let now = Instant::now();
        if self.next_due > now {
            let wait = self.next_due - now;
            if wait > timeout {
                // Frame not due inside the budget: behave like a real sensor
                // with nothing ready yet.
                std::thread::sleep(timeout);
                return Ok(false);
            }
            std::thread::sleep(wait);
        }

        self.paint(frame);
        frame.sequence = self.sequence;
        frame.timestamp = Instant::now();
        self.sequence += 1;
        self.next_due += Duration::from_secs(1) / self.props.fps;
        Ok(true)
    }

    fn stop(&mut self) {
        self.started = false;
        tracing::info!("Synthetic depth source stopped");
    }

    fn properties(&self) -> Option<SensorProperties> {
        self.started.then_some(self.props)
    }

    fn name(&self) -> &'static str {
        "synthetic"
    }
}
