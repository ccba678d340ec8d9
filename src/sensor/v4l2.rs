// SPDX-License-Identifier: GPL-3.0-only

//! Direct V4L2 depth capture for Y16 streams
//!
//! GStreamer has no Y16 depth support worth speaking of, so we capture raw
//! bytes straight from the sensor with the v4l crate. A dedicated capture
//! thread owns the device; `poll` drains a bounded channel so the engine
//! tick never blocks past its timeout.

use super::{DepthMap, DepthSource, SensorProperties};
use crate::errors::SensorError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

/// Capture thread exits after this many consecutive stream errors
const MAX_CONSECUTIVE_CAPTURE_ERRORS: u32 = 30;

/// Depth source reading Y16 frames from a V4L2 device node
pub struct V4l2DepthSource {
    device_path: String,
    requested: SensorProperties,
    negotiated: Option<SensorProperties>,
    running: Arc<AtomicBool>,
    frames: Option<Receiver<(Vec<u8>, u64)>>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl V4l2DepthSource {
    /// Create a source for a device node (e.g. /dev/video0)
    pub fn new(device_path: &str, width: u32, height: u32, fps: u32) -> Self {
        Self {
            device_path: device_path.to_string(),
            requested: SensorProperties {
                width,
                height,
                fps,
                scale_mm_per_unit: 1.0,
            },
            negotiated: None,
            running: Arc::new(AtomicBool::new(false)),
            frames: None,
            thread_handle: None,
        }
    }

    /// List device nodes that advertise a Y16 format
    pub fn enumerate() -> Vec<String> {
        let mut found = Vec::new();
        for index in 0..16 {
            let path = format!("/dev/video{}", index);
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(formats) = dev.enum_formats() else {
                continue;
            };
            if formats
                .iter()
                .any(|f| f.fourcc == v4l::FourCC::new(b"Y16 "))
            {
                found.push(path);
            }
        }
        found
    }
}

impl DepthSource for V4l2DepthSource {
    fn start(&mut self) -> Result<SensorProperties, SensorError> {
        // Probe the device once on the calling thread so startup failures
        // surface as Unavailable instead of a dead capture thread.
        let negotiated = negotiate_format(&self.device_path, &self.requested)?;
        self.negotiated = Some(negotiated);

        info!(
            device_path = %self.device_path,
            width = negotiated.width,
            height = negotiated.height,
            "Starting V4L2 depth capture"
        );

        let (sender, receiver) = mpsc::sync_channel(2);
        self.frames = Some(receiver);
        self.running.store(true, Ordering::SeqCst);

        let path = self.device_path.clone();
        let running = Arc::clone(&self.running);
        let handle = std::thread::spawn(move || {
            if let Err(e) = capture_loop(&path, negotiated, sender, running) {
                warn!(error = %e, "Depth capture loop failed");
            }
        });
        self.thread_handle = Some(handle);

        Ok(negotiated)
    }

    fn poll(&mut self, timeout: Duration, frame: &mut DepthMap) -> Result<bool, SensorError> {
        let Some(frames) = self.frames.as_ref() else {
            return Err(SensorError::Unavailable("source not started".into()));
        };

        match frames.recv_timeout(timeout) {
            Ok((raw, sequence)) => {
                frame.fill_from_raw(&raw, sequence)?;
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => {
                Err(SensorError::Unavailable("capture thread exited".into()))
            }
        }
    }

    fn stop(&mut self) {
        info!("Stopping V4L2 depth capture");
        self.running.store(false, Ordering::SeqCst);
        self.frames = None;
        if let Some(handle) = self.thread_handle.take() {
            match handle.join() {
                Ok(_) => info!("Depth capture thread stopped"),
                Err(_) => warn!("Depth capture thread panicked"),
            }
        }
    }

    fn properties(&self) -> Option<SensorProperties> {
        self.negotiated
    }

    fn name(&self) -> &'static str {
        "v4l2"
    }
}

impl Drop for V4l2DepthSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // Don't wait for the thread in drop - it may already be finished
    }
}

/// Open the device and negotiate Y16 at the requested geometry
fn negotiate_format(
    device_path: &str,
    requested: &SensorProperties,
) -> Result<SensorProperties, SensorError> {
    let dev = Device::with_path(device_path).map_err(|e| {
        SensorError::Unavailable(format!("failed to open {}: {}", device_path, e))
    })?;

    let y16_fourcc = v4l::FourCC::new(b"Y16 ");
    let mut format = dev
        .format()
        .map_err(|e| SensorError::Unavailable(format!("failed to query format: {}", e)))?;
    format.width = requested.width;
    format.height = requested.height;
    format.fourcc = y16_fourcc;

    let accepted = dev
        .set_format(&format)
        .map_err(|e| SensorError::Unavailable(format!("failed to set format: {}", e)))?;

    if accepted.fourcc != y16_fourcc {
        return Err(SensorError::Unavailable(format!(
            "device refused Y16, offered {}",
            accepted.fourcc
        )));
    }
    if accepted.width != requested.width || accepted.height != requested.height {
        warn!(
            requested_width = requested.width,
            requested_height = requested.height,
            got_width = accepted.width,
            got_height = accepted.height,
            "Device adjusted the requested geometry"
        );
    }

    Ok(SensorProperties {
        width: accepted.width,
        height: accepted.height,
        fps: requested.fps,
        scale_mm_per_unit: requested.scale_mm_per_unit,
    })
}

/// Capture loop running in a separate thread
fn capture_loop(
    device_path: &str,
    props: SensorProperties,
    sender: SyncSender<(Vec<u8>, u64)>,
    running: Arc<AtomicBool>,
) -> Result<(), String> {
    let mut dev = Device::with_path(device_path)
        .map_err(|e| format!("failed to reopen {}: {}", device_path, e))?;

    let expected_size = props.frame_bytes();
    let mut stream = MmapStream::with_buffers(&mut dev, Type::VideoCapture, 4)
        .map_err(|e| format!("failed to create buffer stream: {}", e))?;

    info!(expected_size, "V4L2 depth capture stream started");

    let mut frame_num: u64 = 0;
    let mut consecutive_errors: u32 = 0;

    while running.load(Ordering::SeqCst) {
        match stream.next() {
            Ok((buf, meta)) => {
                consecutive_errors = 0;
                frame_num += 1;

                if buf.len() != expected_size {
                    if frame_num % 30 == 0 {
                        warn!(
                            frame = frame_num,
                            got = buf.len(),
                            expected = expected_size,
                            "Unexpected buffer size"
                        );
                    }
                    // Let the consumer classify it as malformed
                }

                match sender.try_send((buf.to_vec(), meta.sequence as u64)) {
                    Ok(_) => {
                        if frame_num % 60 == 0 {
                            debug!(frame = frame_num, sequence = meta.sequence, "Depth frame captured");
                        }
                    }
                    Err(TrySendError::Full(_)) => {
                        if frame_num % 30 == 0 {
                            debug!(frame = frame_num, "Depth frame dropped (channel full)");
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => break,
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(error = %e, consecutive = consecutive_errors, "Failed to capture depth frame");
                if consecutive_errors >= MAX_CONSECUTIVE_CAPTURE_ERRORS {
                    return Err(format!("device gone after {} errors", consecutive_errors));
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    info!("V4L2 depth capture loop ended");
    Ok(())
}
