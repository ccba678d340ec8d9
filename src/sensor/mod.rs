// SPDX-License-Identifier: GPL-3.0-only

//! Depth acquisition
//!
//! A [`DepthSource`] produces validated 16-bit depth frames on demand. One
//! concrete adapter exists per capture path; picking the adapter happens once
//! at startup instead of probing method names at runtime. `poll` writes into
//! a caller-owned [`DepthMap`] so the hot path never allocates per frame.

mod convert;
mod synthetic;
#[cfg(target_os = "linux")]
mod v4l2;

pub use convert::FrameConverter;
pub use synthetic::SyntheticSource;
#[cfg(target_os = "linux")]
pub use v4l2::V4l2DepthSource;

use crate::errors::SensorError;
use std::time::{Duration, Instant};

/// Stream properties negotiated at start
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorProperties {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Nominal stream rate
    pub fps: u32,
    /// Millimetres per raw unit after shift correction (1.0 for mm streams)
    pub scale_mm_per_unit: f32,
}

impl SensorProperties {
    /// Pixels per frame
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Expected raw buffer size for a 16-bit stream
    pub fn frame_bytes(&self) -> usize {
        self.pixel_count() * 2
    }
}

/// Dense depth frame in raw sensor units (millimetres after conversion)
///
/// 0 denotes "no measurement". Width and height are stable for the lifetime
/// of a stream; the backing buffer is reused across ticks.
#[derive(Debug, Clone)]
pub struct DepthMap {
    width: u32,
    height: u32,
    data: Vec<u16>,
    /// Capture instant of the frame currently in the buffer
    pub timestamp: Instant,
    /// Monotonic frame counter from the source
    pub sequence: u64,
}

impl DepthMap {
    /// Empty map; `prepare` sizes it before first use
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            data: Vec::new(),
            timestamp: Instant::now(),
            sequence: 0,
        }
    }

    /// Size the buffer for a stream, preserving the allocation when possible
    pub fn prepare(&mut self, props: &SensorProperties) {
        self.width = props.width;
        self.height = props.height;
        self.data.resize(props.pixel_count(), 0);
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u16] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u16] {
        &mut self.data
    }

    /// Depth at a pixel, row-major
    pub fn at(&self, u: u32, v: u32) -> u16 {
        self.data[(v * self.width + u) as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copy a raw little-endian 16-bit buffer in, validating its size.
    ///
    /// This is the single entry point every adapter uses, so the W*H*2
    /// invariant is checked in exactly one place.
    pub fn fill_from_raw(&mut self, raw: &[u8], sequence: u64) -> Result<(), SensorError> {
        let expected = self.data.len() * 2;
        if raw.len() != expected {
            return Err(SensorError::Malformed(format!(
                "buffer is {} bytes, stream needs {}",
                raw.len(),
                expected
            )));
        }
        // Y16 is little-endian on every capture path we support; on LE hosts
        // this lowers to a straight memcpy via bytemuck.
        if cfg!(target_endian = "little") {
            self.data
                .copy_from_slice(bytemuck::cast_slice::<u8, u16>(raw));
        } else {
            for (dst, src) in self.data.iter_mut().zip(raw.chunks_exact(2)) {
                *dst = u16::from_le_bytes([src[0], src[1]]);
            }
        }
        self.sequence = sequence;
        self.timestamp = Instant::now();
        Ok(())
    }
}

impl Default for DepthMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Abstract depth acquisition
///
/// `poll` is non-blocking beyond `timeout`: it returns `Ok(false)` when no
/// frame became ready (the caller counts that as a transient timeout),
/// `Ok(true)` after writing a validated frame into `frame`, and
/// `Err(Unavailable)` when the device is gone. Repeated timeouts are a
/// degraded-sensor condition the operating shell decides about; the source
/// itself never restarts the stream.
pub trait DepthSource: Send {
    /// Open the device and negotiate the stream
    fn start(&mut self) -> Result<SensorProperties, SensorError>;

    /// Fetch the next frame into `frame` if one is ready within `timeout`
    fn poll(&mut self, timeout: Duration, frame: &mut DepthMap) -> Result<bool, SensorError>;

    /// Stop the stream and release the device
    fn stop(&mut self);

    /// Properties negotiated by `start`, if started
    fn properties(&self) -> Option<SensorProperties>;

    /// Adapter name for logging
    fn name(&self) -> &'static str;
}
