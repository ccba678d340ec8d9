// SPDX-License-Identifier: GPL-3.0-only

//! Raw depth correction
//!
//! Gemini-class sensors ship Y16 frames with the depth value left-shifted
//! (usually by 2). The converter undoes the shift and can run one bounded
//! smoothing pass. Pure per frame; no state carries over.

use super::DepthMap;

/// Corrects raw Y16 encoding into a uniform millimetre depth map
#[derive(Debug)]
pub struct FrameConverter {
    shift_bits: u8,
    smoothing: bool,
    /// Scratch row ring for the smoothing pass, reused across frames
    scratch: Vec<u16>,
}

impl FrameConverter {
    pub fn new(shift_bits: u8, smoothing: bool) -> Self {
        Self {
            shift_bits,
            smoothing,
            scratch: Vec::new(),
        }
    }

    pub fn shift_bits(&self) -> u8 {
        self.shift_bits
    }

    /// Correct a frame in place: undo the encoding shift, then optionally
    /// smooth. Zero stays zero ("no measurement").
    pub fn convert(&mut self, frame: &mut DepthMap) {
        if self.shift_bits > 0 {
            let shift = self.shift_bits as u32;
            for value in frame.data_mut() {
                *value >>= shift;
            }
        }

        if self.smoothing {
            self.smooth(frame);
        }
    }

    /// One 3x3 box pass over measured pixels.
    ///
    /// Zeroes are holes, not readings: they neither contribute to a
    /// neighbourhood mean nor get filled in. Cost is a single pass with a
    /// two-row scratch ring, bounded by the frame size.
    fn smooth(&mut self, frame: &mut DepthMap) {
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        if width < 3 || height < 3 {
            return;
        }

        // scratch holds the ORIGINAL values of rows v-1 and v while row v is
        // written in place, so smoothed pixels never feed their neighbours.
        self.scratch.resize(width * 2, 0);
        let data = frame.data_mut();
        self.scratch[..width].copy_from_slice(&data[..width]);
        self.scratch[width..].copy_from_slice(&data[width..width * 2]);

        for v in 1..height - 1 {
            let below_start = (v + 1) * width;

            for u in 1..width - 1 {
                let center = self.scratch[width + u];
                if center == 0 {
                    continue;
                }
                let mut sum = 0u32;
                let mut count = 0u32;
                for value in [
                    self.scratch[u - 1],
                    self.scratch[u],
                    self.scratch[u + 1],
                    self.scratch[width + u - 1],
                    center,
                    self.scratch[width + u + 1],
                    data[below_start + u - 1],
                    data[below_start + u],
                    data[below_start + u + 1],
                ] {
                    if value > 0 {
                        sum += value as u32;
                        count += 1;
                    }
                }
                data[v * width + u] = (sum / count) as u16;
            }

            // Rotate: row v's originals become "above", row v+1 becomes "current"
            self.scratch.copy_within(width.., 0);
            self.scratch[width..].copy_from_slice(&data[below_start..below_start + width]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SensorProperties;

    fn map_from(values: &[u16], width: u32, height: u32) -> DepthMap {
        let mut map = DepthMap::new();
        map.prepare(&SensorProperties {
            width,
            height,
            fps: 30,
            scale_mm_per_unit: 1.0,
        });
        map.data_mut().copy_from_slice(values);
        map
    }

    #[test]
    fn test_shift_correction() {
        let mut converter = FrameConverter::new(2, false);
        let mut frame = map_from(&[4000, 0, 8000, 65535], 2, 2);
        converter.convert(&mut frame);
        assert_eq!(frame.data(), &[1000, 0, 2000, 16383]);
    }

    #[test]
    fn test_zero_shift_is_identity() {
        let mut converter = FrameConverter::new(0, false);
        let mut frame = map_from(&[123, 456], 2, 1);
        converter.convert(&mut frame);
        assert_eq!(frame.data(), &[123, 456]);
    }

    #[test]
    fn test_smoothing_preserves_holes() {
        let mut converter = FrameConverter::new(0, true);
        let mut values = vec![1000u16; 9];
        values[4] = 0; // hole in the middle
        let mut frame = map_from(&values, 3, 3);
        converter.convert(&mut frame);
        // The hole stays a hole
        assert_eq!(frame.at(1, 1), 0);
        // Edges are untouched
        assert_eq!(frame.at(0, 0), 1000);
    }

    #[test]
    fn test_smoothing_averages_neighbours() {
        let mut converter = FrameConverter::new(0, true);
        let mut values = vec![1000u16; 9];
        values[4] = 1900; // outlier center
        let mut frame = map_from(&values, 3, 3);
        converter.convert(&mut frame);
        // (8 * 1000 + 1900) / 9 = 1100
        assert_eq!(frame.at(1, 1), 1100);
    }
}
