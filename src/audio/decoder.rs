// SPDX-License-Identifier: GPL-3.0-only

//! Sample decoding
//!
//! Samples are decoded once with Symphonia into interleaved stereo f32 at
//! their source rate and cached by the engine. Mono files are duplicated to
//! both channels; anything wider than stereo keeps its first two channels.

use crate::errors::AudioError;
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

/// A decoded sample: interleaved stereo frames at the source rate
#[derive(Debug)]
pub struct Sample {
    /// Interleaved L/R pairs
    pub frames: Vec<f32>,
    /// Source sample rate in Hz
    pub rate: u32,
}

impl Sample {
    /// Number of stereo frames
    pub fn frame_count(&self) -> usize {
        self.frames.len() / 2
    }

    /// Build directly from interleaved stereo data (tests, tone generators)
    pub fn from_stereo(frames: Vec<f32>, rate: u32) -> Self {
        Self { frames, rate }
    }
}

/// Decode an audio file into a [`Sample`]
pub fn decode_file(path: &Path) -> Result<Sample, AudioError> {
    let file = File::open(path)
        .map_err(|e| AudioError::Decode(format!("{}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::Decode(format!("{}: probe failed: {}", path.display(), e)))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| AudioError::Decode(format!("{}: no audio track", path.display())))?;
    let rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AudioError::Decode(format!("{}: no sample rate", path.display())))?;

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::Decode(format!("{}: {}", path.display(), e)))?;

    let mut frames: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(_)) => break, // end-of-file
            Err(e) => {
                return Err(AudioError::Decode(format!("{}: {}", path.display(), e)));
            }
        };

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::IoError(_)) => break, // also EOF in some formats
            Err(Error::DecodeError(_)) => continue, // recoverable corruption
            Err(e) => {
                return Err(AudioError::Decode(format!("{}: {}", path.display(), e)));
            }
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if channels == 0 {
            continue;
        }

        let mut tmp = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        tmp.copy_interleaved_ref(decoded);

        // Normalize to stereo: mono duplicated, extra channels dropped
        for frame in tmp.samples().chunks(channels) {
            let left = frame[0];
            let right = if channels > 1 { frame[1] } else { left };
            frames.push(left);
            frames.push(right);
        }
    }

    if frames.is_empty() {
        return Err(AudioError::Decode(format!(
            "{}: decoded zero frames",
            path.display()
        )));
    }

    Ok(Sample { frames, rate })
}
