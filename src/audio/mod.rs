// SPDX-License-Identifier: GPL-3.0-only

//! Audio engine
//!
//! At most one looping voice per cell, started with a short fade-in and
//! released with a fade-out. Startup is explicit: `start()` either opens the
//! default output stream or reports `AudioUnavailable`, and a disabled
//! engine accepts every call silently so the rest of the system runs
//! unchanged on machines with no sound card.

mod decoder;
mod mixer;

pub use decoder::{Sample, decode_file};
pub use mixer::{AudioCommand, Mixer};

use crate::constants::{AUDIO_ATTACK_MS, AUDIO_COMMAND_QUEUE, AUDIO_RELEASE_MS};
use crate::errors::AudioError;
use crate::grid::Cell;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Control-side handle to the mixer
pub struct AudioEngine {
    commands: Option<Sender<AudioCommand>>,
    /// Second consumer of the command channel; lets the sender drop the
    /// oldest queued command instead of the newest when saturated
    overflow_drain: Option<Receiver<AudioCommand>>,
    // Held only to keep the output stream alive
    _stream: Option<cpal::Stream>,
    device_rate: u32,
    cache: HashMap<PathBuf, Arc<Sample>>,
    exhausted: Arc<AtomicU64>,
    reported_exhausted: u64,
}

impl AudioEngine {
    /// Engine that plays nothing and accepts everything
    pub fn disabled() -> Self {
        Self {
            commands: None,
            overflow_drain: None,
            _stream: None,
            device_rate: 48_000,
            cache: HashMap::new(),
            exhausted: Arc::new(AtomicU64::new(0)),
            reported_exhausted: 0,
        }
    }

    /// Open the default output device and start the mixer
    pub fn start() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Unavailable("no default output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::Unavailable(e.to_string()))?;

        let device_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let (tx, rx) = bounded(AUDIO_COMMAND_QUEUE);
        let exhausted = Arc::new(AtomicU64::new(0));
        let mixer = Mixer::new(rx.clone(), device_rate, Arc::clone(&exhausted));

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &config.into(), mixer, channels)?
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config.into(), mixer, channels)?
            }
            cpal::SampleFormat::U16 => {
                build_stream::<u16>(&device, &config.into(), mixer, channels)?
            }
            other => {
                return Err(AudioError::Unavailable(format!(
                    "unsupported sample format {:?}",
                    other
                )));
            }
        };

        stream
            .play()
            .map_err(|e| AudioError::Unavailable(e.to_string()))?;

        let device_name = device.name().unwrap_or_else(|_| "<unknown>".into());
        info!(
            device = %device_name,
            rate = device_rate,
            channels,
            "Audio engine started"
        );

        Ok(Self {
            commands: Some(tx),
            overflow_drain: Some(rx),
            _stream: Some(stream),
            device_rate,
            cache: HashMap::new(),
            exhausted,
            reported_exhausted: 0,
        })
    }

    /// True when a real output stream is running
    pub fn is_active(&self) -> bool {
        self.commands.is_some()
    }

    /// Decode a sample into the cache ahead of time.
    ///
    /// Called for every configured cell at startup and reload so note-ons
    /// never pay decode latency inside a tick.
    pub fn preload(&mut self, path: &str) -> Result<(), AudioError> {
        if path.is_empty() {
            return Ok(());
        }
        let key = PathBuf::from(path);
        if self.cache.contains_key(&key) {
            return Ok(());
        }
        let sample = Arc::new(decode_file(&key)?);
        debug!(
            path = %key.display(),
            frames = sample.frame_count(),
            rate = sample.rate,
            "Sample cached"
        );
        self.cache.insert(key, sample);
        Ok(())
    }

    /// Start or update the voice for a cell.
    ///
    /// A cell with a live voice only gets its gains updated; the sample
    /// keeps looping from wherever it is.
    pub fn play_for_cell(
        &mut self,
        cell: Cell,
        sample_path: &str,
        volume: f32,
        pan: f32,
    ) -> Result<(), AudioError> {
        if sample_path.is_empty() || self.commands.is_none() {
            return Ok(());
        }

        let key = PathBuf::from(sample_path);
        let sample = match self.cache.get(&key) {
            Some(sample) => Arc::clone(sample),
            None => {
                // Cache miss means the preload pass didn't see this path;
                // decode now and take the one-time latency hit.
                warn!(path = %key.display(), "Sample not preloaded, decoding on demand");
                let sample = Arc::new(decode_file(&key)?);
                self.cache.insert(key, Arc::clone(&sample));
                sample
            }
        };

        let attack_frames = self.device_rate * AUDIO_ATTACK_MS / 1000;
        let release_frames = self.device_rate * AUDIO_RELEASE_MS / 1000;
        self.send(AudioCommand::Play {
            cell,
            sample,
            volume: volume.max(0.0),
            pan: pan.clamp(0.0, 1.0),
            attack_frames,
            release_frames,
        });
        Ok(())
    }

    /// Begin the fade-out for a cell's voice
    pub fn release_cell(&mut self, cell: Cell) {
        self.send(AudioCommand::Release { cell });
    }

    /// Update gains of a live voice
    pub fn set_gains(&mut self, cell: Cell, volume: f32, pan: f32) {
        self.send(AudioCommand::SetGains {
            cell,
            volume: volume.max(0.0),
            pan: pan.clamp(0.0, 1.0),
        });
    }

    /// Immediate silence
    pub fn stop_all(&mut self) {
        self.send(AudioCommand::StopAll);
    }

    /// Note-ons dropped by the mixer since the last call
    pub fn drain_exhausted(&mut self) -> u64 {
        let total = self.exhausted.load(Ordering::Relaxed);
        let fresh = total - self.reported_exhausted;
        self.reported_exhausted = total;
        fresh
    }

    /// Queue a command, dropping the oldest queued one when saturated so a
    /// stalled callback can never block the tick
    fn send(&mut self, command: AudioCommand) {
        let Some(tx) = self.commands.as_ref() else {
            return;
        };
        if let Err(crossbeam_channel::TrySendError::Full(command)) = tx.try_send(command) {
            if let Some(drain) = self.overflow_drain.as_ref() {
                let _ = drain.try_recv();
            }
            if tx.try_send(command).is_err() {
                warn!("Audio command queue saturated, command dropped");
            }
        }
    }
}

/// Build the output stream for a concrete sample type (flora-style dispatch)
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Mixer,
    channels: usize,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut scratch: Vec<f32> = Vec::new();

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.process(&mut scratch, channels);
                for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                    *dst = T::from_sample(src);
                }
            },
            move |err| {
                warn!(error = %err, "Audio stream error");
            },
            None,
        )
        .map_err(|e| AudioError::Unavailable(e.to_string()))?;

    Ok(stream)
}
