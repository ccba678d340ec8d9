// SPDX-License-Identifier: GPL-3.0-only

//! Real-time mixer
//!
//! The mixer lives inside the cpal output callback. It owns a fixed table of
//! voice slots and drains a bounded command channel at the top of every
//! callback; the control side never touches voice state directly, so there
//! is no lock anywhere near the audio thread.

use super::decoder::Sample;
use crate::constants::AUDIO_VOICES;
use crate::grid::Cell;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Commands crossing from the engine into the callback
pub enum AudioCommand {
    /// Start (or retrigger) the voice for a cell
    Play {
        cell: Cell,
        sample: Arc<Sample>,
        volume: f32,
        pan: f32,
        attack_frames: u32,
        release_frames: u32,
    },
    /// Update gains of a live voice without restarting it
    SetGains { cell: Cell, volume: f32, pan: f32 },
    /// Begin the fade-out for a cell
    Release { cell: Cell },
    /// Immediate silence, all slots freed
    StopAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvelopeState {
    Attack,
    Sustain,
    Releasing,
}

/// One playing sample bound to a cell
struct Voice {
    cell: Cell,
    sample: Arc<Sample>,
    /// Fractional frame cursor into the sample
    position: f64,
    /// Source frames advanced per output frame
    step: f64,
    volume: f32,
    pan: f32,
    envelope: f32,
    attack_step: f32,
    release_step: f32,
    state: EnvelopeState,
    /// Output frame clock when the release started; drives oldest-first
    /// voice stealing
    released_at: u64,
}

impl Voice {
    /// Render and accumulate one output frame; false when fully drained
    fn render(&mut self, out: &mut [f32; 2]) -> bool {
        match self.state {
            EnvelopeState::Attack => {
                self.envelope += self.attack_step;
                if self.envelope >= 1.0 {
                    self.envelope = 1.0;
                    self.state = EnvelopeState::Sustain;
                }
            }
            EnvelopeState::Sustain => {}
            EnvelopeState::Releasing => {
                self.envelope -= self.release_step;
                if self.envelope <= 0.0 {
                    return false;
                }
            }
        }

        let frame_count = self.sample.frame_count();
        if frame_count == 0 {
            return false;
        }

        // Linear interpolation between neighbouring frames, looping
        let base = self.position as usize;
        let frac = (self.position - base as f64) as f32;
        let i0 = (base % frame_count) * 2;
        let i1 = ((base + 1) % frame_count) * 2;
        let left = self.sample.frames[i0] * (1.0 - frac) + self.sample.frames[i1] * frac;
        let right =
            self.sample.frames[i0 + 1] * (1.0 - frac) + self.sample.frames[i1 + 1] * frac;

        let left_gain = (1.0 - self.pan) * self.volume * self.envelope;
        let right_gain = self.pan * self.volume * self.envelope;
        out[0] += left * left_gain;
        out[1] += right * right_gain;

        self.position += self.step;
        if self.position >= frame_count as f64 {
            self.position -= frame_count as f64;
        }
        true
    }
}

/// Voice table plus command intake, owned by the output callback
pub struct Mixer {
    voices: Vec<Option<Voice>>,
    commands: Receiver<AudioCommand>,
    device_rate: u32,
    /// Monotonic output frame counter
    clock: u64,
    /// Note-ons dropped for lack of a stealable voice
    exhausted: Arc<AtomicU64>,
}

impl Mixer {
    pub fn new(commands: Receiver<AudioCommand>, device_rate: u32, exhausted: Arc<AtomicU64>) -> Self {
        let mut voices = Vec::with_capacity(AUDIO_VOICES);
        voices.resize_with(AUDIO_VOICES, || None);
        Self {
            voices,
            commands,
            device_rate,
            clock: 0,
            exhausted,
        }
    }

    /// Fill an interleaved output buffer with `channels` channels per frame.
    /// The first two channels carry the stereo mix; the rest stay silent.
    pub fn process(&mut self, output: &mut [f32], channels: usize) {
        self.drain_commands();

        for frame in output.chunks_mut(channels) {
            frame.fill(0.0);
            let mut mix = [0.0f32; 2];
            for slot in self.voices.iter_mut() {
                let drained = match slot {
                    Some(voice) => !voice.render(&mut mix),
                    None => false,
                };
                if drained {
                    *slot = None;
                }
            }
            frame[0] = mix[0];
            if channels > 1 {
                frame[1] = mix[1];
            }
            self.clock += 1;
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                AudioCommand::Play {
                    cell,
                    sample,
                    volume,
                    pan,
                    attack_frames,
                    release_frames,
                } => self.note_on(cell, sample, volume, pan, attack_frames, release_frames),
                AudioCommand::SetGains { cell, volume, pan } => {
                    if let Some(voice) = self.live_voice_mut(cell) {
                        voice.volume = volume;
                        voice.pan = pan;
                    }
                }
                AudioCommand::Release { cell } => {
                    if let Some(voice) = self.live_voice_mut(cell) {
                        voice.state = EnvelopeState::Releasing;
                        voice.released_at = self.clock;
                    }
                }
                AudioCommand::StopAll => {
                    for slot in self.voices.iter_mut() {
                        *slot = None;
                    }
                }
            }
        }
    }

    /// The non-releasing voice for a cell, if any
    fn live_voice_mut(&mut self, cell: Cell) -> Option<&mut Voice> {
        self.voices
            .iter_mut()
            .flatten()
            .find(|v| v.cell == cell && v.state != EnvelopeState::Releasing)
    }

    fn note_on(
        &mut self,
        cell: Cell,
        sample: Arc<Sample>,
        volume: f32,
        pan: f32,
        attack_frames: u32,
        release_frames: u32,
    ) {
        let attack_step = 1.0 / attack_frames.max(1) as f32;
        let release_step = 1.0 / release_frames.max(1) as f32;
        let step = sample.rate as f64 / self.device_rate as f64;

        // A cell reactivated mid-release takes its voice back instead of
        // spawning a second one; at most one voice per cell, always.
        if let Some(voice) = self.voices.iter_mut().flatten().find(|v| v.cell == cell) {
            voice.state = EnvelopeState::Attack;
            voice.volume = volume;
            voice.pan = pan;
            voice.attack_step = attack_step;
            voice.release_step = release_step;
            return;
        }

        let slot = match self.free_or_stealable_slot() {
            Some(index) => index,
            None => {
                self.exhausted.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        self.voices[slot] = Some(Voice {
            cell,
            sample,
            position: 0.0,
            step,
            volume,
            pan,
            envelope: 0.0,
            attack_step,
            release_step,
            state: EnvelopeState::Attack,
            released_at: 0,
        });
    }

    /// A free slot, or the slot of the oldest releasing voice to reap
    fn free_or_stealable_slot(&self) -> Option<usize> {
        if let Some(index) = self.voices.iter().position(|slot| slot.is_none()) {
            return Some(index);
        }
        self.voices
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Some(v) if v.state == EnvelopeState::Releasing => Some((i, v.released_at)),
                _ => None,
            })
            .min_by_key(|&(_, released_at)| released_at)
            .map(|(i, _)| i)
    }

    /// Live (non-releasing) voice count, for tests and stats
    pub fn live_voices(&self) -> usize {
        self.voices
            .iter()
            .flatten()
            .filter(|v| v.state != EnvelopeState::Releasing)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn tone() -> Arc<Sample> {
        // Constant-amplitude stereo sample, 100 frames at device rate
        Arc::new(Sample::from_stereo(vec![0.5f32; 200], 48_000))
    }

    fn mixer_with_sender() -> (Mixer, crossbeam_channel::Sender<AudioCommand>) {
        let (tx, rx) = bounded(64);
        let mixer = Mixer::new(rx, 48_000, Arc::new(AtomicU64::new(0)));
        (mixer, tx)
    }

    fn play(cell: Cell) -> AudioCommand {
        AudioCommand::Play {
            cell,
            sample: tone(),
            volume: 1.0,
            pan: 0.5,
            attack_frames: 4,
            release_frames: 4,
        }
    }

    #[test]
    fn test_note_on_produces_sound() {
        let (mut mixer, tx) = mixer_with_sender();
        tx.send(play(Cell::new(0, 0))).unwrap();

        let mut out = vec![0.0f32; 64];
        mixer.process(&mut out, 2);
        assert!(out.iter().any(|&s| s.abs() > 0.0));
        assert_eq!(mixer.live_voices(), 1);
    }

    #[test]
    fn test_at_most_one_voice_per_cell() {
        let (mut mixer, tx) = mixer_with_sender();
        let cell = Cell::new(1, 1);
        tx.send(play(cell)).unwrap();
        tx.send(play(cell)).unwrap();
        tx.send(play(cell)).unwrap();

        let mut out = vec![0.0f32; 16];
        mixer.process(&mut out, 2);
        assert_eq!(mixer.live_voices(), 1);
    }

    #[test]
    fn test_release_drains_and_frees_slot() {
        let (mut mixer, tx) = mixer_with_sender();
        let cell = Cell::new(0, 1);
        tx.send(play(cell)).unwrap();

        let mut out = vec![0.0f32; 32];
        mixer.process(&mut out, 2);
        assert_eq!(mixer.live_voices(), 1);

        tx.send(AudioCommand::Release { cell }).unwrap();
        // 4 release frames, so 16 frames is plenty to drain
        let mut out = vec![0.0f32; 32];
        mixer.process(&mut out, 2);
        assert_eq!(mixer.live_voices(), 0);

        // The tail of the buffer is silent after the drain
        assert!(out[out.len() - 4..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_pan_law() {
        let (mut mixer, tx) = mixer_with_sender();
        tx.send(AudioCommand::Play {
            cell: Cell::new(0, 0),
            sample: tone(),
            volume: 1.0,
            pan: 0.0, // hard left
            attack_frames: 1,
            release_frames: 1,
        })
        .unwrap();

        let mut out = vec![0.0f32; 40];
        mixer.process(&mut out, 2);
        // Skip the first frame (attack ramp), then: left hot, right silent
        let left: f32 = out.iter().skip(2).step_by(2).map(|s| s.abs()).sum();
        let right: f32 = out.iter().skip(3).step_by(2).map(|s| s.abs()).sum();
        assert!(left > 0.0);
        assert_eq!(right, 0.0);
    }

    #[test]
    fn test_exhaustion_counted_when_table_full() {
        let (tx, rx) = bounded(AUDIO_VOICES * 2 + 8);
        let exhausted = Arc::new(AtomicU64::new(0));
        let mut mixer = Mixer::new(rx, 48_000, Arc::clone(&exhausted));

        // Fill every slot with a distinct sustaining cell
        for i in 0..AUDIO_VOICES {
            tx.send(AudioCommand::Play {
                cell: Cell::new(i / 8, i % 8),
                sample: tone(),
                volume: 1.0,
                pan: 0.5,
                attack_frames: 1,
                release_frames: 4,
            })
            .unwrap();
        }
        // One more, nothing releasing to steal
        tx.send(AudioCommand::Play {
            cell: Cell::new(99, 99),
            sample: tone(),
            volume: 1.0,
            pan: 0.5,
            attack_frames: 1,
            release_frames: 4,
        })
        .unwrap();

        let mut out = vec![0.0f32; 8];
        mixer.process(&mut out, 2);
        assert_eq!(exhausted.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_stealing_reaps_oldest_released() {
        let (tx, rx) = bounded(AUDIO_VOICES * 2 + 8);
        let exhausted = Arc::new(AtomicU64::new(0));
        let mut mixer = Mixer::new(rx, 48_000, Arc::clone(&exhausted));

        for i in 0..AUDIO_VOICES {
            tx.send(AudioCommand::Play {
                cell: Cell::new(i / 8, i % 8),
                sample: tone(),
                volume: 1.0,
                pan: 0.5,
                attack_frames: 1,
                release_frames: 1_000_000, // slow fade, stays stealable
            })
            .unwrap();
        }
        let mut out = vec![0.0f32; 8];
        mixer.process(&mut out, 2);

        // Release one voice, then ask for a new cell
        tx.send(AudioCommand::Release {
            cell: Cell::new(0, 0),
        })
        .unwrap();
        tx.send(AudioCommand::Play {
            cell: Cell::new(99, 0),
            sample: tone(),
            volume: 1.0,
            pan: 0.5,
            attack_frames: 1,
            release_frames: 4,
        })
        .unwrap();

        let mut out = vec![0.0f32; 8];
        mixer.process(&mut out, 2);
        assert_eq!(exhausted.load(Ordering::Relaxed), 0);
        assert!(
            mixer
                .voices
                .iter()
                .flatten()
                .any(|v| v.cell == Cell::new(99, 0))
        );
    }
}
