// SPDX-License-Identifier: GPL-3.0-only

//! Spatial calibration
//!
//! The subject stands on a known target spot (midway between cells (1,1)
//! and (1,2)); after a grace period the calibrator averages the
//! localized position for a fixed window and commits the offset
//! `target - observed` to the camera pose. With no usable observation the
//! offset stays untouched.

use crate::constants::{CALIBRATION_COUNT_SECS, CALIBRATION_PREPARE_SECS};
use crate::errors::CalibrationError;
use crate::grid::Position;
use crate::tracking::CalibrationOffset;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Externally visible phase, with whole seconds left where applicable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    Idle,
    /// Grace period while the subject walks to the target spot
    Preparing { seconds_left: u32 },
    /// Averaging window
    Counting { seconds_left: u32 },
}

/// What `advance` produced this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationResult {
    /// Offset computed and ready to commit
    Committed {
        offset: CalibrationOffset,
        observed: Position,
    },
    /// Nothing observed during the window and no retained cloud
    NoData,
}

#[derive(Debug)]
enum State {
    Idle,
    Preparing {
        until: Instant,
    },
    Counting {
        until: Instant,
        xs: Vec<f32>,
        ys: Vec<f32>,
    },
}

/// Multi-phase offset capture, advanced once per engine tick
#[derive(Debug)]
pub struct Calibrator {
    state: State,
    target: Position,
}

impl Calibrator {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            target: Position::new(0.0, 0.0),
        }
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.state, State::Idle)
    }

    /// Begin a run toward `target`
    pub fn start(&mut self, target: Position, now: Instant) -> Result<(), CalibrationError> {
        if self.is_running() {
            return Err(CalibrationError::Busy);
        }
        self.target = target;
        self.state = State::Preparing {
            until: now + Duration::from_secs(CALIBRATION_PREPARE_SECS as u64),
        };
        info!(
            target_x = target.x,
            target_y = target.y,
            grace_secs = CALIBRATION_PREPARE_SECS,
            "Calibration started, walk to the target spot"
        );
        Ok(())
    }

    pub fn phase(&self, now: Instant) -> CalibrationPhase {
        match &self.state {
            State::Idle => CalibrationPhase::Idle,
            State::Preparing { until } => CalibrationPhase::Preparing {
                seconds_left: seconds_left(*until, now),
            },
            State::Counting { until, .. } => CalibrationPhase::Counting {
                seconds_left: seconds_left(*until, now),
            },
        }
    }

    /// Advance one tick.
    ///
    /// `position` is this tick's localization (if any); `last_ground` is the
    /// engine's retained ground cloud, used as a fallback when the counting
    /// window caught no localization at all.
    pub fn advance(
        &mut self,
        now: Instant,
        position: Option<Position>,
        last_ground: &[Position],
    ) -> Option<CalibrationResult> {
        match &mut self.state {
            State::Idle => None,
            State::Preparing { until } => {
                if now >= *until {
                    info!(window_secs = CALIBRATION_COUNT_SECS, "Calibration counting");
                    self.state = State::Counting {
                        until: now + Duration::from_secs(CALIBRATION_COUNT_SECS as u64),
                        xs: Vec::new(),
                        ys: Vec::new(),
                    };
                }
                None
            }
            State::Counting { until, xs, ys } => {
                if let Some(pos) = position {
                    xs.push(pos.x);
                    ys.push(pos.y);
                }
                if now < *until {
                    return None;
                }

                // Window closed: compute the observed spot
                let observed = if !xs.is_empty() {
                    Some(Position::new(median(xs), median(ys)))
                } else if !last_ground.is_empty() {
                    let mut gx: Vec<f32> = last_ground.iter().map(|p| p.x).collect();
                    let mut gy: Vec<f32> = last_ground.iter().map(|p| p.y).collect();
                    Some(Position::new(median(&mut gx), median(&mut gy)))
                } else {
                    None
                };
                self.state = State::Idle;

                match observed {
                    Some(observed) if observed.is_finite() => {
                        let offset = CalibrationOffset {
                            dx: self.target.x - observed.x,
                            dy: self.target.y - observed.y,
                        };
                        info!(
                            observed_x = observed.x,
                            observed_y = observed.y,
                            dx = offset.dx,
                            dy = offset.dy,
                            "Calibration computed"
                        );
                        Some(CalibrationResult::Committed { offset, observed })
                    }
                    _ => {
                        warn!("Calibration window closed with no data, offset unchanged");
                        Some(CalibrationResult::NoData)
                    }
                }
            }
        }
    }
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new()
    }
}

fn seconds_left(until: Instant, now: Instant) -> u32 {
    until.saturating_duration_since(now).as_secs() as u32
}

fn median(values: &mut [f32]) -> f32 {
    let mid = (values.len() - 1) / 2;
    let (_, value, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> Instant {
        Instant::now()
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_phases_in_order() {
        let mut cal = Calibrator::new();
        let start = t0();
        cal.start(Position::new(2.0, 1.5), start).unwrap();

        assert!(matches!(
            cal.phase(start),
            CalibrationPhase::Preparing { .. }
        ));

        // Grace period elapses
        let counting_at = start + secs(CALIBRATION_PREPARE_SECS as u64);
        assert_eq!(cal.advance(counting_at, None, &[]), None);
        assert!(matches!(
            cal.phase(counting_at),
            CalibrationPhase::Counting { .. }
        ));
    }

    #[test]
    fn test_commit_offset_is_target_minus_observed() {
        let mut cal = Calibrator::new();
        let start = t0();
        let target = Position::new(2.0, 1.5);
        cal.start(target, start).unwrap();

        let counting_at = start + secs(CALIBRATION_PREPARE_SECS as u64);
        cal.advance(counting_at, None, &[]);

        // Subject observed slightly off-target during the window
        let mut now = counting_at;
        for _ in 0..20 {
            now += Duration::from_millis(100);
            cal.advance(now, Some(Position::new(1.2, 0.9)), &[]);
        }
        let done_at = counting_at + secs(CALIBRATION_COUNT_SECS as u64);
        let result = cal.advance(done_at, Some(Position::new(1.2, 0.9)), &[]);

        match result {
            Some(CalibrationResult::Committed { offset, .. }) => {
                assert!((offset.dx - 0.8).abs() < 1e-5);
                assert!((offset.dy - 0.6).abs() < 1e-5);
            }
            other => panic!("expected commit, got {:?}", other),
        }
        assert!(!cal.is_running());
    }

    #[test]
    fn test_no_data_leaves_offset_alone() {
        let mut cal = Calibrator::new();
        let start = t0();
        cal.start(Position::new(2.0, 1.5), start).unwrap();

        let counting_at = start + secs(CALIBRATION_PREPARE_SECS as u64);
        cal.advance(counting_at, None, &[]);
        let done_at = counting_at + secs(CALIBRATION_COUNT_SECS as u64);

        assert_eq!(
            cal.advance(done_at, None, &[]),
            Some(CalibrationResult::NoData)
        );
        assert!(!cal.is_running());
    }

    #[test]
    fn test_ground_cloud_fallback() {
        let mut cal = Calibrator::new();
        let start = t0();
        cal.start(Position::new(2.0, 1.5), start).unwrap();

        let counting_at = start + secs(CALIBRATION_PREPARE_SECS as u64);
        cal.advance(counting_at, None, &[]);
        let done_at = counting_at + secs(CALIBRATION_COUNT_SECS as u64);

        // No per-tick localizations, but a retained cloud exists
        let cloud = vec![Position::new(1.0, 1.0); 30];
        match cal.advance(done_at, None, &cloud) {
            Some(CalibrationResult::Committed { offset, .. }) => {
                assert!((offset.dx - 1.0).abs() < 1e-5);
                assert!((offset.dy - 0.5).abs() < 1e-5);
            }
            other => panic!("expected commit from cloud fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_start_while_running_is_busy() {
        let mut cal = Calibrator::new();
        let start = t0();
        cal.start(Position::new(1.0, 1.0), start).unwrap();
        assert!(matches!(
            cal.start(Position::new(1.0, 1.0), start),
            Err(CalibrationError::Busy)
        ));
    }
}
