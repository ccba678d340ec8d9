// SPDX-License-Identifier: GPL-3.0-only

//! Robust person localization
//!
//! A person is the dominant blob in the ground cloud. The median beats the
//! mean here: reflective floors and residual wall noise throw far outliers
//! that would drag a mean across cell boundaries.

use crate::constants::{MIN_GROUND_POINTS, NEAR_BAND_M, NEAR_BAND_PERCENTILE};
use crate::grid::Position;

/// Ground cloud -> single robust position, or none
#[derive(Debug)]
pub struct Localizer {
    /// Keep only the band of points nearest the camera before taking the
    /// median (the person stands closer than most wall returns)
    near_band: bool,
    xs: Vec<f32>,
    ys: Vec<f32>,
}

impl Localizer {
    pub fn new(near_band: bool) -> Self {
        Self {
            near_band,
            xs: Vec::new(),
            ys: Vec::new(),
        }
    }

    /// Locate the subject. Fewer than [`MIN_GROUND_POINTS`] valid points,
    /// or a non-finite median, yields None.
    pub fn locate(&mut self, ground: &[Position]) -> Option<Position> {
        if ground.len() < MIN_GROUND_POINTS {
            return None;
        }

        self.xs.clear();
        self.ys.clear();

        if self.near_band {
            // Anchor on the near percentile of y, keep a fixed band behind it
            self.ys.extend(ground.iter().map(|p| p.y));
            let anchor = percentile(&mut self.ys, NEAR_BAND_PERCENTILE)?;
            let limit = anchor + NEAR_BAND_M;

            self.ys.clear();
            for p in ground {
                if p.y <= limit {
                    self.xs.push(p.x);
                    self.ys.push(p.y);
                }
            }
        } else {
            self.xs.extend(ground.iter().map(|p| p.x));
            self.ys.extend(ground.iter().map(|p| p.y));
        }

        if self.xs.is_empty() {
            return None;
        }

        let x = median(&mut self.xs)?;
        let y = median(&mut self.ys)?;
        let pos = Position::new(x, y);
        pos.is_finite().then_some(pos)
    }
}

/// Median by partial selection; reorders `values`
fn median(values: &mut [f32]) -> Option<f32> {
    percentile(values, 50.0)
}

/// Nearest-rank percentile by partial selection; reorders `values`
fn percentile(values: &mut [f32], pct: f32) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let rank = ((pct / 100.0) * (values.len() - 1) as f32).round() as usize;
    let (_, value, _) = values.select_nth_unstable_by(rank, |a, b| a.total_cmp(b));
    Some(*value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud(points: &[(f32, f32)]) -> Vec<Position> {
        points.iter().map(|&(x, y)| Position::new(x, y)).collect()
    }

    fn blob(x: f32, y: f32, n: usize) -> Vec<(f32, f32)> {
        (0..n)
            .map(|i| {
                let jitter = (i as f32 * 0.017) % 0.1 - 0.05;
                (x + jitter, y - jitter)
            })
            .collect()
    }

    #[test]
    fn test_too_few_points_is_none() {
        let mut localizer = Localizer::new(false);
        let points = cloud(&blob(2.0, 3.0, MIN_GROUND_POINTS - 1));
        assert_eq!(localizer.locate(&points), None);
    }

    #[test]
    fn test_threshold_count_localizes() {
        let mut localizer = Localizer::new(false);
        let points = cloud(&blob(2.0, 3.0, MIN_GROUND_POINTS));
        let pos = localizer.locate(&points).unwrap();
        assert!((pos.x - 2.0).abs() < 0.1);
        assert!((pos.y - 3.0).abs() < 0.1);
    }

    #[test]
    fn test_median_resists_outliers() {
        let mut localizer = Localizer::new(false);
        let mut points = blob(1.5, 1.5, 40);
        // Reflective-floor artefacts far away
        points.extend([(5.9, 5.9); 8]);
        let pos = localizer.locate(&cloud(&points)).unwrap();
        assert!((pos.x - 1.5).abs() < 0.2);
        assert!((pos.y - 1.5).abs() < 0.2);
    }

    #[test]
    fn test_near_band_prefers_closest_blob() {
        let mut localizer = Localizer::new(true);
        // Person at y=1.2, a wall echo cluster at y=5.5
        let mut points = blob(2.0, 1.2, 60);
        points.extend(blob(4.0, 5.5, 25));
        let pos = localizer.locate(&cloud(&points)).unwrap();
        assert!((pos.y - 1.2).abs() < 0.3, "picked y = {}", pos.y);
        assert!((pos.x - 2.0).abs() < 0.3);
    }

    #[test]
    fn test_empty_cloud_is_none() {
        let mut localizer = Localizer::new(true);
        assert_eq!(localizer.locate(&[]), None);
    }
}
