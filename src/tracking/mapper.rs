// SPDX-License-Identifier: GPL-3.0-only

//! Pinhole back-projection and ground projection
//!
//! Geometry assumption: the camera hangs on a side wall at `height_m`,
//! pitched down by `pitch_deg`, looking across the room. After the pitch
//! rotation, Yc' points up along gravity, Zc' runs into the room, Xc' runs
//! along the room width. The room origin is the camera-side corner.

use crate::constants::{
    BODY_MAX_HEIGHT_M, BODY_MIN_HEIGHT_M, CAM_PITCH_MAX_DEG, CAM_PITCH_MIN_DEG,
    DEFAULT_CAM_HEIGHT_M, DEFAULT_CAM_PITCH_DEG, DEFAULT_CAM_WALL_DIST_M, DEFAULT_CX, DEFAULT_CY,
    DEFAULT_FX, DEFAULT_FY, MIN_VALID_DEPTH_M,
};
use crate::grid::{Position, RoomConfig};
use crate::sensor::DepthMap;
use serde::{Deserialize, Serialize};

/// Pinhole camera intrinsics, constant across a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length X (pixels)
    pub fx: f32,
    /// Focal length Y (pixels)
    pub fy: f32,
    /// Principal point X (pixels)
    pub cx: f32,
    /// Principal point Y (pixels)
    pub cy: f32,
}

impl Default for CameraIntrinsics {
    fn default() -> Self {
        Self {
            fx: DEFAULT_FX,
            fy: DEFAULT_FY,
            cx: DEFAULT_CX,
            cy: DEFAULT_CY,
        }
    }
}

/// Camera mounting geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    /// Height above the floor (m), > 0
    pub height_m: f32,
    /// Downward pitch (degrees, positive looks at the floor)
    pub pitch_deg: f32,
    /// Distance between the camera and the side wall (m)
    pub wall_dist_m: f32,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            height_m: DEFAULT_CAM_HEIGHT_M,
            pitch_deg: DEFAULT_CAM_PITCH_DEG,
            wall_dist_m: DEFAULT_CAM_WALL_DIST_M,
        }
    }
}

impl CameraPose {
    /// Clamp into the supported mounting domain
    pub fn sanitized(mut self) -> Self {
        self.height_m = self.height_m.max(0.1);
        self.pitch_deg = self.pitch_deg.clamp(CAM_PITCH_MIN_DEG, CAM_PITCH_MAX_DEG);
        self.wall_dist_m = self.wall_dist_m.max(0.0);
        self
    }
}

/// Spatial offset derived by calibration, applied before cell mapping
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationOffset {
    pub dx: f32,
    pub dy: f32,
}

/// Depth pixels -> camera-frame points -> room-frame ground points
///
/// Pure over (frame, pose, offset, room); the output buffer is pre-allocated
/// to the sensor resolution and reused across ticks.
#[derive(Debug)]
pub struct SpatialMapper {
    intrinsics: CameraIntrinsics,
    pose: CameraPose,
    offset: CalibrationOffset,
    room: RoomConfig,
    /// Forward distance band (m) from configuration, intersected with the
    /// room depth at projection time
    min_depth_m: f32,
    max_depth_m: f32,
    cos_pitch: f32,
    sin_pitch: f32,
    ground: Vec<Position>,
}

impl SpatialMapper {
    pub fn new(
        intrinsics: CameraIntrinsics,
        pose: CameraPose,
        offset: CalibrationOffset,
        room: RoomConfig,
        min_depth_m: f32,
        max_depth_m: f32,
    ) -> Self {
        let pose = pose.sanitized();
        let pitch_rad = pose.pitch_deg.to_radians();
        Self {
            intrinsics,
            pose,
            offset,
            room,
            min_depth_m: min_depth_m.max(MIN_VALID_DEPTH_M),
            max_depth_m,
            cos_pitch: pitch_rad.cos(),
            sin_pitch: pitch_rad.sin(),
            ground: Vec::new(),
        }
    }

    /// Reserve the ground buffer for a stream resolution
    pub fn prepare(&mut self, width: u32, height: u32) {
        self.ground.reserve(width as usize * height as usize);
    }

    pub fn pose(&self) -> &CameraPose {
        &self.pose
    }

    pub fn set_pose(&mut self, pose: CameraPose) {
        self.pose = pose.sanitized();
        let pitch_rad = self.pose.pitch_deg.to_radians();
        self.cos_pitch = pitch_rad.cos();
        self.sin_pitch = pitch_rad.sin();
    }

    pub fn offset(&self) -> CalibrationOffset {
        self.offset
    }

    pub fn set_offset(&mut self, offset: CalibrationOffset) {
        self.offset = offset;
    }

    pub fn set_room(&mut self, room: RoomConfig) {
        self.room = room;
    }

    /// Project a depth frame to room-frame ground points.
    ///
    /// Every emitted point lies strictly inside (0, width) x (0, depth).
    /// An empty result is a normal outcome (nobody in view), not an error.
    pub fn project(&mut self, frame: &DepthMap) -> &[Position] {
        self.ground.clear();

        let CameraIntrinsics { fx, fy, cx, cy } = self.intrinsics;
        let max_forward = self.max_depth_m.min(self.room.depth_m + 0.5);
        let width = frame.width();
        let height = frame.height();

        for v in 0..height {
            let row = &frame.data()[(v * width) as usize..((v + 1) * width) as usize];
            let yc_base = (v as f32 - cy) / fy;
            for (u, &raw) in row.iter().enumerate() {
                if raw == 0 {
                    continue;
                }
                let d = raw as f32 / 1000.0;
                if d <= MIN_VALID_DEPTH_M {
                    continue;
                }

                // Pinhole back-projection
                let xc = (u as f32 - cx) * d / fx;
                let yc = yc_base * d;
                let zc = d;

                // Pitch rotation about the camera x-axis
                let yr = self.cos_pitch * yc - self.sin_pitch * zc;
                let zr = self.sin_pitch * yc + self.cos_pitch * zc;

                // Keep points plausibly belonging to a standing body
                let height_above_ground = self.pose.height_m - yr;
                if height_above_ground <= BODY_MIN_HEIGHT_M
                    || height_above_ground >= BODY_MAX_HEIGHT_M
                {
                    continue;
                }
                if zr <= self.min_depth_m || zr >= max_forward {
                    continue;
                }

                // Room-absolute coordinates (side-wall mounting)
                let x = self.pose.wall_dist_m + xc + self.offset.dx;
                let y = zr + self.offset.dy;

                if !x.is_finite() || !y.is_finite() {
                    continue;
                }
                if x <= 0.0 || x >= self.room.width_m || y <= 0.0 || y >= self.room.depth_m {
                    continue;
                }

                self.ground.push(Position::new(x, y));
            }
        }

        &self.ground
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SensorProperties;

    fn room() -> RoomConfig {
        RoomConfig {
            width_m: 6.0,
            depth_m: 6.0,
            rows: 6,
            cols: 6,
        }
    }

    fn level_mapper() -> SpatialMapper {
        // Pitch 0 keeps the math easy to reason about in tests
        SpatialMapper::new(
            CameraIntrinsics::default(),
            CameraPose {
                height_m: 1.8,
                pitch_deg: 0.0,
                wall_dist_m: 0.3,
            },
            CalibrationOffset::default(),
            room(),
            0.2,
            6.0,
        )
    }

    fn frame_with(pixels: &[(u32, u32, u16)]) -> DepthMap {
        let mut map = DepthMap::new();
        map.prepare(&SensorProperties {
            width: 640,
            height: 400,
            fps: 30,
            scale_mm_per_unit: 1.0,
        });
        for &(u, v, mm) in pixels {
            map.data_mut()[(v * 640 + u) as usize] = mm;
        }
        map
    }

    #[test]
    fn test_principal_point_projects_straight_ahead() {
        let mut mapper = level_mapper();
        // Principal point at 2 m: Xc = 0, so x = wall_dist, y = 2.0
        let frame = frame_with(&[(320, 200, 2000)]);
        let ground = mapper.project(&frame);
        assert_eq!(ground.len(), 1);
        assert!((ground[0].x - 0.3).abs() < 1e-3);
        assert!((ground[0].y - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_offset_shifts_output() {
        let mut mapper = level_mapper();
        mapper.set_offset(CalibrationOffset { dx: 0.5, dy: 0.25 });
        let frame = frame_with(&[(320, 200, 2000)]);
        let ground = mapper.project(&frame);
        assert!((ground[0].x - 0.8).abs() < 1e-3);
        assert!((ground[0].y - 2.25).abs() < 1e-3);
    }

    #[test]
    fn test_zero_and_near_depths_discarded() {
        let mut mapper = level_mapper();
        let frame = frame_with(&[(320, 200, 0), (321, 200, 150)]);
        assert!(mapper.project(&frame).is_empty());
    }

    #[test]
    fn test_points_beyond_room_discarded() {
        let mut mapper = level_mapper();
        // 7 m forward is outside a 6 m room
        let frame = frame_with(&[(320, 200, 7000)]);
        assert!(mapper.project(&frame).is_empty());
    }

    #[test]
    fn test_ceiling_points_discarded() {
        let mut mapper = level_mapper();
        // A pixel far above the principal point maps above body height
        let frame = frame_with(&[(320, 0, 2000)]);
        let ground = mapper.project(&frame);
        // Yc = (0 - 200)/580 * 2 = -0.69 m, height above ground = 2.49 m
        assert!(ground.is_empty());
    }

    #[test]
    fn test_emitted_points_inside_room() {
        let mut mapper = level_mapper();
        let mut pixels = Vec::new();
        for u in (0..640).step_by(7) {
            for v in (0..400).step_by(7) {
                pixels.push((u, v, ((u * 9 + v * 13) % 6000) as u16));
            }
        }
        let frame = frame_with(&pixels);
        for p in mapper.project(&frame) {
            assert!(p.x > 0.0 && p.x < 6.0, "x out of room: {}", p.x);
            assert!(p.y > 0.0 && p.y < 6.0, "y out of room: {}", p.y);
        }
    }

    #[test]
    fn test_pitch_rotation_matches_rotation_matrix() {
        let mut pitched = SpatialMapper::new(
            CameraIntrinsics::default(),
            CameraPose {
                height_m: 1.8,
                pitch_deg: 30.0,
                wall_dist_m: 0.3,
            },
            CalibrationOffset::default(),
            room(),
            0.2,
            6.0,
        );
        // Pixel low in the image, 1.5 m out: Yc = (380-200)/580*1.5,
        // Zc' = sin(30)*Yc + cos(30)*1.5
        let frame = frame_with(&[(320, 380, 1500)]);
        let ground = pitched.project(&frame);
        assert_eq!(ground.len(), 1);
        let yc = (380.0f32 - 200.0) / 580.0 * 1.5;
        let expected = 0.5 * yc + (30.0f32).to_radians().cos() * 1.5;
        assert!((ground[0].y - expected).abs() < 1e-3);
    }

    #[test]
    fn test_pose_sanitized() {
        let pose = CameraPose {
            height_m: -2.0,
            pitch_deg: 200.0,
            wall_dist_m: -1.0,
        }
        .sanitized();
        assert!(pose.height_m > 0.0);
        assert_eq!(pose.pitch_deg, CAM_PITCH_MAX_DEG);
        assert_eq!(pose.wall_dist_m, 0.0);
    }
}
