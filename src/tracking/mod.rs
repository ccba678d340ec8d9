// SPDX-License-Identifier: GPL-3.0-only

//! 3D reconstruction and person localization
//!
//! The mapper is the single point where sensor-local coordinates become
//! room-absolute coordinates; everything downstream works in room metres.

mod localizer;
mod mapper;

pub use localizer::Localizer;
pub use mapper::{CalibrationOffset, CameraIntrinsics, CameraPose, SpatialMapper};
