//! facelens-geometry — Sensor to display geometry for live recognition.
//!
//! Turns raw sensor frames into upright images for the detector and maps
//! detection boxes onto the preview overlay, accounting for sensor rotation
//! and front-camera mirroring.

pub mod cache;
pub mod frame;
pub mod transform;

pub use cache::{CameraConfig, ConfigChange, TransformCache, TransformState};
pub use frame::{Frame, FrameError};
pub use transform::{
    apply_box_transform, build_box_transform, build_image_transform, ImageTransform,
    MirrorPolicy, Rotation, Transform,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("unsupported sensor rotation: {0} degrees (must be a multiple of 90)")]
    UnsupportedRotation(i32),
    #[error("image has zero width or height")]
    EmptyImage,
    #[error("frame is {actual:?}, transform was built for {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("camera not configured")]
    CameraNotConfigured,
    #[error("overlay size not known yet")]
    OverlayUnknown,
}
