//! Transform state cached across frames.
//!
//! Both matrices are derived from one camera configuration plus the overlay
//! size, built lazily on the first frame that needs them and dropped only by
//! the configuration-change events below.

use crate::transform::{
    build_box_transform, build_image_transform, ImageTransform, MirrorPolicy, Transform,
};
use crate::GeometryError;
use facelens_core::BoundingBox;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Camera parameters supplied by the camera layer on (re)initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub rotation_degrees: i32,
    pub is_front_facing: bool,
    pub sensor_width: u32,
    pub sensor_height: u32,
}

/// Image and box transforms built from the same configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformState {
    pub camera: CameraConfig,
    pub overlay_width: u32,
    pub overlay_height: u32,
    pub image: ImageTransform,
    pub boxes: Transform,
}

impl TransformState {
    pub fn build(
        camera: CameraConfig,
        overlay_width: u32,
        overlay_height: u32,
        policy: MirrorPolicy,
    ) -> Result<Self, GeometryError> {
        let image = build_image_transform(
            camera.rotation_degrees,
            policy.mirrors_image(camera.is_front_facing),
            camera.sensor_width,
            camera.sensor_height,
        )?;
        let boxes = build_box_transform(
            overlay_width,
            overlay_height,
            image.upright_width,
            image.upright_height,
            policy.mirrors_overlay(camera.is_front_facing),
        )?;
        Ok(Self {
            camera,
            overlay_width,
            overlay_height,
            image,
            boxes,
        })
    }

    pub fn map_box(&self, bbox: &BoundingBox) -> BoundingBox {
        self.boxes.map_rect(bbox)
    }
}

/// A change that makes the cached transforms stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    /// Camera reopened: facing flip, new rotation or new resolution.
    Camera(CameraConfig),
    /// Overlay laid out or resized.
    OverlayResized { width: u32, height: u32 },
    /// Frames started arriving at a different resolution.
    Resolution { width: u32, height: u32 },
}

/// Lazily built transform pair, replaced as a whole on every change.
#[derive(Debug, Default)]
pub struct TransformCache {
    policy: MirrorPolicy,
    camera: Option<CameraConfig>,
    overlay: Option<(u32, u32)>,
    state: Option<Arc<TransformState>>,
    builds: u64,
}

impl TransformCache {
    pub fn new(policy: MirrorPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// How many times the transform pair has been (re)built.
    pub fn builds(&self) -> u64 {
        self.builds
    }

    pub fn is_built(&self) -> bool {
        self.state.is_some()
    }

    /// Record a configuration change and drop the cached transforms.
    pub fn apply(&mut self, change: ConfigChange) {
        match change {
            ConfigChange::Camera(camera) => self.camera = Some(camera),
            ConfigChange::OverlayResized { width, height } => self.overlay = Some((width, height)),
            ConfigChange::Resolution { width, height } => {
                if let Some(camera) = self.camera.as_mut() {
                    camera.sensor_width = width;
                    camera.sensor_height = height;
                }
            }
        }
        if self.state.take().is_some() {
            tracing::debug!(?change, "transform cache invalidated");
        }
    }

    /// Transforms for a sensor frame of the given size, building them if the
    /// cache is empty. A frame at a new resolution counts as a
    /// [`ConfigChange::Resolution`].
    pub fn get_or_build(
        &mut self,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Arc<TransformState>, GeometryError> {
        let camera = self.camera.ok_or(GeometryError::CameraNotConfigured)?;
        if (camera.sensor_width, camera.sensor_height) != (frame_width, frame_height) {
            self.apply(ConfigChange::Resolution {
                width: frame_width,
                height: frame_height,
            });
        }

        if let Some(state) = &self.state {
            return Ok(Arc::clone(state));
        }

        let camera = self.camera.ok_or(GeometryError::CameraNotConfigured)?;
        let (overlay_width, overlay_height) = self.overlay.ok_or(GeometryError::OverlayUnknown)?;
        let state = Arc::new(TransformState::build(
            camera,
            overlay_width,
            overlay_height,
            self.policy,
        )?);
        self.builds += 1;
        tracing::debug!(
            rotation = camera.rotation_degrees,
            front = camera.is_front_facing,
            sensor = ?(camera.sensor_width, camera.sensor_height),
            overlay = ?(overlay_width, overlay_height),
            policy = ?self.policy,
            "transforms built"
        );
        self.state = Some(Arc::clone(&state));
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn back_camera() -> CameraConfig {
        CameraConfig {
            rotation_degrees: 90,
            is_front_facing: false,
            sensor_width: 640,
            sensor_height: 480,
        }
    }

    fn ready_cache() -> TransformCache {
        let mut cache = TransformCache::new(MirrorPolicy::Overlay);
        cache.apply(ConfigChange::Camera(back_camera()));
        cache.apply(ConfigChange::OverlayResized {
            width: 960,
            height: 1280,
        });
        cache
    }

    #[test]
    fn test_requires_camera_and_overlay() {
        let mut cache = TransformCache::new(MirrorPolicy::Overlay);
        assert!(matches!(
            cache.get_or_build(640, 480),
            Err(GeometryError::CameraNotConfigured)
        ));
        cache.apply(ConfigChange::Camera(back_camera()));
        assert!(matches!(
            cache.get_or_build(640, 480),
            Err(GeometryError::OverlayUnknown)
        ));
    }

    #[test]
    fn test_built_once_across_frames() {
        let mut cache = ready_cache();
        let first = cache.get_or_build(640, 480).unwrap();
        let second = cache.get_or_build(640, 480).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.builds(), 1);
        assert_eq!((first.image.upright_width, first.image.upright_height), (480, 640));
        // 960 / 480 = 2, 1280 / 640 = 2
        let b = first.map_box(&BoundingBox::new(10.0, 10.0, 5.0, 5.0));
        assert_eq!(b, BoundingBox::new(20.0, 20.0, 10.0, 10.0));
    }

    #[test]
    fn test_rebuilt_after_each_change() {
        let mut cache = ready_cache();
        cache.get_or_build(640, 480).unwrap();

        cache.apply(ConfigChange::OverlayResized {
            width: 480,
            height: 640,
        });
        assert!(!cache.is_built());
        let state = cache.get_or_build(640, 480).unwrap();
        assert_eq!(state.overlay_width, 480);

        cache.apply(ConfigChange::Camera(CameraConfig {
            is_front_facing: true,
            ..back_camera()
        }));
        let state = cache.get_or_build(640, 480).unwrap();
        assert!(state.camera.is_front_facing);
        assert_eq!(cache.builds(), 3);
    }

    #[test]
    fn test_new_resolution_invalidates() {
        let mut cache = ready_cache();
        cache.get_or_build(640, 480).unwrap();
        let state = cache.get_or_build(1280, 720).unwrap();
        assert_eq!(state.camera.sensor_width, 1280);
        assert_eq!((state.image.upright_width, state.image.upright_height), (720, 1280));
        assert_eq!(cache.builds(), 2);
    }

    #[test]
    fn test_policy_decides_which_transform_mirrors() {
        let front = CameraConfig {
            rotation_degrees: 0,
            is_front_facing: true,
            sensor_width: 100,
            sensor_height: 100,
        };

        let overlay = TransformState::build(front, 100, 100, MirrorPolicy::Overlay).unwrap();
        assert!(!overlay.image.mirrored);
        assert_eq!(overlay.boxes.map_point(0.0, 0.0).0, 100.0);

        let image = TransformState::build(front, 100, 100, MirrorPolicy::Image).unwrap();
        assert!(image.image.mirrored);
        assert_eq!(image.boxes.map_point(0.0, 0.0).0, 0.0);
    }
}
