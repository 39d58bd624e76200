//! Affine transforms between sensor, upright-image and overlay space.
//!
//! All coordinates are pixels with the origin at the top-left corner and y
//! pointing down, so a positive rotation turns the picture clockwise.

use crate::GeometryError;
use facelens_core::BoundingBox;
use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};

/// 2×3 affine matrix, row-major:
/// ```text
/// | a  b  tx |
/// | c  d  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    m: [f32; 6],
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub const fn identity() -> Self {
        Self {
            m: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        }
    }

    pub const fn from_matrix(m: [f32; 6]) -> Self {
        Self { m }
    }

    pub fn matrix(&self) -> [f32; 6] {
        self.m
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self::from_matrix([sx, 0.0, 0.0, 0.0, sy, 0.0])
    }

    pub fn translation(tx: f32, ty: f32) -> Self {
        Self::from_matrix([1.0, 0.0, tx, 0.0, 1.0, ty])
    }

    /// Clockwise rotation about the origin.
    pub fn rotation(rotation: Rotation) -> Self {
        match rotation {
            Rotation::Deg0 => Self::identity(),
            Rotation::Deg90 => Self::from_matrix([0.0, -1.0, 0.0, 1.0, 0.0, 0.0]),
            Rotation::Deg180 => Self::from_matrix([-1.0, 0.0, 0.0, 0.0, -1.0, 0.0]),
            Rotation::Deg270 => Self::from_matrix([0.0, 1.0, 0.0, -1.0, 0.0, 0.0]),
        }
    }

    /// Horizontal mirror about the vertical center line of a span `width` wide.
    pub fn mirror_horizontal(width: f32) -> Self {
        Self::from_matrix([-1.0, 0.0, width, 0.0, 1.0, 0.0])
    }

    /// `self` followed by `next`.
    pub fn then(&self, next: &Transform) -> Transform {
        let [a1, b1, tx1, c1, d1, ty1] = self.m;
        let [a2, b2, tx2, c2, d2, ty2] = next.m;
        Transform::from_matrix([
            a2 * a1 + b2 * c1,
            a2 * b1 + b2 * d1,
            a2 * tx1 + b2 * ty1 + tx2,
            c2 * a1 + d2 * c1,
            c2 * b1 + d2 * d1,
            c2 * tx1 + d2 * ty1 + ty2,
        ])
    }

    pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
        let [a, b, tx, c, d, ty] = self.m;
        (a * x + b * y + tx, c * x + d * y + ty)
    }

    /// Map a rectangle and return the axis-aligned box around the result.
    ///
    /// Exact for the scale, mirror and quarter-turn transforms built here.
    pub fn map_rect(&self, rect: &BoundingBox) -> BoundingBox {
        let corners = [
            self.map_point(rect.x, rect.y),
            self.map_point(rect.right(), rect.y),
            self.map_point(rect.x, rect.bottom()),
            self.map_point(rect.right(), rect.bottom()),
        ];
        let (mut min_x, mut min_y) = corners[0];
        let (mut max_x, mut max_y) = corners[0];
        for &(x, y) in &corners[1..] {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        BoundingBox::from_corners(min_x, min_y, max_x, max_y)
    }
}

/// Sensor orientation relative to upright, in clockwise quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Result<Self, GeometryError> {
        match degrees.rem_euclid(360) {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            _ => Err(GeometryError::UnsupportedRotation(degrees)),
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Whether width and height trade places.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Where the front-camera mirror is applied.
///
/// The preview of a front camera is mirrored. Either the analysis image is
/// mirrored to match it (boxes then only need scaling), or the image stays
/// as the sensor sees it and the boxes are mirrored onto the overlay.
/// Back cameras are never mirrored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorPolicy {
    #[default]
    Overlay,
    Image,
    None,
}

impl MirrorPolicy {
    pub fn mirrors_image(self, is_front_facing: bool) -> bool {
        is_front_facing && self == MirrorPolicy::Image
    }

    pub fn mirrors_overlay(self, is_front_facing: bool) -> bool {
        is_front_facing && self == MirrorPolicy::Overlay
    }
}

/// Sensor buffer → upright (optionally mirrored) image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTransform {
    pub rotation: Rotation,
    pub mirrored: bool,
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub upright_width: u32,
    pub upright_height: u32,
    pub matrix: Transform,
}

impl ImageTransform {
    /// Produce the upright image the detector sees.
    pub fn apply(&self, sensor: &RgbaImage) -> Result<RgbaImage, GeometryError> {
        if sensor.dimensions() != (self.sensor_width, self.sensor_height) {
            return Err(GeometryError::SizeMismatch {
                expected: (self.sensor_width, self.sensor_height),
                actual: sensor.dimensions(),
            });
        }

        let mut upright = match self.rotation {
            Rotation::Deg0 => sensor.clone(),
            Rotation::Deg90 => imageops::rotate90(sensor),
            Rotation::Deg180 => imageops::rotate180(sensor),
            Rotation::Deg270 => imageops::rotate270(sensor),
        };
        if self.mirrored {
            imageops::flip_horizontal_in_place(&mut upright);
        }
        Ok(upright)
    }
}

/// Build the sensor → upright transform.
///
/// Rotates by `rotation_degrees` (a multiple of 90) and shifts the result
/// back so the upright image starts at the origin. When `is_front_facing`,
/// also mirrors about the upright image's own center.
pub fn build_image_transform(
    rotation_degrees: i32,
    is_front_facing: bool,
    sensor_width: u32,
    sensor_height: u32,
) -> Result<ImageTransform, GeometryError> {
    if sensor_width == 0 || sensor_height == 0 {
        return Err(GeometryError::EmptyImage);
    }
    let rotation = Rotation::from_degrees(rotation_degrees)?;
    let (w, h) = (sensor_width as f32, sensor_height as f32);

    let rotate = Transform::rotation(rotation);
    let bounds = rotate.map_rect(&BoundingBox::new(0.0, 0.0, w, h));
    let mut matrix = rotate.then(&Transform::translation(-bounds.x, -bounds.y));

    let (upright_width, upright_height) = if rotation.swaps_axes() {
        (sensor_height, sensor_width)
    } else {
        (sensor_width, sensor_height)
    };

    if is_front_facing {
        matrix = matrix.then(&Transform::mirror_horizontal(upright_width as f32));
    }

    Ok(ImageTransform {
        rotation,
        mirrored: is_front_facing,
        sensor_width,
        sensor_height,
        upright_width,
        upright_height,
        matrix,
    })
}

/// Build the upright-image → overlay transform for detection boxes.
///
/// Scales by overlay/image size per axis. When `is_front_facing`, also
/// mirrors about the overlay's own center.
pub fn build_box_transform(
    overlay_width: u32,
    overlay_height: u32,
    upright_width: u32,
    upright_height: u32,
    is_front_facing: bool,
) -> Result<Transform, GeometryError> {
    if upright_width == 0 || upright_height == 0 {
        return Err(GeometryError::EmptyImage);
    }
    let scale_x = overlay_width as f32 / upright_width as f32;
    let scale_y = overlay_height as f32 / upright_height as f32;

    let mut transform = Transform::scale(scale_x, scale_y);
    if is_front_facing {
        transform = transform.then(&Transform::mirror_horizontal(overlay_width as f32));
    }
    Ok(transform)
}

/// Map a detection box into overlay space.
pub fn apply_box_transform(bbox: &BoundingBox, transform: &Transform) -> BoundingBox {
    transform.map_rect(bbox)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn assert_box(actual: BoundingBox, expected: BoundingBox) {
        assert!(
            approx(actual.x, expected.x)
                && approx(actual.y, expected.y)
                && approx(actual.width, expected.width)
                && approx(actual.height, expected.height),
            "got {actual:?}, expected {expected:?}"
        );
    }

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(0).unwrap(), Rotation::Deg0);
        assert_eq!(Rotation::from_degrees(270).unwrap(), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(-90).unwrap(), Rotation::Deg270);
        assert_eq!(Rotation::from_degrees(450).unwrap(), Rotation::Deg90);
        assert!(matches!(
            Rotation::from_degrees(45),
            Err(GeometryError::UnsupportedRotation(45))
        ));
    }

    #[test]
    fn test_then_applies_in_order() {
        let t = Transform::scale(2.0, 3.0).then(&Transform::translation(1.0, 1.0));
        assert_eq!(t.map_point(1.0, 1.0), (3.0, 4.0));
        let t = Transform::translation(1.0, 1.0).then(&Transform::scale(2.0, 3.0));
        assert_eq!(t.map_point(1.0, 1.0), (4.0, 6.0));
    }

    #[test]
    fn test_box_transform_identity_configuration() {
        let t = build_box_transform(640, 480, 640, 480, false).unwrap();
        let b = BoundingBox::new(12.5, 40.0, 100.0, 80.0);
        assert_eq!(apply_box_transform(&b, &t), b);
    }

    #[test]
    fn test_box_transform_scales() {
        let t = build_box_transform(1280, 960, 640, 480, false).unwrap();
        let b = apply_box_transform(&BoundingBox::new(10.0, 20.0, 30.0, 40.0), &t);
        assert_box(b, BoundingBox::new(20.0, 40.0, 60.0, 80.0));
    }

    #[test]
    fn test_box_transform_mirror_front_camera() {
        let overlay_w = 1080;
        let t = build_box_transform(overlay_w, 1920, overlay_w, 1920, true).unwrap();

        // The left edge x = 0 lands on x = W; width is unchanged.
        let b = apply_box_transform(&BoundingBox::new(0.0, 100.0, 200.0, 50.0), &t);
        assert!(approx(b.right(), overlay_w as f32));
        assert!(approx(b.width, 200.0));
        assert!(approx(b.y, 100.0));
        assert_eq!(t.map_point(0.0, 0.0).0, overlay_w as f32);

        // And a box touching the right edge lands on x = 0.
        let b = apply_box_transform(&BoundingBox::new(880.0, 0.0, 200.0, 50.0), &t);
        assert!(approx(b.x, 0.0));
        assert!(approx(b.width, 200.0));
        assert_eq!(t.map_point(overlay_w as f32, 0.0).0, 0.0);
    }

    #[test]
    fn test_box_transform_empty_image() {
        assert!(matches!(
            build_box_transform(100, 100, 0, 10, false),
            Err(GeometryError::EmptyImage)
        ));
    }

    #[test]
    fn test_image_transform_rotation_90() {
        let t = build_image_transform(90, false, 640, 480).unwrap();
        assert_eq!((t.upright_width, t.upright_height), (480, 640));
        // Top-left of the sensor ends up top-right after a clockwise turn.
        assert_eq!(t.matrix.map_point(0.0, 0.0), (480.0, 0.0));
        assert_eq!(t.matrix.map_point(640.0, 480.0), (0.0, 640.0));
    }

    #[test]
    fn test_image_transform_upright_bounds() {
        for deg in [0, 90, 180, 270] {
            for front in [false, true] {
                let t = build_image_transform(deg, front, 64, 48).unwrap();
                let bounds = t.matrix.map_rect(&BoundingBox::new(0.0, 0.0, 64.0, 48.0));
                assert_box(
                    bounds,
                    BoundingBox::new(
                        0.0,
                        0.0,
                        t.upright_width as f32,
                        t.upright_height as f32,
                    ),
                );
            }
        }
    }

    #[test]
    fn test_image_transform_front_mirrors_about_center() {
        let back = build_image_transform(0, false, 100, 50).unwrap();
        let front = build_image_transform(0, true, 100, 50).unwrap();
        assert_eq!(back.matrix.map_point(10.0, 5.0), (10.0, 5.0));
        assert_eq!(front.matrix.map_point(10.0, 5.0), (90.0, 5.0));
        assert_eq!(front.matrix.map_point(50.0, 5.0), (50.0, 5.0));
    }

    #[test]
    fn test_image_apply_matches_matrix() {
        // Mark one pixel, warp the image, and check it lands where the
        // matrix sends that pixel's center.
        let (w, h) = (7u32, 4u32);
        let (px, py) = (1u32, 2u32);
        let mut sensor = RgbaImage::new(w, h);
        sensor.put_pixel(px, py, Rgba([255, 255, 255, 255]));

        for deg in [0, 90, 180, 270] {
            for front in [false, true] {
                let t = build_image_transform(deg, front, w, h).unwrap();
                let upright = t.apply(&sensor).unwrap();
                assert_eq!(upright.dimensions(), (t.upright_width, t.upright_height));

                let (cx, cy) = t.matrix.map_point(px as f32 + 0.5, py as f32 + 0.5);
                let (ux, uy) = ((cx - 0.5).round() as u32, (cy - 0.5).round() as u32);
                assert_eq!(
                    upright.get_pixel(ux, uy).0,
                    [255, 255, 255, 255],
                    "rotation {deg}, front {front}"
                );
            }
        }
    }

    #[test]
    fn test_image_apply_rejects_other_size() {
        let t = build_image_transform(0, false, 8, 8).unwrap();
        assert!(matches!(
            t.apply(&RgbaImage::new(4, 4)),
            Err(GeometryError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_mirror_policy() {
        assert!(MirrorPolicy::Overlay.mirrors_overlay(true));
        assert!(!MirrorPolicy::Overlay.mirrors_image(true));
        assert!(MirrorPolicy::Image.mirrors_image(true));
        assert!(!MirrorPolicy::Image.mirrors_overlay(true));
        assert!(!MirrorPolicy::Overlay.mirrors_overlay(false));
        assert!(!MirrorPolicy::None.mirrors_image(true));
    }
}
