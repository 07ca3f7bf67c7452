//! Frame-to-model coordinate transforms.
//!
//! The detector sees a square crop of each frame, rotated upright by
//! the sensor orientation. Boxes it reports are mapped back into frame
//! space through the inverse transform.

use super::BoundingBox;
use image::imageops::{self, FilterType};
use image::RgbImage;
use thiserror::Error;

/// Errors building or applying a transform.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The affine matrix has no inverse.
    #[error("transform is not invertible")]
    Singular,
    /// A frame or crop edge is zero.
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions {
        /// Offending width.
        width: u32,
        /// Offending height.
        height: u32,
    },
    /// Sensor rotations must be quarter turns.
    #[error("unsupported sensor rotation {0} (must be a multiple of 90 degrees)")]
    UnsupportedRotation(i32),
    /// The frame handed to [`FrameTransform::crop`] has the wrong size.
    #[error("frame is {got_width}x{got_height}, transform expects {width}x{height}")]
    SizeMismatch {
        /// Expected width.
        width: u32,
        /// Expected height.
        height: u32,
        /// Actual width.
        got_width: u32,
        /// Actual height.
        got_height: u32,
    },
}

/// 2D affine transform stored as the top two rows of a 3x3 matrix.
///
/// `x' = m[0][0]*x + m[0][1]*y + m[0][2]`,
/// `y' = m[1][0]*x + m[1][1]*y + m[1][2]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    m: [[f32; 3]; 2],
}

impl Affine {
    /// The transform that leaves every point in place.
    pub fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        }
    }

    /// Shifts points by `(dx, dy)`.
    pub fn translation(dx: f32, dy: f32) -> Self {
        Self {
            m: [[1.0, 0.0, dx], [0.0, 1.0, dy]],
        }
    }

    /// Scales about the origin.
    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            m: [[sx, 0.0, 0.0], [0.0, sy, 0.0]],
        }
    }

    /// Clockwise rotation in image coordinates (y grows downward).
    ///
    /// Right angles use exact coefficients.
    pub fn rotation(degrees: i32) -> Self {
        let (cos, sin) = match degrees.rem_euclid(360) {
            0 => (1.0, 0.0),
            90 => (0.0, 1.0),
            180 => (-1.0, 0.0),
            270 => (0.0, -1.0),
            other => {
                let radians = (other as f32).to_radians();
                (radians.cos(), radians.sin())
            }
        };
        Self {
            m: [[cos, -sin, 0.0], [sin, cos, 0.0]],
        }
    }

    /// Returns the transform that applies `self` first, then `next`.
    pub fn then(&self, next: &Affine) -> Affine {
        let a = &self.m;
        let b = &next.m;
        Affine {
            m: [
                [
                    b[0][0] * a[0][0] + b[0][1] * a[1][0],
                    b[0][0] * a[0][1] + b[0][1] * a[1][1],
                    b[0][0] * a[0][2] + b[0][1] * a[1][2] + b[0][2],
                ],
                [
                    b[1][0] * a[0][0] + b[1][1] * a[1][0],
                    b[1][0] * a[0][1] + b[1][1] * a[1][1],
                    b[1][0] * a[0][2] + b[1][1] * a[1][2] + b[1][2],
                ],
            ],
        }
    }

    /// Inverse transform, or [`TransformError::Singular`].
    pub fn invert(&self) -> Result<Affine, TransformError> {
        let a = &self.m;
        let det = a[0][0] * a[1][1] - a[0][1] * a[1][0];
        if det.abs() < f32::EPSILON || !det.is_finite() {
            return Err(TransformError::Singular);
        }
        let i00 = a[1][1] / det;
        let i01 = -a[0][1] / det;
        let i10 = -a[1][0] / det;
        let i11 = a[0][0] / det;
        Ok(Affine {
            m: [
                [i00, i01, -(i00 * a[0][2] + i01 * a[1][2])],
                [i10, i11, -(i10 * a[0][2] + i11 * a[1][2])],
            ],
        })
    }

    /// Maps one point.
    #[inline]
    pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
        let m = &self.m;
        (
            m[0][0] * x + m[0][1] * y + m[0][2],
            m[1][0] * x + m[1][1] * y + m[1][2],
        )
    }

    /// Maps a rectangle and returns the axis-aligned bounds of the result.
    pub fn map_rect(&self, rect: &BoundingBox) -> BoundingBox {
        let corners = [
            self.map_point(rect.left, rect.top),
            self.map_point(rect.right, rect.top),
            self.map_point(rect.left, rect.bottom),
            self.map_point(rect.right, rect.bottom),
        ];
        let mut out = BoundingBox::new(f32::MAX, f32::MAX, f32::MIN, f32::MIN);
        for (x, y) in corners {
            out.left = out.left.min(x);
            out.top = out.top.min(y);
            out.right = out.right.max(x);
            out.bottom = out.bottom.max(y);
        }
        out
    }
}

/// Paired forward and inverse transforms between a camera frame and
/// the model's square input.
#[derive(Debug, Clone, Copy)]
pub struct FrameTransform {
    frame_width: u32,
    frame_height: u32,
    crop_size: u32,
    quarter_turns: u8,
    maintain_aspect: bool,
    frame_to_crop: Affine,
    crop_to_frame: Affine,
}

impl FrameTransform {
    /// Builds the frame-to-crop transform.
    ///
    /// The frame is centered on the origin, rotated by
    /// `sensor_rotation`, scaled to fill the crop (uniformly when
    /// `maintain_aspect`, cropping the overflow) and recentered.
    /// Only quarter-turn rotations are supported.
    pub fn new(
        frame_width: u32,
        frame_height: u32,
        crop_size: u32,
        sensor_rotation: i32,
        maintain_aspect: bool,
    ) -> Result<Self, TransformError> {
        if frame_width == 0 || frame_height == 0 {
            return Err(TransformError::InvalidDimensions {
                width: frame_width,
                height: frame_height,
            });
        }
        if crop_size == 0 {
            return Err(TransformError::InvalidDimensions {
                width: crop_size,
                height: crop_size,
            });
        }

        if sensor_rotation.rem_euclid(90) != 0 {
            return Err(TransformError::UnsupportedRotation(sensor_rotation));
        }
        let quarter_turns = (sensor_rotation.rem_euclid(360) / 90) as u8;

        let (src_w, src_h) = (frame_width as f32, frame_height as f32);
        let dst = crop_size as f32;

        let mut forward = Affine::translation(-src_w / 2.0, -src_h / 2.0);
        if sensor_rotation.rem_euclid(360) != 0 {
            forward = forward.then(&Affine::rotation(sensor_rotation));
        }

        // A quarter turn swaps which frame edge ends up horizontal
        let transpose = quarter_turns % 2 == 1;
        let (in_w, in_h) = if transpose { (src_h, src_w) } else { (src_w, src_h) };

        if in_w != dst || in_h != dst {
            let (sx, sy) = (dst / in_w, dst / in_h);
            forward = if maintain_aspect {
                let s = sx.max(sy);
                forward.then(&Affine::scale(s, s))
            } else {
                forward.then(&Affine::scale(sx, sy))
            };
        }

        forward = forward.then(&Affine::translation(dst / 2.0, dst / 2.0));
        let inverse = forward.invert()?;

        Ok(Self {
            frame_width,
            frame_height,
            crop_size,
            quarter_turns,
            maintain_aspect,
            frame_to_crop: forward,
            crop_to_frame: inverse,
        })
    }

    /// Frame space to model-input space.
    pub fn frame_to_crop(&self) -> &Affine {
        &self.frame_to_crop
    }

    /// Model-input space back to frame space.
    pub fn crop_to_frame(&self) -> &Affine {
        &self.crop_to_frame
    }

    /// Edge of the square model input.
    pub fn crop_size(&self) -> u32 {
        self.crop_size
    }

    /// Maps a box from model-input space back to frame space.
    pub fn box_to_frame(&self, bbox: &BoundingBox) -> BoundingBox {
        self.crop_to_frame.map_rect(bbox)
    }

    /// Maps a box from frame space into model-input space.
    pub fn box_to_crop(&self, bbox: &BoundingBox) -> BoundingBox {
        self.frame_to_crop.map_rect(bbox)
    }

    /// Renders the model input for a frame.
    ///
    /// The frame is turned upright, center-cropped to a square when
    /// aspect is kept, then resized with nearest-neighbour sampling.
    pub fn crop(&self, frame: &RgbImage) -> Result<RgbImage, TransformError> {
        let (width, height) = frame.dimensions();
        if (width, height) != (self.frame_width, self.frame_height) {
            return Err(TransformError::SizeMismatch {
                width: self.frame_width,
                height: self.frame_height,
                got_width: width,
                got_height: height,
            });
        }

        let rotated = match self.quarter_turns {
            1 => Some(imageops::rotate90(frame)),
            2 => Some(imageops::rotate180(frame)),
            3 => Some(imageops::rotate270(frame)),
            _ => None,
        };
        let upright = rotated.as_ref().unwrap_or(frame);

        let (w, h) = upright.dimensions();
        if self.maintain_aspect && w != h {
            let side = w.min(h);
            let square =
                imageops::crop_imm(upright, (w - side) / 2, (h - side) / 2, side, side).to_image();
            return Ok(self.resize(&square));
        }
        Ok(self.resize(upright))
    }

    fn resize(&self, image: &RgbImage) -> RgbImage {
        if image.dimensions() == (self.crop_size, self.crop_size) {
            return image.clone();
        }
        imageops::resize(image, self.crop_size, self.crop_size, FilterType::Nearest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use proptest::prelude::*;

    fn assert_box_close(a: &BoundingBox, b: &BoundingBox, tol: f32) {
        assert!((a.left - b.left).abs() < tol, "{a:?} vs {b:?}");
        assert!((a.top - b.top).abs() < tol, "{a:?} vs {b:?}");
        assert!((a.right - b.right).abs() < tol, "{a:?} vs {b:?}");
        assert!((a.bottom - b.bottom).abs() < tol, "{a:?} vs {b:?}");
    }

    #[test]
    fn test_scale_without_rotation() {
        let t = FrameTransform::new(640, 480, 416, 0, false).unwrap();
        let mapped = t.box_to_crop(&BoundingBox::new(0.0, 0.0, 640.0, 480.0));
        assert_box_close(&mapped, &BoundingBox::new(0.0, 0.0, 416.0, 416.0), 1e-3);
    }

    #[test]
    fn test_quarter_turn_swaps_axes() {
        let t = FrameTransform::new(640, 480, 416, 90, false).unwrap();
        // Frame top-left corner lands at the crop's top-right after a clockwise turn
        let (x, y) = t.frame_to_crop().map_point(0.0, 0.0);
        assert!((x - 416.0).abs() < 1e-3);
        assert!(y.abs() < 1e-3);
    }

    #[test]
    fn test_remap_round_trip() {
        let t = FrameTransform::new(640, 480, 416, 0, false).unwrap();
        let original = BoundingBox::new(100.0, 120.0, 300.0, 360.0);
        let back = t.box_to_frame(&t.box_to_crop(&original));
        assert_box_close(&back, &original, 1e-3);
    }

    #[test]
    fn test_crop_identity_copies_pixels() {
        let mut frame = RgbImage::new(4, 4);
        frame.put_pixel(1, 2, Rgb([9, 8, 7]));
        let t = FrameTransform::new(4, 4, 4, 0, false).unwrap();
        let crop = t.crop(&frame).unwrap();
        assert_eq!(crop, frame);
    }

    #[test]
    fn test_crop_half_turn() {
        let mut frame = RgbImage::new(4, 4);
        frame.put_pixel(3, 3, Rgb([255, 0, 0]));
        let t = FrameTransform::new(4, 4, 4, 180, false).unwrap();
        let crop = t.crop(&frame).unwrap();
        assert_eq!(crop.get_pixel(0, 0).0, [255, 0, 0]);
    }

    #[test]
    fn test_crop_quarter_turn_puts_left_edge_on_top() {
        // Left half red, right half blue
        let frame = RgbImage::from_fn(8, 4, |x, _| {
            if x < 4 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        let t = FrameTransform::new(8, 4, 4, 90, false).unwrap();
        let crop = t.crop(&frame).unwrap();

        assert_eq!(crop.dimensions(), (4, 4));
        assert_eq!(crop.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(crop.get_pixel(3, 3).0, [0, 0, 255]);
        assert_eq!(
            crop,
            imageops::resize(&imageops::rotate90(&frame), 4, 4, FilterType::Nearest)
        );
    }

    #[test]
    fn test_crop_keeps_aspect_by_cutting_sides() {
        let frame = RgbImage::from_fn(8, 4, |x, _| match x {
            0..=1 => Rgb([255, 0, 0]),
            2..=5 => Rgb([0, 255, 0]),
            _ => Rgb([0, 0, 255]),
        });
        let t = FrameTransform::new(8, 4, 4, 0, true).unwrap();
        let crop = t.crop(&frame).unwrap();

        assert!(crop.pixels().all(|p| p.0 == [0, 255, 0]));
        // The box transform agrees with the pixel crop
        let (x, _) = t.frame_to_crop().map_point(2.0, 0.0);
        assert!(x.abs() < 1e-3);
    }

    #[test]
    fn test_non_quarter_rotation_rejected() {
        assert!(matches!(
            FrameTransform::new(640, 480, 416, 45, false),
            Err(TransformError::UnsupportedRotation(45))
        ));
    }

    #[test]
    fn test_crop_rejects_wrong_size() {
        let t = FrameTransform::new(8, 8, 4, 0, false).unwrap();
        assert!(matches!(
            t.crop(&RgbImage::new(4, 4)),
            Err(TransformError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(FrameTransform::new(0, 480, 416, 0, false).is_err());
        assert!(FrameTransform::new(640, 480, 0, 0, false).is_err());
    }

    #[test]
    fn test_singular_inverse() {
        assert!(matches!(
            Affine::scale(0.0, 1.0).invert(),
            Err(TransformError::Singular)
        ));
    }

    proptest! {
        #[test]
        fn prop_remap_round_trip(
            quarter in 0i32..4,
            maintain in any::<bool>(),
            left in 0.0f32..600.0,
            top in 0.0f32..440.0,
            w in 1.0f32..40.0,
            h in 1.0f32..40.0,
        ) {
            let t = FrameTransform::new(640, 480, 416, quarter * 90, maintain).unwrap();
            let original = BoundingBox::new(left, top, left + w, top + h);
            let back = t.box_to_frame(&t.box_to_crop(&original));
            prop_assert!((back.left - original.left).abs() < 1e-2);
            prop_assert!((back.top - original.top).abs() < 1e-2);
            prop_assert!((back.right - original.right).abs() < 1e-2);
            prop_assert!((back.bottom - original.bottom).abs() < 1e-2);
        }
    }
}
