//! Debug overlays: kept detections drawn onto a copy of the model input.

use super::{BoundingBox, Detection};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

/// Outline color of drawn boxes.
pub const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Outline width of drawn boxes, in pixels.
pub const BOX_STROKE: u32 = 2;

/// Draws box outlines in place, `stroke` pixels wide, growing inward.
///
/// Parts of a box outside the image are clipped. Non-finite or
/// collapsed boxes are skipped.
pub fn draw_boxes(image: &mut RgbImage, boxes: &[BoundingBox], color: Rgb<u8>, stroke: u32) {
    for bbox in boxes.iter().filter(|b| b.is_finite()) {
        let left = bbox.left.round() as i32;
        let top = bbox.top.round() as i32;
        let width = (bbox.right - bbox.left).round() as i32;
        let height = (bbox.bottom - bbox.top).round() as i32;

        for inset in 0..stroke as i32 {
            let (w, h) = (width - 2 * inset, height - 2 * inset);
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(left + inset, top + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(image, rect, color);
        }
    }
}

/// Copy of a model input with `detections` outlined in [`BOX_COLOR`].
///
/// Boxes must be in model-input coordinates.
pub fn annotate_crop(crop: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut annotated = crop.clone();
    let boxes: Vec<BoundingBox> = detections.iter().map(|d| d.bbox).collect();
    draw_boxes(&mut annotated, &boxes, BOX_COLOR, BOX_STROKE);
    annotated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outline_is_two_pixels_wide() {
        let crop = RgbImage::new(16, 16);
        let detection = Detection::new(0, 0.9, BoundingBox::new(4.0, 4.0, 12.0, 12.0));

        let annotated = annotate_crop(&crop, &[detection]);

        assert_eq!(annotated.get_pixel(4, 4).0, BOX_COLOR.0);
        assert_eq!(annotated.get_pixel(5, 8).0, BOX_COLOR.0);
        assert_eq!(annotated.get_pixel(11, 8).0, BOX_COLOR.0);
        assert_eq!(annotated.get_pixel(8, 6).0, [0, 0, 0]);
        assert_eq!(annotated.get_pixel(3, 3).0, [0, 0, 0]);
        // The source crop is untouched
        assert!(crop.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_out_of_bounds_and_degenerate_boxes() {
        let mut image = RgbImage::new(8, 8);
        draw_boxes(
            &mut image,
            &[
                BoundingBox::new(-5.0, -5.0, 40.0, 40.0),
                BoundingBox::new(2.0, 2.0, 2.0, 6.0),
                BoundingBox::new(f32::NAN, 0.0, 4.0, 4.0),
            ],
            BOX_COLOR,
            BOX_STROKE,
        );
        assert!(image.pixels().all(|p| p.0 == [0, 0, 0]));
    }
}
