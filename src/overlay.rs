//! Debug renderings of a slice with its traced boundary.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::{contours::Contour, drawing::draw_line_segment_mut};

use crate::colors::{contour_palette, measured_colour};
use crate::error::{Error, Result};
use crate::plane::{ContourMask, Slice};

/// Rescales slice intensities linearly onto `0..=255`.
pub fn to_display_image(slice: &Slice) -> GrayImage {
    let (min, max) = slice
        .image
        .pixels()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p.0[0]), hi.max(p.0[0]))
        });
    let range = max - min;
    GrayImage::from_fn(slice.width(), slice.height(), |x, y| {
        let v = slice.image.get_pixel(x, y).0[0];
        let scaled = if range > 0.0 {
            (v - min) / range * 255.0
        } else {
            0.0
        };
        Luma([scaled.round().clamp(0.0, 255.0) as u8])
    })
}

/// Paints the contour mask over the slice.
///
/// The mask is in array order, so it must have `height` rows and `width`
/// columns; anything else fails with [`Error::ShapeMismatch`] before a pixel is
/// drawn.
pub fn draw_contour_overlay(slice: &Slice, contour: &ContourMask) -> Result<RgbImage> {
    let expected = (slice.height() as usize, slice.width() as usize);
    if contour.shape() != expected {
        return Err(Error::ShapeMismatch {
            expected,
            actual: contour.shape(),
        });
    }

    let color = measured_colour();
    let mut canvas = image::DynamicImage::ImageLuma8(to_display_image(slice)).to_rgb8();
    for ((row, col), &value) in contour.pixels.indexed_iter() {
        if value != 0 {
            canvas.put_pixel(col as u32, row as u32, color);
        }
    }
    Ok(canvas)
}

/// Draws every traced contour in its own colour.
///
/// Useful for seeing why a slice was rejected for having too many contours.
pub fn draw_traced_contours(slice: &Slice, contours: &[Contour<i32>]) -> RgbImage {
    let mut canvas = image::DynamicImage::ImageLuma8(to_display_image(slice)).to_rgb8();
    let colors = contour_palette(contours.len());
    for (c, color) in contours.iter().zip(colors) {
        draw_closed_polyline(&mut canvas, c, color);
    }
    canvas
}

fn draw_closed_polyline(canvas: &mut RgbImage, contour: &Contour<i32>, color: Rgb<u8>) {
    let n = contour.points.len();
    if n == 1 {
        let p = contour.points[0];
        if let (Ok(x), Ok(y)) = (u32::try_from(p.x), u32::try_from(p.y))
            && x < canvas.width()
            && y < canvas.height()
        {
            canvas.put_pixel(x, y, color);
        }
        return;
    }
    for i in 0..n {
        let p1 = contour.points[i];
        let p2 = contour.points[(i + 1) % n];
        draw_line_segment_mut(
            canvas,
            (p1.x as f32, p1.y as f32),
            (p2.x as f32, p2.y as f32),
            color,
        );
    }
}
