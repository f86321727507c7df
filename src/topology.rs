//! Reducing a thresholded mask to one filled region and its boundary.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::plane::{ContourMask, PlaneSpacing};
use crate::segmentation::invert;

/// The retained region and its boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedMask {
    /// Image-order mask of the retained region, region = 1.
    pub region: GrayImage,
    /// Array-order boundary of `region`, boundary = 1.
    pub contour: ContourMask,
}

/// Pixel count of every label, indexed by label.
fn label_sizes(labels: &image::ImageBuffer<Luma<u32>, Vec<u32>>) -> Vec<usize> {
    let max_label = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize;
    let mut sizes = vec![0usize; max_label + 1];
    for p in labels.pixels() {
        sizes[p.0[0] as usize] += 1;
    }
    sizes
}

/// Removes every 1-valued region that does not touch the image border.
///
/// On a mask whose brain region is 0 this fills the holes inside the brain,
/// leaving the brain 0 and the background 1.
pub fn grind_peak(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    let labels = connected_components(mask, Connectivity::Four, Luma([0u8]));

    let mut touches_border = vec![false; label_sizes(&labels).len()];
    for (x, y, label) in labels.enumerate_pixels() {
        if x == 0 || y == 0 || x + 1 == width || y + 1 == height {
            touches_border[label.0[0] as usize] = true;
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let label = labels.get_pixel(x, y).0[0] as usize;
        Luma([u8::from(label != 0 && touches_border[label])])
    })
}

/// Keeps only the most populous 4-connected region of 1-valued pixels.
///
/// Ties go to the region reached first in raster order. A mask without
/// foreground comes back empty.
pub fn largest_component(mask: &GrayImage) -> GrayImage {
    let labels = connected_components(mask, Connectivity::Four, Luma([0u8]));
    let sizes = label_sizes(&labels);

    let mut largest = 0usize;
    for (label, &size) in sizes.iter().enumerate().skip(1) {
        if size > sizes[largest] || largest == 0 {
            largest = label;
        }
    }
    tracing::debug!(
        components = sizes.len().saturating_sub(1),
        kept_pixels = sizes.get(largest).copied().unwrap_or(0),
        "Selected largest component"
    );

    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let label = labels.get_pixel(x, y).0[0] as usize;
        Luma([u8::from(largest != 0 && label == largest)])
    })
}

/// Foreground pixels with at least one 4-neighbour in the background.
///
/// Positions outside the image are not background, so a region running into
/// the image edge has no boundary along it.
pub fn binary_contour(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    let is_background = |x: i64, y: i64| {
        x >= 0
            && y >= 0
            && x < i64::from(width)
            && y < i64::from(height)
            && mask.get_pixel(x as u32, y as u32).0[0] == 0
    };
    GrayImage::from_fn(width, height, |x, y| {
        if mask.get_pixel(x, y).0[0] == 0 {
            return Luma([0]);
        }
        let (x, y) = (i64::from(x), i64::from(y));
        let edge = [(1, 0), (-1, 0), (0, 1), (0, -1)]
            .iter()
            .any(|&(dx, dy)| is_background(x + dx, y + dy));
        Luma([u8::from(edge)])
    })
}

/// Fills holes, keeps the largest region and extracts its boundary.
///
/// `mask` must have the brain region at 0 and the background at 1. The
/// hole filling leaves that polarity in place, so the result is inverted before
/// the component search to make the brain the foreground.
pub fn cleanup(mask: &GrayImage, spacing: PlaneSpacing) -> CleanedMask {
    let filled = invert(&grind_peak(mask));
    let region = largest_component(&filled);
    let boundary = binary_contour(&region);
    CleanedMask {
        contour: ContourMask::from_image(&boundary, spacing),
        region,
    }
}
