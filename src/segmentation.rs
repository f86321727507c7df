//! Smoothing and thresholding a slice into a binary mask.
//!
//! Every mask leaving this module uses the same polarity: the brain region is 0
//! and the background is 1.

use image::{GrayImage, Luma};

use crate::error::{Error, Result};
use crate::plane::{FloatImage, Slice};
use crate::smoothing::{SmoothingParams, anisotropic_diffusion};

/// Histogram bins used by [`otsu_threshold`].
pub const OTSU_BINS: usize = 128;

/// Samples taken along each image edge by [`detect_background`].
pub const EDGE_SAMPLES: usize = 25;

/// Edge samples allowed to disagree with the corner before detection fails.
pub const MAX_EDGE_DISAGREEMENTS: usize = 3;

/// How the smoothed slice is split into foreground and background.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ThresholdMode {
    #[default]
    Otsu,
    Binary { lower: f64, upper: f64 },
}

impl ThresholdMode {
    /// A manual threshold; `lower` must not exceed `upper`.
    pub fn binary(lower: f64, upper: f64) -> Result<Self> {
        if !lower.is_finite() {
            return Err(Error::invalid("lower_binary_threshold", lower));
        }
        if !upper.is_finite() || lower > upper {
            return Err(Error::invalid("upper_binary_threshold", upper));
        }
        Ok(ThresholdMode::Binary { lower, upper })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ThresholdMode::Otsu => "Otsu",
            ThresholdMode::Binary { .. } => "Binary",
        }
    }
}

/// Detected background colour of a binary mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
    Black,
    White,
}

/// Global Otsu threshold of a float image.
///
/// Returns the upper edge of the last bin of the darker class. Pixels strictly
/// below it belong to the darker class.
pub fn otsu_level(image: &FloatImage, num_bins: usize) -> f64 {
    let values: Vec<f64> = image.pixels().map(|p| f64::from(p.0[0])).collect();
    if values.is_empty() || num_bins == 0 {
        return 0.0;
    }

    let min_val = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max_val = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if (max_val - min_val).abs() < 1e-12 {
        return max_val;
    }

    let bin_width = (max_val - min_val) / num_bins as f64;
    let mut histogram = vec![0usize; num_bins];
    for &v in &values {
        let bin = (((v - min_val) / bin_width).floor() as usize).min(num_bins - 1);
        histogram[bin] += 1;
    }

    let total = values.len() as f64;
    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, &count)| i as f64 * count as f64)
        .sum();

    let mut sum_background = 0.0;
    let mut weight_background = 0.0;
    let mut max_variance = 0.0;
    let mut best_bin = 0;

    for (t, &count) in histogram.iter().enumerate() {
        weight_background += count as f64;
        if weight_background == 0.0 {
            continue;
        }
        let weight_foreground = total - weight_background;
        if weight_foreground == 0.0 {
            break;
        }
        sum_background += t as f64 * count as f64;

        let mean_background = sum_background / weight_background;
        let mean_foreground = (sum_total - sum_background) / weight_foreground;
        let variance =
            weight_background * weight_foreground * (mean_background - mean_foreground).powi(2);

        if variance > max_variance {
            max_variance = variance;
            best_bin = t;
        }
    }

    min_val + (best_bin + 1) as f64 * bin_width
}

/// Otsu thresholding with fixed polarity: darker class 1, brighter class 0.
pub fn otsu_threshold(image: &FloatImage) -> GrayImage {
    let level = otsu_level(image, OTSU_BINS);
    tracing::debug!(level, "Otsu threshold");
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([u8::from(f64::from(image.get_pixel(x, y).0[0]) < level)])
    })
}

/// Pixels within `[lower, upper]` become 1, the rest 0.
pub fn binary_threshold(image: &FloatImage, lower: f64, upper: f64) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = f64::from(image.get_pixel(x, y).0[0]);
        Luma([u8::from(v >= lower && v <= upper)])
    })
}

/// At most [`EDGE_SAMPLES`] positions spread over an edge of `len` pixels,
/// always including both ends.
fn edge_positions(len: u32) -> impl Iterator<Item = u32> {
    let len = len as usize;
    let n = EDGE_SAMPLES.min(len);
    let last = len.saturating_sub(1);
    (0..n).map(move |i| (i * last / (n - 1).max(1)) as u32)
}

/// Reads the background colour of a binary mask off its border.
///
/// Pixel `(0, 0)` is taken as background; about [`EDGE_SAMPLES`] pixels along
/// each of the four edges must agree with it. More than
/// [`MAX_EDGE_DISAGREEMENTS`] dissenting samples fail with
/// [`Error::BackgroundDetection`].
pub fn detect_background(mask: &GrayImage) -> Result<Background> {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::BackgroundDetection {
            disagreements: 0,
            sampled: 0,
        });
    }
    let corner = mask.get_pixel(0, 0).0[0];

    let mut sampled = 0;
    let mut disagreements = 0;
    let mut check = |x: u32, y: u32| {
        sampled += 1;
        if mask.get_pixel(x, y).0[0] != corner {
            disagreements += 1;
        }
    };
    for x in edge_positions(width) {
        check(x, 0);
        check(x, height - 1);
    }
    for y in edge_positions(height) {
        check(0, y);
        check(width - 1, y);
    }

    if disagreements > MAX_EDGE_DISAGREEMENTS {
        return Err(Error::BackgroundDetection {
            disagreements,
            sampled,
        });
    }
    Ok(if corner == 0 {
        Background::Black
    } else {
        Background::White
    })
}

/// Swaps 0 and 1 in a binary mask.
pub fn invert(mask: &GrayImage) -> GrayImage {
    let mut result = mask.clone();
    for pixel in result.pixels_mut() {
        pixel.0[0] = u8::from(pixel.0[0] == 0);
    }
    result
}

/// Smooths and thresholds a slice.
///
/// The slice is already `f32`, which the diffusion filter needs. A manual
/// threshold's polarity depends on its bounds, so its output is checked with
/// [`detect_background`] and inverted when the background came out black.
pub fn segment(slice: &Slice, smoothing: &SmoothingParams, mode: &ThresholdMode) -> Result<GrayImage> {
    let smoothed = anisotropic_diffusion(&slice.image, slice.spacing, smoothing);
    match *mode {
        ThresholdMode::Otsu => Ok(otsu_threshold(&smoothed)),
        ThresholdMode::Binary { lower, upper } => {
            let mask = binary_threshold(&smoothed, lower, upper);
            match detect_background(&mask)? {
                Background::Black => {
                    tracing::debug!("Binary threshold produced a black background, inverting");
                    Ok(invert(&mask))
                }
                Background::White => Ok(mask),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plane::PlaneSpacing;

    /// Bright disc on a dark background.
    fn disc(size: u32, radius: f32, inside: f32, outside: f32) -> FloatImage {
        let c = (size as f32 - 1.0) / 2.0;
        FloatImage::from_fn(size, size, |x, y| {
            let d = ((x as f32 - c).powi(2) + (y as f32 - c).powi(2)).sqrt();
            Luma([if d <= radius { inside } else { outside }])
        })
    }

    #[test]
    fn otsu_level_splits_two_classes() {
        let image = disc(32, 8.0, 180.0, 20.0);
        let level = otsu_level(&image, OTSU_BINS);
        assert!(level > 20.0 && level <= 180.0, "level {level} should separate the classes");
    }

    #[test]
    fn otsu_marks_bright_region_as_zero() {
        let mask = otsu_threshold(&disc(32, 8.0, 180.0, 20.0));
        assert_eq!(mask.get_pixel(16, 16).0[0], 0);
        assert_eq!(mask.get_pixel(0, 0).0[0], 1);
    }

    #[test]
    fn binary_threshold_is_inclusive() {
        let image = FloatImage::from_fn(4, 1, |x, _| Luma([x as f32 * 10.0]));
        let mask = binary_threshold(&image, 10.0, 20.0);
        let values: Vec<u8> = mask.pixels().map(|p| p.0[0]).collect();
        assert_eq!(values, vec![0, 1, 1, 0]);
        assert!(ThresholdMode::binary(5.0, 1.0).is_err());
        assert!(ThresholdMode::binary(1.0, 1.0).is_ok());
    }

    #[test]
    fn detects_background_colour() {
        let mut mask = GrayImage::from_pixel(100, 100, Luma([1]));
        assert_eq!(detect_background(&mask).unwrap(), Background::White);
        for p in mask.pixels_mut() {
            p.0[0] = 0;
        }
        assert_eq!(detect_background(&mask).unwrap(), Background::Black);
    }

    #[test]
    fn detection_tolerates_three_disagreements() {
        // x = 4, 8, 12 and 16 are sampled on a 100 px edge.
        let mut mask = GrayImage::from_pixel(100, 100, Luma([0]));
        for x in [4, 8, 12] {
            mask.put_pixel(x, 0, Luma([1]));
        }
        assert_eq!(detect_background(&mask).unwrap(), Background::Black);

        mask.put_pixel(16, 0, Luma([1]));
        match detect_background(&mask) {
            Err(Error::BackgroundDetection {
                disagreements,
                sampled,
            }) => {
                assert_eq!(disagreements, 4);
                assert_eq!(sampled, 100);
            }
            other => panic!("expected BackgroundDetection, got {other:?}"),
        }
    }

    #[test]
    fn edge_samples_reach_the_far_corner() {
        for len in [1u32, 2, 24, 25, 26, 49, 74, 100, 192] {
            let positions: Vec<u32> = edge_positions(len).collect();
            assert_eq!(positions.len(), EDGE_SAMPLES.min(len as usize), "len {len}");
            assert_eq!(positions.first(), Some(&0), "len {len}");
            assert_eq!(positions.last(), Some(&(len - 1)), "len {len}");
            assert!(positions.windows(2).all(|w| w[0] < w[1]), "len {len}");
        }
    }

    #[test]
    fn foreground_at_the_far_end_of_the_edges_is_seen() {
        // 49 px edges: samples at every second pixel, up to 48.
        let mut mask = GrayImage::from_pixel(49, 49, Luma([0]));
        for y in 30..49 {
            for x in 30..49 {
                mask.put_pixel(x, y, Luma([1]));
            }
        }
        match detect_background(&mask) {
            Err(Error::BackgroundDetection {
                disagreements,
                sampled,
            }) => {
                // x or y in 30, 32, ..., 48 on the bottom and right edges.
                assert_eq!(disagreements, 20);
                assert_eq!(sampled, 100);
            }
            other => panic!("expected BackgroundDetection, got {other:?}"),
        }
    }

    #[test]
    fn binary_mode_matches_otsu_polarity() {
        let slice = Slice {
            image: disc(40, 12.0, 180.0, 20.0),
            spacing: PlaneSpacing::new(1.0, 1.0),
        };
        let smoothing = SmoothingParams::default();

        // Selecting the brain intensities gives a black background that must be flipped.
        let by_brain = segment(&slice, &smoothing, &ThresholdMode::binary(100.0, 255.0).unwrap())
            .unwrap();
        // Selecting the background intensities needs no flip.
        let by_background =
            segment(&slice, &smoothing, &ThresholdMode::binary(0.0, 100.0).unwrap()).unwrap();
        let otsu = segment(&slice, &smoothing, &ThresholdMode::Otsu).unwrap();

        assert_eq!(by_brain, otsu);
        assert_eq!(by_background, otsu);
        assert_eq!(otsu.get_pixel(20, 20).0[0], 0);
    }

    #[test]
    fn ambiguous_bounds_fail_detection() {
        // Left half bright, right half dark: the border disagrees with itself.
        let image = FloatImage::from_fn(50, 50, |x, _| Luma([if x < 25 { 200.0 } else { 10.0 }]));
        let slice = Slice {
            image,
            spacing: PlaneSpacing::new(1.0, 1.0),
        };
        let result = segment(
            &slice,
            &SmoothingParams::default(),
            &ThresholdMode::binary(100.0, 255.0).unwrap(),
        );
        assert!(matches!(result, Err(Error::BackgroundDetection { .. })));
    }
}
