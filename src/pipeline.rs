//! The full measurement of one volume: reorient, resample, segment, clean up, measure.

use image::GrayImage;
use imageproc::contours::Contour;
use nalgebra::Vector3;

use crate::contours::{DEFAULT_INVALID_CONTOUR_THRESHOLD, measure};
use crate::error::{Error, Result};
use crate::orientation::{View, normalize};
use crate::plane::Slice;
use crate::resample::{RotationAngles, resample_slice};
use crate::segmentation::{ThresholdMode, segment};
use crate::smoothing::SmoothingParams;
use crate::topology::{CleanedMask, cleanup};
use crate::volume::Volume;

/// Everything a pipeline run reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    pub view: View,
    pub angles: RotationAngles,
    /// Slice along the view axis; the middle slice when `None`.
    pub slice_index: Option<usize>,
    pub smoothing: SmoothingParams,
    pub threshold: ThresholdMode,
    pub invalid_contour_threshold: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            view: View::default(),
            angles: RotationAngles::default(),
            slice_index: None,
            smoothing: SmoothingParams::default(),
            threshold: ThresholdMode::default(),
            invalid_contour_threshold: DEFAULT_INVALID_CONTOUR_THRESHOLD,
        }
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct Measurement {
    /// Arc length of the outer boundary in physical units, unrounded.
    pub circumference: f64,
    pub contour_count: usize,
    pub slice_index: usize,
    /// The resampled plane, image order.
    pub slice: Slice,
    /// Thresholded mask, brain 0 and background 1.
    pub segmented: GrayImage,
    pub cleaned: CleanedMask,
    /// Measured boundary; `x` is the column of `cleaned.contour`.
    pub outer: Contour<i32>,
}

/// `floor((dim - 1) / 2)` along the view axis.
pub fn middle_slice_index(volume: &Volume, view: View) -> usize {
    volume.size()[view.slice_axis()].saturating_sub(1) / 2
}

/// Segments, cleans up and measures an already extracted slice.
pub fn measure_slice(slice: Slice, slice_index: usize, config: &PipelineConfig) -> Result<Measurement> {
    if config.invalid_contour_threshold < 1 {
        return Err(Error::invalid(
            "invalid_contour_threshold",
            config.invalid_contour_threshold,
        ));
    }

    let segmented = segment(&slice, &config.smoothing, &config.threshold)?;
    let cleaned = cleanup(&segmented, slice.spacing);
    tracing::debug!(
        region_pixels = cleaned.region.pixels().filter(|p| p.0[0] != 0).count(),
        contour_pixels = cleaned.contour.count_ones(),
        "Cleaned up mask"
    );
    let measured = measure(&cleaned.contour, config.invalid_contour_threshold)?;

    Ok(Measurement {
        circumference: measured.perimeter,
        contour_count: measured.contour_count,
        slice_index,
        slice,
        segmented,
        cleaned,
        outer: measured.outer,
    })
}

/// Reorients `volume` to the configured view and resamples the requested plane.
///
/// `center` is the rotation center of the volume's group; it is a physical
/// point and so does not change when the volume is reoriented.
pub fn prepare_slice(
    volume: &Volume,
    center: Vector3<f64>,
    config: &PipelineConfig,
) -> Result<(usize, Slice)> {
    let oriented = normalize(volume, config.view);
    let slice_index = config
        .slice_index
        .unwrap_or_else(|| middle_slice_index(&oriented, config.view));

    let slice = resample_slice(&oriented, center, &config.angles, config.view, slice_index)?;
    tracing::debug!(
        view = %config.view,
        slice_index,
        width = slice.width(),
        height = slice.height(),
        "Resampled slice"
    );
    Ok((slice_index, slice))
}

/// Runs the whole pipeline on one volume, rotating about `center`.
pub fn run(volume: &Volume, center: Vector3<f64>, config: &PipelineConfig) -> Result<Measurement> {
    let (slice_index, slice) = prepare_slice(volume, center, config)?;
    let measurement = measure_slice(slice, slice_index, config)?;
    tracing::info!(
        circumference = measurement.circumference,
        contours = measurement.contour_count,
        "Measured circumference"
    );
    Ok(measurement)
}
