use thiserror::Error;

use crate::resample::Axis;

/// Result type for measurement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while extracting, segmenting or measuring a slice
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid view '{0}': expected one of x, y, z")]
    InvalidView(String),

    #[error("Rotation about the {axis} axis is out of bounds: {angle} degrees (allowed range is [-90, 90])")]
    RotationOutOfBounds { axis: Axis, angle: f64 },

    #[error("Invalid value for {field}: {value}")]
    InvalidParameter { field: &'static str, value: String },

    #[error("Slice index {index} is out of bounds for axis {axis} of size {size}")]
    SliceOutOfBounds { index: usize, axis: usize, size: usize },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error(
        "Background detection failed: {disagreements} of {sampled} edge pixels disagree with the corner pixel; \
         the threshold bounds are unsuitable for this image"
    )]
    BackgroundDetection { disagreements: usize, sampled: usize },

    #[error("Not a valid anatomical slice: {contour_count} contours traced")]
    InvalidSlice { contour_count: usize },

    #[error("No foreground region left to measure")]
    EmptyRegion,

    #[error("No volume loaded")]
    EmptyGroup,

    #[error("Unsupported volume format: {0}")]
    UnsupportedFormat(String),

    #[error("NIfTI error: {0}")]
    Nifti(#[from] nifti::NiftiError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    pub(crate) fn invalid(field: &'static str, value: impl ToString) -> Self {
        Error::InvalidParameter {
            field,
            value: value.to_string(),
        }
    }
}
