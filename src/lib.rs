//! Head circumference measurement on 2D planes extracted from 3D brain volumes.
//!
//! A [`pipeline::run`] reorients a [`volume::Volume`] to a fixed view, resamples one
//! rotated plane, segments it with [imageproc], cleans up the mask topology and
//! measures the outer boundary in physical units. [`session::Session`] holds a
//! group of volumes and the parameters applied to them.

mod colors;
pub mod contours;
pub mod error;
pub mod export;
pub mod nifti_io;
pub mod orientation;
pub mod overlay;
pub mod pipeline;
pub mod plane;
pub mod resample;
pub mod segmentation;
pub mod session;
pub mod settings;
pub mod smoothing;
pub mod topology;
pub mod volume;

pub use error::{Error, Result};
pub use orientation::View;
pub use pipeline::{Measurement, PipelineConfig};
pub use resample::{Axis, RotationAngles};
pub use session::Session;
pub use volume::Volume;
