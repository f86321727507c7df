use imageproc::{
    contours::{Contour, find_contours},
    point::Point,
};
use num::{Num, NumCast};
use num_traits::AsPrimitive;

use crate::error::{Error, Result};
use crate::plane::{ArraySpacing, ContourMask};

/// Contour count at which a slice stops being treated as an anatomical cross-section.
pub const DEFAULT_INVALID_CONTOUR_THRESHOLD: usize = 10;

/// The measured outer boundary of a contour mask.
#[derive(Debug, Clone)]
pub struct ContourMeasurement {
    /// Closed-loop arc length of `outer`, in physical units.
    pub perimeter: f64,
    /// Number of contours traced in the mask, outer and hole borders alike.
    pub contour_count: usize,
    /// The first traced contour; `x` is the column and `y` the row.
    pub outer: Contour<i32>,
}

/// Traces every border in a contour mask.
///
/// Every boundary pixel is kept, no polyline simplification is applied. Points
/// use `x` for the array column and `y` for the array row. Contours come out in
/// raster order of their starting pixel, so the first one is an outer border.
pub fn trace_contours(mask: &ContourMask) -> Vec<Contour<i32>> {
    find_contours::<i32>(&mask.to_gray_image())
}

/// Calculates the closed-loop length of a polyline under anisotropic spacing.
///
/// Consecutive points are joined by straight segments whose `x` extent is
/// scaled by `spacing.col` and `y` extent by `spacing.row`; the segment from
/// the last point back to the first is included.
///
/// # Arguments
///
/// * `points`: The polyline vertices, `x` = column, `y` = row.
/// * `spacing`: Physical size of one pixel step along each array axis.
///
/// # Returns
///
/// The length as `f64`; `0.0` for fewer than two points.
pub fn spaced_perimeter<T>(points: &[Point<T>], spacing: ArraySpacing) -> f64
where
    T: Num + NumCast + Copy + AsPrimitive<f64>,
{
    points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(p1, p2)| {
            let dx: f64 = (p2.x.as_() - p1.x.as_()) * spacing.col;
            let dy: f64 = (p2.y.as_() - p1.y.as_()) * spacing.row;
            dx.hypot(dy)
        })
        .sum()
}

/// Calculates the spaced perimeter of each contour and sorts them in descending order.
///
/// This function takes a vector of `Contour<T>` objects, computes the perimeter for each one
/// with [`spaced_perimeter`], and returns a new vector of tuples, where each tuple contains the
/// original contour and its perimeter as an `f64`. The returned vector is sorted based on the
/// perimeter in descending order.
///
/// For performance, this function takes ownership of the input vector and uses an unstable sort.
///
/// # Type Parameters
///
/// * `T`: The numeric type of the point coordinates within the contour. It must be a type
///   that can be losslessly converted to `f64` for distance calculations, such as `i32` or `u32`.
///
/// # Arguments
///
/// * `contours`: A `Vec<Contour<T>>` which will be consumed by the function.
/// * `spacing`: The array-order pixel spacing the contours were traced under.
///
/// # Returns
///
/// A `Vec<(Contour<T>, f64)>` sorted by the perimeter in descending order.
/// Contours with 0 or 1 point will have a perimeter of `0.0`.
///
pub fn sort_by_perimeters_owned<T>(
    contours: Vec<Contour<T>>,
    spacing: ArraySpacing,
) -> Vec<(Contour<T>, f64)>
where
    T: Num + NumCast + Copy + PartialEq + Eq + AsPrimitive<f64>,
{
    let mut contours_with_perimeters: Vec<(Contour<T>, f64)> = contours
        .into_iter()
        .map(|contour| {
            let perimeter = spaced_perimeter(&contour.points, spacing);
            (contour, perimeter)
        })
        .collect();

    contours_with_perimeters.sort_unstable_by(|a, b| b.1.total_cmp(&a.1));

    contours_with_perimeters
}

/// Measures the outer boundary of a contour mask, rejecting non-anatomical slices.
///
/// All borders in `mask` are traced and counted. A count at or above
/// `invalid_contour_threshold` fails with [`Error::InvalidSlice`]; valid slices
/// usually show two or three. Otherwise the first traced contour, which has no
/// parent once islands have been removed, is measured with
/// [`spaced_perimeter`] as a closed loop.
///
/// # Errors
///
/// * [`Error::InvalidSlice`] when too many contours are traced.
/// * [`Error::EmptyRegion`] when the mask holds no boundary at all.
pub fn measure(mask: &ContourMask, invalid_contour_threshold: usize) -> Result<ContourMeasurement> {
    let contours = trace_contours(mask);
    let contour_count = contours.len();
    tracing::debug!(contour_count, "Traced contours");

    if contour_count >= invalid_contour_threshold {
        return Err(Error::InvalidSlice { contour_count });
    }
    let outer = contours.into_iter().next().ok_or(Error::EmptyRegion)?;
    let perimeter = spaced_perimeter(&outer.points, mask.spacing);

    Ok(ContourMeasurement {
        perimeter,
        contour_count,
        outer,
    })
}
