//! Anatomical views and axis reorientation.
//!
//! Orientation codes are three letters, one per voxel axis, naming the anatomical
//! direction in which that index increases (LPS physical space: `L` = +x, `P` = +y,
//! `S` = +z, with `R`, `A`, `I` their opposites).

use std::fmt;
use std::str::FromStr;

use nalgebra::{Matrix3, Vector3};
use ndarray::Axis as ArrayAxis;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::volume::Volume;

/// One of the three fixed slicing planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum View {
    /// Sagittal
    X,
    /// Coronal
    Y,
    /// Axial
    #[default]
    Z,
}

impl View {
    pub const ALL: [View; 3] = [View::X, View::Y, View::Z];

    /// Axis of the (reoriented, resampled) volume that slices are taken along.
    pub fn slice_axis(self) -> usize {
        match self {
            View::X => 0,
            View::Y => 1,
            View::Z => 2,
        }
    }

    /// The two volume axes spanning the slice, in image order `(x, y)`.
    pub fn in_plane_axes(self) -> [usize; 2] {
        match self {
            View::X => [1, 2],
            View::Y => [0, 2],
            View::Z => [0, 1],
        }
    }

    /// The fixed target orientation for this view.
    ///
    /// The Z code keeps the conventional axial layout. The X code reverses the
    /// left-right index direction relative to the other two, which makes positive
    /// rotations about X appear mirrored next to a clinical viewer; this is kept as
    /// is until it is checked against a reference tool.
    pub fn orientation(self) -> OrientationCode {
        match self {
            View::X => OrientationCode::RPI,
            View::Y => OrientationCode::LPI,
            View::Z => OrientationCode::LPS,
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            View::X => "x",
            View::Y => "y",
            View::Z => "z",
        };
        f.write_str(name)
    }
}

impl FromStr for View {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" | "sagittal" => Ok(View::X),
            "y" | "coronal" => Ok(View::Y),
            "z" | "axial" => Ok(View::Z),
            _ => Err(Error::InvalidView(s.to_string())),
        }
    }
}

/// Target axis convention, see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationCode {
    LPS,
    LPI,
    RPI,
}

impl OrientationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            OrientationCode::LPS => "LPS",
            OrientationCode::LPI => "LPI",
            OrientationCode::RPI => "RPI",
        }
    }

    /// Unit LPS direction of each voxel axis.
    pub fn axis_directions(self) -> [Vector3<f64>; 3] {
        let mut directions = [Vector3::zeros(); 3];
        for (direction, letter) in directions.iter_mut().zip(self.as_str().chars()) {
            *direction = letter_direction(letter);
        }
        directions
    }
}

impl fmt::Display for OrientationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn letter_direction(letter: char) -> Vector3<f64> {
    match letter {
        'L' => Vector3::x(),
        'R' => -Vector3::x(),
        'P' => Vector3::y(),
        'A' => -Vector3::y(),
        'S' => Vector3::z(),
        _ => -Vector3::z(),
    }
}

/// Which source axis feeds each target axis, and whether it runs backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AxisMapping {
    source: [usize; 3],
    flip: [bool; 3],
}

impl AxisMapping {
    fn is_identity(&self) -> bool {
        self.source == [0, 1, 2] && self.flip == [false; 3]
    }
}

/// Pairs target axes with source axes by descending direction-cosine magnitude.
fn axis_mapping(direction: &Matrix3<f64>, code: OrientationCode) -> AxisMapping {
    let targets = code.axis_directions();
    let mut candidates = Vec::with_capacity(9);
    for (target_axis, target) in targets.iter().enumerate() {
        for source_axis in 0..3 {
            let cosine = direction.column(source_axis).dot(target);
            candidates.push((cosine, target_axis, source_axis));
        }
    }
    // Stable sort keeps index order on ties.
    candidates.sort_by(|a, b| b.0.abs().total_cmp(&a.0.abs()));

    let mut mapping = AxisMapping {
        source: [usize::MAX; 3],
        flip: [false; 3],
    };
    let mut used = [false; 3];
    for (cosine, target_axis, source_axis) in candidates {
        if mapping.source[target_axis] != usize::MAX || used[source_axis] {
            continue;
        }
        mapping.source[target_axis] = source_axis;
        mapping.flip[target_axis] = cosine < 0.0;
        used[source_axis] = true;
    }
    mapping
}

/// Size `volume` will have after [`normalize`], without touching its voxels.
pub fn oriented_size(volume: &Volume, view: View) -> [usize; 3] {
    let mapping = axis_mapping(volume.direction(), view.orientation());
    let size = volume.size();
    mapping.source.map(|axis| size[axis])
}

/// Re-indexes `volume` so its axes follow the orientation code of `view`.
///
/// Voxels keep their physical positions: spacing is permuted along with the
/// axes and the origin moves to the new first voxel, so [`Volume::center`] is
/// unchanged. Applying the same view twice is a no-op.
pub fn normalize(volume: &Volume, view: View) -> Volume {
    reorient(volume, view.orientation())
}

/// Re-indexes `volume` to the given orientation code.
pub fn reorient(volume: &Volume, code: OrientationCode) -> Volume {
    let mapping = axis_mapping(volume.direction(), code);
    if mapping.is_identity() {
        return volume.clone();
    }

    let size = volume.size();
    let spacing = volume.spacing();

    let mut view = volume.voxels().view();
    for target_axis in 0..3 {
        if mapping.flip[target_axis] {
            view.invert_axis(ArrayAxis(mapping.source[target_axis]));
        }
    }
    let voxels = view.permuted_axes(mapping.source).as_standard_layout().into_owned();

    let mut first_voxel = Vector3::zeros();
    let mut new_spacing = [0.0; 3];
    let mut new_direction = Matrix3::zeros();
    // Columns of the index-to-physical map move with the axes, so rows of its inverse do too.
    let mut new_inverse = Matrix3::zeros();
    for target_axis in 0..3 {
        let source_axis = mapping.source[target_axis];
        new_spacing[target_axis] = spacing[source_axis];
        let sign = if mapping.flip[target_axis] { -1.0 } else { 1.0 };
        new_direction.set_column(target_axis, &(volume.direction().column(source_axis) * sign));
        new_inverse.set_row(
            target_axis,
            &(volume.physical_to_index_matrix().row(source_axis) * sign),
        );
        if mapping.flip[target_axis] {
            first_voxel[source_axis] = (size[source_axis] - 1) as f64;
        }
    }
    let origin = volume.index_to_physical(first_voxel);

    tracing::debug!(
        orientation = %code,
        source_axes = ?mapping.source,
        flipped = ?mapping.flip,
        "Reoriented volume"
    );

    Volume::from_parts(
        voxels,
        new_spacing,
        origin,
        new_direction,
        new_inverse,
        volume.units(),
    )
}
