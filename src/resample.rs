//! Rigid rotation about a fixed center and slice extraction.

use std::fmt;

use image::{ImageBuffer, Luma};
use nalgebra::{Matrix3, Rotation3, Vector3};
use ndarray::Array3;

use crate::error::{Error, Result};
use crate::orientation::View;
use crate::plane::{PlaneSpacing, Slice};
use crate::volume::Volume;

/// Largest accepted rotation magnitude, in degrees.
pub const MAX_ROTATION_DEGREES: f64 = 90.0;

/// Rotation axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
        };
        f.write_str(name)
    }
}

/// Rotation angles in degrees, each within `[-90, 90]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RotationAngles {
    x: f64,
    y: f64,
    z: f64,
}

impl RotationAngles {
    pub fn new(x: f64, y: f64, z: f64) -> Result<Self> {
        Ok(Self {
            x: check_angle(Axis::X, x)?,
            y: check_angle(Axis::Y, y)?,
            z: check_angle(Axis::Z, z)?,
        })
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn z(&self) -> f64 {
        self.z
    }

    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Replaces one angle, validating it.
    pub fn with(mut self, axis: Axis, degrees: f64) -> Result<Self> {
        let degrees = check_angle(axis, degrees)?;
        match axis {
            Axis::X => self.x = degrees,
            Axis::Y => self.y = degrees,
            Axis::Z => self.z = degrees,
        }
        Ok(self)
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    /// The rotation these angles describe: `Rz * Rx * Ry`, radians, no translation.
    pub fn rotation(&self) -> Rotation3<f64> {
        let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), self.x.to_radians());
        let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), self.y.to_radians());
        let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), self.z.to_radians());
        rz * rx * ry
    }
}

fn check_angle(axis: Axis, degrees: f64) -> Result<f64> {
    if degrees.is_finite() && degrees.abs() <= MAX_ROTATION_DEGREES {
        Ok(degrees)
    } else {
        Err(Error::RotationOutOfBounds {
            axis,
            angle: degrees,
        })
    }
}

/// Affine map from an output voxel index to the input voxel index it samples.
///
/// An output voxel at physical point `p` reads the input at `R (p - c) + c`.
/// Input and output share one grid, so the map is `A i + b` in index space.
struct IndexMap {
    linear: Matrix3<f64>,
    offset: Vector3<f64>,
}

impl IndexMap {
    fn new(volume: &Volume, center: Vector3<f64>, angles: &RotationAngles) -> Self {
        let scale = volume.direction() * Matrix3::from_diagonal(&Vector3::from(volume.spacing()));
        let inverse = volume.physical_to_index_matrix();
        let rotation = angles.rotation().into_inner();
        let origin = volume.origin();
        Self {
            linear: inverse * rotation * scale,
            offset: inverse * (rotation * (origin - center) + center - origin),
        }
    }

    fn apply(&self, index: Vector3<f64>) -> Vector3<f64> {
        self.linear * index + self.offset
    }
}

/// Resamples the whole volume through a rotation about `center`.
///
/// The output keeps the input grid, so its spacing equals the input spacing
/// exactly; only the sampled content changes. Samples falling outside the
/// input are 0.
pub fn rotate_volume(volume: &Volume, center: Vector3<f64>, angles: &RotationAngles) -> Volume {
    if angles.is_zero() {
        return volume.clone();
    }
    let map = IndexMap::new(volume, center, angles);
    let [nx, ny, nz] = volume.size();
    let voxels = Array3::from_shape_fn((nx, ny, nz), |(x, y, z)| {
        volume.sample(map.apply(Vector3::new(x as f64, y as f64, z as f64)))
    });
    volume.with_voxels(voxels)
}

fn check_slice_index(volume: &Volume, view: View, index: usize) -> Result<()> {
    let axis = view.slice_axis();
    let size = volume.size()[axis];
    if index >= size {
        return Err(Error::SliceOutOfBounds { index, axis, size });
    }
    Ok(())
}

fn plane_geometry(volume: &Volume, view: View) -> (u32, u32, PlaneSpacing) {
    let [a, b] = view.in_plane_axes();
    let size = volume.size();
    let spacing = volume.spacing();
    (
        size[a] as u32,
        size[b] as u32,
        PlaneSpacing::new(spacing[a], spacing[b]),
    )
}

fn plane_index(view: View, index: usize, x: u32, y: u32) -> [usize; 3] {
    let [a, b] = view.in_plane_axes();
    let mut voxel = [0usize; 3];
    voxel[view.slice_axis()] = index;
    voxel[a] = x as usize;
    voxel[b] = y as usize;
    voxel
}

/// The plane at `index` along the view's slice axis.
pub fn extract_slice(volume: &Volume, view: View, index: usize) -> Result<Slice> {
    check_slice_index(volume, view, index)?;
    let (width, height, spacing) = plane_geometry(volume, view);
    let voxels = volume.voxels();
    let image = ImageBuffer::from_fn(width, height, |x, y| {
        Luma([voxels[plane_index(view, index, x, y)]])
    });
    Ok(Slice { image, spacing })
}

/// Rotates about `center` and extracts the plane at `index` along the view's slice axis.
///
/// Equivalent to [`rotate_volume`] followed by [`extract_slice`], but only the
/// requested plane is sampled.
pub fn resample_slice(
    volume: &Volume,
    center: Vector3<f64>,
    angles: &RotationAngles,
    view: View,
    index: usize,
) -> Result<Slice> {
    if angles.is_zero() {
        return extract_slice(volume, view, index);
    }
    check_slice_index(volume, view, index)?;
    let map = IndexMap::new(volume, center, angles);
    let (width, height, spacing) = plane_geometry(volume, view);
    let image = ImageBuffer::from_fn(width, height, |x, y| {
        let [i, j, k] = plane_index(view, index, x, y);
        Luma([volume.sample(map.apply(Vector3::new(i as f64, j as f64, k as f64)))])
    });
    Ok(Slice { image, spacing })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cube(n: usize, spacing: [f64; 3]) -> Volume {
        let voxels = Array3::from_shape_fn((n, n, n), |(x, y, z)| (x + 7 * y + 31 * z) as f32);
        Volume::new(voxels, spacing, [-3.0, 2.0, 10.0]).unwrap()
    }

    #[test]
    fn rejects_out_of_range_angles() {
        assert!(RotationAngles::new(90.0, -90.0, 0.0).is_ok());
        match RotationAngles::new(0.0, 90.5, 0.0) {
            Err(Error::RotationOutOfBounds { axis, angle }) => {
                assert_eq!(axis, Axis::Y);
                assert_eq!(angle, 90.5);
            }
            other => panic!("expected RotationOutOfBounds, got {other:?}"),
        }
        assert!(matches!(
            RotationAngles::default().with(Axis::Z, -91.0),
            Err(Error::RotationOutOfBounds { axis: Axis::Z, .. })
        ));
        assert!(RotationAngles::new(f64::NAN, 0.0, 0.0).is_err());
    }

    #[test]
    fn rotation_preserves_spacing() {
        let volume = cube(6, [0.8, 1.2, 2.5]);
        let center = volume.center();
        for (x, y, z) in [(0.0, 0.0, 0.0), (90.0, -90.0, 45.0), (-30.0, 12.5, -90.0)] {
            let angles = RotationAngles::new(x, y, z).unwrap();
            let rotated = rotate_volume(&volume, center, &angles);
            assert_eq!(rotated.spacing(), volume.spacing());
            assert_eq!(rotated.size(), volume.size());
        }
    }

    #[test]
    fn quarter_turn_about_z_moves_voxels() {
        let volume = cube(5, [1.0; 3]);
        let angles = RotationAngles::new(0.0, 0.0, 90.0).unwrap();
        let rotated = rotate_volume(&volume, volume.center(), &angles);

        // Output (3, 2, 2) reads input at center + Rz(90)(1, 0, 0) = (2, 3, 2).
        assert_relative_eq!(
            rotated.voxels()[[3, 2, 2]],
            volume.voxels()[[2, 3, 2]],
            epsilon = 1e-3
        );
        assert_relative_eq!(
            rotated.voxels()[[2, 2, 2]],
            volume.voxels()[[2, 2, 2]],
            epsilon = 1e-3
        );
    }

    #[test]
    fn slice_matches_rotate_then_extract() {
        let volume = cube(7, [1.0, 0.9, 1.3]);
        let center = volume.center();
        let angles = RotationAngles::new(16.0, 2.0, 22.0).unwrap();
        let rotated = rotate_volume(&volume, center, &angles);

        for view in View::ALL {
            let expected = extract_slice(&rotated, view, 3).unwrap();
            let actual = resample_slice(&volume, center, &angles, view, 3).unwrap();
            assert_eq!(expected.image, actual.image, "view {view}");
            assert_eq!(expected.spacing, actual.spacing, "view {view}");
        }
    }

    #[test]
    fn extract_uses_view_axes() {
        let volume = cube(4, [1.0, 2.0, 3.0]);

        let axial = extract_slice(&volume, View::Z, 1).unwrap();
        assert_eq!(axial.image.get_pixel(2, 3).0[0], volume.voxels()[[2, 3, 1]]);
        assert_eq!(axial.spacing, PlaneSpacing::new(1.0, 2.0));

        let sagittal = extract_slice(&volume, View::X, 2).unwrap();
        assert_eq!(sagittal.image.get_pixel(1, 3).0[0], volume.voxels()[[2, 1, 3]]);
        assert_eq!(sagittal.spacing, PlaneSpacing::new(2.0, 3.0));
    }

    #[test]
    fn out_of_bounds_slice_is_an_error() {
        let volume = cube(4, [1.0; 3]);
        assert!(matches!(
            extract_slice(&volume, View::Y, 4),
            Err(Error::SliceOutOfBounds {
                index: 4,
                axis: 1,
                size: 4
            })
        ));
        let angles = RotationAngles::new(10.0, 0.0, 0.0).unwrap();
        assert!(resample_slice(&volume, volume.center(), &angles, View::Z, 9).is_err());
    }
}
