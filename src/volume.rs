//! 3D scalar volumes and their physical geometry.

use nalgebra::{Matrix3, Vector3};
use ndarray::Array3;

use crate::error::{Error, Result};

/// Spatial unit recorded in the volume header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialUnit {
    Meters,
    Millimeters,
    Micrometers,
}

impl SpatialUnit {
    pub fn label(self) -> &'static str {
        match self {
            SpatialUnit::Meters => "meters (m)",
            SpatialUnit::Millimeters => "millimeters (mm)",
            SpatialUnit::Micrometers => "micrometers (um)",
        }
    }
}

/// Smallest `|det(direction)|` accepted for a volume's direction cosines.
const MIN_DIRECTION_DETERMINANT: f64 = 1e-6;

/// Unit label used when a volume carries no unit metadata.
pub const DEFAULT_UNIT_LABEL: &str = "millimeters (mm)";

/// A 3D scalar image placed in physical (LPS) space.
///
/// Voxels are indexed `[x, y, z]`. A voxel at continuous index `i` sits at
/// `origin + direction * diag(spacing) * i`.
#[derive(Debug, Clone)]
pub struct Volume {
    voxels: Array3<f32>,
    spacing: [f64; 3],
    origin: Vector3<f64>,
    direction: Matrix3<f64>,
    /// Inverse of `direction * diag(spacing)`.
    inverse: Matrix3<f64>,
    units: Option<SpatialUnit>,
}

impl Volume {
    /// Creates a volume with identity direction cosines.
    pub fn new(voxels: Array3<f32>, spacing: [f64; 3], origin: [f64; 3]) -> Result<Self> {
        Self::with_direction(voxels, spacing, origin, Matrix3::identity())
    }

    /// Creates a volume with explicit direction cosines, one column per index axis.
    ///
    /// Fails on an empty voxel array, non-positive spacing, or a direction
    /// matrix that is singular or not finite.
    pub fn with_direction(
        voxels: Array3<f32>,
        spacing: [f64; 3],
        origin: [f64; 3],
        direction: Matrix3<f64>,
    ) -> Result<Self> {
        if voxels.is_empty() {
            return Err(Error::invalid("size", format!("{:?}", voxels.dim())));
        }
        for s in spacing {
            if !(s.is_finite() && s > 0.0) {
                return Err(Error::invalid("spacing", format!("{spacing:?}")));
            }
        }
        let determinant = direction.determinant();
        let inverse = (direction * Matrix3::from_diagonal(&Vector3::from(spacing))).try_inverse();
        let inverse = match inverse {
            Some(inverse)
                if determinant.abs() >= MIN_DIRECTION_DETERMINANT
                    && inverse.iter().all(|v| v.is_finite()) =>
            {
                inverse
            }
            _ => return Err(Error::invalid("direction", format!("{direction:?}"))),
        };
        Ok(Self {
            voxels,
            spacing,
            origin: Vector3::from(origin),
            direction,
            inverse,
            units: None,
        })
    }

    pub fn with_units(mut self, units: Option<SpatialUnit>) -> Self {
        self.units = units;
        self
    }

    pub fn voxels(&self) -> &Array3<f32> {
        &self.voxels
    }

    pub fn size(&self) -> [usize; 3] {
        let (nx, ny, nz) = self.voxels.dim();
        [nx, ny, nz]
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn origin(&self) -> Vector3<f64> {
        self.origin
    }

    pub fn direction(&self) -> &Matrix3<f64> {
        &self.direction
    }

    pub fn units(&self) -> Option<SpatialUnit> {
        self.units
    }

    pub fn unit_label(&self) -> &'static str {
        self.units.map_or(DEFAULT_UNIT_LABEL, SpatialUnit::label)
    }

    fn index_to_physical_matrix(&self) -> Matrix3<f64> {
        self.direction * Matrix3::from_diagonal(&Vector3::from(self.spacing))
    }

    /// Physical position of a continuous voxel index.
    pub fn index_to_physical(&self, index: Vector3<f64>) -> Vector3<f64> {
        self.origin + self.index_to_physical_matrix() * index
    }

    /// Linear part of [`Volume::physical_to_index`].
    pub(crate) fn physical_to_index_matrix(&self) -> &Matrix3<f64> {
        &self.inverse
    }

    /// Continuous voxel index of a physical position.
    pub fn physical_to_index(&self, point: Vector3<f64>) -> Vector3<f64> {
        self.inverse * (point - self.origin)
    }

    /// Physical position of the voxel-grid midpoint, `(dim - 1) / 2` on every axis.
    pub fn center(&self) -> Vector3<f64> {
        let [nx, ny, nz] = self.size();
        let mid = Vector3::new(
            (nx as f64 - 1.0) / 2.0,
            (ny as f64 - 1.0) / 2.0,
            (nz as f64 - 1.0) / 2.0,
        );
        self.index_to_physical(mid)
    }

    /// Trilinear interpolation at a continuous index. Samples outside the grid are 0.
    pub fn sample(&self, index: Vector3<f64>) -> f32 {
        let [nx, ny, nz] = self.size();
        let dims = [nx, ny, nz];
        let mut base = [0usize; 3];
        let mut frac = [0f64; 3];
        for axis in 0..3 {
            let c = index[axis];
            let last = (dims[axis] - 1) as f64;
            // Tolerate round-off right at the grid edge.
            if c < -1e-9 || c > last + 1e-9 || !c.is_finite() {
                return 0.0;
            }
            let c = c.clamp(0.0, last);
            let floor = c.floor();
            base[axis] = floor as usize;
            frac[axis] = c - floor;
        }

        let mut value = 0.0f64;
        for corner in 0..8usize {
            let mut weight = 1.0;
            let mut idx = [0usize; 3];
            for axis in 0..3 {
                let upper = (corner >> axis) & 1 == 1;
                let f = frac[axis];
                weight *= if upper { f } else { 1.0 - f };
                idx[axis] = if upper {
                    (base[axis] + 1).min(dims[axis] - 1)
                } else {
                    base[axis]
                };
            }
            if weight != 0.0 {
                value += weight * f64::from(self.voxels[[idx[0], idx[1], idx[2]]]);
            }
        }
        value as f32
    }

    /// Same grid, new voxel values.
    pub(crate) fn with_voxels(&self, voxels: Array3<f32>) -> Self {
        debug_assert_eq!(voxels.dim(), self.voxels.dim());
        Self {
            voxels,
            ..self.clone()
        }
    }

    /// Assembles a re-indexed copy whose `inverse` was derived alongside `direction`.
    pub(crate) fn from_parts(
        voxels: Array3<f32>,
        spacing: [f64; 3],
        origin: Vector3<f64>,
        direction: Matrix3<f64>,
        inverse: Matrix3<f64>,
        units: Option<SpatialUnit>,
    ) -> Self {
        Self {
            voxels,
            spacing,
            origin,
            direction,
            inverse,
            units,
        }
    }

    /// The geometry tuple volumes must share to be processed as one group.
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            size: self.size(),
            spacing: self.spacing,
            center: self.center().into(),
        }
    }
}

/// `(size, spacing, center)` of a volume.
#[derive(Debug, Clone, Copy)]
pub struct GroupKey {
    pub size: [usize; 3],
    pub spacing: [f64; 3],
    pub center: [f64; 3],
}

impl GroupKey {
    const TOLERANCE: f64 = 1e-6;

    /// Whether two volumes can be batch-processed together.
    pub fn matches(&self, other: &GroupKey) -> bool {
        let close = |a: &[f64; 3], b: &[f64; 3]| {
            a.iter()
                .zip(b)
                .all(|(x, y)| (x - y).abs() <= Self::TOLERANCE * x.abs().max(1.0))
        };
        self.size == other.size
            && close(&self.spacing, &other.spacing)
            && close(&self.center, &other.center)
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(nx: usize, ny: usize, nz: usize) -> Array3<f32> {
        Array3::from_shape_fn((nx, ny, nz), |(x, y, z)| (x + 10 * y + 100 * z) as f32)
    }

    #[test]
    fn center_is_physical_grid_midpoint() {
        let volume = Volume::new(ramp(5, 4, 3), [2.0, 1.0, 0.5], [10.0, -4.0, 1.0]).unwrap();
        let center = volume.center();
        assert_relative_eq!(center.x, 10.0 + 2.0 * 2.0);
        assert_relative_eq!(center.y, -4.0 + 1.5);
        assert_relative_eq!(center.z, 1.0 + 0.5);
    }

    #[test]
    fn physical_round_trip() {
        let direction = Matrix3::new(0.0, 1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let volume =
            Volume::with_direction(ramp(4, 4, 4), [1.5, 0.5, 2.0], [3.0, 2.0, 1.0], direction)
                .unwrap();
        let index = Vector3::new(1.25, 2.0, 3.5);
        let back = volume.physical_to_index(volume.index_to_physical(index));
        assert_relative_eq!(back, index, epsilon = 1e-12);
    }

    #[test]
    fn rejects_degenerate_direction() {
        // Second and third columns coincide, as in a collapsed sform.
        let collapsed = Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0);
        let nearly_flat = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 1e-9));
        let poisoned = Matrix3::from_diagonal(&Vector3::new(1.0, f64::NAN, 1.0));
        for direction in [collapsed, nearly_flat, poisoned, Matrix3::zeros()] {
            assert!(
                matches!(
                    Volume::with_direction(ramp(2, 2, 2), [1.0; 3], [0.0; 3], direction),
                    Err(Error::InvalidParameter { field: "direction", .. })
                ),
                "{direction:?}"
            );
        }
        // Mirrored axes are fine.
        let mirrored = Matrix3::from_diagonal(&Vector3::new(-1.0, 1.0, -1.0));
        assert!(Volume::with_direction(ramp(2, 2, 2), [1.0; 3], [0.0; 3], mirrored).is_ok());
    }

    #[test]
    fn sample_interpolates_and_zero_pads() {
        let volume = Volume::new(ramp(3, 3, 3), [1.0; 3], [0.0; 3]).unwrap();
        assert_eq!(volume.sample(Vector3::new(1.0, 1.0, 1.0)), 111.0);
        assert_relative_eq!(volume.sample(Vector3::new(0.5, 0.0, 0.0)), 0.5);
        assert_relative_eq!(volume.sample(Vector3::new(0.0, 0.5, 0.5)), 55.0);
        assert_eq!(volume.sample(Vector3::new(2.0, 2.0, 2.0)), 222.0);
        assert_eq!(volume.sample(Vector3::new(-0.5, 1.0, 1.0)), 0.0);
        assert_eq!(volume.sample(Vector3::new(1.0, 2.5, 1.0)), 0.0);
    }

    #[test]
    fn rejects_invalid_spacing() {
        assert!(matches!(
            Volume::new(ramp(2, 2, 2), [1.0, 0.0, 1.0], [0.0; 3]),
            Err(Error::InvalidParameter { field: "spacing", .. })
        ));
    }

    #[test]
    fn group_key_compares_geometry() {
        let a = Volume::new(ramp(4, 4, 4), [1.0; 3], [0.0; 3]).unwrap();
        let b = a.with_voxels(Array3::zeros((4, 4, 4)));
        let c = Volume::new(ramp(4, 4, 4), [1.0; 3], [1.0, 0.0, 0.0]).unwrap();
        let d = Volume::new(ramp(4, 4, 5), [1.0; 3], [0.0; 3]).unwrap();
        assert_eq!(a.group_key(), b.group_key());
        assert_ne!(a.group_key(), c.group_key());
        assert_ne!(a.group_key(), d.group_key());
    }

    #[test]
    fn unit_label_falls_back_to_millimeters() {
        let volume = Volume::new(ramp(2, 2, 2), [1.0; 3], [0.0; 3]).unwrap();
        assert_eq!(volume.unit_label(), "millimeters (mm)");
        let volume = volume.with_units(Some(SpatialUnit::Micrometers));
        assert_eq!(volume.unit_label(), "micrometers (um)");
    }
}
