#![allow(dead_code)]

use head_circumference::Volume;
use ndarray::Array3;

pub const SIZE: (usize, usize, usize) = (64, 56, 32);
pub const SEMI_AXES: [f64; 3] = [24.0, 18.0, 10.0];
pub const BRAIN: f32 = 100.0;

/// A bright ellipsoid centered in a dark unit-spaced volume.
pub fn ellipsoid() -> Volume {
    ellipsoid_with(SEMI_AXES, BRAIN)
}

pub fn ellipsoid_with(semi_axes: [f64; 3], intensity: f32) -> Volume {
    let (nx, ny, nz) = SIZE;
    let center = [nx, ny, nz].map(|n| (n as f64 - 1.0) / 2.0);
    let voxels = Array3::from_shape_fn(SIZE, |(x, y, z)| {
        let r = [x, y, z]
            .iter()
            .zip(center)
            .zip(semi_axes)
            .map(|((&i, c), a)| ((i as f64 - c) / a).powi(2))
            .sum::<f64>();
        if r <= 1.0 { intensity } else { 0.0 }
    });
    Volume::new(voxels, [1.0; 3], [-10.0, 20.0, 5.0]).unwrap()
}

/// Same geometry as [`ellipsoid`], no signal.
pub fn blank() -> Volume {
    Volume::new(Array3::zeros(SIZE), [1.0; 3], [-10.0, 20.0, 5.0]).unwrap()
}

pub const BOX_SIZE: (usize, usize, usize) = (40, 32, 32);
pub const BOX_SPACING: [f64; 3] = [0.8, 1.25, 1.25];

/// A bright box spanning x 8..=31, y 10..=21, z 12..=19 on an anisotropic grid.
///
/// The box is symmetric about the y/z midpoint and y and z share a spacing, so
/// quarter turns about X map voxel centers onto voxel centers.
pub fn cuboid() -> Volume {
    let voxels = Array3::from_shape_fn(BOX_SIZE, |(x, y, z)| {
        let inside = (8..=31).contains(&x) && (10..=21).contains(&y) && (12..=19).contains(&z);
        if inside { BRAIN } else { 0.0 }
    });
    Volume::new(voxels, BOX_SPACING, [3.0, -7.5, 12.0]).unwrap()
}

/// Ramanujan's approximation of an ellipse perimeter.
pub fn ellipse_perimeter(a: f64, b: f64) -> f64 {
    std::f64::consts::PI * (3.0 * (a + b) - ((3.0 * a + b) * (a + 3.0 * b)).sqrt())
}
