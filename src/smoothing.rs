//! Edge-preserving smoothing by gradient anisotropic diffusion.

use image::Luma;

use crate::error::{Error, Result};
use crate::plane::{FloatImage, PlaneSpacing};

/// Largest stable time-step for diffusion on a 2D image, `1 / 2^2`.
pub const STABLE_TIME_STEP_2D: f64 = 0.25;

/// Diffusion parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingParams {
    conductance: f64,
    iterations: u32,
    time_step: f64,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            conductance: 3.0,
            iterations: 5,
            time_step: 0.0625,
        }
    }
}

impl SmoothingParams {
    /// Validates and builds diffusion parameters.
    ///
    /// Lower conductance preserves edges more strongly; every iteration costs one
    /// pass over the image. Time-steps above [`STABLE_TIME_STEP_2D`] are accepted
    /// but may diverge.
    pub fn new(conductance: f64, iterations: u32, time_step: f64) -> Result<Self> {
        if !(conductance.is_finite() && conductance > 0.0) {
            return Err(Error::invalid("conductance", conductance));
        }
        if iterations < 1 {
            return Err(Error::invalid("iterations", iterations));
        }
        if !(time_step.is_finite() && time_step > 0.0) {
            return Err(Error::invalid("time_step", time_step));
        }
        if time_step > STABLE_TIME_STEP_2D {
            tracing::warn!(
                time_step,
                limit = STABLE_TIME_STEP_2D,
                "Diffusion time-step exceeds the 2D stability bound"
            );
        }
        Ok(Self {
            conductance,
            iterations,
            time_step,
        })
    }

    pub fn conductance(&self) -> f64 {
        self.conductance
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }
}

/// Zero-flux (edge replicating) view of a row-major buffer.
struct Field<'a> {
    values: &'a [f64],
    width: i64,
    height: i64,
}

impl Field<'_> {
    fn at(&self, x: i64, y: i64) -> f64 {
        let x = x.clamp(0, self.width - 1);
        let y = y.clamp(0, self.height - 1);
        self.values[(y * self.width + x) as usize]
    }

    /// Value at `(x, y)` shifted by `steps` along `dim` (0 = x, 1 = y).
    fn shifted(&self, x: i64, y: i64, shifts: [(usize, i64); 2]) -> f64 {
        let mut p = [x, y];
        for (dim, step) in shifts {
            p[dim] += step;
        }
        self.at(p[0], p[1])
    }

    fn average_gradient_magnitude_squared(&self, scale: [f64; 2]) -> f64 {
        let mut total = 0.0;
        for y in 0..self.height {
            for x in 0..self.width {
                for (dim, s) in scale.iter().enumerate() {
                    let d = 0.5
                        * (self.shifted(x, y, [(dim, 1), (dim, 0)])
                            - self.shifted(x, y, [(dim, -1), (dim, 0)]))
                        * s;
                    total += d * d;
                }
            }
        }
        total / (self.width * self.height) as f64
    }

    /// Divergence of the conductance-weighted gradient at one pixel.
    fn update(&self, x: i64, y: i64, scale: [f64; 2], k: f64) -> f64 {
        let center = self.at(x, y);
        let mut delta = 0.0;
        for i in 0..2 {
            let forward = (self.shifted(x, y, [(i, 1), (i, 0)]) - center) * scale[i];
            let backward = (center - self.shifted(x, y, [(i, -1), (i, 0)])) * scale[i];

            let mut accum = 0.0;
            let mut accum_back = 0.0;
            for j in (0..2).filter(|&j| j != i) {
                let across = 0.5
                    * (self.shifted(x, y, [(j, 1), (j, 0)]) - self.shifted(x, y, [(j, -1), (j, 0)]))
                    * scale[j];
                let ahead = 0.5
                    * (self.shifted(x, y, [(i, 1), (j, 1)]) - self.shifted(x, y, [(i, 1), (j, -1)]))
                    * scale[j];
                let behind = 0.5
                    * (self.shifted(x, y, [(i, -1), (j, 1)])
                        - self.shifted(x, y, [(i, -1), (j, -1)]))
                    * scale[j];
                accum += 0.25 * (ahead + across).powi(2);
                accum_back += 0.25 * (behind + across).powi(2);
            }

            let c_forward = ((forward * forward + accum) / k).exp();
            let c_backward = ((backward * backward + accum_back) / k).exp();
            delta += forward * c_forward - backward * c_backward;
        }
        delta
    }
}

/// Smooths `image` while preserving strong edges.
///
/// Each iteration scales the conductance by the image's average squared
/// gradient magnitude, so the result does not depend on the intensity range.
/// Derivatives are taken in physical units using `spacing`.
pub fn anisotropic_diffusion(
    image: &FloatImage,
    spacing: PlaneSpacing,
    params: &SmoothingParams,
) -> FloatImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }
    let scale = [1.0 / spacing.x, 1.0 / spacing.y];
    let mut values: Vec<f64> = image.pixels().map(|p| f64::from(p.0[0])).collect();
    let mut next = vec![0.0; values.len()];

    for iteration in 0..params.iterations {
        let field = Field {
            values: &values,
            width: i64::from(width),
            height: i64::from(height),
        };
        let average = field.average_gradient_magnitude_squared(scale);
        if average == 0.0 {
            tracing::debug!(iteration, "Image is flat, stopping diffusion early");
            break;
        }
        let k = average * params.conductance * params.conductance * -2.0;

        for y in 0..field.height {
            for x in 0..field.width {
                let index = (y * field.width + x) as usize;
                next[index] = values[index] + params.time_step * field.update(x, y, scale, k);
            }
        }
        std::mem::swap(&mut values, &mut next);
    }

    FloatImage::from_fn(width, height, |x, y| {
        Luma([values[(y * width + x) as usize] as f32])
    })
}
