//! 2D slice types.
//!
//! Two index orders coexist in the pipeline:
//!
//! * **image order**: `(x, y)` as used by [`image::ImageBuffer`], where `x` walks the
//!   first in-plane axis of the volume and `y` the second;
//! * **array order**: `[row, col]` as used by [`ndarray::Array2`], i.e. `row = y`,
//!   `col = x`.
//!
//! A slice and its spacing travel in image order until the contour hand-off, where
//! [`ContourMask::from_image`] transposes both at once. Nothing else converts between
//! the two, so a [`ContourMask`] always carries spacing in its own axis order.

use image::{GrayImage, ImageBuffer, Luma};
use ndarray::Array2;

/// A single-channel floating point image.
pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Physical pixel spacing in image order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneSpacing {
    pub x: f64,
    pub y: f64,
}

impl PlaneSpacing {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// The same spacing expressed for an array-order view of the plane.
    pub fn to_array_order(self) -> ArraySpacing {
        ArraySpacing {
            row: self.y,
            col: self.x,
        }
    }
}

/// Physical pixel spacing in array order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArraySpacing {
    pub row: f64,
    pub col: f64,
}

/// A 2D plane sampled out of a volume, in image order.
#[derive(Debug, Clone)]
pub struct Slice {
    pub image: FloatImage,
    pub spacing: PlaneSpacing,
}

impl Slice {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Boundary pixels (value 1) of the retained region, in array order.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourMask {
    pub pixels: Array2<u8>,
    pub spacing: ArraySpacing,
}

impl ContourMask {
    /// Transposes an image-order binary mask into array order.
    ///
    /// Any non-zero pixel becomes 1.
    pub fn from_image(mask: &GrayImage, spacing: PlaneSpacing) -> Self {
        let (width, height) = mask.dimensions();
        let pixels = Array2::from_shape_fn((height as usize, width as usize), |(row, col)| {
            u8::from(mask.get_pixel(col as u32, row as u32).0[0] != 0)
        });
        Self {
            pixels,
            spacing: spacing.to_array_order(),
        }
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.pixels.dim()
    }

    /// Renders the mask as an 8-bit image (0 or 255) whose x axis is the column axis.
    pub fn to_gray_image(&self) -> GrayImage {
        let (rows, cols) = self.shape();
        GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
            Luma([self.pixels[[y as usize, x as usize]] * 255])
        })
    }

    pub fn count_ones(&self) -> usize {
        self.pixels.iter().filter(|&&v| v != 0).count()
    }
}
