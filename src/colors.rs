//! Overlay colours.

use image::Rgb;
use palette::{FromColor, Hsl, Srgb};

const SATURATION: f32 = 0.9;
const LIGHTNESS: f32 = 0.5;

fn from_hue(degrees: f32) -> Rgb<u8> {
    let srgb: Srgb<u8> = Srgb::from_color(Hsl::new(degrees, SATURATION, LIGHTNESS)).into_format();
    Rgb([srgb.red, srgb.green, srgb.blue])
}

/// Colour of the measured boundary; the first entry of every [`contour_palette`].
pub(crate) fn measured_colour() -> Rgb<u8> {
    from_hue(0.0)
}

/// `n` colours with hues spread evenly around the wheel, starting at red.
pub(crate) fn contour_palette(n: usize) -> Vec<Rgb<u8>> {
    (0..n)
        .map(|i| from_hue(i as f32 * 360.0 / n as f32))
        .collect()
}
