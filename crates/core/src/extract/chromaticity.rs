//! Conversion of cluster centers into CIE 1931 chromaticity coordinates.

use serde::{Deserialize, Serialize};

use super::Rgb;

const WHITE: Rgb = [255.0, 255.0, 255.0];
const GAMMA_THRESHOLD: f64 = 0.04045;

/// A color as understood by the light bridge: an `(x, y)` point in the CIE
/// 1931 diagram. Both coordinates lie in `[0, 1]` and `x + y <= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightColor {
    pub x: f64,
    pub y: f64,
}

impl LightColor {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Chromaticity of full white under the Wide RGB D65 matrix.
    pub fn white_point() -> Self {
        rgb_to_light_color(WHITE)
    }
}

impl From<LightColor> for (f64, f64) {
    fn from(color: LightColor) -> Self {
        (color.x, color.y)
    }
}

/// Runs a cluster center through the black guard, normalisation, gamma
/// correction and the RGB → XYZ → xy conversion.
pub fn rgb_to_light_color(center: Rgb) -> LightColor {
    let center = replace_black(center);
    let linear = center.map(|channel| srgb_to_linear(channel.clamp(0.0, 255.0) / 255.0));
    let (x, y, z) = linear_rgb_to_xyz(linear);
    xyz_to_xy(x, y, z).unwrap_or_else(LightColor::white_point)
}

/// Pure black has no chromaticity; the lights get white instead.
fn replace_black(center: Rgb) -> Rgb {
    if center.iter().all(|channel| *channel == 0.0) {
        WHITE
    } else {
        center
    }
}

/// sRGB inverse companding of a channel already normalised to `[0, 1]`.
pub fn srgb_to_linear(value: f64) -> f64 {
    if value > GAMMA_THRESHOLD {
        ((value + 0.055) / 1.055).powf(2.4)
    } else {
        value / 12.92
    }
}

/// Wide RGB D65 conversion.
pub fn linear_rgb_to_xyz([r, g, b]: Rgb) -> (f64, f64, f64) {
    let x = r * 0.649926 + g * 0.103455 + b * 0.197109;
    let y = r * 0.234327 + g * 0.743075 + b * 0.022598;
    let z = g * 0.053077 + b * 1.035763;
    (x, y, z)
}

/// Projects XYZ onto the xy plane, rounded to four decimals. Returns `None`
/// when the tristimulus sum is zero and the projection is undefined.
pub fn xyz_to_xy(x: f64, y: f64, z: f64) -> Option<LightColor> {
    let total = x + y + z;
    if !total.is_finite() || total <= 0.0 {
        return None;
    }

    let cx = round4(x / total);
    let mut cy = round4(y / total);
    // Independent rounding can push the sum a hair over one.
    if cx + cy > 1.0 {
        cy = round4(1.0 - cx);
    }
    Some(LightColor::new(cx, cy))
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
