//! Area-averaging downscale.
//!
//! Every destination pixel is the mean of the source pixels it covers, which
//! keeps the color distribution of the artwork intact while shrinking the
//! number of points fed to k-means.

use image::{imageops, RgbImage};

use crate::{Result, SpotihueError};

/// Scales `image` to `percentage` percent of its width and height.
///
/// The percentage must lie strictly between 0 and 100. Dimensions are
/// truncated and never drop below one pixel.
pub fn resize_by_percentage(image: &RgbImage, percentage: f64) -> Result<RgbImage> {
    if !(percentage > 0.0 && percentage < 100.0) {
        return Err(SpotihueError::invalid_input(format!(
            "resize percentage must be within (0, 100), got {percentage}"
        )));
    }

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(SpotihueError::invalid_input("cannot resize an empty image"));
    }

    let out_width = scaled_dimension(width, percentage);
    let out_height = scaled_dimension(height, percentage);
    Ok(imageops::thumbnail(image, out_width, out_height))
}

fn scaled_dimension(size: u32, percentage: f64) -> u32 {
    ((size as f64 * percentage / 100.0) as u32).max(1)
}
