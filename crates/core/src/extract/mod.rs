//! Album artwork → light colors.
//!
//! The pipeline decodes the artwork, shrinks it with area averaging, clusters
//! the remaining pixels with a seeded k-means and turns every cluster center
//! into an `(x, y)` chromaticity the light bridge understands. Nothing here
//! performs I/O; the same bytes and configuration always yield the same
//! colors.

mod chromaticity;
mod kmeans;
mod resize;

use image::RgbImage;

pub use chromaticity::{
    linear_rgb_to_xyz, rgb_to_light_color, srgb_to_linear, xyz_to_xy, LightColor,
};
pub use kmeans::{Clustering, KMeans, MAX_CLUSTERS};
pub use resize::resize_by_percentage;

use crate::{config::ExtractionConfig, Result};

/// One pixel or cluster center, channels in `0.0..=255.0`.
pub type Rgb = [f64; 3];

/// Derives `k` light colors from encoded artwork using the default
/// extraction settings.
pub fn derive_light_colors(artwork: &[u8], k: usize) -> Result<Vec<LightColor>> {
    let config = ExtractionConfig {
        clusters: k,
        ..ExtractionConfig::default()
    };
    ColorExtractor::new(config).derive_light_colors(artwork)
}

/// Configured extraction pipeline.
#[derive(Debug, Clone, Default)]
pub struct ColorExtractor {
    config: ExtractionConfig,
}

impl ColorExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Runs the complete pipeline on encoded image bytes.
    pub fn derive_light_colors(&self, artwork: &[u8]) -> Result<Vec<LightColor>> {
        let image = decode(artwork)?;
        self.colors_from_image(&image)
    }

    /// Runs the pipeline on an already decoded image.
    pub fn colors_from_image(&self, image: &RgbImage) -> Result<Vec<LightColor>> {
        let kmeans = KMeans::from_config(&self.config)?;
        let resized = resize_by_percentage(image, self.config.resize_percentage)?;
        let pixels = flatten(&resized);
        let clustering = kmeans.fit(&pixels)?;

        tracing::debug!(
            width = resized.width(),
            height = resized.height(),
            clusters = kmeans.k(),
            inertia = clustering.inertia,
            "clustered artwork"
        );

        Ok(light_colors(&clustering.centers))
    }
}

/// Decodes compressed image bytes into an 8-bit RGB grid.
pub fn decode(artwork: &[u8]) -> Result<RgbImage> {
    Ok(image::load_from_memory(artwork)?.to_rgb8())
}

/// Reinterprets an H×W×3 grid as a list of H·W color vectors, row by row.
pub fn flatten(image: &RgbImage) -> Vec<Rgb> {
    image
        .pixels()
        .map(|pixel| pixel.0.map(|channel| channel as f64))
        .collect()
}

/// Converts cluster centers to light colors, preserving their order.
pub fn light_colors(centers: &[Rgb]) -> Vec<LightColor> {
    centers.iter().copied().map(rgb_to_light_color).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb as Pixel};

    use super::*;
    use crate::SpotihueError;

    pub(crate) fn png_bytes(image: &RgbImage) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, ImageFormat::Png)
            .expect("encoding a test image should succeed");
        buffer.into_inner()
    }

    pub(crate) fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        png_bytes(&RgbImage::from_pixel(width, height, Pixel(rgb)))
    }

    #[test]
    fn red_artwork_yields_repeated_red() {
        let colors = derive_light_colors(&solid_png(2, 2, [255, 0, 0]), 3).unwrap();
        assert_eq!(colors, vec![LightColor::new(0.735, 0.265); 3]);
    }

    #[test]
    fn black_artwork_yields_white() {
        let colors = derive_light_colors(&solid_png(8, 8, [0, 0, 0]), 2).unwrap();
        assert_eq!(colors, vec![LightColor::white_point(); 2]);
    }

    #[test]
    fn two_tone_artwork_yields_both_tones() {
        let image = RgbImage::from_fn(20, 20, |x, _| {
            if x < 10 {
                Pixel([255, 0, 0])
            } else {
                Pixel([0, 0, 255])
            }
        });
        let extractor = ColorExtractor::new(ExtractionConfig {
            clusters: 2,
            resize_percentage: 50.0,
            ..ExtractionConfig::default()
        });
        let colors = extractor.derive_light_colors(&png_bytes(&image)).unwrap();
        assert_eq!(colors.len(), 2);

        assert!(colors.contains(&LightColor::new(0.735, 0.265)));
        assert!(colors.contains(&rgb_to_light_color([0.0, 0.0, 255.0])));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = derive_light_colors(b"definitely not a png", 3).unwrap_err();
        assert!(matches!(err, SpotihueError::Decode(_)));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let artwork = solid_png(4, 4, [10, 20, 30]);
        assert!(matches!(
            derive_light_colors(&artwork, 0),
            Err(SpotihueError::InvalidInput(_))
        ));

        let extractor = ColorExtractor::new(ExtractionConfig {
            resize_percentage: 0.0,
            ..ExtractionConfig::default()
        });
        assert!(matches!(
            extractor.derive_light_colors(&artwork),
            Err(SpotihueError::InvalidInput(_))
        ));
    }

    #[test]
    fn flatten_keeps_row_major_order() {
        let image = RgbImage::from_fn(2, 2, |x, y| Pixel([x as u8, y as u8, 7]));
        assert_eq!(
            flatten(&image),
            vec![
                [0.0, 0.0, 7.0],
                [1.0, 0.0, 7.0],
                [0.0, 1.0, 7.0],
                [1.0, 1.0, 7.0],
            ]
        );
    }
}
