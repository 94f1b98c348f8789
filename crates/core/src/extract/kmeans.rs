//! Seeded k-means over RGB points.
//!
//! Clustering itself is done by `kmeans_colors` (k-means++ seeding, Lloyd
//! iterations). Each restart gets its own seed derived from the configured
//! one and the run with the lowest inertia is kept, so the output only
//! depends on the input and the seed.

use kmeans_colors::get_kmeans;
use palette::Srgb;

use super::Rgb;
use crate::{config::ExtractionConfig, Result, SpotihueError};

/// Cluster labels are stored as `u8` by the clustering crate.
pub const MAX_CLUSTERS: usize = u8::MAX as usize;

/// Stop refining once centers move less than this (squared, unit RGB).
const CONVERGENCE: f32 = 1e-5;

#[derive(Debug, Clone)]
pub struct KMeans {
    k: usize,
    restarts: usize,
    max_iterations: usize,
    seed: u64,
}

/// Outcome of the best clustering run.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    pub centers: Vec<Rgb>,
    /// Sum of squared distances from every point to its closest center.
    pub inertia: f64,
}

impl KMeans {
    pub fn new(k: usize) -> Result<Self> {
        let defaults = ExtractionConfig::default();
        Self::with_params(k, defaults.restarts, defaults.max_iterations, defaults.seed)
    }

    pub fn from_config(config: &ExtractionConfig) -> Result<Self> {
        Self::with_params(
            config.clusters,
            config.restarts,
            config.max_iterations,
            config.seed,
        )
    }

    pub fn with_params(k: usize, restarts: usize, max_iterations: usize, seed: u64) -> Result<Self> {
        if k == 0 || k > MAX_CLUSTERS {
            return Err(SpotihueError::invalid_input(format!(
                "k must be between 1 and {MAX_CLUSTERS}, got {k}"
            )));
        }
        if restarts == 0 || max_iterations == 0 {
            return Err(SpotihueError::invalid_input(
                "k-means needs at least one restart and one iteration",
            ));
        }
        Ok(Self {
            k,
            restarts,
            max_iterations,
            seed,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Clusters `points` into `k` centers.
    ///
    /// With `k` or fewer distinct colors there is nothing to cluster: the
    /// distinct colors are returned in order of appearance, repeated to fill
    /// `k` slots.
    pub fn fit(&self, points: &[Rgb]) -> Result<Clustering> {
        if points.is_empty() {
            return Err(SpotihueError::invalid_input(
                "cannot cluster an empty set of pixels",
            ));
        }

        let distinct = distinct_colors(points, self.k + 1);
        if distinct.len() <= self.k {
            let centers: Vec<Rgb> = (0..self.k)
                .map(|index| distinct[index % distinct.len()])
                .collect();
            return Ok(Clustering {
                inertia: inertia(points, &centers),
                centers,
            });
        }

        let buffer: Vec<Srgb> = points.iter().copied().map(to_unit_rgb).collect();
        let mut best: Option<Clustering> = None;
        for restart in 0..self.restarts {
            let seed = self.seed.wrapping_add(restart as u64);
            let run = get_kmeans(self.k, self.max_iterations, CONVERGENCE, false, &buffer, seed);

            let centers: Vec<Rgb> = run.centroids.iter().copied().map(from_unit_rgb).collect();
            let inertia = inertia(points, &centers);
            tracing::trace!(restart, seed, inertia, "k-means restart");

            if best.as_ref().map_or(true, |b| inertia < b.inertia) {
                best = Some(Clustering { centers, inertia });
            }
        }

        best.ok_or_else(|| SpotihueError::msg("k-means produced no clustering"))
    }
}

fn to_unit_rgb([r, g, b]: Rgb) -> Srgb {
    Srgb::new((r / 255.0) as f32, (g / 255.0) as f32, (b / 255.0) as f32)
}

fn from_unit_rgb(color: Srgb) -> Rgb {
    [color.red, color.green, color.blue].map(|channel| (channel as f64 * 255.0).clamp(0.0, 255.0))
}

/// Up to `limit` distinct colors, in order of first appearance.
fn distinct_colors(points: &[Rgb], limit: usize) -> Vec<Rgb> {
    let mut distinct: Vec<Rgb> = Vec::new();
    for point in points {
        if !distinct.contains(point) {
            distinct.push(*point);
            if distinct.len() >= limit {
                break;
            }
        }
    }
    distinct
}

fn inertia(points: &[Rgb], centers: &[Rgb]) -> f64 {
    points
        .iter()
        .map(|point| {
            centers
                .iter()
                .map(|center| distance_squared(point, center))
                .fold(f64::INFINITY, f64::min)
        })
        .sum()
}

fn distance_squared(a: &Rgb, b: &Rgb) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
