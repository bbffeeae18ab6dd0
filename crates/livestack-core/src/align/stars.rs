use std::collections::HashMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_DETECTION_SIGMA, DEFAULT_MAX_STARS};

/// Star detection parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Threshold = mean + sigma * stddev.
    #[serde(default = "default_sigma")]
    pub sigma: f32,
    /// Smallest blob (pixels) accepted as a star.
    #[serde(default = "default_min_pixels")]
    pub min_pixels: usize,
    /// Largest blob (pixels) accepted as a star; larger ones are nebulosity or glare.
    #[serde(default = "default_max_pixels")]
    pub max_pixels: usize,
    /// Keep only the brightest stars.
    #[serde(default = "default_max_stars")]
    pub max_stars: usize,
}

fn default_sigma() -> f32 {
    DEFAULT_DETECTION_SIGMA
}
fn default_min_pixels() -> usize {
    2
}
fn default_max_pixels() -> usize {
    400
}
fn default_max_stars() -> usize {
    DEFAULT_MAX_STARS
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_DETECTION_SIGMA,
            min_pixels: default_min_pixels(),
            max_pixels: default_max_pixels(),
            max_stars: DEFAULT_MAX_STARS,
        }
    }
}

/// A detected star: flux-weighted centroid in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Star {
    pub x: f64,
    pub y: f64,
    /// Background-subtracted flux.
    pub flux: f64,
    pub area: usize,
}

impl Star {
    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

#[derive(Default)]
struct Blob {
    area: usize,
    flux: f64,
    sum_x: f64,
    sum_y: f64,
    touches_border: bool,
}

/// Find stars in a luminance plane, brightest first.
///
/// Pixels above `mean + sigma * stddev` are grouped into 8-connected blobs.
/// Blobs touching the border or outside the configured size range are dropped.
pub fn detect_stars(data: &Array2<f32>, config: &DetectionConfig) -> Vec<Star> {
    let (h, w) = data.dim();
    if h < 3 || w < 3 {
        return Vec::new();
    }
    let (mean, std) = compute_mean_stddev(data);
    if std <= 0.0 {
        return Vec::new();
    }
    let threshold = (mean + config.sigma as f64 * std) as f32;

    let labels = label_components(data, threshold);
    let mut blobs: HashMap<u32, Blob> = HashMap::new();
    for ((row, col), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }
        let weight = data[[row, col]] as f64 - mean;
        let blob = blobs.entry(label).or_default();
        blob.area += 1;
        blob.flux += weight;
        blob.sum_x += weight * col as f64;
        blob.sum_y += weight * row as f64;
        if row == 0 || col == 0 || row == h - 1 || col == w - 1 {
            blob.touches_border = true;
        }
    }

    let mut stars: Vec<Star> = blobs
        .into_values()
        .filter(|b| !b.touches_border && b.flux > 0.0)
        .filter(|b| b.area >= config.min_pixels && b.area <= config.max_pixels)
        .map(|b| Star {
            x: b.sum_x / b.flux,
            y: b.sum_y / b.flux,
            flux: b.flux,
            area: b.area,
        })
        .collect();
    stars.sort_unstable_by(|a, b| b.flux.total_cmp(&a.flux));
    stars.truncate(config.max_stars);
    stars
}

/// Mean and standard deviation of pixel values.
pub fn compute_mean_stddev(data: &Array2<f32>) -> (f64, f64) {
    let n = data.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = data.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = data.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Two-pass union-find labeling of pixels above `threshold`, 8-connectivity.
/// Returned labels are resolved to their root; 0 means background.
fn label_components(data: &Array2<f32>, threshold: f32) -> Array2<u32> {
    let (h, w) = data.dim();
    let mut labels = Array2::<u32>::zeros((h, w));
    // Index 0 unused; labels start at 1.
    let mut parent: Vec<u32> = vec![0];

    for row in 0..h {
        for col in 0..w {
            if data[[row, col]] <= threshold {
                continue;
            }
            let mut neighbours = [0u32; 4];
            if col > 0 {
                neighbours[0] = labels[[row, col - 1]];
            }
            if row > 0 {
                neighbours[1] = labels[[row - 1, col]];
                if col > 0 {
                    neighbours[2] = labels[[row - 1, col - 1]];
                }
                if col + 1 < w {
                    neighbours[3] = labels[[row - 1, col + 1]];
                }
            }
            let label = match neighbours.iter().copied().filter(|&l| l > 0).min() {
                Some(smallest) => {
                    for &other in neighbours.iter().filter(|&&l| l > 0) {
                        union(&mut parent, smallest, other);
                    }
                    smallest
                }
                None => {
                    let next = parent.len() as u32;
                    parent.push(next);
                    next
                }
            };
            labels[[row, col]] = label;
        }
    }

    for i in 1..parent.len() {
        parent[i] = find(&parent, i as u32);
    }
    labels.mapv_inplace(|l| parent[l as usize]);
    labels
}

fn find(parent: &[u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        x = parent[x as usize];
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[big as usize] = small;
    }
}
