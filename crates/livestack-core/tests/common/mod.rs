use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use ndarray::Array2;

use livestack_core::align::{AlignmentTransform, FrameAligner, Reference, Similarity};
use livestack_core::config::{AlignmentConfig, SessionConfig};
use livestack_core::error::Result;
use livestack_core::frame::Image;
use livestack_core::io::{save_image, OutputFormat};

/// Star as (x, y, peak).
pub type StarSpec = (f64, f64, f32);

/// Deterministic pseudo-random star list, kept away from the borders.
pub fn random_stars(count: usize, width: usize, height: usize, seed: u64) -> Vec<StarSpec> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 33) as f64) / (1u64 << 31) as f64
    };
    let margin = 12.0;
    (0..count)
        .map(|_| {
            let x = margin + next() * (width as f64 - 2.0 * margin);
            let y = margin + next() * (height as f64 - 2.0 * margin);
            let peak = 0.3 + 0.6 * next() as f32;
            (x, y, peak)
        })
        .collect()
}

/// Stars moved by `transform`.
pub fn move_stars(stars: &[StarSpec], transform: &Similarity) -> Vec<StarSpec> {
    stars
        .iter()
        .map(|&(x, y, peak)| {
            let (x, y) = transform.apply((x, y));
            (x, y, peak)
        })
        .collect()
}

/// Render Gaussian stars over a flat background.
pub fn star_field(width: usize, height: usize, stars: &[StarSpec]) -> Array2<f32> {
    let sigma = 1.2f64;
    let mut data = Array2::<f32>::from_elem((height, width), 0.05);
    for &(sx, sy, peak) in stars {
        let x0 = (sx - 5.0).floor().max(0.0) as usize;
        let x1 = ((sx + 5.0).ceil() as usize).min(width - 1);
        let y0 = (sy - 5.0).floor().max(0.0) as usize;
        let y1 = ((sy + 5.0).ceil() as usize).min(height - 1);
        for row in y0..=y1 {
            for col in x0..=x1 {
                let d2 = (col as f64 - sx).powi(2) + (row as f64 - sy).powi(2);
                let v = peak as f64 * (-d2 / (2.0 * sigma * sigma)).exp();
                data[[row, col]] = (data[[row, col]] + v as f32).min(1.0);
            }
        }
    }
    data
}

/// Write `image` as a 16-bit TIFF into `scan` without exposing a partly
/// written file: it is saved in `staging` first and renamed.
pub fn drop_frame(scan: &Path, staging: &Path, name: &str, image: &Image) {
    let staged = staging.join(name);
    save_image(image, &staged, OutputFormat::Tiff).unwrap();
    fs::rename(&staged, scan.join(name)).unwrap();
}

pub fn flat_frame(width: usize, height: usize, value: f32) -> Image {
    Image::mono(Array2::from_elem((height, width), value), 16, "flat")
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

/// Session config over two folders with a fast scan interval and every
/// optional step off.
pub fn test_config(scan: &Path, work: &Path) -> SessionConfig {
    let mut config = SessionConfig::new(scan, work);
    config.scan_interval_ms = 50;
    config.include_existing = true;
    config.postprocess.autostretch.enabled = false;
    config
}

/// Aligner that reports a fixed match count per file name and never moves
/// the frame.
pub struct ScriptedAligner {
    pub matches: HashMap<String, usize>,
    pub default_matches: usize,
    pub delay: Duration,
}

impl ScriptedAligner {
    pub fn new(default_matches: usize) -> Self {
        Self {
            matches: HashMap::new(),
            default_matches,
            delay: Duration::ZERO,
        }
    }

    pub fn with(mut self, name: &str, matches: usize) -> Self {
        self.matches.insert(name.to_string(), matches);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl FrameAligner for ScriptedAligner {
    fn reference(&self, image: &Image, _config: &AlignmentConfig) -> Result<Reference> {
        Ok(Reference::geometry_only(image.geometry()))
    }

    fn register(
        &self,
        _reference: &Reference,
        image: &Image,
        _config: &AlignmentConfig,
    ) -> Result<AlignmentTransform> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let matches = self
            .matches
            .get(&image.name())
            .copied()
            .unwrap_or(self.default_matches);
        Ok(AlignmentTransform::identity(matches))
    }
}
