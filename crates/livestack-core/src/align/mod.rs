//! Aligner: maps incoming frames onto the session's reference frame.

pub mod matching;
pub mod stars;
pub mod transform;

use tracing::debug;

use crate::color::luminance;
use crate::config::AlignmentConfig;
use crate::error::{LiveStackError, Result};
use crate::frame::{Geometry, Image};

pub use matching::{match_stars, StarMatch};
pub use stars::{detect_stars, DetectionConfig, Star};
pub use transform::{warp_image, Similarity};

/// Fewest stars that can define a similarity.
pub const MIN_STARS: usize = 3;

/// What a frame is aligned against. Chosen once per session from the first
/// accepted frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Reference {
    pub geometry: Geometry,
    pub stars: Vec<Star>,
}

impl Reference {
    /// A reference that only fixes geometry, for sessions without alignment.
    pub fn geometry_only(geometry: Geometry) -> Self {
        Self {
            geometry,
            stars: Vec::new(),
        }
    }
}

/// Mapping from a frame onto the reference with its match count.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AlignmentTransform {
    pub transform: Similarity,
    pub matches: usize,
}

impl AlignmentTransform {
    pub fn identity(matches: usize) -> Self {
        Self {
            transform: Similarity::identity(),
            matches,
        }
    }

    pub fn is_valid(&self, min_matches: usize) -> bool {
        self.matches >= min_matches
    }
}

/// Registration strategy. Implementations hold no per-frame state; the
/// reference is owned by the caller.
pub trait FrameAligner: Send + Sync {
    fn reference(&self, image: &Image, config: &AlignmentConfig) -> Result<Reference>;

    /// Transform mapping `image` onto `reference`. Fails with
    /// [`LiveStackError::InsufficientMatches`] below `config.min_matches`.
    fn register(
        &self,
        reference: &Reference,
        image: &Image,
        config: &AlignmentConfig,
    ) -> Result<AlignmentTransform>;
}

/// Star-pattern registration: detection, triangle matching and a
/// least-squares similarity.
#[derive(Clone, Copy, Debug, Default)]
pub struct StarAligner;

impl StarAligner {
    fn stars(image: &Image, config: &AlignmentConfig) -> Result<Vec<Star>> {
        let stars = detect_stars(&luminance(&image.pixels), &config.detection);
        if stars.len() < MIN_STARS {
            return Err(LiveStackError::NotEnoughStars {
                found: stars.len(),
                required: MIN_STARS,
            });
        }
        Ok(stars)
    }
}

impl FrameAligner for StarAligner {
    /// Fails when the frame has fewer stars than `config.min_matches`, since no
    /// later frame could then reach the threshold against it.
    fn reference(&self, image: &Image, config: &AlignmentConfig) -> Result<Reference> {
        let stars = Self::stars(image, config)?;
        if stars.len() < config.min_matches {
            return Err(LiveStackError::NotEnoughStars {
                found: stars.len(),
                required: config.min_matches,
            });
        }
        debug!(stars = stars.len(), source = %image.name(), "Reference stars detected");
        Ok(Reference {
            geometry: image.geometry(),
            stars,
        })
    }

    fn register(
        &self,
        reference: &Reference,
        image: &Image,
        config: &AlignmentConfig,
    ) -> Result<AlignmentTransform> {
        let stars = Self::stars(image, config)?;
        let matched = match_stars(&stars, &reference.stars);
        let found = matched.as_ref().map_or(0, |m| m.pairs.len());
        debug!(
            stars = stars.len(),
            matches = found,
            source = %image.name(),
            "Star matching done"
        );
        match matched {
            Some(m) if found >= config.min_matches => Ok(AlignmentTransform {
                transform: m.transform,
                matches: found,
            }),
            _ => Err(LiveStackError::InsufficientMatches {
                found,
                required: config.min_matches,
            }),
        }
    }
}
