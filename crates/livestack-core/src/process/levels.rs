use serde::{Deserialize, Serialize};

use crate::consts::EPSILON;
use crate::error::{LiveStackError, Result};
use crate::frame::{Frame, Image};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelsParams {
    pub black: f32,
    /// Midtones exponent: > 1.0 brightens, < 1.0 darkens.
    pub midtones: f32,
    pub white: f32,
}

impl Default for LevelsParams {
    fn default() -> Self {
        Self {
            black: 0.0,
            midtones: 1.0,
            white: 1.0,
        }
    }
}

impl LevelsParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.black) || !(0.0..=1.0).contains(&self.white) {
            return Err(LiveStackError::InvalidParameter {
                name: "levels",
                reason: format!(
                    "black and white must lie in [0, 1], got {} and {}",
                    self.black, self.white
                ),
            });
        }
        if self.white - self.black < EPSILON {
            return Err(LiveStackError::InvalidParameter {
                name: "levels",
                reason: format!("black {} must be below white {}", self.black, self.white),
            });
        }
        if !(self.midtones > 0.0) {
            return Err(LiveStackError::InvalidParameter {
                name: "midtones",
                reason: format!("must be positive, got {}", self.midtones),
            });
        }
        Ok(())
    }
}

/// Map [black, white] to [0, 1], then apply the midtones curve.
pub fn apply_levels(image: &Image, params: &LevelsParams) -> Result<Image> {
    params.validate()?;
    let range = params.white - params.black;
    let inv_mid = 1.0 / params.midtones;
    let pixels = image.pixels.map_planes(|plane| {
        let data = plane
            .data
            .mapv(|v| ((v - params.black) / range).clamp(0.0, 1.0).powf(inv_mid));
        Frame::new(data, plane.original_bit_depth)
    });
    Ok(image.with_pixels(pixels))
}
