use std::fmt;

use serde::{Deserialize, Serialize};

use crate::color::luminance;
use crate::consts::{AUTOSTRETCH_HIGH_PERCENTILE, AUTOSTRETCH_LOW_PERCENTILE, EPSILON};
use crate::error::{LiveStackError, Result};
use crate::frame::{Frame, Image};

/// Curve applied after the black/white points have been fixed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StretchMethod {
    Linear,
    Sqrt,
    Log,
    #[default]
    Asinh,
}

impl fmt::Display for StretchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear => write!(f, "Linear"),
            Self::Sqrt => write!(f, "Sqrt"),
            Self::Log => write!(f, "Log"),
            Self::Asinh => write!(f, "Asinh"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutostretchParams {
    pub method: StretchMethod,
    /// Curve strength in (0, 1]. Ignored by the linear method.
    pub strength: f32,
}

impl Default for AutostretchParams {
    fn default() -> Self {
        Self {
            method: StretchMethod::default(),
            strength: 0.5,
        }
    }
}

/// Black and white points at the given percentiles of `values`.
pub fn percentile_points(values: &[f32], low: f32, high: f32) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 1.0);
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let lo_idx = ((n as f32 * low) as usize).min(n - 1);
    let hi_idx = ((n as f32 * high) as usize).min(n - 1);
    (sorted[lo_idx], sorted[hi_idx])
}

fn curve(method: StretchMethod, strength: f32) -> impl Fn(f32) -> f32 {
    let k = 1.0 + 99.0 * strength;
    move |v: f32| match method {
        StretchMethod::Linear => v,
        StretchMethod::Sqrt => v.powf(1.0 / (1.0 + strength)),
        StretchMethod::Log => (1.0 + k * v).ln() / (1.0 + k).ln(),
        StretchMethod::Asinh => (k * v).asinh() / k.asinh(),
    }
}

/// Percentile stretch followed by a non-linear curve. Black and white points
/// come from the luminance so color images keep their balance.
pub fn autostretch(image: &Image, params: &AutostretchParams) -> Result<Image> {
    if !(params.strength > 0.0 && params.strength <= 1.0) {
        return Err(LiveStackError::InvalidParameter {
            name: "strength",
            reason: format!("must lie in (0, 1], got {}", params.strength),
        });
    }

    let lum = luminance(&image.pixels);
    let values: Vec<f32> = lum.iter().copied().collect();
    let (black, white) = percentile_points(
        &values,
        AUTOSTRETCH_LOW_PERCENTILE,
        AUTOSTRETCH_HIGH_PERCENTILE,
    );
    let range = white - black;
    let range = if range.abs() < EPSILON { 1.0 } else { range };
    let apply = curve(params.method, params.strength);

    let pixels = image.pixels.map_planes(|plane| {
        let data = plane
            .data
            .mapv(|v| apply(((v - black) / range).clamp(0.0, 1.0)));
        Frame::new(data, plane.original_bit_depth)
    });
    Ok(image.with_pixels(pixels))
}
