use serde::{Deserialize, Serialize};

use crate::error::{LiveStackError, Result};
use crate::frame::{ColorFrame, Frame, Image, Pixels};

/// Per-channel gains.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RgbBalanceParams {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
}

impl Default for RgbBalanceParams {
    fn default() -> Self {
        Self {
            red: 1.0,
            green: 1.0,
            blue: 1.0,
        }
    }
}

pub fn apply_rgb_balance(image: &Image, params: &RgbBalanceParams) -> Result<Image> {
    for (name, gain) in [
        ("red", params.red),
        ("green", params.green),
        ("blue", params.blue),
    ] {
        if !(gain > 0.0) {
            return Err(LiveStackError::InvalidParameter {
                name: "rgb balance",
                reason: format!("{name} gain must be positive, got {gain}"),
            });
        }
    }
    let Pixels::Color(color) = &image.pixels else {
        return Err(LiveStackError::Precondition(
            "RGB balance needs a color image".into(),
        ));
    };

    let scale = |frame: &Frame, gain: f32| {
        Frame::new(
            frame.data.mapv(|v| (v * gain).clamp(0.0, 1.0)),
            frame.original_bit_depth,
        )
    };
    Ok(image.with_pixels(Pixels::Color(ColorFrame {
        red: scale(&color.red, params.red),
        green: scale(&color.green, params.green),
        blue: scale(&color.blue, params.blue),
    })))
}
