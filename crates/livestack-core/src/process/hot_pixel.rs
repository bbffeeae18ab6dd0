use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::DEFAULT_HOT_PIXEL_FACTOR;
use crate::error::{LiveStackError, Result};
use crate::frame::{ColorLayout, Frame, Image, Pixels};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HotPixelParams {
    /// A pixel brighter than `factor` times every neighbour is replaced.
    pub factor: f32,
}

impl Default for HotPixelParams {
    fn default() -> Self {
        Self {
            factor: DEFAULT_HOT_PIXEL_FACTOR,
        }
    }
}

/// Replace isolated hot pixels with the mean of their neighbours.
///
/// Only defined on mono and raw mosaic data. On a raw mosaic the neighbours
/// are the nearest photosites of the same color, two pixels away.
pub fn remove_hot_pixels(image: &Image, params: &HotPixelParams) -> Result<Image> {
    if !(params.factor > 1.0) {
        return Err(LiveStackError::InvalidParameter {
            name: "factor",
            reason: format!("must be greater than 1.0, got {}", params.factor),
        });
    }
    let stride = match image.info.layout {
        ColorLayout::Mono => 1,
        ColorLayout::Bayer(_) => 2,
        ColorLayout::Rgb => {
            return Err(LiveStackError::Precondition(
                "Hot Pixel Remover cannot work on debayered color images".into(),
            ))
        }
    };
    let Pixels::Mono(frame) = &image.pixels else {
        return Err(LiveStackError::UnsupportedColorLayout(
            image.info.layout.to_string(),
        ));
    };

    let cleaned = clean_plane(&frame.data, stride, params.factor);
    let replaced = Zip::from(&cleaned)
        .and(&frame.data)
        .fold(0usize, |n, a, b| if a != b { n + 1 } else { n });
    debug!(replaced, image = %image.name(), "Hot pixels removed");

    let mut out = image.with_pixels(Pixels::Mono(Frame::new(cleaned, frame.original_bit_depth)));
    out.info.calibration.push("hot pixel removal".into());
    Ok(out)
}

fn clean_plane(data: &Array2<f32>, stride: usize, factor: f32) -> Array2<f32> {
    let (h, w) = data.dim();
    let s = stride as i64;
    let offsets = [
        (-s, -s),
        (-s, 0),
        (-s, s),
        (0, -s),
        (0, s),
        (s, -s),
        (s, 0),
        (s, s),
    ];

    let mut out = data.clone();
    Zip::indexed(&mut out).par_for_each(|(row, col), value| {
        let v = data[[row, col]];
        if v <= 0.0 {
            return;
        }
        let mut max_n = f32::NEG_INFINITY;
        let mut sum = 0.0f32;
        let mut count = 0u32;
        for (dr, dc) in offsets {
            let r = row as i64 + dr;
            let c = col as i64 + dc;
            if r < 0 || c < 0 || r >= h as i64 || c >= w as i64 {
                continue;
            }
            let n = data[[r as usize, c as usize]];
            max_n = max_n.max(n);
            sum += n;
            count += 1;
        }
        if count > 0 && v > factor * max_n {
            *value = sum / count as f32;
        }
    });
    out
}
