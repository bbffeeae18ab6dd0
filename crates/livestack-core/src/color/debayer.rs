use ndarray::Array2;

use crate::consts::{LUMINANCE_B, LUMINANCE_G, LUMINANCE_R};
use crate::frame::{BayerPattern, ColorFrame, Frame, Pixels};

/// Channel index (0 = R, 1 = G, 2 = B) of each position in the 2x2 Bayer cell.
fn cell(pattern: BayerPattern) -> [[usize; 2]; 2] {
    match pattern {
        BayerPattern::Rggb => [[0, 1], [1, 2]],
        BayerPattern::Grbg => [[1, 0], [2, 1]],
        BayerPattern::Gbrg => [[1, 2], [0, 1]],
        BayerPattern::Bggr => [[2, 1], [1, 0]],
    }
}

/// Bilinear demosaic of a raw mosaic into a color frame.
///
/// Each output channel at a pixel is the sensor value when the photosite has
/// that color, otherwise the mean of the same-color photosites in the 3x3
/// neighbourhood.
pub fn debayer(raw: &Frame, pattern: BayerPattern) -> ColorFrame {
    let (h, w) = raw.data.dim();
    let layout = cell(pattern);
    let mut planes = [
        Array2::<f32>::zeros((h, w)),
        Array2::<f32>::zeros((h, w)),
        Array2::<f32>::zeros((h, w)),
    ];

    for row in 0..h {
        for col in 0..w {
            let own = layout[row % 2][col % 2];
            let mut sums = [0.0f32; 3];
            let mut counts = [0u32; 3];
            for dr in -1i64..=1 {
                for dc in -1i64..=1 {
                    let r = row as i64 + dr;
                    let c = col as i64 + dc;
                    if r < 0 || c < 0 || r >= h as i64 || c >= w as i64 {
                        continue;
                    }
                    let (r, c) = (r as usize, c as usize);
                    let ch = layout[r % 2][c % 2];
                    sums[ch] += raw.data[[r, c]];
                    counts[ch] += 1;
                }
            }
            for (ch, plane) in planes.iter_mut().enumerate() {
                plane[[row, col]] = if ch == own {
                    raw.data[[row, col]]
                } else if counts[ch] > 0 {
                    sums[ch] / counts[ch] as f32
                } else {
                    0.0
                };
            }
        }
    }

    let [red, green, blue] = planes;
    let depth = raw.original_bit_depth;
    ColorFrame {
        red: Frame::new(red, depth),
        green: Frame::new(green, depth),
        blue: Frame::new(blue, depth),
    }
}

/// Luminance plane of any image using ITU-R BT.601 weights.
/// Mono images are returned as-is.
pub fn luminance(pixels: &Pixels) -> Array2<f32> {
    match pixels {
        Pixels::Mono(frame) => frame.data.clone(),
        Pixels::Color(color) => {
            &color.red.data * LUMINANCE_R
                + &color.green.data * LUMINANCE_G
                + &color.blue.data * LUMINANCE_B
        }
    }
}
