use ndarray::{Array2, Zip};

use crate::consts::EPSILON;
use crate::frame::{Frame, Image};

/// Similarity transform (rotation, uniform scale, translation):
///
/// ```text
/// x' = a*x - b*y + tx
/// y' = b*x + a*y + ty
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Similarity {
    pub a: f64,
    pub b: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for Similarity {
    fn default() -> Self {
        Self::identity()
    }
}

impl Similarity {
    pub fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn from_parts(scale: f64, rotation: f64, tx: f64, ty: f64) -> Self {
        Self {
            a: scale * rotation.cos(),
            b: scale * rotation.sin(),
            tx,
            ty,
        }
    }

    pub fn scale(&self) -> f64 {
        self.a.hypot(self.b)
    }

    /// Rotation in radians.
    pub fn rotation(&self) -> f64 {
        self.b.atan2(self.a)
    }

    pub fn apply(&self, (x, y): (f64, f64)) -> (f64, f64) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    pub fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }

    pub fn is_identity(&self) -> bool {
        (self.a - 1.0).abs() < 1e-9
            && self.b.abs() < 1e-9
            && self.tx.abs() < 1e-9
            && self.ty.abs() < 1e-9
    }

    /// Least-squares similarity mapping each `(source, target)` pair.
    /// Needs at least two distinct source points.
    pub fn fit(pairs: &[((f64, f64), (f64, f64))]) -> Option<Self> {
        if pairs.len() < 2 {
            return None;
        }
        let n = pairs.len() as f64;
        let (mut mx, mut my, mut nx, mut ny) = (0.0, 0.0, 0.0, 0.0);
        for &((x, y), (u, v)) in pairs {
            mx += x;
            my += y;
            nx += u;
            ny += v;
        }
        mx /= n;
        my /= n;
        nx /= n;
        ny /= n;

        let (mut num_a, mut num_b, mut denom) = (0.0, 0.0, 0.0);
        for &((x, y), (u, v)) in pairs {
            let (sx, sy) = (x - mx, y - my);
            let (dx, dy) = (u - nx, v - ny);
            num_a += sx * dx + sy * dy;
            num_b += sx * dy - sy * dx;
            denom += sx * sx + sy * sy;
        }
        if denom < 1e-9 {
            return None;
        }
        let a = num_a / denom;
        let b = num_b / denom;
        Some(Self {
            a,
            b,
            tx: nx - (a * mx - b * my),
            ty: ny - (b * mx + a * my),
        })
    }
}

/// Bilinear interpolation at sub-pixel position (y, x). Zero outside bounds.
pub fn bilinear_sample(data: &Array2<f32>, y: f64, x: f64) -> f32 {
    let (h, w) = data.dim();

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let x1 = x0 + 1;
    let y1 = y0 + 1;

    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let sample = |r: i64, c: i64| -> f32 {
        if r >= 0 && r < h as i64 && c >= 0 && c < w as i64 {
            data[[r as usize, c as usize]]
        } else {
            0.0
        }
    };

    sample(y0, x0) * (1.0 - fx) * (1.0 - fy)
        + sample(y0, x1) * fx * (1.0 - fy)
        + sample(y1, x0) * (1.0 - fx) * fy
        + sample(y1, x1) * fx * fy
}

/// Resample `data` into reference coordinates, where `to_reference` maps
/// source pixel positions onto the reference grid.
pub fn warp_plane(data: &Array2<f32>, to_reference: &Similarity) -> Array2<f32> {
    let Some(inverse) = to_reference.inverse() else {
        return Array2::zeros(data.dim());
    };
    let mut out = Array2::<f32>::zeros(data.dim());
    Zip::indexed(&mut out).par_for_each(|(row, col), px| {
        let (x, y) = inverse.apply((col as f64, row as f64));
        let v = bilinear_sample(data, y, x);
        *px = if v.abs() < EPSILON { 0.0 } else { v };
    });
    out
}

/// Warp every plane of `image` onto the reference grid.
pub fn warp_image(image: &Image, to_reference: &Similarity) -> Image {
    if to_reference.is_identity() {
        return image.clone();
    }
    let pixels = image.pixels.map_planes(|plane| {
        Frame::new(warp_plane(&plane.data, to_reference), plane.original_bit_depth)
    });
    image.with_pixels(pixels)
}
