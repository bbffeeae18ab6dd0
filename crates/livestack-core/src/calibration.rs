//! Calibration conformer: adapts a master calibration frame (dark) to the
//! structure of the light frames it is subtracted from.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use ndarray::Array2;
use tracing::{debug, warn};

use crate::error::{LiveStackError, Result};
use crate::frame::{ColorLayout, Frame, Geometry, Image};
use crate::io::load_image;

/// Structure of a light frame the calibration data was last conformed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LightStructure {
    geometry: Geometry,
    layout: ColorLayout,
    bit_depth: u8,
}

impl LightStructure {
    fn of(image: &Image) -> Self {
        Self {
            geometry: image.geometry(),
            layout: image.info.layout,
            bit_depth: image.info.bit_depth,
        }
    }
}

/// A calibration frame read once per session, conformed lazily to each new
/// light structure.
#[derive(Debug)]
pub struct CalibrationFrame {
    path: PathBuf,
    master: Image,
    conformed: Mutex<Option<(LightStructure, Arc<Image>)>>,
}

impl CalibrationFrame {
    /// Read the calibration frame from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let master = load_image(path)?;
        Ok(Self::from_image(master))
    }

    pub fn from_image(master: Image) -> Self {
        Self {
            path: master.info.source.clone(),
            master,
            conformed: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn master(&self) -> &Image {
        &self.master
    }

    /// Calibration data matching `light`'s structure. The conformed copy is
    /// cached and recomputed only when the light structure changes.
    pub fn conformed_for(&self, light: &Image) -> Result<Arc<Image>> {
        let wanted = LightStructure::of(light);
        let mut cache = self.conformed.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((structure, image)) = cache.as_ref() {
            if *structure == wanted {
                return Ok(Arc::clone(image));
            }
        }
        let image = Arc::new(conform(&self.master, light)?);
        *cache = Some((wanted, Arc::clone(&image)));
        Ok(image)
    }
}

/// Adapt `dark` to `light`: resize to the light dimensions and adopt its
/// layout and bit depth. Fails when the channel counts disagree, which no
/// resampling can fix.
pub fn conform(dark: &Image, light: &Image) -> Result<Image> {
    let dark_geom = dark.geometry();
    let light_geom = light.geometry();

    if dark_geom.channels != light_geom.channels {
        return Err(LiveStackError::CalibrationMismatch {
            light: format!("{} {}", light.info.layout, light_geom),
            dark: format!("{} {}", dark.info.layout, dark_geom),
        });
    }
    if dark_geom.width == 0 || dark_geom.height == 0 {
        return Err(LiveStackError::InvalidDimensions {
            width: dark_geom.width,
            height: dark_geom.height,
        });
    }

    if dark.info.bit_depth != light.info.bit_depth {
        warn!(
            light = light.info.bit_depth,
            dark = dark.info.bit_depth,
            "Dark & light data types mismatch, dark needs to be conformed"
        );
    }

    let pixels = if dark_geom == light_geom {
        dark.pixels.clone()
    } else {
        debug!(from = %dark_geom, to = %light_geom, "Resizing dark to light dimensions");
        dark.pixels.map_planes(|plane| {
            Frame::new(
                resize_plane(&plane.data, light_geom.height, light_geom.width),
                light.info.bit_depth,
            )
        })
    };

    let mut conformed = dark.with_pixels(pixels);
    conformed.info.layout = light.info.layout;
    conformed.info.bit_depth = light.info.bit_depth;
    for plane in conformed.pixels.planes_mut() {
        plane.original_bit_depth = light.info.bit_depth;
    }
    Ok(conformed)
}

/// Bilinear resample of a plane to `(height, width)`, sampling at pixel
/// centres and clamping at the borders.
pub fn resize_plane(data: &Array2<f32>, height: usize, width: usize) -> Array2<f32> {
    let (src_h, src_w) = data.dim();
    let scale_y = src_h as f64 / height as f64;
    let scale_x = src_w as f64 / width as f64;
    let max_y = (src_h - 1) as f64;
    let max_x = (src_w - 1) as f64;

    Array2::from_shape_fn((height, width), |(row, col)| {
        let y = ((row as f64 + 0.5) * scale_y - 0.5).clamp(0.0, max_y);
        let x = ((col as f64 + 0.5) * scale_x - 0.5).clamp(0.0, max_x);
        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(src_h - 1);
        let x1 = (x0 + 1).min(src_w - 1);
        let fy = (y - y0 as f64) as f32;
        let fx = (x - x0 as f64) as f32;

        data[[y0, x0]] * (1.0 - fx) * (1.0 - fy)
            + data[[y0, x1]] * fx * (1.0 - fy)
            + data[[y1, x0]] * (1.0 - fx) * fy
            + data[[y1, x1]] * fx * fy
    })
}
