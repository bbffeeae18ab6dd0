use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::consts::COLOR_CHANNEL_COUNT;

/// A single image plane.
/// Pixel values are f32, nominally in [0.0, 1.0].
#[derive(Clone, Debug)]
pub struct Frame {
    /// Pixel data, row-major, shape = (height, width)
    pub data: Array2<f32>,
    /// Original bit depth before conversion (8 or 16)
    pub original_bit_depth: u8,
}

impl Frame {
    pub fn new(data: Array2<f32>, bit_depth: u8) -> Self {
        Self {
            data,
            original_bit_depth: bit_depth,
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }
}

/// Color image composed of separate channel frames.
#[derive(Clone, Debug)]
pub struct ColorFrame {
    pub red: Frame,
    pub green: Frame,
    pub blue: Frame,
}

impl ColorFrame {
    pub fn channels(&self) -> [&Frame; 3] {
        [&self.red, &self.green, &self.blue]
    }

    pub fn channels_mut(&mut self) -> [&mut Frame; 3] {
        [&mut self.red, &mut self.green, &mut self.blue]
    }
}

/// Bayer mosaic layout of a raw sensor frame, named by the 2x2 cell at (0,0).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BayerPattern {
    Rggb,
    Grbg,
    Gbrg,
    Bggr,
}

impl fmt::Display for BayerPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rggb => write!(f, "RGGB"),
            Self::Grbg => write!(f, "GRBG"),
            Self::Gbrg => write!(f, "GBRG"),
            Self::Bggr => write!(f, "BGGR"),
        }
    }
}

/// How the pixels of an image are organised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorLayout {
    /// Single-channel luminance data.
    Mono,
    /// Single-channel raw mosaic, not yet debayered.
    Bayer(BayerPattern),
    /// Three-channel color data (debayered or natively RGB).
    Rgb,
}

impl fmt::Display for ColorLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mono => write!(f, "mono"),
            Self::Bayer(pattern) => write!(f, "raw {pattern}"),
            Self::Rgb => write!(f, "color"),
        }
    }
}

/// Structural shape of an image: what the stack and calibration data must agree on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.width, self.height, self.channels)
    }
}

/// Pixel planes of an image.
#[derive(Clone, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum Pixels {
    Mono(Frame),
    Color(ColorFrame),
}

impl Pixels {
    pub fn geometry(&self) -> Geometry {
        match self {
            Self::Mono(f) => Geometry {
                width: f.width(),
                height: f.height(),
                channels: 1,
            },
            Self::Color(cf) => Geometry {
                width: cf.red.width(),
                height: cf.red.height(),
                channels: COLOR_CHANNEL_COUNT,
            },
        }
    }

    /// All planes, in channel order.
    pub fn planes(&self) -> Vec<&Frame> {
        match self {
            Self::Mono(f) => vec![f],
            Self::Color(cf) => cf.channels().to_vec(),
        }
    }

    pub fn planes_mut(&mut self) -> Vec<&mut Frame> {
        match self {
            Self::Mono(f) => vec![f],
            Self::Color(cf) => cf.channels_mut().into_iter().collect(),
        }
    }

    /// Apply the same per-plane transform to every channel.
    pub fn map_planes<F>(&self, mut f: F) -> Pixels
    where
        F: FnMut(&Frame) -> Frame,
    {
        match self {
            Self::Mono(frame) => Self::Mono(f(frame)),
            Self::Color(cf) => Self::Color(ColorFrame {
                red: f(&cf.red),
                green: f(&cf.green),
                blue: f(&cf.blue),
            }),
        }
    }
}

/// Metadata carried with every image through the pipeline.
#[derive(Clone, Debug)]
pub struct ImageInfo {
    pub source: PathBuf,
    pub captured_at: Option<DateTime<Local>>,
    pub bit_depth: u8,
    pub layout: ColorLayout,
    /// Names of the calibration steps applied so far, in order.
    pub calibration: Vec<String>,
}

impl ImageInfo {
    pub fn new(source: impl Into<PathBuf>, bit_depth: u8, layout: ColorLayout) -> Self {
        Self {
            source: source.into(),
            captured_at: None,
            bit_depth,
            layout,
            calibration: Vec::new(),
        }
    }
}

/// A light, calibration or result image: pixel planes plus metadata.
#[derive(Clone, Debug)]
pub struct Image {
    pub pixels: Pixels,
    pub info: ImageInfo,
}

impl Image {
    pub fn mono(data: Array2<f32>, bit_depth: u8, source: impl Into<PathBuf>) -> Self {
        Self {
            pixels: Pixels::Mono(Frame::new(data, bit_depth)),
            info: ImageInfo::new(source, bit_depth, ColorLayout::Mono),
        }
    }

    pub fn color(
        red: Array2<f32>,
        green: Array2<f32>,
        blue: Array2<f32>,
        bit_depth: u8,
        source: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pixels: Pixels::Color(ColorFrame {
                red: Frame::new(red, bit_depth),
                green: Frame::new(green, bit_depth),
                blue: Frame::new(blue, bit_depth),
            }),
            info: ImageInfo::new(source, bit_depth, ColorLayout::Rgb),
        }
    }

    /// Replace the pixel planes, keeping the metadata.
    pub fn with_pixels(&self, pixels: Pixels) -> Self {
        Self {
            pixels,
            info: self.info.clone(),
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.pixels.geometry()
    }

    pub fn width(&self) -> usize {
        self.geometry().width
    }

    pub fn height(&self) -> usize {
        self.geometry().height
    }

    pub fn is_color(&self) -> bool {
        matches!(self.pixels, Pixels::Color(_))
    }

    pub fn source(&self) -> &Path {
        &self.info.source
    }

    /// Short name used in status messages.
    pub fn name(&self) -> String {
        self.info
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.info.source.display().to_string())
    }
}
