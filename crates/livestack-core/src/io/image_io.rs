use std::fmt;
use std::path::Path;

use image::{ColorType, DynamicImage, ImageBuffer, ImageFormat, Luma, Rgb};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{LiveStackError, Result};
use crate::frame::{ColorLayout, Frame, Image, Pixels};

/// File format used when persisting results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Tiff,
    Png,
    Jpeg,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Tiff => "tif",
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    /// Guess the format from a file extension, if it is one we write.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "tif" | "tiff" => Some(Self::Tiff),
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tiff => write!(f, "TIFF"),
            Self::Png => write!(f, "PNG"),
            Self::Jpeg => write!(f, "JPEG"),
        }
    }
}

/// Load an image file. Grayscale files become mono images, anything with
/// color becomes a three-channel image. Alpha is dropped.
pub fn load_image(path: &Path) -> Result<Image> {
    let img = image::open(path)?;
    let bit_depth = match img.color() {
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8 => 8,
        _ => 16,
    };
    let (w, h) = (img.width() as usize, img.height() as usize);
    if w == 0 || h == 0 {
        return Err(LiveStackError::InvalidDimensions {
            width: w,
            height: h,
        });
    }

    if img.color().has_color() {
        let rgb = img.to_rgb16();
        let mut red = Array2::<f32>::zeros((h, w));
        let mut green = Array2::<f32>::zeros((h, w));
        let mut blue = Array2::<f32>::zeros((h, w));
        for (col, row, pixel) in rgb.enumerate_pixels() {
            let (r, c) = (row as usize, col as usize);
            red[[r, c]] = pixel.0[0] as f32 / 65535.0;
            green[[r, c]] = pixel.0[1] as f32 / 65535.0;
            blue[[r, c]] = pixel.0[2] as f32 / 65535.0;
        }
        Ok(Image::color(red, green, blue, bit_depth, path))
    } else {
        let gray = img.to_luma16();
        let mut data = Array2::<f32>::zeros((h, w));
        for (col, row, pixel) in gray.enumerate_pixels() {
            data[[row as usize, col as usize]] = pixel.0[0] as f32 / 65535.0;
        }
        Ok(Image::mono(data, bit_depth, path))
    }
}

/// Save an image in the requested format. TIFF is written with 16 bits per
/// channel, PNG and JPEG with 8.
pub fn save_image(image: &Image, path: &Path, format: OutputFormat) -> Result<()> {
    let dynamic = match (&image.pixels, format) {
        (Pixels::Mono(frame), OutputFormat::Tiff) => DynamicImage::ImageLuma16(mono_buffer(frame)?),
        (Pixels::Mono(frame), _) => DynamicImage::ImageLuma16(mono_buffer(frame)?)
            .into_luma8()
            .into(),
        (Pixels::Color(_), OutputFormat::Tiff) => DynamicImage::ImageRgb16(rgb_buffer(image)?),
        (Pixels::Color(_), _) => DynamicImage::ImageRgb16(rgb_buffer(image)?).into_rgb8().into(),
    };
    let image_format = match format {
        OutputFormat::Tiff => ImageFormat::Tiff,
        OutputFormat::Png => ImageFormat::Png,
        OutputFormat::Jpeg => ImageFormat::Jpeg,
    };
    dynamic.save_with_format(path, image_format)?;
    Ok(())
}

fn to_u16(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

fn mono_buffer(frame: &Frame) -> Result<ImageBuffer<Luma<u16>, Vec<u16>>> {
    let (h, w) = frame.data.dim();
    let pixels: Vec<u16> = frame.data.iter().map(|&v| to_u16(v)).collect();
    ImageBuffer::from_raw(w as u32, h as u32, pixels).ok_or(LiveStackError::InvalidDimensions {
        width: w,
        height: h,
    })
}

fn rgb_buffer(image: &Image) -> Result<ImageBuffer<Rgb<u16>, Vec<u16>>> {
    let Pixels::Color(color) = &image.pixels else {
        return Err(LiveStackError::UnsupportedColorLayout(
            image.info.layout.to_string(),
        ));
    };
    let (h, w) = color.red.data.dim();
    let mut pixels: Vec<u16> = Vec::with_capacity(h * w * 3);
    for ((r, g), b) in color
        .red
        .data
        .iter()
        .zip(color.green.data.iter())
        .zip(color.blue.data.iter())
    {
        pixels.push(to_u16(*r));
        pixels.push(to_u16(*g));
        pixels.push(to_u16(*b));
    }
    ImageBuffer::from_raw(w as u32, h as u32, pixels).ok_or(LiveStackError::InvalidDimensions {
        width: w,
        height: h,
    })
}

/// Tag a freshly loaded mono image as a raw Bayer mosaic.
pub fn tag_bayer(image: &mut Image, pattern: crate::frame::BayerPattern) {
    if !image.is_color() {
        image.info.layout = ColorLayout::Bayer(pattern);
    }
}
