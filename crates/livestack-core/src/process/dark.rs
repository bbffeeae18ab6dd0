use ndarray::Zip;

use crate::calibration::CalibrationFrame;
use crate::error::{LiveStackError, Result};
use crate::frame::{Frame, Image, Pixels};

/// Subtract the session's calibration frame, conforming it to `image` first.
pub fn apply_dark(image: &Image, calibration: Option<&CalibrationFrame>) -> Result<Image> {
    let calibration = calibration.ok_or_else(|| {
        LiveStackError::Precondition("no calibration frame available".into())
    })?;
    let dark = calibration.conformed_for(image)?;
    let mut out = subtract(image, &dark)?;
    out.info
        .calibration
        .push(format!("dark subtraction ({})", calibration.path().display()));
    Ok(out)
}

/// Pixel-wise `light - dark`, clamped at zero. Both images must share geometry.
pub fn subtract(light: &Image, dark: &Image) -> Result<Image> {
    if light.geometry() != dark.geometry() {
        return Err(LiveStackError::GeometryMismatch {
            expected: light.geometry(),
            actual: dark.geometry(),
        });
    }
    let dark_planes = dark.pixels.planes();
    let mut index = 0;
    let pixels: Pixels = light.pixels.map_planes(|plane| {
        let d = &dark_planes[index].data;
        index += 1;
        let data = Zip::from(&plane.data)
            .and(d)
            .map_collect(|&l, &d| (l - d).max(0.0));
        Frame::new(data, plane.original_bit_depth)
    });
    Ok(light.with_pixels(pixels))
}
