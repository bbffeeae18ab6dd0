use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use livestack_core::align::stars::compute_mean_stddev;
use livestack_core::align::{detect_stars, DetectionConfig};
use livestack_core::color::luminance;
use livestack_core::frame::BayerPattern;
use livestack_core::io::image_io::tag_bayer;
use livestack_core::io::load_image;

#[derive(Clone, Copy, ValueEnum)]
pub enum BayerArg {
    Rggb,
    Grbg,
    Gbrg,
    Bggr,
}

impl From<BayerArg> for BayerPattern {
    fn from(arg: BayerArg) -> Self {
        match arg {
            BayerArg::Rggb => BayerPattern::Rggb,
            BayerArg::Grbg => BayerPattern::Grbg,
            BayerArg::Gbrg => BayerPattern::Gbrg,
            BayerArg::Bggr => BayerPattern::Bggr,
        }
    }
}

#[derive(Args)]
pub struct InfoArgs {
    /// Input image (TIFF, PNG or JPEG)
    pub file: PathBuf,

    /// Treat a mono image as a raw mosaic with this pattern
    #[arg(long, value_enum)]
    pub bayer: Option<BayerArg>,

    /// Detection threshold in standard deviations above the background
    #[arg(long, default_value = "3.0")]
    pub sigma: f32,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let mut image = load_image(&args.file)?;
    if let Some(pattern) = args.bayer {
        tag_bayer(&mut image, pattern.into());
    }

    println!("File:        {}", args.file.display());
    println!("Dimensions:  {}x{}", image.width(), image.height());
    println!("Bit depth:   {}", image.info.bit_depth);
    println!("Layout:      {}", image.info.layout);
    if let Some(captured) = image.info.captured_at {
        println!("Captured:    {}", captured.format("%Y-%m-%d %H:%M:%S"));
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
    spinner.set_message("Detecting stars");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let plane = luminance(&image.pixels);
    let (mean, stddev) = compute_mean_stddev(&plane);
    let detection = DetectionConfig {
        sigma: args.sigma,
        ..Default::default()
    };
    let stars = detect_stars(&plane, &detection);
    spinner.finish_and_clear();

    println!("Background:  {:.4} (noise {:.4})", mean, stddev);
    println!("Stars:       {}", stars.len());
    if let Some(brightest) = stars.first() {
        println!(
            "Brightest:   ({:.1}, {:.1}) flux {:.2}, {} px",
            brightest.x, brightest.y, brightest.flux, brightest.area
        );
    }

    Ok(())
}
