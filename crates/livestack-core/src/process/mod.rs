//! Processing chain: ordered, individually toggleable image steps.
//!
//! Every step shares one capability, [`ProcessStep::apply`], which either
//! produces a new image, declares itself not applicable, or fails. A failing
//! step is skipped and reported; the chain carries on with the image it had.

pub mod dark;
pub mod hot_pixel;
pub mod levels;
pub mod post;
pub mod pre;
pub mod rgb_balance;
pub mod stretch;

use std::fmt;
use std::time::{Duration, Instant};

use crate::calibration::CalibrationFrame;
use crate::color::debayer;
use crate::error::Result;
use crate::frame::{ColorLayout, Image, Pixels};

pub use hot_pixel::HotPixelParams;
pub use levels::LevelsParams;
pub use post::PostProcessor;
pub use pre::PreProcessor;
pub use rgb_balance::RgbBalanceParams;
pub use stretch::{AutostretchParams, StretchMethod};

/// One processing step and its parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum ProcessStep {
    HotPixelRemover(HotPixelParams),
    DarkSubtraction,
    Debayer,
    Autostretch(AutostretchParams),
    Levels(LevelsParams),
    RgbBalance(RgbBalanceParams),
}

impl ProcessStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::HotPixelRemover(_) => "hot pixel remover",
            Self::DarkSubtraction => "dark subtraction",
            Self::Debayer => "debayer",
            Self::Autostretch(_) => "autostretch",
            Self::Levels(_) => "levels",
            Self::RgbBalance(_) => "RGB balance",
        }
    }

    /// Apply the step. `Ok(None)` means the step has nothing to do for this
    /// image; `Err` means it could not run and the image must pass unchanged.
    pub fn apply(&self, image: &Image, ctx: &StepContext<'_>) -> Result<Option<Image>> {
        match self {
            Self::HotPixelRemover(params) => hot_pixel::remove_hot_pixels(image, params).map(Some),
            Self::DarkSubtraction => dark::apply_dark(image, ctx.calibration).map(Some),
            Self::Debayer => Ok(apply_debayer(image)),
            Self::Autostretch(params) => stretch::autostretch(image, params).map(Some),
            Self::Levels(params) => levels::apply_levels(image, params).map(Some),
            Self::RgbBalance(params) => rgb_balance::apply_rgb_balance(image, params).map(Some),
        }
    }
}

impl fmt::Display for ProcessStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn apply_debayer(image: &Image) -> Option<Image> {
    let (ColorLayout::Bayer(pattern), Pixels::Mono(raw)) = (image.info.layout, &image.pixels) else {
        return None;
    };
    let mut out = image.with_pixels(Pixels::Color(debayer(raw, pattern)));
    out.info.layout = ColorLayout::Rgb;
    out.info.calibration.push("debayer".into());
    Some(out)
}

/// Session-scoped resources a step may need.
#[derive(Clone, Copy, Default)]
pub struct StepContext<'a> {
    pub calibration: Option<&'a CalibrationFrame>,
}

/// What happened to one step while running a chain.
#[derive(Clone, Debug, PartialEq)]
pub enum StepReport {
    Started {
        step: &'static str,
    },
    Finished {
        step: &'static str,
        elapsed: Duration,
    },
    Skipped {
        step: &'static str,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChainEntry {
    pub enabled: bool,
    pub step: ProcessStep,
}

impl ChainEntry {
    pub fn new(enabled: bool, step: ProcessStep) -> Self {
        Self { enabled, step }
    }
}

/// Ordered list of steps, run front to back.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessingChain {
    entries: Vec<ChainEntry>,
}

impl ProcessingChain {
    pub fn new(entries: Vec<ChainEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    /// Names of the enabled steps, in execution order.
    pub fn enabled_steps(&self) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.step.name())
            .collect()
    }

    /// Run every enabled step over `image`, reporting progress through `report`.
    pub fn run<F>(&self, mut image: Image, ctx: &StepContext<'_>, mut report: F) -> Image
    where
        F: FnMut(StepReport),
    {
        for entry in self.entries.iter().filter(|e| e.enabled) {
            let step = entry.step.name();
            report(StepReport::Started { step });
            let start = Instant::now();
            match entry.step.apply(&image, ctx) {
                Ok(Some(out)) => {
                    image = out;
                    report(StepReport::Finished {
                        step,
                        elapsed: start.elapsed(),
                    });
                }
                Ok(None) => report(StepReport::Finished {
                    step,
                    elapsed: start.elapsed(),
                }),
                Err(e) => report(StepReport::Skipped {
                    step,
                    reason: e.to_string(),
                }),
            }
        }
        image
    }
}
