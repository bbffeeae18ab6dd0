//! Pre-Processor: per-frame corrections applied before alignment.

use std::sync::Arc;

use tracing::{info, warn};

use super::{ChainEntry, ProcessStep, ProcessingChain, StepContext, StepReport};
use crate::calibration::CalibrationFrame;
use crate::config::PreProcessConfig;
use crate::error::{LiveStackError, Result};
use crate::frame::Image;

/// Hot-pixel removal, dark subtraction and debayering, always in that order.
#[derive(Debug, Default)]
pub struct PreProcessor {
    chain: ProcessingChain,
    calibration: Option<Arc<CalibrationFrame>>,
}

impl PreProcessor {
    /// Build the chain for `config`.
    ///
    /// The dark frame is read once here. When it cannot be read the dark step
    /// is left out of the chain for the whole run and the cause is returned
    /// alongside the processor so the caller can report it once. A calibration
    /// frame already loaded by `previous` from the same path is reused.
    pub fn build(
        config: &PreProcessConfig,
        previous: Option<&PreProcessor>,
    ) -> (Self, Option<LiveStackError>) {
        let (calibration, issue) = if config.dark.enabled {
            match load_dark(config, previous) {
                Ok(frame) => (Some(frame), None),
                Err(e) => {
                    warn!(error = %e, "Dark subtraction is SKIPPED for this session");
                    (None, Some(e))
                }
            }
        } else {
            (None, None)
        };

        let chain = ProcessingChain::new(vec![
            ChainEntry::new(
                config.hot_pixel.enabled,
                ProcessStep::HotPixelRemover(config.hot_pixel.params.clone()),
            ),
            ChainEntry::new(calibration.is_some(), ProcessStep::DarkSubtraction),
            ChainEntry::new(config.debayer, ProcessStep::Debayer),
        ]);

        (Self { chain, calibration }, issue)
    }

    pub fn chain(&self) -> &ProcessingChain {
        &self.chain
    }

    pub fn calibration(&self) -> Option<&CalibrationFrame> {
        self.calibration.as_deref()
    }

    /// Run the enabled steps over one frame. Steps that cannot run are
    /// reported through `report` and the frame passes them unchanged.
    pub fn process<F>(&self, image: Image, report: F) -> Image
    where
        F: FnMut(StepReport),
    {
        let ctx = StepContext {
            calibration: self.calibration(),
        };
        self.chain.run(image, &ctx, report)
    }
}

fn load_dark(
    config: &PreProcessConfig,
    previous: Option<&PreProcessor>,
) -> Result<Arc<CalibrationFrame>> {
    let path = config.dark.path.as_deref().ok_or_else(|| {
        LiveStackError::Config("dark subtraction is enabled but no dark path is set".into())
    })?;
    if let Some(existing) = previous.and_then(|p| p.calibration.as_ref()) {
        if existing.path() == path {
            return Ok(Arc::clone(existing));
        }
    }
    let frame = CalibrationFrame::load(path)?;
    info!(path = %path.display(), geometry = %frame.master().geometry(), "Dark frame loaded");
    Ok(Arc::new(frame))
}
