//! Post-Processor: display transforms over a snapshot of the stack.

use ndarray::Zip;

use super::{ChainEntry, ProcessStep, ProcessingChain, StepContext, StepReport};
use crate::config::PostProcessConfig;
use crate::consts::EPSILON;
use crate::frame::{Frame, Image, Pixels};
use crate::stack::{Normalization, StackMethod, StackSnapshot};

/// Autostretch, levels and RGB balance, in that order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PostProcessor {
    chain: ProcessingChain,
}

impl PostProcessor {
    pub fn from_config(config: &PostProcessConfig) -> Self {
        let chain = ProcessingChain::new(vec![
            ChainEntry::new(
                config.autostretch.enabled,
                ProcessStep::Autostretch(config.autostretch.params.clone()),
            ),
            ChainEntry::new(
                config.levels.enabled,
                ProcessStep::Levels(config.levels.params.clone()),
            ),
            ChainEntry::new(
                config.rgb_balance.enabled,
                ProcessStep::RgbBalance(config.rgb_balance.params.clone()),
            ),
        ]);
        Self { chain }
    }

    pub fn chain(&self) -> &ProcessingChain {
        &self.chain
    }

    /// Produce a displayable image from `snapshot`. The snapshot is only read.
    pub fn render<F>(&self, snapshot: &StackSnapshot, report: F) -> Image
    where
        F: FnMut(StepReport),
    {
        let normalized = Image {
            pixels: normalize(snapshot),
            info: snapshot.info.clone(),
        };
        self.chain.run(normalized, &StepContext::default(), report)
    }
}

/// Scale the accumulator for display.
///
/// Global keeps the session's absolute scale: a sum is divided by the frame
/// count so it reads like a mean. Local rescales this rendering to its own
/// minimum and maximum.
pub fn normalize(snapshot: &StackSnapshot) -> Pixels {
    match snapshot.normalization {
        Normalization::Global => match snapshot.method {
            StackMethod::Mean => snapshot.pixels.clone(),
            StackMethod::Sum => {
                let n = snapshot.frame_count.max(1) as f32;
                snapshot.pixels.map_planes(|plane| {
                    Frame::new(plane.data.mapv(|v| v / n), plane.original_bit_depth)
                })
            }
        },
        Normalization::Local => {
            let (min, max) = snapshot
                .pixels
                .planes()
                .iter()
                .flat_map(|p| p.data.iter().copied())
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
            let range = max - min;
            snapshot.pixels.map_planes(|plane| {
                let data = if range.abs() < EPSILON || !range.is_finite() {
                    plane.data.mapv(|_| 0.0)
                } else {
                    Zip::from(&plane.data).par_map_collect(|&v| (v - min) / range)
                };
                Frame::new(data, plane.original_bit_depth)
            })
        }
    }
}
