//! Running stack: the single authoritative accumulation of aligned frames.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use ndarray::Zip;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::{LiveStackError, Result};
use crate::frame::{Geometry, Image, ImageInfo, Pixels};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackMethod {
    Sum,
    #[default]
    Mean,
}

impl fmt::Display for StackMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sum => write!(f, "sum"),
            Self::Mean => write!(f, "mean"),
        }
    }
}

/// How the accumulator is scaled for display. Does not affect accumulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    /// Rescale every rendering to its own min/max.
    Local,
    /// Keep the absolute scale of the session: a sum is divided by the frame count.
    #[default]
    Global,
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Global => write!(f, "global"),
        }
    }
}

#[derive(Clone, Debug)]
struct StackState {
    accumulator: Option<Pixels>,
    /// Metadata of the first frame; its geometry is the reference geometry.
    reference: Option<ImageInfo>,
    frame_count: usize,
    method: StackMethod,
    normalization: Normalization,
    version: u64,
}

impl StackState {
    fn new(method: StackMethod, normalization: Normalization) -> Self {
        Self {
            accumulator: None,
            reference: None,
            frame_count: 0,
            method,
            normalization,
            version: 0,
        }
    }

    fn geometry(&self) -> Option<Geometry> {
        self.accumulator.as_ref().map(Pixels::geometry)
    }
}

/// Read-only copy of the stack taken under the lock.
#[derive(Clone, Debug)]
pub struct StackSnapshot {
    pub pixels: Pixels,
    pub info: ImageInfo,
    pub frame_count: usize,
    pub method: StackMethod,
    pub normalization: Normalization,
    /// Increases by one with every accumulation.
    pub version: u64,
}

impl StackSnapshot {
    pub fn geometry(&self) -> Geometry {
        self.pixels.geometry()
    }

    /// The raw accumulator as an image.
    pub fn to_image(&self) -> Image {
        Image {
            pixels: self.pixels.clone(),
            info: self.info.clone(),
        }
    }
}

/// Owner of the stack state. Accumulation takes the write lock for the whole
/// update, so readers see either the state before or after a frame.
#[derive(Debug)]
pub struct Stacker {
    state: RwLock<StackState>,
}

impl Stacker {
    pub fn new(method: StackMethod, normalization: Normalization) -> Self {
        Self {
            state: RwLock::new(StackState::new(method, normalization)),
        }
    }

    /// Drop all accumulated data and start over with the given settings.
    pub fn reset(&self, method: StackMethod, normalization: Normalization) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = StackState::new(method, normalization);
        debug!(%method, %normalization, "Stack reset");
    }

    /// Fold one aligned frame into the stack and return the new frame count.
    ///
    /// The first frame fixes the reference geometry. Later frames with a
    /// different geometry are rejected and leave the state untouched.
    pub fn accumulate(&self, image: &Image) -> Result<usize> {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        let geometry = image.geometry();

        let Some(acc) = state.accumulator.as_mut() else {
            let mut info = image.info.clone();
            info.source = "stack".into();
            state.accumulator = Some(image.pixels.clone());
            state.reference = Some(info);
            state.frame_count = 1;
            state.version += 1;
            return Ok(1);
        };

        let expected = acc.geometry();
        if expected != geometry {
            return Err(LiveStackError::GeometryMismatch {
                expected,
                actual: geometry,
            });
        }

        let count = state.frame_count + 1;
        let n = count as f32;
        let parallel = geometry.width * geometry.height >= PARALLEL_PIXEL_THRESHOLD;
        for (acc_plane, plane) in acc.planes_mut().into_iter().zip(image.pixels.planes()) {
            let zip = Zip::from(&mut acc_plane.data).and(&plane.data);
            match (state.method, parallel) {
                (StackMethod::Sum, true) => zip.par_for_each(|a, &v| *a += v),
                (StackMethod::Sum, false) => zip.for_each(|a, &v| *a += v),
                (StackMethod::Mean, true) => zip.par_for_each(|a, &v| *a += (v - *a) / n),
                (StackMethod::Mean, false) => zip.for_each(|a, &v| *a += (v - *a) / n),
            }
        }
        state.frame_count = count;
        state.version += 1;
        Ok(count)
    }

    pub fn frame_count(&self) -> usize {
        self.read().frame_count
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.read().geometry()
    }

    pub fn method(&self) -> StackMethod {
        self.read().method
    }

    pub fn normalization(&self) -> Normalization {
        self.read().normalization
    }

    /// Copy of the current stack, or `None` before the first frame.
    pub fn snapshot(&self) -> Option<StackSnapshot> {
        let state = self.read();
        let pixels = state.accumulator.clone()?;
        let info = state.reference.clone()?;
        Some(StackSnapshot {
            pixels,
            info,
            frame_count: state.frame_count,
            method: state.method,
            normalization: state.normalization,
            version: state.version,
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StackState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}
