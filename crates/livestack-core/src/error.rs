use std::path::PathBuf;

use thiserror::Error;

use crate::frame::Geometry;

#[derive(Error, Debug)]
pub enum LiveStackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Error reading from file {}: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Geometry mismatch: expected {expected}, got {actual}")]
    GeometryMismatch { expected: Geometry, actual: Geometry },

    #[error("Unsupported color layout: {0}")]
    UnsupportedColorLayout(String),

    #[error("{0}")]
    Precondition(String),

    #[error("Data structure inconsistency. Light: {light} vs Dark: {dark}")]
    CalibrationMismatch { light: String, dark: String },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("insufficient matches ({found} < {required})")]
    InsufficientMatches { found: usize, required: usize },

    #[error("not enough stars detected ({found} < {required})")]
    NotEnoughStars { found: usize, required: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Missing critical folder: your configured {role} folder '{}' is missing", .path.display())]
    MissingFolder { role: &'static str, path: PathBuf },

    #[error("Cannot {command} while session is {state}")]
    InvalidTransition {
        command: &'static str,
        state: crate::session::SessionState,
    },

    #[error("Resource allocation failed: {0}")]
    Allocation(String),

    #[error("Web server error: {0}")]
    WebServer(String),
}

pub type Result<T> = std::result::Result<T, LiveStackError>;
