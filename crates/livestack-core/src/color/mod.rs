pub mod debayer;

pub use debayer::{debayer, luminance};
