pub mod align;
pub mod calibration;
pub mod color;
pub mod config;
pub mod consts;
pub mod error;
pub mod frame;
pub mod io;
pub mod process;
pub mod session;
pub mod stack;
