pub mod image_io;
pub mod scanner;

pub use image_io::{load_image, save_image, OutputFormat};
pub use scanner::FolderScanner;
