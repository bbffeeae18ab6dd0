//! Frame source: discovers new image files in a watched folder.
//!
//! Discovery is incremental. Every call to [`FolderScanner::discover`] returns
//! the files that appeared since the previous call, oldest modification time
//! first, and marks them as seen. A path can be handed back with
//! [`FolderScanner::forget`] when it was discovered but never admitted into
//! the pipeline. It goes into a backlog that the next discovery pass yields
//! ahead of new files, and that can be carried over to a scanner on another
//! folder.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::debug;

use crate::error::{LiveStackError, Result};
use crate::frame::{BayerPattern, Image};

use super::image_io::{load_image, tag_bayer};

/// File extensions the scanner picks up (lowercase).
const SUPPORTED_EXTENSIONS: [&str; 5] = ["tif", "tiff", "png", "jpg", "jpeg"];

/// Returns true if the path has an extension the frame source can read.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug)]
pub struct FolderScanner {
    folder: PathBuf,
    seen: HashSet<PathBuf>,
    /// Discovered but not admitted, oldest first.
    backlog: Vec<PathBuf>,
    bayer_pattern: Option<BayerPattern>,
}

impl FolderScanner {
    /// Create a scanner over `folder`. Unless `include_existing` is set, files
    /// already present are treated as seen and never yielded.
    pub fn new(folder: &Path, include_existing: bool) -> Result<Self> {
        if !folder.is_dir() {
            return Err(LiveStackError::MissingFolder {
                role: "scan",
                path: folder.to_path_buf(),
            });
        }
        let mut scanner = Self {
            folder: folder.to_path_buf(),
            seen: HashSet::new(),
            backlog: Vec::new(),
            bayer_pattern: None,
        };
        if !include_existing {
            let existing = scanner.discover()?;
            debug!(
                count = existing.len(),
                folder = %folder.display(),
                "Ignoring files already present"
            );
        }
        Ok(scanner)
    }

    /// Tag every mono image read from now on as a raw mosaic with this pattern.
    pub fn with_bayer_pattern(mut self, pattern: Option<BayerPattern>) -> Self {
        self.bayer_pattern = pattern;
        self
    }

    /// Yield `paths` ahead of anything discovered in the folder.
    pub fn with_backlog(mut self, paths: Vec<PathBuf>) -> Self {
        for path in paths {
            self.forget(&path);
        }
        self
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// The backlog followed by image files not yet seen, in discovery order.
    /// Everything returned is marked seen.
    pub fn discover(&mut self) -> Result<Vec<PathBuf>> {
        let mut paths = std::mem::take(&mut self.backlog);
        let mut fresh: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&self.folder)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() || !is_supported_image(&path) || self.seen.contains(&path) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            fresh.push((modified, path));
        }
        fresh.sort();

        let fresh: Vec<PathBuf> = fresh.into_iter().map(|(_, p)| p).collect();
        self.seen.extend(fresh.iter().cloned());
        paths.extend(fresh);
        Ok(paths)
    }

    /// Hand a path back so the next discovery pass yields it again.
    pub fn forget(&mut self, path: &Path) {
        self.seen.insert(path.to_path_buf());
        if !self.backlog.iter().any(|p| p == path) {
            self.backlog.push(path.to_path_buf());
        }
    }

    /// Remove and return the paths handed back but not yet rediscovered.
    pub fn take_backlog(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.backlog)
    }

    /// Read one discovered file into an image.
    pub fn read(&self, path: &Path) -> Result<Image> {
        let mut image = load_image(path).map_err(|e| LiveStackError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        image.info.captured_at = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Local>::from);
        if let Some(pattern) = self.bayer_pattern {
            tag_bayer(&mut image, pattern);
        }
        Ok(image)
    }

    /// One discovery pass as a lazy sequence of read results. Unreadable files
    /// yield an error and the sequence moves on.
    pub fn frames(&mut self) -> Result<impl Iterator<Item = (PathBuf, Result<Image>)> + '_> {
        let paths = self.discover()?;
        let this = &*self;
        Ok(paths.into_iter().map(move |p| {
            let image = this.read(&p);
            (p, image)
        }))
    }
}
