use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::align::DetectionConfig;
use crate::consts::{DEFAULT_MIN_MATCHES, DEFAULT_WEB_PORT, MAX_WEB_PORT, MIN_WEB_PORT};
use crate::error::{LiveStackError, Result};
use crate::frame::BayerPattern;
use crate::io::OutputFormat;
use crate::process::{AutostretchParams, HotPixelParams, LevelsParams, RgbBalanceParams};
use crate::stack::{Normalization, StackMethod};

/// Everything a session needs, loadable from TOML.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub paths: PathsConfig,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
    /// Process files already in the scan folder when the scanner starts.
    #[serde(default)]
    pub include_existing: bool,
    /// Treat mono inputs as raw mosaics with this pattern.
    #[serde(default)]
    pub bayer_pattern: Option<BayerPattern>,
    #[serde(default)]
    pub alignment: AlignmentConfig,
    #[serde(default)]
    pub stacking: StackingConfig,
    #[serde(default)]
    pub preprocess: PreProcessConfig,
    #[serde(default)]
    pub postprocess: PostProcessConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub web: WebConfig,
}

fn default_workers() -> usize {
    2
}

fn default_queue_size() -> usize {
    8
}

fn default_scan_interval_ms() -> u64 {
    500
}

impl SessionConfig {
    pub fn new(scan_folder: impl Into<PathBuf>, work_folder: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                scan_folder: scan_folder.into(),
                work_folder: work_folder.into(),
            },
            workers: default_workers(),
            queue_size: default_queue_size(),
            scan_interval_ms: default_scan_interval_ms(),
            include_existing: false,
            bayer_pattern: None,
            alignment: AlignmentConfig::default(),
            stacking: StackingConfig::default(),
            preprocess: PreProcessConfig::default(),
            postprocess: PostProcessConfig::default(),
            output: OutputConfig::default(),
            web: WebConfig::default(),
        }
    }

    /// Check value ranges. Folder existence is checked at session start.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(LiveStackError::Config("worker count must be at least 1".into()));
        }
        if self.queue_size == 0 {
            return Err(LiveStackError::Config("queue size must be at least 1".into()));
        }
        if self.scan_interval_ms == 0 {
            return Err(LiveStackError::Config("scan interval must be positive".into()));
        }
        if self.alignment.min_matches < 3 {
            return Err(LiveStackError::Config(format!(
                "minimum matches count must be at least 3, got {}",
                self.alignment.min_matches
            )));
        }
        // Detection keeps at most max_stars, so more matches can never be found.
        if self.alignment.min_matches > self.alignment.detection.max_stars {
            return Err(LiveStackError::Config(format!(
                "minimum matches count ({}) exceeds the number of stars kept for matching ({})",
                self.alignment.min_matches, self.alignment.detection.max_stars
            )));
        }
        self.web.validate()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    pub scan_folder: PathBuf,
    pub work_folder: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignmentConfig {
    pub enabled: bool,
    pub min_matches: usize,
    #[serde(default)]
    pub detection: DetectionConfig,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_matches: DEFAULT_MIN_MATCHES,
            detection: DetectionConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StackingConfig {
    pub method: StackMethod,
    pub normalization: Normalization,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PreProcessConfig {
    #[serde(default)]
    pub hot_pixel: HotPixelConfig,
    #[serde(default)]
    pub dark: DarkConfig,
    /// Demosaic raw frames when a Bayer pattern is configured.
    #[serde(default = "default_true")]
    pub debayer: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HotPixelConfig {
    pub enabled: bool,
    #[serde(default)]
    pub params: HotPixelParams,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DarkConfig {
    pub enabled: bool,
    pub path: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostProcessConfig {
    #[serde(default)]
    pub autostretch: Toggle<AutostretchParams>,
    #[serde(default)]
    pub levels: Toggle<LevelsParams>,
    #[serde(default)]
    pub rgb_balance: Toggle<RgbBalanceParams>,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            autostretch: Toggle::on(AutostretchParams::default()),
            levels: Toggle::default(),
            rgb_balance: Toggle::default(),
        }
    }
}

/// A step's parameters with its enable flag.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Toggle<T> {
    pub enabled: bool,
    #[serde(default)]
    pub params: T,
}

impl<T> Toggle<T> {
    pub fn on(params: T) -> Self {
        Self {
            enabled: true,
            params,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Also keep a timestamped copy of every new result.
    pub save_every_image: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebConfig {
    /// Start the web preview together with the session.
    pub autostart: bool,
    pub port: u16,
    pub refresh_period_secs: u32,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            autostart: false,
            port: DEFAULT_WEB_PORT,
            refresh_period_secs: 5,
        }
    }
}

impl WebConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port < MIN_WEB_PORT {
            return Err(LiveStackError::Config(format!(
                "web server port number must be a number between {MIN_WEB_PORT} and {MAX_WEB_PORT}, got {}",
                self.port
            )));
        }
        if self.refresh_period_secs == 0 {
            return Err(LiveStackError::Config("web refresh period must be positive".into()));
        }
        Ok(())
    }
}
