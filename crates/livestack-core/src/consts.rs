/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f32 = 1e-10;

/// ITU-R BT.601 luminance coefficient for the red channel.
pub const LUMINANCE_R: f32 = 0.299;

/// ITU-R BT.601 luminance coefficient for the green channel.
pub const LUMINANCE_G: f32 = 0.587;

/// ITU-R BT.601 luminance coefficient for the blue channel.
pub const LUMINANCE_B: f32 = 0.114;

/// Number of channels in a color image (R, G, B).
pub const COLOR_CHANNEL_COUNT: usize = 3;

/// Default minimum number of matched star pairs for a frame to be stacked.
pub const DEFAULT_MIN_MATCHES: usize = 25;

/// Default detection threshold, in standard deviations above the mean.
pub const DEFAULT_DETECTION_SIGMA: f32 = 3.0;

/// Stars kept per frame for matching, brightest first.
pub const DEFAULT_MAX_STARS: usize = 60;

/// Stars used to build triangle hypotheses, brightest first.
pub const TRIANGLE_STAR_COUNT: usize = 20;

/// Nearest neighbours considered around each star when forming triangles.
pub const TRIANGLE_NEIGHBOURS: usize = 5;

/// Maximum distance in triangle-invariant space for two triangles to match.
pub const TRIANGLE_INVARIANT_TOLERANCE: f64 = 0.02;

/// Maximum residual (pixels) for a transformed star to count as a match.
pub const MATCH_RADIUS_PX: f64 = 2.0;

/// Accepted scale range of a similarity hypothesis between two sub-exposures.
pub const MIN_SIMILARITY_SCALE: f64 = 0.8;
pub const MAX_SIMILARITY_SCALE: f64 = 1.25;

/// Default hot pixel factor: a pixel brighter than this multiple of all its
/// neighbours is treated as hot.
pub const DEFAULT_HOT_PIXEL_FACTOR: f32 = 2.0;

/// Default web preview port.
pub const DEFAULT_WEB_PORT: u16 = 8000;

/// Allowed web preview port range.
pub const MIN_WEB_PORT: u16 = 1024;
pub const MAX_WEB_PORT: u16 = 65535;

/// Base name of the stack result written to the work folder.
pub const STACKED_IMAGE_FILE_NAME_BASE: &str = "stack_image";

/// Base name of the JPEG served by the web preview.
pub const WEB_SERVED_IMAGE_FILE_NAME_BASE: &str = "web_image";

/// Size and level of the placeholder served before the first result.
pub const STANDBY_IMAGE_WIDTH: usize = 320;
pub const STANDBY_IMAGE_HEIGHT: usize = 240;
pub const STANDBY_IMAGE_LEVEL: f32 = 0.1;

/// Percentiles used by autostretch to pick black and white points.
pub const AUTOSTRETCH_LOW_PERCENTILE: f32 = 0.001;
pub const AUTOSTRETCH_HIGH_PERCENTILE: f32 = 0.999;
