//! Shared types for the textline extraction pipeline.

use serde::{Deserialize, Serialize};

use crate::endpoints::Endpoint;
use crate::stitch::Connection;

/// Re-export `GrayImage` so downstream crates can reference binary
/// masks without depending on `image` directly.
pub use image::GrayImage;

/// Single-channel line-probability map with values in `[0, 1]`.
///
/// This is the line channel of the model output, already selected
/// upstream.
pub type ProbabilityMap = image::ImageBuffer<image::Luma<f32>, Vec<f32>>;

/// Pixel value marking a `true` pixel in a binary mask.
///
/// Masks are [`GrayImage`]s holding only `0` and `MASK_ON`, the same
/// convention `imageproc` uses for binary images.
pub const MASK_ON: u8 = 255;

/// Convert an 8-bit probability map in `[0, 255]` to `[0, 1]`.
#[must_use]
pub fn probability_map_from_gray(gray: &GrayImage) -> ProbabilityMap {
    ProbabilityMap::from_fn(gray.width(), gray.height(), |x, y| {
        image::Luma([f32::from(gray.get_pixel(x, y).0[0]) / 255.0])
    })
}

/// Whether the mask pixel at `(x, y)` is set.
#[must_use]
pub fn is_set(mask: &GrayImage, x: u32, y: u32) -> bool {
    mask.get_pixel(x, y).0[0] != 0
}

/// Number of set pixels in a binary mask.
#[must_use]
pub fn count_set(mask: &GrayImage) -> u64 {
    mask.pixels().map(|p| u64::from(p.0[0] != 0)).sum()
}

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// A raster cell addressed as `(row, col)`.
///
/// The search and skeleton stages work in row-major raster order;
/// conversion to `(x, y)` happens once, when polylines are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GridPoint {
    /// Row index (y).
    pub row: u32,
    /// Column index (x).
    pub col: u32,
}

impl GridPoint {
    /// Create a new grid point.
    #[must_use]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// The `(x, y)` image point at the center of this cell.
    #[must_use]
    pub fn to_point(self) -> Point {
        Point::new(f64::from(self.col), f64::from(self.row))
    }
}

/// An ordered sequence of points: one reconstructed text line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline(Vec<Point>);

impl Polyline {
    /// Create a new polyline from a vector of points.
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    /// Returns `true` if the polyline has no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of points in the polyline.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the first point, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Point> {
        self.0.first()
    }

    /// Returns the last point, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Point> {
        self.0.last()
    }

    /// Returns a slice of all points.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    /// Consumes the polyline and returns the underlying vector of points.
    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }

    /// Mean of all points, or `None` for an empty polyline.
    #[must_use]
    pub fn centroid(&self) -> Option<Point> {
        if self.0.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.0.len() as f64;
        let (sx, sy) = self
            .0
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point::new(sx / n, sy / n))
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of any image buffer.
    #[must_use]
    pub fn of<I: image::GenericImageView>(image: &I) -> Self {
        let (width, height) = image.dimensions();
        Self { width, height }
    }

    /// Total pixel count.
    #[must_use]
    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Configuration for the extraction pipeline.
///
/// Defaults follow the values the line model was tuned with: a
/// Gaussian of sigma 2.5 and a 0.8 / 0.9 hysteresis band, no edge
/// filtering, every 5th traced point kept.
///
/// Fields are public; call [`validate`](Self::validate) (done by
/// [`crate::Pipeline`] before any work) to reject inconsistent values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Gaussian smoothing sigma. `0.0` replaces the Gaussian with a
    /// fixed-strength median denoiser.
    pub sigma: f32,

    /// Hysteresis low bound. Pixels strictly above it may belong to a
    /// line if their component also reaches `high_threshold`.
    pub low_threshold: f32,

    /// Hysteresis high bound. A component is kept only if one of its
    /// pixels is strictly above it.
    pub high_threshold: f32,

    /// Fraction of the page width excluded at the left and right edges.
    /// Polylines whose centroid falls in that margin are dropped.
    pub filter_width: f64,

    /// Keep every `subsample_stride`-th traced point.
    pub subsample_stride: usize,

    /// Restrict hysteresis candidates to vertical local maxima of the
    /// smoothed map.
    pub vertical_maxima: bool,

    /// Drop mask components touching the page border band.
    pub remove_border_lines: bool,

    /// Maximum search cost of a gap link joining two skeleton fragments
    /// into one line. Roughly the number of empty pixels crossed.
    pub max_gap_cost: f64,

    /// Cap on cells finalized by the path search.
    pub max_search_expansions: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            sigma: 2.5,
            low_threshold: 0.8,
            high_threshold: 0.9,
            filter_width: 0.0,
            subsample_stride: 5,
            vertical_maxima: false,
            remove_border_lines: false,
            max_gap_cost: 10.0,
            max_search_expansions: 4_000_000,
        }
    }
}

impl ExtractionConfig {
    /// Check the configuration for inconsistent values.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if !self.sigma.is_finite() || self.sigma < 0.0 {
            return invalid(format!("sigma must be finite and >= 0, got {}", self.sigma));
        }
        for (name, value) in [
            ("low_threshold", self.low_threshold),
            ("high_threshold", self.high_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        if self.low_threshold >= self.high_threshold {
            return invalid(format!(
                "low_threshold ({}) must be below high_threshold ({})",
                self.low_threshold, self.high_threshold,
            ));
        }
        if !(0.0..0.5).contains(&self.filter_width) {
            return invalid(format!(
                "filter_width must be within [0, 0.5), got {}",
                self.filter_width,
            ));
        }
        if self.subsample_stride == 0 {
            return invalid("subsample_stride must be at least 1".to_string());
        }
        if !self.max_gap_cost.is_finite() || self.max_gap_cost < 0.0 {
            return invalid(format!(
                "max_gap_cost must be finite and >= 0, got {}",
                self.max_gap_cost,
            ));
        }
        if self.max_search_expansions == 0 {
            return invalid("max_search_expansions must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Result of running the extraction pipeline on one page.
///
/// Uses custom `Serialize`/`Deserialize` implementations because
/// `GrayImage` does not implement serde traits. The mask is serialized
/// as a `(width, height, raw_pixels)` tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    /// One polyline per detected text line, points in `(x, y)` order.
    pub contours: Vec<Polyline>,

    /// The binary line mask after hysteresis thresholding (and border
    /// removal, when enabled). Kept for debugging.
    pub lines_mask: GrayImage,

    /// Dimensions of the probability map.
    pub dimensions: Dimensions,
}

/// Serde-compatible proxy for `ExtractionResult`.
#[derive(Serialize, Deserialize)]
struct ExtractionResultProxy {
    contours: Vec<Polyline>,
    lines_mask: (u32, u32, Vec<u8>),
    dimensions: Dimensions,
}

impl Serialize for ExtractionResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = ExtractionResultProxy {
            contours: self.contours.clone(),
            lines_mask: (
                self.lines_mask.width(),
                self.lines_mask.height(),
                self.lines_mask.as_raw().clone(),
            ),
            dimensions: self.dimensions,
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ExtractionResult {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = ExtractionResultProxy::deserialize(deserializer)?;
        let (w, h, raw) = proxy.lines_mask;
        let lines_mask = GrayImage::from_raw(w, h, raw)
            .ok_or_else(|| serde::de::Error::custom("invalid lines mask dimensions"))?;
        Ok(Self {
            contours: proxy.contours,
            lines_mask,
            dimensions: proxy.dimensions,
        })
    }
}

/// Result of running the pipeline with all intermediate stage outputs
/// preserved.
#[derive(Debug, Clone)]
pub struct StagedResult {
    /// Stage 1: smoothed probability map.
    pub smoothed: ProbabilityMap,
    /// Stage 2: binary line mask.
    pub lines_mask: GrayImage,
    /// Stage 3: 1-pixel-wide skeleton of the line mask.
    pub skeleton: GrayImage,
    /// Stage 4: retained endpoints, two per skeleton fragment.
    pub endpoints: Vec<Endpoint>,
    /// Stage 5: best connection per endpoint pair.
    pub connections: Vec<Connection>,
    /// Stage 6: filtered output polylines.
    pub contours: Vec<Polyline>,
    /// Probability map dimensions.
    pub dimensions: Dimensions,
}

impl StagedResult {
    /// Drop the intermediates, keeping what [`crate::extract_lines`]
    /// returns.
    #[must_use]
    pub fn into_extraction(self) -> ExtractionResult {
        ExtractionResult {
            contours: self.contours,
            lines_mask: self.lines_mask,
            dimensions: self.dimensions,
        }
    }
}

/// Errors that can occur during extraction.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The candidate mask does not match the probability map.
    #[error("candidate mask is {actual}, probability map is {expected}")]
    DimensionMismatch {
        /// Probability map dimensions.
        expected: Dimensions,
        /// Candidate mask dimensions.
        actual: Dimensions,
    },

    /// Pipeline configuration is invalid.
    #[error("invalid extraction configuration: {0}")]
    InvalidConfig(String),
}

/// Serde-compatible proxy for `PipelineError`.
#[derive(Serialize, Deserialize)]
enum PipelineErrorProxy {
    DimensionMismatch {
        expected: Dimensions,
        actual: Dimensions,
    },
    InvalidConfig(String),
}

impl Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::DimensionMismatch { expected, actual } => PipelineErrorProxy::DimensionMismatch {
                expected: *expected,
                actual: *actual,
            },
            Self::InvalidConfig(s) => PipelineErrorProxy::InvalidConfig(s.clone()),
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PipelineError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = PipelineErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            PipelineErrorProxy::DimensionMismatch { expected, actual } => {
                Self::DimensionMismatch { expected, actual }
            }
            PipelineErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
        })
    }
}
