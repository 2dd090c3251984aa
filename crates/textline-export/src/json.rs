//! JSON contour dump.
//!
//! A dump holds every contour as an integer point array together with
//! the `[height, width]` shape of the mask it was extracted from. Each
//! point is wrapped in a singleton array (`[[x, y]]`), the conventional
//! shape of polygon point arrays in image-processing toolkits, so the
//! dump can be handed to such tools without reshaping.
//!
//! These are pure functions: they return or take a `String`.

use serde::{Deserialize, Serialize};
use textline_pipeline::{ExtractionResult, Polyline};

/// One contour as rounded `(x, y)` pixel coordinates.
pub type PointArray = Vec<[[i64; 2]; 1]>;

/// Errors from encoding or decoding a contour dump.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The JSON text could not be produced or parsed.
    #[error("contour dump JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A decoded dump has a zero-sized mask shape.
    #[error("mask shape {height}x{width} is empty")]
    EmptyShape {
        /// Decoded mask height.
        height: u32,
        /// Decoded mask width.
        width: u32,
    },
}

/// Contours alongside the shape of the mask they came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContourDump {
    /// One point array per text line, in output order.
    pub contours: Vec<PointArray>,
    /// `[height, width]` of the probability map.
    pub mask_shape: [u32; 2],
}

impl ContourDump {
    /// Build a dump from an extraction result.
    #[must_use]
    pub fn from_result(result: &ExtractionResult) -> Self {
        Self {
            contours: to_point_arrays(&result.contours),
            mask_shape: [result.dimensions.height, result.dimensions.width],
        }
    }

    /// Total number of points across all contours.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.contours.iter().map(Vec::len).sum()
    }
}

/// Round every contour point to the nearest pixel.
///
/// Halfway values round away from zero.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn to_point_arrays(contours: &[Polyline]) -> Vec<PointArray> {
    contours
        .iter()
        .map(|line| {
            line.points()
                .iter()
                .map(|p| [[p.x.round() as i64, p.y.round() as i64]])
                .collect()
        })
        .collect()
}

/// Serialize an extraction result as a JSON contour dump.
///
/// The debugging mask is not included; only the contours and the mask
/// shape are written.
///
/// # Errors
///
/// Returns [`ExportError::Json`] if serialization fails.
pub fn to_json(result: &ExtractionResult) -> Result<String, ExportError> {
    Ok(serde_json::to_string(&ContourDump::from_result(result))?)
}

/// Parse a JSON contour dump.
///
/// # Errors
///
/// Returns [`ExportError::Json`] for malformed input and
/// [`ExportError::EmptyShape`] when either mask dimension is zero.
pub fn from_json(json: &str) -> Result<ContourDump, ExportError> {
    let dump: ContourDump = serde_json::from_str(json)?;
    let [height, width] = dump.mask_shape;
    if height == 0 || width == 0 {
        return Err(ExportError::EmptyShape { height, width });
    }
    Ok(dump)
}
