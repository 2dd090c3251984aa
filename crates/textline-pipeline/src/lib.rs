//! textline-pipeline: text-line polylines from a line-probability map
//! (sans-IO).
//!
//! A segmentation model produces, per pixel, the probability that the
//! pixel lies on a text baseline. This crate turns that map into one
//! ordered polyline per text line through:
//! smoothing -> hysteresis thresholding -> skeletonization ->
//! endpoint detection -> minimum-cost stitching -> assembly and
//! filtering.
//!
//! The crate has no I/O dependencies: it takes in-memory maps and
//! returns structured data. Serialization to files lives in
//! `textline-export`.

pub mod assemble;
pub mod diagnostics;
pub mod endpoints;
pub mod pipeline;
pub mod skeleton;
pub mod smooth;
pub mod stitch;
pub mod threshold;
pub mod types;

use web_time::Instant;

pub use diagnostics::PipelineDiagnostics;
pub use endpoints::Endpoint;
pub use pipeline::Pipeline;
pub use stitch::{Connection, PairKey};
pub use types::{
    Dimensions, ExtractionConfig, ExtractionResult, GrayImage, GridPoint, MASK_ON, PipelineError,
    Point, Polyline, ProbabilityMap, StagedResult, probability_map_from_gray,
};

use crate::diagnostics::{PipelineSummary, StageDiagnostics};
use crate::pipeline::{Measured, PipelineStage};

/// Extract text-line polylines from a probability map.
///
/// # Pipeline steps
///
/// 1. Gaussian smoothing (or median denoising when `sigma == 0`)
/// 2. Hysteresis thresholding into a binary line mask
/// 3. Skeletonization to one-pixel-wide fragments
/// 4. Two endpoints per fragment (the farthest-apart pair)
/// 5. Multi-source minimum-cost search between endpoints
/// 6. Chaining fragments through cheap gaps, subsampling, and centroid
///    filtering
///
/// An empty result (no pixel above `high_threshold`) is `Ok` with no
/// contours.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` fails
/// [`ExtractionConfig::validate`].
pub fn extract_lines(
    probs: &ProbabilityMap,
    config: &ExtractionConfig,
) -> Result<ExtractionResult, PipelineError> {
    Pipeline::new(probs.clone(), config.clone())
        .complete()
        .map(StagedResult::into_extraction)
}

/// Like [`extract_lines`], with hysteresis restricted to `candidates`.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if `candidates` does not
/// have the dimensions of `probs`, and [`PipelineError::InvalidConfig`]
/// for an invalid `config`.
pub fn extract_lines_with_candidates(
    probs: &ProbabilityMap,
    candidates: &GrayImage,
    config: &ExtractionConfig,
) -> Result<ExtractionResult, PipelineError> {
    Pipeline::new(probs.clone(), config.clone())
        .with_candidates(candidates.clone())
        .complete()
        .map(StagedResult::into_extraction)
}

/// Run every stage, keeping all intermediates and per-stage
/// diagnostics.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] for an invalid `config`.
pub fn extract_lines_staged(
    probs: &ProbabilityMap,
    config: &ExtractionConfig,
) -> Result<(StagedResult, PipelineDiagnostics), PipelineError> {
    let run_start = Instant::now();

    let start = Instant::now();
    let smoothed = Pipeline::new(probs.clone(), config.clone()).smooth()?;
    let smooth = diagnose(&smoothed, start);

    let start = Instant::now();
    let thresholded = smoothed.threshold()?;
    let threshold = diagnose(&thresholded, start);

    let start = Instant::now();
    let skeletonized = thresholded.skeletonize();
    let skeleton = diagnose(&skeletonized, start);

    let start = Instant::now();
    let detected = skeletonized.detect_endpoints();
    let endpoints = diagnose(&detected, start);

    let start = Instant::now();
    let stitched = detected.stitch();
    let stitch = diagnose(&stitched, start);

    let start = Instant::now();
    let assembled = stitched.assemble();
    let assemble = diagnose(&assembled, start);

    let total_duration = run_start.elapsed();
    let result = assembled.into_result();
    let summary = PipelineSummary::new(result.dimensions, &result.contours);

    log::debug!(
        "extracted {} lines from {} map in {:.3}ms",
        summary.contour_count,
        result.dimensions,
        total_duration.as_secs_f64() * 1000.0,
    );

    Ok((
        result,
        PipelineDiagnostics {
            smooth,
            threshold,
            skeleton,
            endpoints,
            stitch,
            assemble,
            total_duration,
            summary,
        },
    ))
}

/// Close the timing window for a stage and record its metrics.
fn diagnose<T: Measured>(stage: &T, started: Instant) -> StageDiagnostics {
    let duration = started.elapsed();
    StageDiagnostics {
        duration,
        metrics: stage.measured(),
    }
}
