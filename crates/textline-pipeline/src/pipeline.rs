//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! Unlike [`crate::extract_lines`], which runs every stage in one call,
//! [`Pipeline`] lets the caller drive execution one step at a time:
//!
//! ```rust
//! # use textline_pipeline::{ExtractionConfig, Pipeline, PipelineError, ProbabilityMap};
//! # fn run(probs: ProbabilityMap) -> Result<(), PipelineError> {
//! let staged = Pipeline::new(probs, ExtractionConfig::default())
//!     .smooth()?
//!     .threshold()?
//!     .skeletonize()
//!     .detect_endpoints()
//!     .stitch()
//!     .assemble()
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state,
//! carrying every previously computed intermediate. The two fallible
//! steps are [`Pending::smooth`], which validates the configuration and
//! the candidate mask before any work, and [`Smoothed::threshold`].

use crate::assemble::{AssembleOptions, Assembly};
use crate::diagnostics::{StageMetrics, total_points};
use crate::endpoints::{Endpoint, EndpointSet};
use crate::stitch::{Connection, StitchOptions, StitchResult};
use crate::threshold::Thresholding;
use crate::types::{
    Dimensions, ExtractionConfig, GrayImage, PipelineError, Polyline, ProbabilityMap, StagedResult,
    count_set,
};

/// Width of the page-border band used by border-line removal.
pub const BORDER_MARGIN: u32 = 5;

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
#[must_use = "pipeline stages are consumed by advancing; call .smooth() to continue"]
pub struct Pending {
    config: ExtractionConfig,
    probs: ProbabilityMap,
    candidates: Option<GrayImage>,
}

impl Pending {
    /// The raw probability map.
    #[must_use]
    pub const fn probabilities(&self) -> &ProbabilityMap {
        &self.probs
    }

    /// Restrict hysteresis to an external candidate mask.
    ///
    /// The mask must have the dimensions of the probability map; this is
    /// checked by [`smooth`](Self::smooth).
    pub fn with_candidates(mut self, candidates: GrayImage) -> Self {
        self.candidates = Some(candidates);
        self
    }

    /// Validate inputs and smooth the probability map.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the configuration is
    /// inconsistent, and [`PipelineError::DimensionMismatch`] if the
    /// candidate mask does not match the probability map.
    pub fn smooth(self) -> Result<Smoothed, PipelineError> {
        self.config.validate()?;
        let dimensions = Dimensions::of(&self.probs);
        if let Some(candidates) = &self.candidates {
            let actual = Dimensions::of(candidates);
            if actual != dimensions {
                return Err(PipelineError::DimensionMismatch {
                    expected: dimensions,
                    actual,
                });
            }
        }
        let smoothed = crate::smooth::smooth(&self.probs, self.config.sigma);
        log::debug!("smoothed {dimensions} map, sigma={}", self.config.sigma);
        Ok(Smoothed {
            config: self.config,
            candidates: self.candidates,
            smoothed,
            dimensions,
        })
    }
}

// ───────────────────────── Stage 1: Smoothed ─────────────────────────

/// Pipeline state after smoothing.
#[must_use = "pipeline stages are consumed by advancing; call .threshold() to continue"]
pub struct Smoothed {
    config: ExtractionConfig,
    candidates: Option<GrayImage>,
    smoothed: ProbabilityMap,
    dimensions: Dimensions,
}

impl Smoothed {
    /// The smoothed probability map.
    #[must_use]
    pub const fn smoothed(&self) -> &ProbabilityMap {
        &self.smoothed
    }

    /// Advance to the thresholding stage.
    ///
    /// With `config.vertical_maxima` the vertical local maxima of the
    /// smoothed map become candidates (intersected with any external
    /// mask). With `config.remove_border_lines` components touching the
    /// page border band are dropped after hysteresis.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DimensionMismatch`] if the candidate mask
    /// does not match the probability map.
    pub fn threshold(self) -> Result<Thresholded, PipelineError> {
        let maxima = self
            .config
            .vertical_maxima
            .then(|| crate::threshold::vertical_local_maxima(&self.smoothed));
        let candidates = match (self.candidates, maxima) {
            (Some(external), Some(maxima)) => Some(crate::threshold::intersect_masks(
                &external, &maxima,
            )),
            (external, maxima) => external.or(maxima),
        };

        let Thresholding {
            mask,
            component_count,
            kept_component_count,
        } = crate::threshold::hysteresis_threshold(
            &self.smoothed,
            self.config.low_threshold,
            self.config.high_threshold,
            candidates.as_ref(),
        )?;
        let lines_mask = if self.config.remove_border_lines {
            crate::threshold::remove_border_components(&mask, BORDER_MARGIN)
        } else {
            mask
        };

        Ok(Thresholded {
            config: self.config,
            smoothed: self.smoothed,
            lines_mask,
            restricted: candidates.is_some(),
            component_count,
            kept_component_count,
            dimensions: self.dimensions,
        })
    }
}

// ───────────────────────── Stage 2: Thresholded ──────────────────────

/// Pipeline state after hysteresis thresholding.
#[must_use = "pipeline stages are consumed by advancing; call .skeletonize() to continue"]
pub struct Thresholded {
    config: ExtractionConfig,
    smoothed: ProbabilityMap,
    lines_mask: GrayImage,
    restricted: bool,
    component_count: u32,
    kept_component_count: u32,
    dimensions: Dimensions,
}

impl Thresholded {
    /// The binary line mask.
    #[must_use]
    pub const fn lines_mask(&self) -> &GrayImage {
        &self.lines_mask
    }

    /// Advance to the skeleton stage.
    pub fn skeletonize(self) -> Skeletonized {
        let skeleton = crate::skeleton::skeletonize(&self.lines_mask);
        Skeletonized {
            config: self.config,
            smoothed: self.smoothed,
            lines_mask: self.lines_mask,
            skeleton,
            dimensions: self.dimensions,
        }
    }
}

// ───────────────────────── Stage 3: Skeletonized ─────────────────────

/// Pipeline state after thinning the line mask.
#[must_use = "pipeline stages are consumed by advancing; call .detect_endpoints() to continue"]
pub struct Skeletonized {
    config: ExtractionConfig,
    smoothed: ProbabilityMap,
    lines_mask: GrayImage,
    skeleton: GrayImage,
    dimensions: Dimensions,
}

impl Skeletonized {
    /// The one-pixel-wide skeleton.
    #[must_use]
    pub const fn skeleton(&self) -> &GrayImage {
        &self.skeleton
    }

    /// Advance to the endpoint stage.
    pub fn detect_endpoints(self) -> EndpointsDetected {
        let endpoints = crate::endpoints::detect_endpoints(&self.skeleton);
        EndpointsDetected {
            config: self.config,
            smoothed: self.smoothed,
            lines_mask: self.lines_mask,
            skeleton: self.skeleton,
            endpoints,
            dimensions: self.dimensions,
        }
    }
}

// ───────────────────────── Stage 4: EndpointsDetected ────────────────

/// Pipeline state after endpoint detection.
#[must_use = "pipeline stages are consumed by advancing; call .stitch() to continue"]
pub struct EndpointsDetected {
    config: ExtractionConfig,
    smoothed: ProbabilityMap,
    lines_mask: GrayImage,
    skeleton: GrayImage,
    endpoints: EndpointSet,
    dimensions: Dimensions,
}

impl EndpointsDetected {
    /// Retained endpoints, two per fragment.
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints.endpoints
    }

    /// Advance to the stitching stage.
    pub fn stitch(self) -> Stitched {
        let stitched = crate::stitch::stitch(
            &self.skeleton,
            &self.endpoints.endpoints,
            &StitchOptions::from(&self.config),
        );
        Stitched {
            config: self.config,
            smoothed: self.smoothed,
            lines_mask: self.lines_mask,
            skeleton: self.skeleton,
            endpoints: self.endpoints.endpoints,
            stitched,
            dimensions: self.dimensions,
        }
    }
}

// ───────────────────────── Stage 5: Stitched ─────────────────────────

/// Pipeline state after minimum-cost stitching.
#[must_use = "pipeline stages are consumed by advancing; call .assemble() to continue"]
pub struct Stitched {
    config: ExtractionConfig,
    smoothed: ProbabilityMap,
    lines_mask: GrayImage,
    skeleton: GrayImage,
    endpoints: Vec<Endpoint>,
    stitched: StitchResult,
    dimensions: Dimensions,
}

impl Stitched {
    /// Best connection per endpoint pair.
    #[must_use]
    pub fn connections(&self) -> &[Connection] {
        &self.stitched.connections
    }

    /// Endpoints the search left unconnected.
    #[must_use]
    pub fn unreachable(&self) -> &[usize] {
        &self.stitched.unreachable
    }

    /// Advance to the assembly stage, the final stage.
    pub fn assemble(self) -> Assembled {
        let assembly = crate::assemble::assemble(
            &self.endpoints,
            &self.stitched.connections,
            self.dimensions.width,
            &AssembleOptions::from(&self.config),
        );
        Assembled {
            smoothed: self.smoothed,
            lines_mask: self.lines_mask,
            skeleton: self.skeleton,
            endpoints: self.endpoints,
            connections: self.stitched.connections,
            assembly,
            dimensions: self.dimensions,
        }
    }
}

// ───────────────────────── Stage 6: Assembled ────────────────────────

/// Pipeline state after assembly and filtering.
///
/// Call [`into_result`](Self::into_result) to extract the
/// [`StagedResult`] containing all intermediates.
#[must_use = "call .into_result() to extract the StagedResult"]
pub struct Assembled {
    smoothed: ProbabilityMap,
    lines_mask: GrayImage,
    skeleton: GrayImage,
    endpoints: Vec<Endpoint>,
    connections: Vec<Connection>,
    assembly: Assembly,
    dimensions: Dimensions,
}

impl Assembled {
    /// The output polylines.
    #[must_use]
    pub fn contours(&self) -> &[Polyline] {
        &self.assembly.contours
    }

    /// Probability map dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Consume the pipeline and return the full [`StagedResult`].
    #[must_use]
    pub fn into_result(self) -> StagedResult {
        StagedResult {
            smoothed: self.smoothed,
            lines_mask: self.lines_mask,
            skeleton: self.skeleton,
            endpoints: self.endpoints,
            connections: self.connections,
            contours: self.assembly.contours,
            dimensions: self.dimensions,
        }
    }
}

// ──────────────────── PipelineStage trait + Stage enum ────────────────

/// Total number of stages in the pipeline.
pub const STAGE_COUNT: usize = 7;

/// The output produced by a single pipeline stage.
#[must_use]
pub enum StageOutput<'a> {
    /// Raw probability map.
    Source {
        /// The input map.
        probabilities: &'a ProbabilityMap,
    },
    /// Smoothed map.
    Smoothed {
        /// The smoothed map.
        smoothed: &'a ProbabilityMap,
    },
    /// Binary line mask.
    Thresholded {
        /// The line mask.
        lines_mask: &'a GrayImage,
    },
    /// Skeleton of the line mask.
    Skeletonized {
        /// The skeleton.
        skeleton: &'a GrayImage,
    },
    /// Retained endpoints.
    EndpointsDetected {
        /// Endpoints, two per fragment.
        endpoints: &'a [Endpoint],
    },
    /// Stitched connections.
    Stitched {
        /// Best connection per pair.
        connections: &'a [Connection],
    },
    /// Output polylines.
    Assembled {
        /// The polylines.
        contours: &'a [Polyline],
        /// Probability map dimensions.
        dimensions: Dimensions,
    },
}

/// Trait implemented by every pipeline stage, enabling uniform iteration.
///
/// # Loop pattern
///
/// ```rust
/// # use textline_pipeline::{ExtractionConfig, Pipeline, PipelineError, ProbabilityMap};
/// # use textline_pipeline::pipeline::{Advance, Stage};
/// # fn run(probs: ProbabilityMap) -> Result<(), PipelineError> {
/// let mut stage: Stage = Pipeline::new(probs, ExtractionConfig::default()).into();
/// loop {
///     match stage.advance()? {
///         Advance::Next(next) => stage = next,
///         Advance::Complete(done) => { stage = done; break; }
///     }
/// }
/// let result = stage.complete()?;
/// # Ok(())
/// # }
/// ```
pub trait PipelineStage: Sized {
    /// Short name of this stage (e.g. `"source"`, `"stitch"`).
    const NAME: &str;

    /// Zero-based index (`0` for Pending through `6` for Assembled).
    const INDEX: usize;

    /// The output this stage produced.
    fn output(&self) -> StageOutput<'_>;

    /// Metrics describing the work done to reach this stage.
    ///
    /// `None` for [`Pending`], which has done no work.
    fn metrics(&self) -> Option<StageMetrics>;

    /// Advance to the next stage.
    ///
    /// Returns `Ok(None)` if already at the final stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the transition fails.
    fn next(self) -> Result<Option<Stage>, PipelineError>;

    /// Run all remaining stages and return the [`StagedResult`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if any remaining fallible stage fails.
    fn complete(self) -> Result<StagedResult, PipelineError>;
}

/// Metrics of a stage that has done work; every stage but [`Pending`].
pub(crate) trait Measured {
    fn measured(&self) -> StageMetrics;
}

impl PipelineStage for Pending {
    const NAME: &str = "source";
    const INDEX: usize = 0;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Source {
            probabilities: &self.probs,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        None
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Smoothed(self.smooth()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.smooth()?.complete()
    }
}

impl Measured for Smoothed {
    fn measured(&self) -> StageMetrics {
        StageMetrics::Smooth {
            sigma: self.config.sigma,
            denoised: self.config.sigma <= 0.0,
        }
    }
}

impl PipelineStage for Smoothed {
    const NAME: &str = "smooth";
    const INDEX: usize = 1;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Smoothed {
            smoothed: &self.smoothed,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.measured())
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Thresholded(self.threshold()?)))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.threshold()?.complete()
    }
}

impl Measured for Thresholded {
    fn measured(&self) -> StageMetrics {
        StageMetrics::Threshold {
            low_threshold: self.config.low_threshold,
            high_threshold: self.config.high_threshold,
            restricted: self.restricted,
            component_count: self.component_count,
            kept_component_count: self.kept_component_count,
            line_pixel_count: count_set(&self.lines_mask),
            total_pixel_count: self.dimensions.pixel_count(),
        }
    }
}

impl PipelineStage for Thresholded {
    const NAME: &str = "threshold";
    const INDEX: usize = 2;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Thresholded {
            lines_mask: &self.lines_mask,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.measured())
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Skeletonized(self.skeletonize())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.skeletonize().complete()
    }
}

impl Measured for Skeletonized {
    fn measured(&self) -> StageMetrics {
        StageMetrics::Skeleton {
            mask_pixel_count: count_set(&self.lines_mask),
            skeleton_pixel_count: count_set(&self.skeleton),
        }
    }
}

impl PipelineStage for Skeletonized {
    const NAME: &str = "skeleton";
    const INDEX: usize = 3;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Skeletonized {
            skeleton: &self.skeleton,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.measured())
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::EndpointsDetected(self.detect_endpoints())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.detect_endpoints().complete()
    }
}

impl Measured for EndpointsDetected {
    fn measured(&self) -> StageMetrics {
        StageMetrics::Endpoints {
            component_count: self.endpoints.component_count,
            skipped_components: self.endpoints.skipped_components,
            endpoint_count: self.endpoints.endpoints.len(),
        }
    }
}

impl PipelineStage for EndpointsDetected {
    const NAME: &str = "endpoints";
    const INDEX: usize = 4;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::EndpointsDetected {
            endpoints: &self.endpoints.endpoints,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.measured())
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Stitched(self.stitch())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        self.stitch().complete()
    }
}

impl Measured for Stitched {
    fn measured(&self) -> StageMetrics {
        StageMetrics::Stitch {
            connection_count: self.stitched.connections.len(),
            unreachable_count: self.stitched.unreachable.len(),
            expansions: self.stitched.expansions,
            truncated: self.stitched.truncated,
        }
    }
}

impl PipelineStage for Stitched {
    const NAME: &str = "stitch";
    const INDEX: usize = 5;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Stitched {
            connections: &self.stitched.connections,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.measured())
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(Some(Stage::Assembled(self.assemble())))
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        Ok(self.assemble().into_result())
    }
}

impl Measured for Assembled {
    fn measured(&self) -> StageMetrics {
        StageMetrics::Assemble {
            chain_count: self.assembly.chain_count,
            gap_links: self.assembly.gap_links,
            filtered_count: self.assembly.filtered_count(),
            contour_count: self.assembly.contours.len(),
            point_count: total_points(&self.assembly.contours),
        }
    }
}

impl PipelineStage for Assembled {
    const NAME: &str = "assemble";
    const INDEX: usize = 6;

    fn output(&self) -> StageOutput<'_> {
        StageOutput::Assembled {
            contours: &self.assembly.contours,
            dimensions: self.dimensions,
        }
    }

    fn metrics(&self) -> Option<StageMetrics> {
        Some(self.measured())
    }

    fn next(self) -> Result<Option<Stage>, PipelineError> {
        Ok(None)
    }

    fn complete(self) -> Result<StagedResult, PipelineError> {
        Ok(self.into_result())
    }
}

/// Enum wrapping all pipeline stages for uniform, loopable access.
#[must_use]
pub enum Stage {
    /// See [`Pending`].
    Pending(Pending),
    /// See [`Smoothed`].
    Smoothed(Smoothed),
    /// See [`Thresholded`].
    Thresholded(Thresholded),
    /// See [`Skeletonized`].
    Skeletonized(Skeletonized),
    /// See [`EndpointsDetected`].
    EndpointsDetected(EndpointsDetected),
    /// See [`Stitched`].
    Stitched(Stitched),
    /// See [`Assembled`].
    Assembled(Assembled),
}

/// Fails to compile when a [`Stage`] variant is added without bumping
/// [`STAGE_COUNT`].
#[allow(dead_code, clippy::match_same_arms)]
const fn _stage_count_guard(s: &Stage) {
    match s {
        Stage::Pending(_)
        | Stage::Smoothed(_)
        | Stage::Thresholded(_)
        | Stage::Skeletonized(_)
        | Stage::EndpointsDetected(_)
        | Stage::Stitched(_)
        | Stage::Assembled(_) => {}
    }
}

/// Result of [`Stage::advance`]: either the next stage or the
/// completed final stage returned unchanged.
#[must_use]
pub enum Advance {
    /// The pipeline advanced to this stage.
    Next(Stage),
    /// The pipeline was already at the final stage.
    Complete(Stage),
}

/// Delegate a method call to whichever `Stage` variant is active.
macro_rules! delegate {
    ($self:ident, $method:ident $(, $arg:expr)*) => {
        match $self {
            Self::Pending(s) => s.$method($($arg),*),
            Self::Smoothed(s) => s.$method($($arg),*),
            Self::Thresholded(s) => s.$method($($arg),*),
            Self::Skeletonized(s) => s.$method($($arg),*),
            Self::EndpointsDetected(s) => s.$method($($arg),*),
            Self::Stitched(s) => s.$method($($arg),*),
            Self::Assembled(s) => s.$method($($arg),*),
        }
    };
}

impl Stage {
    /// Short name of the current stage.
    #[must_use]
    pub fn name(&self) -> &'static str {
        delegate!(self, name)
    }

    /// Zero-based index of the current stage.
    #[must_use]
    pub fn index(&self) -> usize {
        delegate!(self, index)
    }

    /// The output this stage produced.
    pub fn output(&self) -> StageOutput<'_> {
        delegate!(self, output)
    }

    /// Stage-specific metrics; `None` for `Pending`.
    #[must_use]
    pub fn metrics(&self) -> Option<StageMetrics> {
        delegate!(self, metrics)
    }

    /// Whether the pipeline is at the final stage.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Assembled(_))
    }

    /// Advance to the next stage; `Ok(None)` consumes the final stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a fallible stage transition fails.
    pub fn next(self) -> Result<Option<Self>, PipelineError> {
        delegate!(self, next)
    }

    /// Advance to the next stage, returning `self` unchanged if
    /// already complete.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if a fallible stage transition fails.
    pub fn advance(self) -> Result<Advance, PipelineError> {
        if self.is_complete() {
            return Ok(Advance::Complete(self));
        }
        #[allow(clippy::unreachable)]
        let next = self
            .next()?
            .unwrap_or_else(|| unreachable!("non-final stage returned None from next()"));
        Ok(Advance::Next(next))
    }

    /// Run all remaining stages to completion.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if any remaining fallible stage fails.
    pub fn complete(self) -> Result<StagedResult, PipelineError> {
        delegate!(self, complete)
    }
}

// Associated constants are not reachable through `self`, so the macro
// goes through this helper.
trait StageMetadata {
    fn name(&self) -> &'static str;
    fn index(&self) -> usize;
}

impl<T: PipelineStage> StageMetadata for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn index(&self) -> usize {
        T::INDEX
    }
}

impl From<Pending> for Stage {
    fn from(s: Pending) -> Self {
        Self::Pending(s)
    }
}

impl From<Smoothed> for Stage {
    fn from(s: Smoothed) -> Self {
        Self::Smoothed(s)
    }
}

impl From<Thresholded> for Stage {
    fn from(s: Thresholded) -> Self {
        Self::Thresholded(s)
    }
}

impl From<Skeletonized> for Stage {
    fn from(s: Skeletonized) -> Self {
        Self::Skeletonized(s)
    }
}

impl From<EndpointsDetected> for Stage {
    fn from(s: EndpointsDetected) -> Self {
        Self::EndpointsDetected(s)
    }
}

impl From<Stitched> for Stage {
    fn from(s: Stitched) -> Self {
        Self::Stitched(s)
    }
}

impl From<Assembled> for Stage {
    fn from(s: Assembled) -> Self {
        Self::Assembled(s)
    }
}

// ───────────────────── Pipeline entry point ──────────────────────────

/// Incremental line extraction pipeline.
///
/// Created via [`Pipeline::new`], which stores the map and config
/// without doing any processing. Each stage method consumes the current
/// state and returns the next, so stages cannot be skipped or
/// reordered.
pub struct Pipeline;

impl Pipeline {
    /// Create a new pipeline from a probability map and config.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(probs: ProbabilityMap, config: ExtractionConfig) -> Pending {
        Pending {
            config,
            probs,
            candidates: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use image::Luma;

    use super::*;
    use crate::types::MASK_ON;

    /// A 5-pixel-tall band of probability 1.0 on rows 8..=12, columns
    /// `from..=to`, in a 40x20 map.
    fn band(from: u32, to: u32) -> ProbabilityMap {
        ProbabilityMap::from_fn(40, 20, |x, y| {
            Luma([if (8..=12).contains(&y) && (from..=to).contains(&x) {
                1.0
            } else {
                0.0
            }])
        })
    }

    fn config() -> ExtractionConfig {
        ExtractionConfig {
            sigma: 1.0,
            low_threshold: 0.5,
            high_threshold: 0.9,
            ..ExtractionConfig::default()
        }
    }

    fn run(probs: ProbabilityMap, config: ExtractionConfig) -> StagedResult {
        Pipeline::new(probs, config)
            .smooth()
            .unwrap()
            .threshold()
            .unwrap()
            .skeletonize()
            .detect_endpoints()
            .stitch()
            .assemble()
            .into_result()
    }

    /// Advance a [`Stage`] to completion, logging `(index, name)` pairs.
    #[allow(clippy::type_complexity)]
    fn drive_to_end(start: Stage) -> Result<(Stage, Vec<(usize, &'static str)>), PipelineError> {
        let mut log = vec![(start.index(), start.name())];
        let mut stage = start;
        loop {
            match stage.advance()? {
                Advance::Next(next) => {
                    log.push((next.index(), next.name()));
                    stage = next;
                }
                Advance::Complete(done) => return Ok((done, log)),
            }
        }
    }

    // ─────────── Typed API tests ─────────────────────────────────

    #[test]
    fn band_becomes_one_centered_line() {
        let result = run(band(5, 34), config());
        assert_eq!(result.contours.len(), 1);
        assert_eq!(result.endpoints.len(), 2);
        let line = &result.contours[0];
        assert!(line.len() >= 4, "only {} points", line.len());
        for p in line.points() {
            assert!((8.0..=12.0).contains(&p.y), "point {p:?} off the band");
        }
    }

    #[test]
    fn pending_exposes_probabilities() {
        let probs = band(5, 34);
        let pending = Pipeline::new(probs.clone(), config());
        assert_eq!(pending.probabilities(), &probs);
    }

    #[test]
    fn invalid_config_fails_before_work() {
        let bad = ExtractionConfig {
            low_threshold: 0.95,
            ..config()
        };
        let err = Pipeline::new(band(5, 34), bad).smooth().err().unwrap();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }

    #[test]
    fn mismatched_candidates_fail_before_work() {
        let err = Pipeline::new(band(5, 34), config())
            .with_candidates(GrayImage::new(10, 10))
            .smooth()
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
    }

    #[test]
    fn empty_candidate_mask_yields_no_lines() {
        let staged = Pipeline::new(band(5, 34), config())
            .with_candidates(GrayImage::new(40, 20))
            .complete()
            .unwrap();
        assert!(staged.contours.is_empty());
        assert_eq!(count_set(&staged.lines_mask), 0);
    }

    #[test]
    fn full_candidate_mask_changes_nothing() {
        let full = GrayImage::from_pixel(40, 20, Luma([MASK_ON]));
        let with = Pipeline::new(band(5, 34), config())
            .with_candidates(full)
            .complete()
            .unwrap();
        let without = run(band(5, 34), config());
        assert_eq!(with.lines_mask, without.lines_mask);
        assert_eq!(with.contours, without.contours);
    }

    #[test]
    fn border_lines_are_removed_when_enabled() {
        let touching = band(0, 34);
        let kept = run(touching.clone(), config());
        assert_eq!(kept.contours.len(), 1);

        let removed = run(
            touching,
            ExtractionConfig {
                remove_border_lines: true,
                ..config()
            },
        );
        assert!(removed.contours.is_empty());
    }

    #[test]
    fn vertical_maxima_keep_band_line() {
        let result = run(
            band(5, 34),
            ExtractionConfig {
                vertical_maxima: true,
                ..config()
            },
        );
        assert_eq!(result.contours.len(), 1);
    }

    #[test]
    fn assembled_exposes_dimensions() {
        let assembled = Pipeline::new(band(5, 34), config())
            .smooth()
            .unwrap()
            .threshold()
            .unwrap()
            .skeletonize()
            .detect_endpoints()
            .stitch()
            .assemble();
        assert_eq!(
            assembled.dimensions(),
            Dimensions {
                width: 40,
                height: 20
            }
        );
        assert_eq!(assembled.contours().len(), 1);
    }

    // ─────────── PipelineStage trait + Stage enum tests ───────────

    #[test]
    fn stage_names_and_indices() {
        let start: Stage = Pipeline::new(band(5, 34), config()).into();
        let (_, log) = drive_to_end(start).unwrap();
        let expected = [
            (0, "source"),
            (1, "smooth"),
            (2, "threshold"),
            (3, "skeleton"),
            (4, "endpoints"),
            (5, "stitch"),
            (6, "assemble"),
        ];
        assert_eq!(log.as_slice(), &expected);
        assert_eq!(log.len(), STAGE_COUNT);
    }

    #[test]
    fn loop_to_completion_matches_chained_api() {
        let chained = run(band(5, 34), config());
        let start: Stage = Pipeline::new(band(5, 34), config()).into();
        let (final_stage, _) = drive_to_end(start).unwrap();
        let looped = final_stage.complete().unwrap();

        assert_eq!(chained.smoothed, looped.smoothed);
        assert_eq!(chained.lines_mask, looped.lines_mask);
        assert_eq!(chained.skeleton, looped.skeleton);
        assert_eq!(chained.endpoints, looped.endpoints);
        assert_eq!(chained.connections, looped.connections);
        assert_eq!(chained.contours, looped.contours);
        assert_eq!(chained.dimensions, looped.dimensions);
    }

    #[test]
    fn complete_from_mid_stage() {
        let skeletonized = Pipeline::new(band(5, 34), config())
            .smooth()
            .unwrap()
            .threshold()
            .unwrap()
            .skeletonize();
        let result = skeletonized.complete().unwrap();
        assert_eq!(result.contours.len(), 1);
    }

    #[test]
    fn next_on_final_stage_returns_none() {
        let assembled = Pipeline::new(band(5, 34), config())
            .smooth()
            .unwrap()
            .threshold()
            .unwrap()
            .skeletonize()
            .detect_endpoints()
            .stitch()
            .assemble();
        assert!(assembled.next().unwrap().is_none());
    }

    #[test]
    fn output_variant_matches_stage() {
        let mut stage: Stage = Pipeline::new(band(5, 34), config()).into();
        let mut visited = 0;
        loop {
            let idx = stage.index();
            let variant_idx = match stage.output() {
                StageOutput::Source { .. } => 0,
                StageOutput::Smoothed { .. } => 1,
                StageOutput::Thresholded { .. } => 2,
                StageOutput::Skeletonized { .. } => 3,
                StageOutput::EndpointsDetected { .. } => 4,
                StageOutput::Stitched { .. } => 5,
                StageOutput::Assembled { .. } => 6,
            };
            assert_eq!(idx, variant_idx, "output variant mismatch at index {idx}");
            assert_eq!(stage.metrics().is_none(), idx == 0);
            visited += 1;
            match stage.advance().unwrap() {
                Advance::Next(next) => stage = next,
                Advance::Complete(_) => break,
            }
        }
        assert_eq!(visited, STAGE_COUNT);
    }

    #[test]
    fn from_conversions_preserve_index() {
        let stage: Stage = Pipeline::new(band(5, 34), config()).into();
        assert_eq!(stage.index(), 0);
        assert!(!stage.is_complete());

        let smoothed = Pipeline::new(band(5, 34), config()).smooth().unwrap();
        let stage: Stage = smoothed.into();
        assert_eq!(stage.index(), 1);
    }

    #[test]
    fn invalid_config_error_via_advance() {
        let bad = ExtractionConfig {
            subsample_stride: 0,
            ..config()
        };
        let stage: Stage = Pipeline::new(band(5, 34), bad).into();
        assert!(matches!(
            stage.advance(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
