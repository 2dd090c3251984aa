//! Extraction diagnostics: timing, counts, and other metrics for each
//! stage.
//!
//! Every call to [`extract_lines_staged`](crate::extract_lines_staged)
//! collects diagnostics alongside the stage outputs. They are meant for
//! threshold tuning: how many components survived hysteresis, how many
//! endpoints went unconnected, whether the search hit its cap.
//!
//! Durations are [`std::time::Duration`] values measured with the
//! `web-time` crate, which falls back to `std::time::Instant` on native
//! targets. They are serialized as fractional seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Dimensions, Polyline};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| serde::de::Error::custom("duration must be finite and non-negative"))
    }
}

/// Diagnostics collected from a single extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Stage 1: smoothing.
    pub smooth: StageDiagnostics,
    /// Stage 2: hysteresis thresholding (with optional candidate
    /// restriction and border cleanup).
    pub threshold: StageDiagnostics,
    /// Stage 3: skeletonization.
    pub skeleton: StageDiagnostics,
    /// Stage 4: endpoint detection.
    pub endpoints: StageDiagnostics,
    /// Stage 5: minimum-cost stitching.
    pub stitch: StageDiagnostics,
    /// Stage 6: polyline assembly and filtering.
    pub assemble: StageDiagnostics,
    /// Wall-clock duration of the whole run.
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage.
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Smoothing metrics.
    Smooth {
        /// Gaussian sigma; `0.0` means the median denoiser ran.
        sigma: f32,
        /// Whether the median denoiser replaced the Gaussian.
        denoised: bool,
    },
    /// Thresholding metrics.
    Threshold {
        /// Low bound.
        low_threshold: f32,
        /// High bound.
        high_threshold: f32,
        /// Whether a candidate mask restricted the low mask.
        restricted: bool,
        /// Components above the low bound.
        component_count: u32,
        /// Components reaching the high bound.
        kept_component_count: u32,
        /// Line pixels in the final mask.
        line_pixel_count: u64,
        /// Total pixel count, for density.
        total_pixel_count: u64,
    },
    /// Skeletonization metrics.
    Skeleton {
        /// Set pixels in the input mask.
        mask_pixel_count: u64,
        /// Set pixels in the skeleton.
        skeleton_pixel_count: u64,
    },
    /// Endpoint detection metrics.
    Endpoints {
        /// Skeleton components.
        component_count: u32,
        /// Components without an endpoint pair.
        skipped_components: u32,
        /// Retained endpoints.
        endpoint_count: usize,
    },
    /// Stitching metrics.
    Stitch {
        /// Best connections found, intra and cross.
        connection_count: usize,
        /// Endpoints left without any connection.
        unreachable_count: usize,
        /// Cells finalized by the search.
        expansions: usize,
        /// Whether the expansion cap stopped the search.
        truncated: bool,
    },
    /// Assembly metrics.
    Assemble {
        /// Chains built from fragments and gap links.
        chain_count: usize,
        /// Gap links accepted.
        gap_links: usize,
        /// Chains dropped by the centroid filter.
        filtered_count: usize,
        /// Output polylines.
        contour_count: usize,
        /// Points across all output polylines.
        point_count: usize,
    },
}

/// Summary counts for a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Probability map width in pixels.
    pub image_width: u32,
    /// Probability map height in pixels.
    pub image_height: u32,
    /// Total pixel count.
    pub pixel_count: u64,
    /// Output polylines.
    pub contour_count: usize,
    /// Points across all output polylines.
    pub point_count: usize,
}

impl PipelineSummary {
    /// Summary for a finished run.
    #[must_use]
    pub fn new(dimensions: Dimensions, contours: &[Polyline]) -> Self {
        Self {
            image_width: dimensions.width,
            image_height: dimensions.height,
            pixel_count: dimensions.pixel_count(),
            contour_count: contours.len(),
            point_count: total_points(contours),
        }
    }
}

impl PipelineDiagnostics {
    /// Per-stage diagnostics in pipeline order, with display names.
    #[must_use]
    pub fn stages(&self) -> [(&'static str, &StageDiagnostics); 6] {
        [
            ("Smooth", &self.smooth),
            ("Threshold", &self.threshold),
            ("Skeleton", &self.skeleton),
            ("Endpoints", &self.endpoints),
            ("Stitch", &self.stitch),
            ("Assemble", &self.assemble),
        ]
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Extraction Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Map: {}x{} ({} pixels)",
            self.summary.image_width, self.summary.image_height, self.summary.pixel_count,
        ));
        let total_ms = duration_ms(self.total_duration);
        lines.push(format!("Total duration: {total_ms:.3}ms"));
        lines.push(String::new());

        lines.push(format!(
            "{:<12} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<12} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Lines: {}  |  Points: {}",
            self.summary.contour_count, self.summary.point_count,
        ));

        lines.join("\n")
    }
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Compact one-line rendering of stage metrics.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Smooth { sigma, denoised } => {
            if *denoised {
                "median denoise".to_string()
            } else {
                format!("gaussian sigma={sigma:.2}")
            }
        }
        StageMetrics::Threshold {
            low_threshold,
            high_threshold,
            restricted,
            component_count,
            kept_component_count,
            line_pixel_count,
            total_pixel_count,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let density = if *total_pixel_count > 0 {
                *line_pixel_count as f64 / *total_pixel_count as f64 * 100.0
            } else {
                0.0
            };
            let restricted = if *restricted { " restricted" } else { "" };
            format!(
                "low={low_threshold:.2} high={high_threshold:.2}{restricted} components={kept_component_count}/{component_count} pixels={line_pixel_count} ({density:.1}%)",
            )
        }
        StageMetrics::Skeleton {
            mask_pixel_count,
            skeleton_pixel_count,
        } => format!("{mask_pixel_count}->{skeleton_pixel_count} px"),
        StageMetrics::Endpoints {
            component_count,
            skipped_components,
            endpoint_count,
        } => format!(
            "{endpoint_count} endpoints from {component_count} components ({skipped_components} skipped)"
        ),
        StageMetrics::Stitch {
            connection_count,
            unreachable_count,
            expansions,
            truncated,
        } => {
            let truncated = if *truncated { " TRUNCATED" } else { "" };
            format!(
                "{connection_count} connections, {unreachable_count} unreachable, {expansions} expansions{truncated}"
            )
        }
        StageMetrics::Assemble {
            chain_count,
            gap_links,
            filtered_count,
            contour_count,
            point_count,
        } => format!(
            "{chain_count} chains ({gap_links} gap links), -{filtered_count} filtered -> {contour_count} lines, {point_count} pts"
        ),
    }
}

/// Total points across a slice of polylines.
pub(crate) fn total_points(polylines: &[Polyline]) -> usize {
    polylines.iter().map(Polyline::len).sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn stage(ms: u64, metrics: StageMetrics) -> StageDiagnostics {
        StageDiagnostics {
            duration: Duration::from_millis(ms),
            metrics,
        }
    }

    fn sample() -> PipelineDiagnostics {
        PipelineDiagnostics {
            smooth: stage(
                4,
                StageMetrics::Smooth {
                    sigma: 2.5,
                    denoised: false,
                },
            ),
            threshold: stage(
                2,
                StageMetrics::Threshold {
                    low_threshold: 0.8,
                    high_threshold: 0.9,
                    restricted: false,
                    component_count: 12,
                    kept_component_count: 9,
                    line_pixel_count: 900,
                    total_pixel_count: 10_000,
                },
            ),
            skeleton: stage(
                3,
                StageMetrics::Skeleton {
                    mask_pixel_count: 900,
                    skeleton_pixel_count: 300,
                },
            ),
            endpoints: stage(
                1,
                StageMetrics::Endpoints {
                    component_count: 9,
                    skipped_components: 1,
                    endpoint_count: 16,
                },
            ),
            stitch: stage(
                8,
                StageMetrics::Stitch {
                    connection_count: 11,
                    unreachable_count: 0,
                    expansions: 10_000,
                    truncated: true,
                },
            ),
            assemble: stage(
                2,
                StageMetrics::Assemble {
                    chain_count: 5,
                    gap_links: 3,
                    filtered_count: 1,
                    contour_count: 4,
                    point_count: 60,
                },
            ),
            total_duration: Duration::from_millis(20),
            summary: PipelineSummary {
                image_width: 100,
                image_height: 100,
                pixel_count: 10_000,
                contour_count: 4,
                point_count: 60,
            },
        }
    }

    #[test]
    fn duration_ms_converts_correctly() {
        let ms = duration_ms(Duration::from_millis(1234));
        assert!((ms - 1234.0).abs() < 0.01);
    }

    #[test]
    fn report_lists_every_stage() {
        let report = sample().report();
        assert!(report.contains("Extraction Diagnostics Report"));
        for name in ["Smooth", "Threshold", "Skeleton", "Endpoints", "Stitch", "Assemble"] {
            assert!(report.contains(name), "missing {name}");
        }
        assert!(report.contains("components=9/12"));
        assert!(report.contains("TRUNCATED"));
        assert!(report.contains("Lines: 4"));
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let json = serde_json::to_value(sample()).unwrap();
        let secs = json["total_duration"].as_f64().unwrap();
        assert!((secs - 0.02).abs() < 1e-9);
        let back: PipelineDiagnostics = serde_json::from_value(json).unwrap();
        assert_eq!(back.total_duration, Duration::from_millis(20));
        assert_eq!(back.stitch.metrics, sample().stitch.metrics);
    }

    #[test]
    fn negative_duration_is_rejected() {
        let mut json = serde_json::to_value(sample()).unwrap();
        json["total_duration"] = serde_json::json!(-1.0);
        assert!(serde_json::from_value::<PipelineDiagnostics>(json).is_err());
    }

    #[test]
    fn summary_counts_points() {
        let contours = vec![
            Polyline::new(vec![crate::Point::new(0.0, 0.0), crate::Point::new(1.0, 0.0)]),
            Polyline::new(vec![crate::Point::new(5.0, 5.0)]),
        ];
        let summary = PipelineSummary::new(
            Dimensions {
                width: 8,
                height: 4,
            },
            &contours,
        );
        assert_eq!(summary.pixel_count, 32);
        assert_eq!(summary.contour_count, 2);
        assert_eq!(summary.point_count, 3);
    }
}
