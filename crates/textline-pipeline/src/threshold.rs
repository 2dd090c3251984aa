//! Hysteresis thresholding of a smoothed probability map.
//!
//! Unlike the pixel-flood hysteresis inside Canny, the decision here is
//! made per connected component: every pixel above the low bound is
//! labelled with its 8-connected component, and a component survives
//! only if at least one of its pixels exceeds the high bound.
//!
//! Both comparisons are strict. Callers needing inclusive bounds adjust
//! the thresholds upstream.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::types::{Dimensions, MASK_ON, PipelineError, ProbabilityMap, is_set};

/// Outcome of [`hysteresis_threshold`], with the counts the diagnostics
/// report.
#[derive(Debug, Clone)]
pub struct Thresholding {
    /// Binary line mask (255 = line).
    pub mask: GrayImage,
    /// Number of components above the low bound.
    pub component_count: u32,
    /// Number of components that reached the high bound.
    pub kept_component_count: u32,
}

/// Turn a probability map into a binary line mask.
///
/// `candidates`, when given, is intersected with the low mask before
/// labelling.
///
/// # Errors
///
/// Returns [`PipelineError::DimensionMismatch`] if `candidates` does not
/// have the dimensions of `probs`.
pub fn hysteresis_threshold(
    probs: &ProbabilityMap,
    low_threshold: f32,
    high_threshold: f32,
    candidates: Option<&GrayImage>,
) -> Result<Thresholding, PipelineError> {
    let expected = Dimensions::of(probs);
    if let Some(c) = candidates {
        let actual = Dimensions::of(c);
        if actual != expected {
            return Err(PipelineError::DimensionMismatch { expected, actual });
        }
    }

    let low_mask = GrayImage::from_fn(probs.width(), probs.height(), |x, y| {
        let above = probs.get_pixel(x, y).0[0] > low_threshold;
        let allowed = candidates.is_none_or(|c| is_set(c, x, y));
        Luma([if above && allowed { MASK_ON } else { 0 }])
    });

    let labels = connected_components(&low_mask, Connectivity::Eight, Luma([0u8]));
    let component_count = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0);

    // good[label] is set once any pixel of that component passes the
    // high bound. Index 0 is background and never set.
    let mut good = vec![false; component_count as usize + 1];
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0];
        if label != 0 && probs.get_pixel(x, y).0[0] > high_threshold {
            good[label as usize] = true;
        }
    }
    #[allow(clippy::cast_possible_truncation)]
    let kept_component_count = good.iter().filter(|&&g| g).count() as u32;

    let mask = GrayImage::from_fn(probs.width(), probs.height(), |x, y| {
        let label = labels.get_pixel(x, y).0[0] as usize;
        Luma([if good[label] { MASK_ON } else { 0 }])
    });

    log::debug!(
        "hysteresis low={low_threshold} high={high_threshold}: kept {kept_component_count}/{component_count} components"
    );

    Ok(Thresholding {
        mask,
        component_count,
        kept_component_count,
    })
}

/// Pixel-wise AND of two masks of equal size.
#[must_use = "returns the intersection"]
pub fn intersect_masks(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        let both = is_set(a, x, y) && x < b.width() && y < b.height() && is_set(b, x, y);
        Luma([if both { MASK_ON } else { 0 }])
    })
}

/// `L∞` radius of the closing applied to the maxima mask (a 5x5 square).
const MAXIMA_CLOSING_RADIUS: u8 = 2;

/// Pixels that are local maxima of the map along the vertical axis.
///
/// A pixel on an interior row is a maximum when it is `>=` the pixel
/// above and the pixel below is `<=` it. The first and last rows are
/// never maxima. The raw maxima are closed with a 5x5 square so that
/// the mask forms continuous ridges along each text line.
#[must_use = "returns the candidate mask"]
pub fn vertical_local_maxima(probs: &ProbabilityMap) -> GrayImage {
    let (w, h) = probs.dimensions();
    let maxima = GrayImage::from_fn(w, h, |x, y| {
        if y == 0 || y + 1 >= h {
            return Luma([0]);
        }
        let here = probs.get_pixel(x, y).0[0];
        let above = probs.get_pixel(x, y - 1).0[0];
        let below = probs.get_pixel(x, y + 1).0[0];
        Luma([if here >= above && below <= here {
            MASK_ON
        } else {
            0
        }])
    });
    imageproc::morphology::close(&maxima, Norm::LInf, MAXIMA_CLOSING_RADIUS)
}

/// Remove the components of `mask` that touch a `margin`-pixel band
/// along the page border.
///
/// The band itself is treated as foreground while labelling, so every
/// component reaching it merges into the single border component, which
/// is then cleared.
#[must_use = "returns the cleaned mask"]
pub fn remove_border_components(mask: &GrayImage, margin: u32) -> GrayImage {
    let (w, h) = mask.dimensions();
    if margin == 0 || w == 0 || h == 0 {
        return mask.clone();
    }
    let in_band = |x: u32, y: u32| x < margin || y < margin || x + margin >= w || y + margin >= h;

    let padded = GrayImage::from_fn(w, h, |x, y| {
        Luma([if in_band(x, y) || is_set(mask, x, y) {
            MASK_ON
        } else {
            0
        }])
    });
    let labels = connected_components(&padded, Connectivity::Eight, Luma([0u8]));
    let border_label = labels.get_pixel(0, 0).0[0];

    GrayImage::from_fn(w, h, |x, y| {
        let keep = is_set(mask, x, y) && labels.get_pixel(x, y).0[0] != border_label;
        Luma([if keep { MASK_ON } else { 0 }])
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::count_set;

    /// Two horizontal strokes: row 3 peaks at 0.95, row 8 only at 0.85.
    fn two_strokes() -> ProbabilityMap {
        ProbabilityMap::from_fn(20, 12, |x, y| {
            let v = match y {
                3 if (2..18).contains(&x) => {
                    if x == 10 {
                        0.95
                    } else {
                        0.85
                    }
                }
                8 if (2..18).contains(&x) => 0.85,
                _ => 0.1,
            };
            Luma([v])
        })
    }

    fn low_mask(probs: &ProbabilityMap, low: f32) -> GrayImage {
        GrayImage::from_fn(probs.width(), probs.height(), |x, y| {
            Luma([if probs.get_pixel(x, y).0[0] > low {
                MASK_ON
            } else {
                0
            }])
        })
    }

    #[test]
    fn keeps_only_components_reaching_high() {
        let result = hysteresis_threshold(&two_strokes(), 0.8, 0.9, None).unwrap();
        assert_eq!(result.component_count, 2);
        assert_eq!(result.kept_component_count, 1);
        assert_eq!(count_set(&result.mask), 16);
        assert!(is_set(&result.mask, 2, 3));
        assert!(!is_set(&result.mask, 2, 8));
    }

    #[test]
    fn nothing_above_high_yields_empty_mask() {
        let result = hysteresis_threshold(&two_strokes(), 0.5, 0.97, None).unwrap();
        assert_eq!(count_set(&result.mask), 0);
        assert_eq!(result.kept_component_count, 0);
    }

    #[test]
    fn empty_low_mask_is_not_an_error() {
        let probs = ProbabilityMap::new(8, 8);
        let result = hysteresis_threshold(&probs, 0.5, 0.9, None).unwrap();
        assert_eq!(result.component_count, 0);
        assert_eq!(count_set(&result.mask), 0);
    }

    #[test]
    fn threshold_equality_is_excluded() {
        let probs = ProbabilityMap::from_pixel(4, 4, Luma([0.9]));
        let as_high = hysteresis_threshold(&probs, 0.5, 0.9, None).unwrap();
        assert_eq!(count_set(&as_high.mask), 0);
        let as_low = hysteresis_threshold(&probs, 0.9, 0.95, None).unwrap();
        assert_eq!(as_low.component_count, 0);
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn output_is_subset_of_low_mask() {
        let probs = ProbabilityMap::from_fn(16, 16, |x, y| {
            Luma([((x * 7 + y * 13) % 17) as f32 / 16.0])
        });
        let low = 0.4;
        let result = hysteresis_threshold(&probs, low, 0.9, None).unwrap();
        let low = low_mask(&probs, low);
        for (x, y, p) in result.mask.enumerate_pixels() {
            if p.0[0] != 0 {
                assert!(is_set(&low, x, y), "({x}, {y}) not in low mask");
            }
        }
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn raising_thresholds_never_grows_mask() {
        let probs = ProbabilityMap::from_fn(24, 24, |x, y| {
            Luma([((x * 5 + y * 11) % 23) as f32 / 22.0])
        });
        let mut previous = u64::MAX;
        for low in [0.2, 0.4, 0.6, 0.8] {
            let n = count_set(&hysteresis_threshold(&probs, low, 0.9, None).unwrap().mask);
            assert!(n <= previous, "low={low}: {n} > {previous}");
            previous = n;
        }
        let mut previous = u64::MAX;
        for high in [0.5, 0.7, 0.9, 0.99] {
            let n = count_set(&hysteresis_threshold(&probs, 0.3, high, None).unwrap().mask);
            assert!(n <= previous, "high={high}: {n} > {previous}");
            previous = n;
        }
    }

    #[test]
    fn candidates_restrict_low_mask() {
        // Only the left half of the strong stroke is a candidate; the
        // high pixel at x=10 is outside it, so nothing survives.
        let candidates = GrayImage::from_fn(20, 12, |x, _| Luma([if x < 10 { MASK_ON } else { 0 }]));
        let result = hysteresis_threshold(&two_strokes(), 0.8, 0.9, Some(&candidates)).unwrap();
        assert_eq!(count_set(&result.mask), 0);

        let candidates = GrayImage::from_fn(20, 12, |x, _| Luma([if x <= 10 { MASK_ON } else { 0 }]));
        let result = hysteresis_threshold(&two_strokes(), 0.8, 0.9, Some(&candidates)).unwrap();
        assert_eq!(count_set(&result.mask), 9);
    }

    #[test]
    fn mismatched_candidates_are_rejected() {
        let candidates = GrayImage::new(19, 12);
        let err = hysteresis_threshold(&two_strokes(), 0.8, 0.9, Some(&candidates)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DimensionMismatch { expected, actual }
                if expected.width == 20 && actual.width == 19
        ));
    }

    #[test]
    fn vertical_maxima_follow_ridge() {
        // A soft ridge peaking on row 6.
        let probs = ProbabilityMap::from_fn(20, 13, |_x, y| {
            #[allow(clippy::cast_precision_loss)]
            let d = (y as f32 - 6.0).abs();
            Luma([1.0 / (1.0 + d)])
        });
        let maxima = vertical_local_maxima(&probs);
        assert!(is_set(&maxima, 10, 6));
        assert!(!is_set(&maxima, 10, 0));
        assert!(!is_set(&maxima, 10, 12));
    }

    #[test]
    fn intersection_keeps_common_pixels() {
        let a = GrayImage::from_fn(6, 6, |x, _| Luma([if x < 4 { MASK_ON } else { 0 }]));
        let b = GrayImage::from_fn(6, 6, |_, y| Luma([if y < 2 { MASK_ON } else { 0 }]));
        let both = intersect_masks(&a, &b);
        assert_eq!(count_set(&both), 8);
        assert!(is_set(&both, 3, 1));
        assert!(!is_set(&both, 4, 1));
    }

    #[test]
    fn border_components_are_removed() {
        let mut mask = GrayImage::new(30, 30);
        // Touches the left band.
        for x in 0..12 {
            mask.put_pixel(x, 10, Luma([MASK_ON]));
        }
        // Fully interior.
        for x in 10..20 {
            mask.put_pixel(x, 20, Luma([MASK_ON]));
        }
        let cleaned = remove_border_components(&mask, 5);
        assert_eq!(count_set(&cleaned), 10);
        assert!(is_set(&cleaned, 15, 20));
        assert!(!is_set(&cleaned, 11, 10));
    }
}
