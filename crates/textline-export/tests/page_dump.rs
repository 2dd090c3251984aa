//! Integration test: extract lines from a synthetic page and dump them
//! as JSON.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use textline_pipeline::{ExtractionConfig, GrayImage, probability_map_from_gray};

/// A 120x60 page with two baselines; the upper one has a short break.
fn page() -> GrayImage {
    GrayImage::from_fn(120, 60, |x, y| {
        let upper = (14..=18).contains(&y) && ((15..=55).contains(&x) || (59..=104).contains(&x));
        let lower = (38..=42).contains(&y) && (15..=104).contains(&x);
        image::Luma([if upper || lower { 255 } else { 0 }])
    })
}

#[test]
fn page_to_json_dump() {
    let probs = probability_map_from_gray(&page());
    let config = ExtractionConfig {
        sigma: 1.0,
        low_threshold: 0.5,
        ..ExtractionConfig::default()
    };
    let result = textline_pipeline::extract_lines(&probs, &config).expect("extraction");
    assert_eq!(result.contours.len(), 2, "{:?}", result.contours);

    let json = textline_export::to_json(&result).expect("serialize");
    let dump = textline_export::from_json(&json).expect("parse");
    assert_eq!(dump.mask_shape, [60, 120]);
    assert_eq!(dump.contours.len(), 2);

    for contour in &dump.contours {
        assert!(contour.len() >= 2);
        let xs: Vec<i64> = contour.iter().map(|[[x, _]]| *x).collect();
        let span = xs.iter().max().unwrap() - xs.iter().min().unwrap();
        assert!(span > 60, "contour spans only {span} columns");
        for [[x, y]] in contour {
            assert!((0..120).contains(x) && (0..60).contains(y));
        }
    }
}
