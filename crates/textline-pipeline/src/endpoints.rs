//! Endpoint detection on a skeleton mask.
//!
//! An endpoint is a skeleton pixel with exactly one skeleton neighbour.
//! Skeletons of real lines carry short spurs, so each connected
//! component usually has more than two such pixels; only the two that
//! lie farthest apart are kept; they are the ends of the line itself.
//!
//! Endpoints are emitted two per component, in the order components are
//! first met in a row-major scan. Endpoint `2k` and `2k + 1` therefore
//! always belong to the same component; see [`partner`].

use std::collections::HashMap;

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use serde::{Deserialize, Serialize};

use crate::types::GridPoint;

/// A retained skeleton endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Raster position of the endpoint.
    pub position: GridPoint,
    /// Connected-component label of the skeleton fragment it ends.
    pub component: u32,
}

/// Index of the other endpoint of the same fragment.
#[must_use]
pub const fn partner(index: usize) -> usize {
    index ^ 1
}

/// Output of [`detect_endpoints`].
#[derive(Debug, Clone, Default)]
pub struct EndpointSet {
    /// Retained endpoints, two per usable component.
    pub endpoints: Vec<Endpoint>,
    /// Number of 8-connected skeleton components.
    pub component_count: u32,
    /// Components dropped for having fewer than two endpoint candidates
    /// (isolated pixels, closed loops).
    pub skipped_components: u32,
}

impl EndpointSet {
    /// Number of skeleton fragments that produced an endpoint pair.
    #[must_use]
    pub const fn fragment_count(&self) -> usize {
        self.endpoints.len() / 2
    }
}

/// 3x3 box sum of the skeleton, same size, zero padded.
///
/// The sum includes the centre pixel, so an endpoint has a count of 2.
/// `imageproc`'s filters replicate border pixels instead of padding with
/// zeros, which would inflate counts along the page edge.
#[must_use]
pub fn neighbour_counts(skeleton: &GrayImage) -> Vec<u8> {
    let (w, h) = skeleton.dimensions();
    let mut counts = vec![0u8; w as usize * h as usize];
    for (x, y, p) in skeleton.enumerate_pixels() {
        if p.0[0] == 0 {
            continue;
        }
        for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                counts[ny as usize * w as usize + nx as usize] += 1;
            }
        }
    }
    counts
}

/// Skeleton pixels with exactly one skeleton neighbour, in row-major
/// order.
#[must_use]
pub fn endpoint_candidates(skeleton: &GrayImage) -> Vec<GridPoint> {
    let w = skeleton.width();
    let counts = neighbour_counts(skeleton);
    skeleton
        .enumerate_pixels()
        .filter(|&(x, y, p)| p.0[0] != 0 && counts[y as usize * w as usize + x as usize] == 2)
        .map(|(x, y, _)| GridPoint::new(y, x))
        .collect()
}

/// Full pairwise Euclidean distance matrix of `points`.
#[must_use]
pub fn pairwise_distances(points: &[GridPoint]) -> Vec<Vec<f64>> {
    points
        .iter()
        .map(|a| {
            points
                .iter()
                .map(|b| a.to_point().distance(b.to_point()))
                .collect()
        })
        .collect()
}

/// Indices `(i, j)` of the two points farthest apart.
///
/// Ties resolve to the first maximum in row-major matrix order, so
/// `i < j`. Returns `None` for fewer than two points.
#[must_use]
pub fn farthest_pair(points: &[GridPoint]) -> Option<(usize, usize)> {
    if points.len() < 2 {
        return None;
    }
    let distances = pairwise_distances(points);
    let mut best = (0, 0);
    let mut best_distance = f64::NEG_INFINITY;
    for (i, row) in distances.iter().enumerate() {
        for (j, &d) in row.iter().enumerate() {
            if d > best_distance {
                best_distance = d;
                best = (i, j);
            }
        }
    }
    Some(best)
}

/// Find the two farthest-apart endpoints of every skeleton component.
#[must_use]
pub fn detect_endpoints(skeleton: &GrayImage) -> EndpointSet {
    let labels = connected_components(skeleton, Connectivity::Eight, Luma([0u8]));
    let component_count = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0);

    // Component label -> candidates, in first-seen order.
    let mut groups: Vec<(u32, Vec<GridPoint>)> = Vec::new();
    let mut group_of: HashMap<u32, usize> = HashMap::new();
    for candidate in endpoint_candidates(skeleton) {
        let label = labels.get_pixel(candidate.col, candidate.row).0[0];
        let slot = *group_of.entry(label).or_insert_with(|| {
            groups.push((label, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(candidate);
    }

    let mut endpoints = Vec::with_capacity(groups.len() * 2);
    for (component, points) in &groups {
        if let Some((i, j)) = farthest_pair(points) {
            endpoints.push(Endpoint {
                position: points[i],
                component: *component,
            });
            endpoints.push(Endpoint {
                position: points[j],
                component: *component,
            });
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    let fragments = (endpoints.len() / 2) as u32;
    let skipped_components = component_count - fragments;
    if skipped_components > 0 {
        log::debug!("{skipped_components} skeleton components have no endpoint pair");
    }

    EndpointSet {
        endpoints,
        component_count,
        skipped_components,
    }
}
