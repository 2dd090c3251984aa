//! Assembly of stitched connections into output polylines.
//!
//! # Algorithm overview
//!
//! 1. **Fragments:** each skeleton fragment `k` is the intra connection
//!    between endpoints `2k` and `2k + 1`.
//!
//! 2. **Gap links:** connections between endpoints of different
//!    fragments, no costlier than `max_gap_cost`, are candidates. A
//!    candidate must continue both fragments: seen from each endpoint,
//!    the other endpoint lies ahead along that fragment's outward
//!    direction. Search halos of two nearby parallel lines touch
//!    cheaply, but their endpoints sit side by side or behind each
//!    other. Continuing candidates are accepted cheapest first while
//!    both endpoints are still free and the link does not close a cycle
//!    (`UnionFind` over fragments).
//!
//! 3. **Chains:** every chain of fragments and gap links is walked from
//!    one free end to the other, reversing paths as needed so they read
//!    in walk order.
//!
//! 4. **Emit:** chains are subsampled, converted from `(row, col)` to
//!    `(x, y)`, and filtered by centroid.

use petgraph::unionfind::UnionFind;

use crate::endpoints::{Endpoint, partner};
use crate::stitch::Connection;
use crate::types::{ExtractionConfig, GridPoint, Polyline};

/// Parameters for [`assemble`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssembleOptions {
    /// Keep every `stride`-th point of a chain.
    pub stride: usize,
    /// Fraction of the page width excluded at each side.
    pub filter_width: f64,
    /// Costliest gap link still accepted.
    pub max_gap_cost: f64,
}

impl From<&ExtractionConfig> for AssembleOptions {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            stride: config.subsample_stride,
            filter_width: config.filter_width,
            max_gap_cost: config.max_gap_cost,
        }
    }
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self::from(&ExtractionConfig::default())
    }
}

/// Output of [`assemble`].
#[derive(Debug, Clone, Default)]
pub struct Assembly {
    /// Polylines surviving the centroid filter.
    pub contours: Vec<Polyline>,
    /// Chains built before filtering.
    pub chain_count: usize,
    /// Gap links accepted between fragments.
    pub gap_links: usize,
}

impl Assembly {
    /// Chains removed by the centroid filter.
    #[must_use]
    pub const fn filtered_count(&self) -> usize {
        self.chain_count - self.contours.len()
    }
}

/// Keep every `stride`-th element, starting with the first.
///
/// A stride of 0 is treated as 1.
#[must_use]
pub fn subsample<T: Copy>(points: &[T], stride: usize) -> Vec<T> {
    points.iter().step_by(stride.max(1)).copied().collect()
}

/// Drop polylines whose centroid lies within `filter_width * width` of
/// the left or right page edge.
///
/// Empty polylines have no centroid and are dropped too.
#[must_use]
pub fn filter_by_centroid(polylines: Vec<Polyline>, width: u32, filter_width: f64) -> Vec<Polyline> {
    let width = f64::from(width);
    let left = filter_width * width;
    let right = (1.0 - filter_width) * width;
    polylines
        .into_iter()
        .filter(|pl| {
            pl.centroid()
                .is_some_and(|c| (left..=right).contains(&c.x))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Chain building
// ---------------------------------------------------------------------------

/// Skeleton cells walked back from an endpoint to estimate the
/// direction of its fragment.
const TANGENT_SPAN: usize = 10;

/// Minimum cosine between a fragment's outward direction at an endpoint
/// and the direction of a gap link leaving it (about 66 degrees).
const MIN_ALIGNMENT: f64 = 0.4;

/// Path between two endpoints, stored from `from` to `to`.
struct Link<'a> {
    from: usize,
    to: usize,
    path: &'a [GridPoint],
}

impl Link<'_> {
    /// Append the path to `chain`, read starting at endpoint `entry`.
    fn append_from(&self, entry: usize, chain: &mut Vec<GridPoint>) {
        let forward = entry == self.from;
        debug_assert!(forward || entry == self.to);
        let mut push = |p: GridPoint| {
            if chain.last() != Some(&p) {
                chain.push(p);
            }
        };
        if forward {
            self.path.iter().copied().for_each(&mut push);
        } else {
            self.path.iter().rev().copied().for_each(&mut push);
        }
    }

    /// The endpoint at the other end from `entry`.
    const fn other(&self, entry: usize) -> usize {
        if entry == self.from { self.to } else { self.from }
    }

    /// Direction `(dx, dy)` pointing out of the path at endpoint `end`.
    fn outward(&self, end: usize) -> (f64, f64) {
        let last = self.path.len().saturating_sub(1);
        let span = TANGENT_SPAN.min(last);
        let (tip, back) = if end == self.from {
            (self.path.first(), self.path.get(span))
        } else {
            (self.path.last(), self.path.get(last - span))
        };
        match (tip, back) {
            (Some(&tip), Some(&back)) => offset(back, tip),
            _ => (0.0, 0.0),
        }
    }
}

/// `(dx, dy)` from `from` to `to`.
fn offset(from: GridPoint, to: GridPoint) -> (f64, f64) {
    (
        f64::from(to.col) - f64::from(from.col),
        f64::from(to.row) - f64::from(from.row),
    )
}

/// Whether a step from `from` to `to` continues in direction `outward`.
///
/// A degenerate direction accepts any step.
fn aligned(outward: (f64, f64), from: GridPoint, to: GridPoint) -> bool {
    let (ox, oy) = outward;
    let (gx, gy) = offset(from, to);
    let norms = ox.hypot(oy) * gx.hypot(gy);
    norms <= f64::EPSILON || ox.mul_add(gx, oy * gy) >= MIN_ALIGNMENT * norms
}

/// Whether a cross-fragment connection continues both of its fragments.
fn continues(connection: &Connection, endpoints: &[Endpoint], bodies: &[Link<'_>]) -> bool {
    let (a, b) = (connection.pair.low, connection.pair.high);
    let (pa, pb) = (endpoints[a].position, endpoints[b].position);
    aligned(bodies[a / 2].outward(a), pa, pb) && aligned(bodies[b / 2].outward(b), pb, pa)
}

/// Build output polylines from endpoints and their connections.
///
/// `width` is the page width used by the centroid filter.
#[must_use]
pub fn assemble(
    endpoints: &[Endpoint],
    connections: &[Connection],
    width: u32,
    options: &AssembleOptions,
) -> Assembly {
    let fragment_count = endpoints.len() / 2;
    if fragment_count == 0 {
        return Assembly::default();
    }

    // Fragment bodies. A fragment whose endpoints never met (search
    // truncated) falls back to the straight segment between them.
    let fallbacks: Vec<[GridPoint; 2]> = (0..fragment_count)
        .map(|k| [endpoints[2 * k].position, endpoints[2 * k + 1].position])
        .collect();
    let mut bodies: Vec<Link<'_>> = fallbacks
        .iter()
        .enumerate()
        .map(|(k, ends)| Link {
            from: 2 * k,
            to: 2 * k + 1,
            path: ends,
        })
        .collect();

    let mut cross: Vec<&Connection> = Vec::new();
    for connection in connections {
        let pair = connection.pair;
        if pair.high >= endpoints.len() {
            continue;
        }
        if pair.is_intra() {
            bodies[pair.low / 2].path = &connection.path;
        } else if connection.cost <= options.max_gap_cost {
            cross.push(connection);
        }
    }
    let candidates = cross.len();
    cross.retain(|c| continues(c, endpoints, &bodies));
    if cross.len() < candidates {
        log::debug!(
            "{} of {candidates} gap candidates turn away from their fragments",
            candidates - cross.len(),
        );
    }
    cross.sort_by(|a, b| a.cost.total_cmp(&b.cost).then_with(|| a.pair.cmp(&b.pair)));

    // Greedy acyclic matching of free endpoints.
    let mut links: Vec<Option<Link<'_>>> = (0..endpoints.len()).map(|_| None).collect();
    let mut fragments = UnionFind::<usize>::new(fragment_count);
    let mut gap_links = 0;
    for connection in cross {
        let (a, b) = (connection.pair.low, connection.pair.high);
        if links[a].is_some() || links[b].is_some() {
            continue;
        }
        if !fragments.union(a / 2, b / 2) {
            continue;
        }
        let link = || Link {
            from: a,
            to: b,
            path: &connection.path,
        };
        links[a] = Some(link());
        links[b] = Some(link());
        gap_links += 1;
    }

    let mut visited = vec![false; fragment_count];
    let mut chains: Vec<Vec<GridPoint>> = Vec::new();
    for k in 0..fragment_count {
        if visited[k] {
            continue;
        }

        // Walk back to the free end of this chain.
        let mut start = 2 * k;
        while let Some(link) = &links[start] {
            start = partner(link.other(start));
        }

        let mut chain = Vec::new();
        let mut entry = start;
        loop {
            let fragment = entry / 2;
            visited[fragment] = true;
            bodies[fragment].append_from(entry, &mut chain);
            let exit = partner(entry);
            match &links[exit] {
                Some(link) => {
                    link.append_from(exit, &mut chain);
                    entry = link.other(exit);
                }
                None => break,
            }
        }
        chains.push(chain);
    }

    let chain_count = chains.len();
    let polylines: Vec<Polyline> = chains
        .iter()
        .map(|chain| {
            Polyline::new(
                subsample(chain, options.stride)
                    .into_iter()
                    .map(GridPoint::to_point)
                    .collect(),
            )
        })
        .collect();
    let contours = filter_by_centroid(polylines, width, options.filter_width);

    log::debug!(
        "assembled {fragment_count} fragments into {chain_count} chains ({gap_links} gap links), {} kept",
        contours.len(),
    );

    Assembly {
        contours,
        chain_count,
        gap_links,
    }
}
