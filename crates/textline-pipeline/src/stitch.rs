//! Minimum-cost stitching of skeleton endpoints.
//!
//! Every endpoint is a source of one multi-source Dijkstra run over the
//! full raster. Skeleton pixels are free to cross (cost 0) and
//! everything else costs 1, so fronts race along their own fragment and
//! only pay for the gaps between fragments. Each cell is claimed by the
//! first source to finalize it; when a finalized cell touches a cell
//! claimed by another source, the two sources are connected with the sum
//! of both accumulated costs. Only the cheapest contact per source pair
//! is kept, and its path is recovered from the predecessor chains of the
//! two touching cells.
//!
//! A cell that makes a positive-cost contact does not expand further.
//! Relaxations costlier than [`StitchOptions::max_cost`] are dropped, and
//! the whole search gives up after [`StitchOptions::max_expansions`]
//! finalized cells.

use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BinaryHeap};

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::endpoints::{Endpoint, partner};
use crate::types::{ExtractionConfig, GridPoint};

/// Traversal cost of a skeleton pixel.
pub const SKELETON_COST: f64 = 0.0;

/// Traversal cost of any other pixel.
pub const BACKGROUND_COST: f64 = 1.0;

/// Predecessor marker for a source cell.
const ORIGIN: usize = usize::MAX;

/// `(dx, dy, step length)` for the eight neighbours of a cell.
const NEIGHBOURS: [(i64, i64, f64); 8] = [
    (-1, -1, std::f64::consts::SQRT_2),
    (0, -1, 1.0),
    (1, -1, std::f64::consts::SQRT_2),
    (-1, 0, 1.0),
    (1, 0, 1.0),
    (-1, 1, std::f64::consts::SQRT_2),
    (0, 1, 1.0),
    (1, 1, std::f64::consts::SQRT_2),
];

/// Unordered pair of endpoint indices, stored as `(min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    /// Smaller endpoint index.
    pub low: usize,
    /// Larger endpoint index.
    pub high: usize,
}

impl PairKey {
    /// Key for the pair `{a, b}` in either order.
    #[must_use]
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            low: a.min(b),
            high: a.max(b),
        }
    }

    /// Whether both endpoints end the same skeleton fragment.
    #[must_use]
    pub const fn is_intra(self) -> bool {
        partner(self.low) == self.high
    }
}

/// Search bounds for [`stitch`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StitchOptions {
    /// Accumulated cost above which a cell is not relaxed.
    pub max_cost: f64,
    /// Maximum number of cells finalized before the search stops.
    pub max_expansions: usize,
}

impl Default for StitchOptions {
    fn default() -> Self {
        Self::from(&ExtractionConfig::default())
    }
}

impl From<&ExtractionConfig> for StitchOptions {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            max_cost: config.max_gap_cost,
            max_expansions: config.max_search_expansions,
        }
    }
}

/// Cheapest path found between two endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// The endpoints it joins.
    pub pair: PairKey,
    /// Sum of the accumulated costs at the meeting cells.
    pub cost: f64,
    /// Raster cells from endpoint `pair.low` to endpoint `pair.high`.
    pub path: Vec<GridPoint>,
}

/// Output of [`stitch`].
#[derive(Debug, Clone, Default)]
pub struct StitchResult {
    /// Best connection per pair, sorted by pair.
    pub connections: Vec<Connection>,
    /// Endpoints that appear in no connection.
    pub unreachable: Vec<usize>,
    /// Cells finalized.
    pub expansions: usize,
    /// Whether the search hit `max_expansions`.
    pub truncated: bool,
}

/// Per-cell traversal costs of a skeleton, row-major.
#[must_use]
pub fn traversal_costs(skeleton: &GrayImage) -> Vec<f64> {
    skeleton
        .pixels()
        .map(|p| {
            if p.0[0] == 0 {
                BACKGROUND_COST
            } else {
                SKELETON_COST
            }
        })
        .collect()
}

/// A queued relaxation.
#[derive(Debug, Clone, Copy)]
struct Frontier {
    cost: f64,
    seq: u64,
    source: usize,
    cell: usize,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap; equal costs pop in push order.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Cheapest contact seen so far for a pair.
#[derive(Debug, Clone, Copy)]
struct Meeting {
    cost: f64,
    /// Touching cell claimed by `PairKey::low`.
    low_cell: usize,
    /// Touching cell claimed by `PairKey::high`.
    high_cell: usize,
}

/// Row-major raster geometry.
#[derive(Debug, Clone, Copy)]
struct Grid {
    width: usize,
    height: usize,
}

impl Grid {
    fn index(self, point: GridPoint) -> Option<usize> {
        let (row, col) = (point.row as usize, point.col as usize);
        (row < self.height && col < self.width).then_some(row * self.width + col)
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn point(self, index: usize) -> GridPoint {
        GridPoint::new((index / self.width) as u32, (index % self.width) as u32)
    }

    /// In-bounds neighbours of `index` with their step lengths.
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn neighbours(self, index: usize) -> impl Iterator<Item = (usize, f64)> {
        let x = (index % self.width) as i64;
        let y = (index / self.width) as i64;
        NEIGHBOURS.into_iter().filter_map(move |(dx, dy, length)| {
            let (nx, ny) = (x + dx, y + dy);
            let inside =
                nx >= 0 && ny >= 0 && (nx as usize) < self.width && (ny as usize) < self.height;
            inside.then(|| (ny as usize * self.width + nx as usize, length))
        })
    }
}

/// Connect endpoints through minimum-cost paths on `skeleton`.
///
/// Endpoints outside the raster are ignored and reported as unreachable.
#[must_use]
pub fn stitch(skeleton: &GrayImage, endpoints: &[Endpoint], options: &StitchOptions) -> StitchResult {
    let grid = Grid {
        width: skeleton.width() as usize,
        height: skeleton.height() as usize,
    };
    let costs = traversal_costs(skeleton);
    let cells = costs.len();

    let mut dist = vec![f64::INFINITY; cells];
    let mut owner = vec![usize::MAX; cells];
    let mut pred = vec![ORIGIN; cells];
    let mut finalized = vec![false; cells];
    let mut heap = BinaryHeap::new();
    let mut seq = 0u64;

    for (source, endpoint) in endpoints.iter().enumerate() {
        let Some(cell) = grid.index(endpoint.position) else {
            log::warn!(
                "endpoint {source} at {:?} lies outside the {}x{} raster",
                endpoint.position,
                grid.width,
                grid.height,
            );
            continue;
        };
        if dist[cell] > 0.0 {
            dist[cell] = 0.0;
            owner[cell] = source;
            heap.push(Frontier {
                cost: 0.0,
                seq,
                source,
                cell,
            });
            seq += 1;
        }
    }

    let mut meetings: BTreeMap<PairKey, Meeting> = BTreeMap::new();
    let mut expansions = 0usize;
    let mut truncated = false;

    while let Some(Frontier {
        cost, source, cell, ..
    }) = heap.pop()
    {
        if finalized[cell] || cost > dist[cell] {
            continue;
        }
        if expansions >= options.max_expansions {
            truncated = true;
            break;
        }
        finalized[cell] = true;
        expansions += 1;

        let mut contact = false;
        for (next, _) in grid.neighbours(cell) {
            if !finalized[next] || owner[next] == source {
                continue;
            }
            contact = true;
            let other = owner[next];
            let total = cost + dist[next];
            let (low_cell, high_cell) = if source < other {
                (cell, next)
            } else {
                (next, cell)
            };
            let meeting = Meeting {
                cost: total,
                low_cell,
                high_cell,
            };
            match meetings.entry(PairKey::new(source, other)) {
                Entry::Vacant(slot) => {
                    slot.insert(meeting);
                }
                Entry::Occupied(mut slot) => {
                    if total < slot.get().cost {
                        slot.insert(meeting);
                    }
                }
            }
        }
        if contact && cost > 0.0 {
            continue;
        }

        for (next, length) in grid.neighbours(cell) {
            if finalized[next] {
                continue;
            }
            let candidate = cost + (costs[cell] + costs[next]) / 2.0 * length;
            if candidate > options.max_cost || candidate >= dist[next] {
                continue;
            }
            dist[next] = candidate;
            owner[next] = source;
            pred[next] = cell;
            heap.push(Frontier {
                cost: candidate,
                seq,
                source,
                cell: next,
            });
            seq += 1;
        }
    }

    if truncated {
        log::warn!(
            "endpoint search stopped after {expansions} expansions; connections may be incomplete"
        );
    }

    let connections: Vec<Connection> = meetings
        .into_iter()
        .map(|(pair, meeting)| {
            let mut path: Vec<GridPoint> = trace(&pred, meeting.low_cell)
                .rev()
                .map(|c| grid.point(c))
                .collect();
            path.extend(trace(&pred, meeting.high_cell).map(|c| grid.point(c)));
            Connection {
                pair,
                cost: meeting.cost,
                path,
            }
        })
        .collect();

    let mut connected = vec![false; endpoints.len()];
    for connection in &connections {
        connected[connection.pair.low] = true;
        connected[connection.pair.high] = true;
    }
    let unreachable: Vec<usize> = connected
        .iter()
        .enumerate()
        .filter(|&(_, &c)| !c)
        .map(|(i, _)| i)
        .collect();
    if !unreachable.is_empty() {
        log::warn!(
            "{} of {} endpoints were not connected to any other endpoint",
            unreachable.len(),
            endpoints.len(),
        );
    }

    log::debug!(
        "stitched {} endpoints: {} connections, {expansions} expansions",
        endpoints.len(),
        connections.len(),
    );

    StitchResult {
        connections,
        unreachable,
        expansions,
        truncated,
    }
}

/// Cells from `cell` back to its source, inclusive.
fn trace(pred: &[usize], cell: usize) -> std::vec::IntoIter<usize> {
    let mut cells = vec![cell];
    let mut current = cell;
    while pred[current] != ORIGIN {
        current = pred[current];
        cells.push(current);
    }
    cells.into_iter()
}
