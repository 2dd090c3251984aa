//! Skeleton reduction of a binary line mask.
//!
//! Zhang–Suen thinning: two alternating sub-iterations peel boundary
//! pixels whose removal keeps the local topology, until a pass removes
//! nothing. The result is 8-connected and one pixel wide along line
//! bodies; line ends and isolated pixels are preserved.

use image::{GrayImage, Luma};

use crate::types::MASK_ON;

/// Offsets of the eight neighbours P2..P9, clockwise from north, as
/// `(dx, dy)`.
const NEIGHBOURS: [(i64, i64); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

/// Thin a binary mask to its skeleton.
#[must_use = "returns the skeleton mask"]
#[allow(
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn skeletonize(mask: &GrayImage) -> GrayImage {
    let (w, h) = mask.dimensions();
    let (wu, hu) = (w as usize, h as usize);
    let mut grid: Vec<bool> = mask.pixels().map(|p| p.0[0] != 0).collect();

    let sample = |grid: &[bool], x: usize, y: usize, (dx, dy): (i64, i64)| -> bool {
        let nx = x as i64 + dx;
        let ny = y as i64 + dy;
        if nx < 0 || ny < 0 || nx >= wu as i64 || ny >= hu as i64 {
            return false;
        }
        grid[ny as usize * wu + nx as usize]
    };

    let mut removals = Vec::new();
    loop {
        let mut changed = false;
        for step in 0..2 {
            removals.clear();
            for y in 0..hu {
                for x in 0..wu {
                    if !grid[y * wu + x] {
                        continue;
                    }
                    let p: [bool; 8] = std::array::from_fn(|i| sample(&grid, x, y, NEIGHBOURS[i]));
                    if removable(&p, step) {
                        removals.push(y * wu + x);
                    }
                }
            }
            for &i in &removals {
                grid[i] = false;
            }
            changed |= !removals.is_empty();
        }
        if !changed {
            break;
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        Luma([if grid[y as usize * wu + x as usize] {
            MASK_ON
        } else {
            0
        }])
    })
}

/// Zhang–Suen deletion test for one pixel given its neighbours P2..P9.
fn removable(p: &[bool; 8], step: usize) -> bool {
    let b = p.iter().filter(|&&v| v).count();
    if !(2..=6).contains(&b) {
        return false;
    }
    // Number of 0 -> 1 transitions around the ring P2, P3, ..., P9, P2.
    let a = (0..8).filter(|&i| !p[i] && p[(i + 1) % 8]).count();
    if a != 1 {
        return false;
    }
    let [p2, _, p4, _, p6, _, p8, _] = *p;
    if step == 0 {
        !(p2 && p4 && p6) && !(p4 && p6 && p8)
    } else {
        !(p2 && p4 && p8) && !(p2 && p6 && p8)
    }
}
