//! Read-only view of a finalized octree

use crate::math::GridVec;
use crate::voxel::node::Voxel;
use crate::voxel::octree::{octant, Octree};

/// Borrow of an [`Octree`] whose Morton traversal is up to date
///
/// Obtained from [`Octree::finalize`] or [`Octree::snapshot`]; the tree
/// cannot be mutated while a snapshot is alive.
#[derive(Clone, Copy)]
pub struct OctreeSnapshot<'a> {
    tree: &'a Octree,
}

impl<'a> OctreeSnapshot<'a> {
    pub(crate) fn new(tree: &'a Octree) -> Self {
        debug_assert!(tree.is_finalized());
        Self { tree }
    }

    pub fn octree(&self) -> &'a Octree {
        self.tree
    }

    pub fn len(&self) -> usize {
        self.tree.morton_order().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.morton_order().is_empty()
    }

    /// Leaves in ascending Morton order
    pub fn iter(&self) -> impl Iterator<Item = &'a Voxel> + 'a {
        let tree = self.tree;
        tree.morton_order().iter().map(move |&i| tree.voxel_at(i))
    }

    /// Greedy descent towards `pos`
    ///
    /// At each level takes the present child whose octant differs from the
    /// target's on the fewest axes, breaking ties by distance between cell
    /// centres. Cheap, but not guaranteed to find the Euclidean nearest leaf.
    pub fn nearest_voxel_approx(&self, pos: GridVec) -> Option<&'a Voxel> {
        let tree = self.tree;
        if tree.is_empty() {
            return None;
        }
        let target = self.target(pos);
        let max = tree.grid_width() as i128 - 1;
        let clamped = target.map(|c| c.clamp(0, max) as u32);
        let point = target.map(|c| c as f64 + 0.5);

        let mut node = tree.root_index();
        let mut base = [0u32; 3];
        for level in (1..=tree.depth()).rev() {
            let shift = level - 1;
            let half_cell = (1u64 << shift) as f64 / 2.0;
            let want = octant(clamped, shift);
            let n = tree.node_at(node);

            let mut best: Option<(u32, f64, u8)> = None;
            for oct in n.octants() {
                let cb = child_base(base, oct, shift);
                let axes = (oct ^ want).count_ones();
                let dist: f64 = (0..3)
                    .map(|i| {
                        let d = cb[i] as f64 + half_cell - point[i];
                        d * d
                    })
                    .sum();
                let better = match best {
                    None => true,
                    Some((a, d, _)) => axes < a || (axes == a && dist < d),
                };
                if better {
                    best = Some((axes, dist, oct));
                }
            }

            let (_, _, oct) = best?;
            base = child_base(base, oct, shift);
            node = n.child(oct)?;
        }
        Some(tree.voxel_at(node))
    }

    /// Euclidean nearest leaf to `pos`
    ///
    /// Seeds a branch-and-bound search with the approximate answer and prunes
    /// every subtree whose bounding box is no closer than the best leaf so far.
    pub fn nearest_voxel(&self, pos: GridVec) -> Option<&'a Voxel> {
        let mut best = self.nearest_voxel_approx(pos)?;
        let target = self.target(pos);
        let mut best_d = distance2(self.target(best.position()), target);
        if best_d > 0 {
            self.search(
                self.tree.root_index(),
                self.tree.depth(),
                [0; 3],
                target,
                &mut best_d,
                &mut best,
            );
        }
        Some(best)
    }

    fn search(
        &self,
        node: u32,
        level: u8,
        base: [u32; 3],
        target: [i128; 3],
        best_d: &mut u128,
        best: &mut &'a Voxel,
    ) {
        let n = self.tree.node_at(node);
        let shift = level - 1;
        let size = 1i128 << shift;

        let mut kids = [(0u128, 0u8, [0u32; 3]); 8];
        let mut count = 0;
        for oct in n.octants() {
            let cb = child_base(base, oct, shift);
            let d = box_distance2(cb, size, target);
            if d < *best_d {
                kids[count] = (d, oct, cb);
                count += 1;
            }
        }
        let kids = &mut kids[..count];
        kids.sort_unstable_by_key(|k| k.0);

        for &(d, oct, cb) in kids.iter() {
            if d >= *best_d {
                break;
            }
            let Some(child) = n.child(oct) else { continue };
            if level == 1 {
                *best_d = d;
                *best = self.tree.voxel_at(child);
            } else {
                self.search(child, level - 1, cb, target, best_d, best);
            }
        }
    }

    /// Unclamped tree-space coordinate of `pos`, widened so far queries
    /// cannot overflow
    fn target(&self, pos: GridVec) -> [i128; 3] {
        let half = (self.tree.grid_width() / 2) as i128;
        [pos.x as i128 + half, pos.y as i128 + half, pos.z as i128 + half]
    }
}

fn child_base(base: [u32; 3], oct: u8, shift: u8) -> [u32; 3] {
    [
        base[0] | (((oct & 1) as u32) << shift),
        base[1] | ((((oct >> 1) & 1) as u32) << shift),
        base[2] | ((((oct >> 2) & 1) as u32) << shift),
    ]
}

/// One axis delta squared
///
/// One side of every delta lies inside the grid, so each term stays below
/// 2^126 and a three-axis sum fits in `u128`.
fn square(d: i128) -> u128 {
    let d = d.unsigned_abs();
    d * d
}

fn distance2(a: [i128; 3], b: [i128; 3]) -> u128 {
    (0..3).map(|i| square(a[i] - b[i])).sum()
}

/// Squared distance from `t` to the cell box `[lo, lo + size)`
fn box_distance2(lo: [u32; 3], size: i128, t: [i128; 3]) -> u128 {
    (0..3)
        .map(|i| {
            let lo = lo[i] as i128;
            let hi = lo + size - 1;
            if t[i] < lo {
                square(lo - t[i])
            } else if t[i] > hi {
                square(t[i] - hi)
            } else {
                0
            }
        })
        .sum()
}
