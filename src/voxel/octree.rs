//! Fixed-depth pooled voxel octree
//!
//! Grid coordinates are centred: with `w = 2^depth`, every axis accepts
//! `[-w/2, w/2)`. Internally positions are shifted by `w/2` into unsigned
//! tree space, where the octant a level-`l` node picks is
//! `x | y << 1 | z << 2` taken from bit `l - 1` of each coordinate.
//!
//! Wire format (after the `SerialType::Octree` tag):
//!
//! ```text
//! depth: u8, vox_bytes: u8, leaf_count: u64
//! pre-order from the root:
//!   internal node -> bitfield: u8, then each present child in octant order
//!   leaf          -> vox_bytes payload bytes
//! ```

use crate::core::config::OctreeConfig;
use crate::math::{morton, GridVec};
use crate::serial::{SerialReader, SerialType, SerialWriter, Serializable};
use crate::voxel::node::{Node, Voxel};
use crate::voxel::pool::{Handle, Pool};
use crate::voxel::snapshot::OctreeSnapshot;
use crate::voxel::{MAX_DEPTH, MAX_VOXEL_BYTES};

pub type VoxelHandle = Handle<Voxel>;

/// Octree over a `2^depth` cube of cells with a fixed payload per leaf
#[derive(Clone, Debug)]
pub struct Octree {
    depth: u8,
    vox_bytes: u8,
    nodes: Pool<Node>,
    voxels: Pool<Voxel>,
    root: u32,
    /// Leaf indices in Morton order, valid while `finalized`
    order: Vec<u32>,
    finalized: bool,
}

impl Octree {
    /// Empty tree with default pool sizes
    ///
    /// Panics if `depth` or `vox_bytes` is outside `1..=16`.
    pub fn new(depth: u8, vox_bytes: u8) -> Self {
        let defaults = OctreeConfig::default();
        Self::with_pools(depth, vox_bytes, defaults.voxel_pool_size, defaults.pool_grow_size)
    }

    pub fn with_pools(depth: u8, vox_bytes: u8, voxel_pool_size: usize, grow_size: usize) -> Self {
        check_shape(depth, vox_bytes);
        let mut nodes = Pool::new(voxel_pool_size / 2 + 1, grow_size);
        let root = nodes.alloc();
        Self {
            depth,
            vox_bytes,
            nodes,
            voxels: Pool::new(voxel_pool_size, grow_size),
            root,
            order: Vec::new(),
            finalized: false,
        }
    }

    pub fn from_config(config: &OctreeConfig) -> Self {
        Self::with_pools(
            config.depth,
            config.vox_bytes,
            config.voxel_pool_size,
            config.pool_grow_size,
        )
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    pub fn vox_bytes(&self) -> u8 {
        self.vox_bytes
    }

    /// Cells per axis
    pub fn grid_width(&self) -> i64 {
        1i64 << self.depth
    }

    pub fn vox_count(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Whether `pos` lies inside the grid
    pub fn contains(&self, pos: GridVec) -> bool {
        let half = self.grid_width() / 2;
        let ok = |c: i64| (-half..half).contains(&c);
        ok(pos.x) && ok(pos.y) && ok(pos.z)
    }

    /// Clear and change the tree shape
    ///
    /// Panics if `depth` or `vox_bytes` is outside `1..=16`.
    pub fn configure(&mut self, depth: u8, vox_bytes: u8) {
        check_shape(depth, vox_bytes);
        self.depth = depth;
        self.vox_bytes = vox_bytes;
        self.clear();
    }

    /// Drop every voxel; pool memory is kept for reuse
    pub fn clear(&mut self) {
        self.nodes.reset();
        self.voxels.reset();
        self.root = self.nodes.alloc();
        self.order.clear();
        self.finalized = false;
    }

    /// Insert the leaf at `pos`, or return the existing one
    ///
    /// `pos` must satisfy [`Octree::contains`]. Out-of-range positions are
    /// asserted in debug builds and wrap around the grid in release builds.
    pub fn ensure_voxel(&mut self, pos: GridVec) -> &mut Voxel {
        let index = self.ensure_index(pos);
        self.voxels.at_mut(index)
    }

    /// [`Octree::ensure_voxel`] returning an epoch-checked handle
    pub fn ensure_handle(&mut self, pos: GridVec) -> VoxelHandle {
        let index = self.ensure_index(pos);
        self.voxels.handle_for(index)
    }

    pub fn voxel(&self, handle: VoxelHandle) -> Option<&Voxel> {
        self.voxels.get(handle)
    }

    pub fn voxel_mut(&mut self, handle: VoxelHandle) -> Option<&mut Voxel> {
        self.voxels.get_mut(handle)
    }

    pub fn try_get_voxel(&self, pos: GridVec) -> Option<&Voxel> {
        self.find_index(pos).map(|i| self.voxels.at(i))
    }

    pub fn try_get_voxel_mut(&mut self, pos: GridVec) -> Option<&mut Voxel> {
        self.find_index(pos).map(|i| self.voxels.at_mut(i))
    }

    /// Every leaf once, in insertion order
    pub fn voxels(&self) -> impl Iterator<Item = &Voxel> {
        self.voxels.iter()
    }

    pub fn voxels_mut(&mut self) -> impl Iterator<Item = &mut Voxel> {
        self.voxels.iter_mut()
    }

    /// Merge a packed tree into this one without clearing
    ///
    /// Payloads from the incoming tree overwrite existing leaves at the same
    /// position. An empty tree adopts the incoming shape; otherwise a shape
    /// mismatch fails the merge.
    pub fn merge_from<R: SerialReader>(&mut self, r: &mut R) -> bool {
        self.merge_from_with(r, |_| {})
    }

    /// [`Octree::merge_from`], calling `f` on every merged voxel
    pub fn merge_from_with<R, F>(&mut self, r: &mut R, mut f: F) -> bool
    where
        R: SerialReader,
        F: FnMut(&mut Voxel),
    {
        match r.pop::<i64>() {
            Some(tag) if tag == SerialType::Octree.tag() => self.merge_body(r, &mut f),
            _ => false,
        }
    }

    /// Rebuild the Morton traversal and expose the read-only view
    pub fn finalize(&mut self) -> OctreeSnapshot<'_> {
        if !self.finalized {
            self.order.clear();
            self.order.reserve(self.voxels.len());
            let mut order = std::mem::take(&mut self.order);
            self.collect_leaves(self.root, self.depth, &mut order);
            self.order = order;
            self.finalized = true;
        }
        OctreeSnapshot::new(self)
    }

    /// The read-only view, if nothing changed since the last finalize
    pub fn snapshot(&self) -> Option<OctreeSnapshot<'_>> {
        self.finalized.then(|| OctreeSnapshot::new(self))
    }

    pub(crate) fn root_index(&self) -> u32 {
        self.root
    }

    pub(crate) fn node_at(&self, index: u32) -> &Node {
        self.nodes.at(index)
    }

    pub(crate) fn voxel_at(&self, index: u32) -> &Voxel {
        self.voxels.at(index)
    }

    pub(crate) fn morton_order(&self) -> &[u32] {
        &self.order
    }

    /// Shift a centred coordinate into unsigned tree space
    pub(crate) fn to_tree_space(&self, pos: GridVec) -> [u32; 3] {
        let half = self.grid_width() / 2;
        let mask = self.grid_width() - 1;
        [
            ((pos.x + half) & mask) as u32,
            ((pos.y + half) & mask) as u32,
            ((pos.z + half) & mask) as u32,
        ]
    }

    pub(crate) fn from_tree_space(&self, u: [u32; 3]) -> GridVec {
        let half = self.grid_width() / 2;
        GridVec::new(u[0] as i64 - half, u[1] as i64 - half, u[2] as i64 - half)
    }

    fn ensure_index(&mut self, pos: GridVec) -> u32 {
        debug_assert!(
            self.contains(pos),
            "position {} outside depth-{} grid",
            pos,
            self.depth
        );
        self.finalized = false;
        let u = self.to_tree_space(pos);

        let mut node = self.root;
        for level in (2..=self.depth).rev() {
            let oct = octant(u, level - 1);
            node = match self.nodes.at(node).child(oct) {
                Some(child) => child,
                None => {
                    let child = self.nodes.alloc();
                    self.nodes.at_mut(child).set_parent(node);
                    self.nodes.at_mut(node).set_child(oct, child);
                    child
                }
            };
        }

        let oct = octant(u, 0);
        if let Some(leaf) = self.nodes.at(node).child(oct) {
            return leaf;
        }
        let leaf = self.voxels.alloc();
        let code = morton::encode(u[0], u[1], u[2]);
        self.voxels.at_mut(leaf).place(pos, code, node, self.vox_bytes);
        self.nodes.at_mut(node).set_child(oct, leaf);
        leaf
    }

    fn find_index(&self, pos: GridVec) -> Option<u32> {
        if !self.contains(pos) {
            return None;
        }
        let u = self.to_tree_space(pos);
        let mut node = self.root;
        for level in (2..=self.depth).rev() {
            node = self.nodes.at(node).child(octant(u, level - 1))?;
        }
        self.nodes.at(node).child(octant(u, 0))
    }

    fn collect_leaves(&self, node: u32, level: u8, out: &mut Vec<u32>) {
        let n = self.nodes.at(node);
        for oct in n.octants() {
            let Some(child) = n.child(oct) else { continue };
            if level == 1 {
                out.push(child);
            } else {
                self.collect_leaves(child, level - 1, out);
            }
        }
    }

    fn merge_body<R, F>(&mut self, r: &mut R, f: &mut F) -> bool
    where
        R: SerialReader,
        F: FnMut(&mut Voxel),
    {
        let (Some(depth), Some(vox_bytes), Some(leaf_count)) =
            (r.pop::<u8>(), r.pop::<u8>(), r.pop::<u64>())
        else {
            return false;
        };
        if depth == 0 || depth > MAX_DEPTH || vox_bytes == 0 || vox_bytes as usize > MAX_VOXEL_BYTES {
            log::warn!("Octree header out of range: depth {} vox_bytes {}", depth, vox_bytes);
            return false;
        }
        if self.is_empty() {
            if (depth, vox_bytes) != (self.depth, self.vox_bytes) {
                self.configure(depth, vox_bytes);
            }
        } else if (depth, vox_bytes) != (self.depth, self.vox_bytes) {
            log::warn!(
                "Octree merge shape mismatch: have depth {} x {}B, got depth {} x {}B",
                self.depth,
                self.vox_bytes,
                depth,
                vox_bytes
            );
            return false;
        }

        let mut merged = 0u64;
        if !self.decode_node(r, depth, [0; 3], true, f, &mut merged) {
            return false;
        }
        if merged != leaf_count {
            log::warn!("Octree declared {} leaves but carried {}", leaf_count, merged);
            return false;
        }
        true
    }

    fn decode_node<R, F>(
        &mut self,
        r: &mut R,
        level: u8,
        base: [u32; 3],
        is_root: bool,
        f: &mut F,
        merged: &mut u64,
    ) -> bool
    where
        R: SerialReader,
        F: FnMut(&mut Voxel),
    {
        if level == 0 {
            let pos = self.from_tree_space(base);
            let n = self.vox_bytes as usize;
            let Some(bytes) = r.take_bytes(n) else {
                return false;
            };
            let index = self.ensure_index(pos);
            let voxel = self.voxels.at_mut(index);
            voxel.data[..n].copy_from_slice(bytes);
            f(voxel);
            *merged += 1;
            return true;
        }

        let Some(bitfield) = r.pop::<u8>() else {
            return false;
        };
        if bitfield == 0 && !is_root {
            return false;
        }
        let shift = level - 1;
        for oct in 0..8u8 {
            if (bitfield >> oct) & 1 == 0 {
                continue;
            }
            let child = [
                base[0] | (((oct & 1) as u32) << shift),
                base[1] | ((((oct >> 1) & 1) as u32) << shift),
                base[2] | ((((oct >> 2) & 1) as u32) << shift),
            ];
            if !self.decode_node(r, level - 1, child, false, f, merged) {
                return false;
            }
        }
        true
    }

    fn encode_node<W: SerialWriter>(&self, w: &mut W, node: u32, level: u8) -> bool {
        let n = self.nodes.at(node);
        if !w.put(n.bitfield()) {
            return false;
        }
        for oct in n.octants() {
            let Some(child) = n.child(oct) else { continue };
            let ok = if level == 1 {
                w.put_bytes(self.voxels.at(child).payload())
            } else {
                self.encode_node(w, child, level - 1)
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

impl Serializable for Octree {
    fn serial_type(&self) -> SerialType {
        SerialType::Octree
    }

    fn encode<W: SerialWriter>(&self, w: &mut W) -> bool {
        w.put(self.depth)
            && w.put(self.vox_bytes)
            && w.put(self.voxels.len() as u64)
            && self.encode_node(w, self.root, self.depth)
    }

    /// Replaces the content; the tree is finalized on success
    fn decode<R: SerialReader>(&mut self, r: &mut R) -> bool {
        self.clear();
        if !self.merge_body(r, &mut |_: &mut Voxel| {}) {
            return false;
        }
        self.finalize();
        true
    }
}

fn check_shape(depth: u8, vox_bytes: u8) {
    assert!(
        (1..=MAX_DEPTH).contains(&depth),
        "octree depth must be in 1..={}, got {}",
        MAX_DEPTH,
        depth
    );
    assert!(
        (1..=MAX_VOXEL_BYTES).contains(&(vox_bytes as usize)),
        "voxel payload must be 1..={} bytes, got {}",
        MAX_VOXEL_BYTES,
        vox_bytes
    );
}

/// Octant selected by bit `bit` of each tree-space coordinate
#[inline]
pub(crate) fn octant(u: [u32; 3], bit: u8) -> u8 {
    (((u[0] >> bit) & 1) | (((u[1] >> bit) & 1) << 1) | (((u[2] >> bit) & 1) << 2)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::SerialBuffer;
    use std::collections::BTreeMap;

    fn contents(tree: &Octree) -> BTreeMap<GridVec, Vec<u8>> {
        tree.voxels()
            .map(|v| (v.position(), v.payload().to_vec()))
            .collect()
    }

    fn sample_tree() -> Octree {
        let mut tree = Octree::new(4, 3);
        for (i, p) in [(-8, -8, -8), (7, 7, 7), (0, 0, 0), (-1, 3, 5), (2, -6, 1)]
            .into_iter()
            .enumerate()
        {
            let v = tree.ensure_voxel(GridVec::new(p.0, p.1, p.2));
            v.payload_mut().copy_from_slice(&[i as u8, 10, 20]);
        }
        tree
    }

    #[test]
    fn test_ensure_voxel_is_idempotent() {
        let mut tree = Octree::new(3, 2);
        let p = GridVec::new(1, -2, 3);
        tree.ensure_voxel(p).data[0] = 5;
        tree.ensure_voxel(p);
        assert_eq!(tree.vox_count(), 1);
        assert_eq!(tree.try_get_voxel(p).map(|v| v.data[0]), Some(5));
        assert_eq!(tree.try_get_voxel(p).map(|v| v.position()), Some(p));
    }

    #[test]
    fn test_contains_bounds() {
        let tree = Octree::new(4, 1);
        assert!(tree.contains(GridVec::new(-8, 7, 0)));
        assert!(!tree.contains(GridVec::new(8, 0, 0)));
        assert!(!tree.contains(GridVec::new(0, -9, 0)));
        assert!(tree.try_get_voxel(GridVec::new(100, 0, 0)).is_none());
    }

    #[test]
    fn test_depth_one_tree() {
        let mut tree = Octree::new(1, 1);
        for x in -1..1 {
            for y in -1..1 {
                for z in -1..1 {
                    tree.ensure_voxel(GridVec::new(x, y, z));
                }
            }
        }
        assert_eq!(tree.vox_count(), 8);
        assert_eq!(tree.finalize().len(), 8);
    }

    #[test]
    #[should_panic]
    fn test_depth_out_of_range_panics() {
        Octree::new(17, 4);
    }

    #[test]
    fn test_handles_go_stale_on_clear() {
        let mut tree = Octree::new(3, 1);
        let h = tree.ensure_handle(GridVec::new(0, 0, 0));
        assert!(tree.voxel(h).is_some());
        tree.clear();
        assert!(tree.voxel(h).is_none());
        assert!(tree.is_empty());
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let tree = sample_tree();
        let mut buf = SerialBuffer::message();
        assert!(tree.pack(&mut buf));

        let mut out = Octree::new(2, 1);
        out.ensure_voxel(GridVec::new(1, 1, 1));
        assert!(out.unpack(&mut buf));
        assert_eq!(buf.read_headroom(), 0);
        assert_eq!((out.depth(), out.vox_bytes()), (4, 3));
        assert_eq!(contents(&out), contents(&tree));
        assert!(out.snapshot().is_some());
    }

    #[test]
    fn test_empty_tree_roundtrip() {
        let tree = Octree::new(5, 2);
        let mut buf = SerialBuffer::short();
        assert!(tree.pack(&mut buf));
        let mut out = Octree::new(5, 2);
        assert!(out.unpack(&mut buf));
        assert!(out.is_empty());
    }

    #[test]
    fn test_truncated_stream_fails() {
        let tree = sample_tree();
        let mut full = Vec::new();
        assert!(tree.pack(&mut full));
        let mut r = crate::serial::SliceReader::new(&full[..full.len() - 1]);
        assert!(!Octree::new(4, 3).unpack(&mut r));
    }

    #[test]
    fn test_merge_union_and_overwrite() {
        let mut a = Octree::new(4, 1);
        a.ensure_voxel(GridVec::new(0, 0, 0)).data[0] = 1;
        a.ensure_voxel(GridVec::new(1, 0, 0)).data[0] = 1;

        let mut b = Octree::new(4, 1);
        b.ensure_voxel(GridVec::new(1, 0, 0)).data[0] = 2;
        b.ensure_voxel(GridVec::new(-3, 2, 1)).data[0] = 2;

        let mut buf = SerialBuffer::short();
        assert!(b.pack(&mut buf));
        let mut seen = 0;
        assert!(a.merge_from_with(&mut buf, |_| seen += 1));
        assert_eq!(seen, 2);

        let snap = a.finalize();
        assert_eq!(snap.len(), 3);
        let at = |p| a.try_get_voxel(p).map(|v| v.data[0]);
        assert_eq!(at(GridVec::new(0, 0, 0)), Some(1));
        assert_eq!(at(GridVec::new(1, 0, 0)), Some(2));
        assert_eq!(at(GridVec::new(-3, 2, 1)), Some(2));
    }

    #[test]
    fn test_merge_shape_mismatch() {
        let mut a = Octree::new(4, 1);
        a.ensure_voxel(GridVec::ZERO);
        let mut b = Octree::new(5, 1);
        b.ensure_voxel(GridVec::ZERO);

        let mut buf = SerialBuffer::short();
        b.pack(&mut buf);
        assert!(!a.merge_from(&mut buf));

        let mut empty = Octree::new(2, 2);
        buf.seek_start();
        assert!(empty.merge_from(&mut buf));
        assert_eq!((empty.depth(), empty.vox_bytes()), (5, 1));
    }

    #[test]
    fn test_mutation_invalidates_snapshot() {
        let mut tree = sample_tree();
        tree.finalize();
        assert!(tree.snapshot().is_some());
        tree.ensure_voxel(GridVec::new(3, 3, 3));
        assert!(tree.snapshot().is_none());
    }

    #[test]
    fn test_leaf_count_mismatch_rejected() {
        let tree = sample_tree();
        let mut raw = Vec::new();
        tree.pack(&mut raw);
        // leaf_count follows tag (8) + depth (1) + vox_bytes (1)
        raw[10] = 9;
        let mut r = crate::serial::SliceReader::new(&raw);
        assert!(!Octree::new(4, 3).unpack(&mut r));
    }
}
