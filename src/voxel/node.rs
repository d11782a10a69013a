//! Octree node and leaf records

use crate::math::GridVec;
use crate::voxel::MAX_VOXEL_BYTES;

/// Link value meaning "no slot"
pub const NONE: u32 = u32::MAX;

/// Internal octree node
///
/// Bit `i` of the bitfield is set when octant `i` has a child; the child's
/// slot index is in `children[i]`. Children of level-1 nodes are leaves in
/// the voxel pool, all others are nodes in the node pool.
#[derive(Clone, Debug)]
pub struct Node {
    bitfield: u8,
    children: [u32; 8],
    parent: u32,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            bitfield: 0,
            children: [NONE; 8],
            parent: NONE,
        }
    }
}

impl Node {
    /// Child presence mask
    pub fn bitfield(&self) -> u8 {
        self.bitfield
    }

    pub fn has_child(&self, octant: u8) -> bool {
        debug_assert!(octant < 8);
        (self.bitfield >> octant) & 1 != 0
    }

    pub fn child(&self, octant: u8) -> Option<u32> {
        self.has_child(octant).then(|| self.children[octant as usize])
    }

    pub(crate) fn set_child(&mut self, octant: u8, index: u32) {
        debug_assert!(octant < 8);
        self.children[octant as usize] = index;
        self.bitfield |= 1 << octant;
    }

    pub fn child_count(&self) -> u8 {
        self.bitfield.count_ones() as u8
    }

    pub fn parent(&self) -> Option<u32> {
        (self.parent != NONE).then_some(self.parent)
    }

    pub(crate) fn set_parent(&mut self, parent: u32) {
        self.parent = parent;
    }

    /// Present octants in ascending order
    pub fn octants(&self) -> impl Iterator<Item = u8> + '_ {
        (0..8u8).filter(move |&o| self.has_child(o))
    }
}

/// Octree leaf: one occupied grid cell and its payload
#[derive(Clone, Debug)]
pub struct Voxel {
    /// Raw payload; only the first `len()` bytes are meaningful
    pub data: [u8; MAX_VOXEL_BYTES],
    len: u8,
    pos: GridVec,
    morton: u64,
    parent: u32,
}

impl Default for Voxel {
    fn default() -> Self {
        Self {
            data: [0; MAX_VOXEL_BYTES],
            len: 0,
            pos: GridVec::ZERO,
            morton: 0,
            parent: NONE,
        }
    }
}

impl Voxel {
    pub(crate) fn place(&mut self, pos: GridVec, morton: u64, parent: u32, len: u8) {
        self.pos = pos;
        self.morton = morton;
        self.parent = parent;
        self.len = len;
    }

    pub fn position(&self) -> GridVec {
        self.pos
    }

    /// Morton code of the cell in unsigned tree space
    pub fn morton(&self) -> u64 {
        self.morton
    }

    pub fn parent(&self) -> Option<u32> {
        (self.parent != NONE).then_some(self.parent)
    }

    /// Meaningful payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len as usize]
    }

    /// Payload width of the owning tree
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_children() {
        let mut node = Node::default();
        assert_eq!(node.child_count(), 0);
        assert_eq!(node.child(3), None);

        node.set_child(3, 17);
        node.set_child(0, 4);
        assert_eq!(node.bitfield(), 0b1001);
        assert_eq!(node.child(3), Some(17));
        assert_eq!(node.octants().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(node.parent(), None);
    }

    #[test]
    fn test_voxel_payload_width() {
        let mut v = Voxel::default();
        v.place(GridVec::new(1, 2, 3), 99, 0, 4);
        v.payload_mut().copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(v.payload(), &[1, 2, 3, 4]);
        assert_eq!(v.data[4], 0);
        assert_eq!(v.position(), GridVec::new(1, 2, 3));
        assert_eq!(v.parent(), Some(0));
    }
}
