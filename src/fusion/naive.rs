//! Priority-overwrite fusion

use crate::fusion::engine::FusionStrategy;
use crate::serial::SerialReader;
use crate::voxel::VoxelMessage;

/// Merges every source straight into the frame
///
/// Later sources overwrite earlier ones at the same cell. Voxels are stamped
/// with the source index when the encoding carries a metadata byte.
#[derive(Clone, Copy, Debug, Default)]
pub struct NaiveFusion;

impl FusionStrategy for NaiveFusion {
    fn fuse<R: SerialReader>(&mut self, frame: &mut VoxelMessage, r: &mut R, source: u8) -> bool {
        frame.merge_from_with(r, |encoding, voxel| {
            encoding.set_source(&mut voxel.data, source);
        })
    }

    fn finish_frame(&mut self, _frame: &mut VoxelMessage) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::GridVec;
    use crate::serial::{SerialBuffer, SerialMessage};
    use crate::voxel::{Octree, VoxelEncoding};

    #[test]
    fn test_later_source_wins() {
        let mut buf = SerialBuffer::message();
        let mut frame = VoxelMessage::with_octree(Octree::new(5, 4));
        let mut naive = NaiveFusion;

        for (source, colour) in [(2u8, 10u8), (5, 20)] {
            let mut msg = VoxelMessage::with_octree(Octree::new(5, 4));
            msg.set_encoding(VoxelEncoding::new(false, true, 0));
            let v = msg.octree.ensure_voxel(GridVec::new(1, 2, 3));
            msg.encoding.encode_rgb(&mut v.data, [colour; 3]);
            assert!(msg.pack_message(&mut buf));
            buf.seek_start();
            assert!(naive.fuse(&mut frame, &mut buf, source));
        }

        let v = frame.octree.try_get_voxel(GridVec::new(1, 2, 3)).unwrap();
        assert_eq!(frame.encoding.decode_rgb(&v.data), [20; 3]);
        assert_eq!(frame.encoding.source(&v.data), Some(5));
    }

    #[test]
    fn test_rejects_garbage() {
        let mut frame = VoxelMessage::default();
        let mut buf = SerialBuffer::short();
        crate::serial::SerialWriter::put(&mut buf, 99i64);
        assert!(!NaiveFusion.fuse(&mut frame, &mut buf, 0));
    }
}
