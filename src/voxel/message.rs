//! One voxel video frame as it travels between endpoints

use crate::core::config::OctreeConfig;
use crate::serial::{SerialMessage, SerialReader, SerialType, SerialWriter, Serializable};
use crate::voxel::encoding::VoxelEncoding;
use crate::voxel::node::Voxel;
use crate::voxel::octree::Octree;
use crate::voxel::pose::Pose;

/// Poses carried per message at most
pub const MAX_POSES: usize = 128;

/// Frame number, device poses, voxel layout and the voxels themselves
///
/// Wire order after the tag: `frame_number: i64`, `pose_count: u16`, packed
/// poses, packed encoding, packed octree.
#[derive(Clone, Debug)]
pub struct VoxelMessage {
    pub frame_number: i64,
    pub poses: Vec<Pose>,
    pub encoding: VoxelEncoding,
    pub octree: Octree,
}

impl Default for VoxelMessage {
    fn default() -> Self {
        Self::with_octree(Octree::from_config(&OctreeConfig::default()))
    }
}

impl VoxelMessage {
    pub fn with_octree(octree: Octree) -> Self {
        Self {
            frame_number: 0,
            poses: Vec::new(),
            encoding: VoxelEncoding::default(),
            octree,
        }
    }

    pub fn from_config(config: &OctreeConfig) -> Self {
        Self::with_octree(Octree::from_config(config))
    }

    /// Replace the encoding and shape the octree to match it
    pub fn set_encoding(&mut self, encoding: VoxelEncoding) {
        let bytes = encoding.bytes_total() as u8;
        if bytes != self.octree.vox_bytes() {
            self.octree.configure(self.octree.depth(), bytes);
        }
        self.encoding = encoding;
    }

    /// Add a pose; fails once `MAX_POSES` are present
    pub fn push_pose(&mut self, pose: Pose) -> bool {
        if self.poses.len() >= MAX_POSES {
            return false;
        }
        self.poses.push(pose);
        true
    }

    /// Empty the octree and poses; keeps encoding and allocations
    pub fn clear(&mut self) {
        self.poses.clear();
        self.octree.clear();
    }

    /// Merge a packed message into this one without clearing
    ///
    /// The incoming frame number and encoding replace ours, incoming poses
    /// are appended up to `MAX_POSES`, and voxels are merged with later
    /// writers winning.
    pub fn merge_from<R: SerialReader>(&mut self, r: &mut R) -> bool {
        self.merge_from_with(r, |_, _| {})
    }

    /// [`VoxelMessage::merge_from`], calling `f` with the incoming encoding
    /// on every merged voxel
    pub fn merge_from_with<R, F>(&mut self, r: &mut R, mut f: F) -> bool
    where
        R: SerialReader,
        F: FnMut(&VoxelEncoding, &mut Voxel),
    {
        match r.pop::<i64>() {
            Some(tag) if tag == SerialType::VoxelMessage.tag() => {}
            _ => return false,
        }
        if !self.decode_header(r, true) {
            return false;
        }
        let encoding = &self.encoding;
        self.octree.merge_from_with(r, |v| f(encoding, v))
    }

    fn decode_header<R: SerialReader>(&mut self, r: &mut R, append: bool) -> bool {
        let (Some(frame_number), Some(n_poses)) = (r.pop::<i64>(), r.pop::<u16>()) else {
            return false;
        };
        if n_poses as usize > MAX_POSES {
            log::warn!("VoxelMessage carries {} poses, limit {}", n_poses, MAX_POSES);
            return false;
        }
        if !append {
            self.poses.clear();
        }
        let mut dropped = 0;
        for _ in 0..n_poses {
            let mut pose = Pose::default();
            if !pose.unpack(r) {
                return false;
            }
            if !self.push_pose(pose) {
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::warn!("VoxelMessage merge dropped {} poses over the limit", dropped);
        }
        self.frame_number = frame_number;
        self.encoding.unpack(r)
    }
}

impl Serializable for VoxelMessage {
    fn serial_type(&self) -> SerialType {
        SerialType::VoxelMessage
    }

    fn encode<W: SerialWriter>(&self, w: &mut W) -> bool {
        let n_poses = self.poses.len().min(MAX_POSES);
        w.put(self.frame_number)
            && w.put(n_poses as u16)
            && self.poses[..n_poses].iter().all(|p| p.pack(w))
            && self.encoding.pack(w)
            && self.octree.pack(w)
    }

    fn decode<R: SerialReader>(&mut self, r: &mut R) -> bool {
        self.decode_header(r, false) && self.octree.unpack(r)
    }
}

impl SerialMessage for VoxelMessage {}
