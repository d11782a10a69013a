//! Voxel storage: pooled octree, payload encoding and frame messages

pub mod pool;
pub mod node;
pub mod octree;
pub mod snapshot;
pub mod encoding;
pub mod pose;
pub mod message;

/// Deepest supported octree (grid width 65536)
pub const MAX_DEPTH: u8 = 16;
/// Widest per-voxel payload
pub const MAX_VOXEL_BYTES: usize = 16;

pub use pool::{Handle, Pool};
pub use node::{Node, Voxel};
pub use octree::{Octree, VoxelHandle};
pub use snapshot::OctreeSnapshot;
pub use encoding::{flags, VoxelEncoding};
pub use pose::{Pose, PoseMessage, PoseType};
pub use message::{VoxelMessage, MAX_POSES};
