//! Truncated distance field fusion
//!
//! Each source's hull is expanded into a band of cells holding the distance
//! (in cells, along the grid axes) to that source's nearest hull cell. The
//! bands of all sources in a frame are averaged, and cells whose mean distance
//! falls below a threshold form the fused surface. Hulls carry no normals, so
//! distances are unsigned.

use bytemuck::{Pod, Zeroable};

use crate::core::config::OctreeConfig;
use crate::fusion::engine::FusionStrategy;
use crate::math::GridVec;
use crate::serial::SerialReader;
use crate::voxel::{Octree, Voxel, VoxelMessage, MAX_VOXEL_BYTES};

/// Largest source payload a TSDF cell can carry
pub const MAX_TSDF_PAYLOAD: usize = 6;

/// Voxel width of the working trees
pub const CELL_BYTES: u8 = MAX_VOXEL_BYTES as u8;

/// Working-tree voxel payload
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct Cell {
    /// Payload of the nearest hull cell
    payload: [u8; MAX_TSDF_PAYLOAD],
    /// Distance to that hull cell
    nearest: u16,
    /// Weighted sum of observed distances
    sum: f32,
    weight: f32,
}

const _: () = assert!(std::mem::size_of::<Cell>() == MAX_VOXEL_BYTES);

impl Cell {
    fn read(voxel: &Voxel) -> Self {
        bytemuck::pod_read_unaligned(&voxel.data)
    }

    fn write(&self, voxel: &mut Voxel) {
        voxel.data.copy_from_slice(bytemuck::bytes_of(self));
    }

    fn observed(payload: &[u8], dist: u16) -> Self {
        let mut cell = Cell {
            nearest: dist,
            sum: dist as f32,
            weight: 1.0,
            ..Cell::default()
        };
        let n = payload.len().min(MAX_TSDF_PAYLOAD);
        cell.payload[..n].copy_from_slice(&payload[..n]);
        cell
    }

    fn mean(&self) -> f32 {
        if self.weight > 0.0 {
            self.sum / self.weight
        } else {
            f32::INFINITY
        }
    }
}

/// Record `dist` at `pos` unless a nearer observation is already there
///
/// `tree` must have [`CELL_BYTES`] wide voxels.
pub fn ins_dist_keep_nearest(tree: &mut Octree, pos: GridVec, payload: &[u8], dist: u16) {
    let voxel = tree.ensure_voxel(pos);
    let cell = Cell::read(voxel);
    if cell.weight == 0.0 || dist < cell.nearest {
        Cell::observed(payload, dist).write(voxel);
    }
}

/// Record `dist` at `pos`, replacing whatever is there
pub fn ins_overwrite(tree: &mut Octree, pos: GridVec, payload: &[u8], dist: u16) {
    Cell::observed(payload, dist).write(tree.ensure_voxel(pos));
}

/// Build one source's distance band from its hull
///
/// Hull cells get distance 0. From every hull cell the band extends along
/// each of the six axis directions for up to `trunc` cells, stopping at the
/// next hull cell or the grid edge.
pub fn from_octree(hull: &Octree, trunc: u16, raw: &mut Octree) {
    debug_assert_eq!(raw.vox_bytes(), CELL_BYTES);
    for voxel in hull.voxels() {
        ins_overwrite(raw, voxel.position(), voxel.payload(), 0);
    }
    for voxel in hull.voxels() {
        let origin = voxel.position();
        for axis in 0..3 {
            for sign in [-1i64, 1] {
                for step in 1..=trunc {
                    let pos = origin.step(axis, sign * step as i64);
                    if !raw.contains(pos) || hull.try_get_voxel(pos).is_some() {
                        break;
                    }
                    ins_dist_keep_nearest(raw, pos, voxel.payload(), step);
                }
            }
        }
    }
}

/// Fold a source band into the running frame field
///
/// Distances are averaged with weights falling off linearly to one half at
/// the truncation distance; the payload of the nearest observation wins.
pub fn integrate(raw: &Octree, integrated: &mut Octree, trunc: u16) {
    let trunc = trunc.max(1) as f32;
    for voxel in raw.voxels() {
        let obs = Cell::read(voxel);
        let target = integrated.ensure_voxel(voxel.position());
        let mut cell = Cell::read(target);
        if cell.weight == 0.0 || obs.nearest < cell.nearest {
            cell.payload = obs.payload;
            cell.nearest = obs.nearest;
        }
        let w = 1.0 - 0.5 * (obs.nearest as f32 / trunc).min(1.0);
        cell.sum += obs.nearest as f32 * w;
        cell.weight += w;
        cell.write(target);
    }
}

/// Copy every cell with mean distance below `thresh` into `hull`
///
/// With `trim`, cells no source saw on its own hull are skipped.
pub fn extract_zero_crossing(integrated: &Octree, thresh: f32, trim: bool, hull: &mut Octree) {
    let n = (hull.vox_bytes() as usize).min(MAX_TSDF_PAYLOAD);
    for voxel in integrated.voxels() {
        let cell = Cell::read(voxel);
        if cell.mean() >= thresh || (trim && cell.nearest != 0) {
            continue;
        }
        hull.ensure_voxel(voxel.position()).data[..n].copy_from_slice(&cell.payload[..n]);
    }
}

/// Distance-field fusion; see the module docs
pub struct TsdfFusion {
    truncate: u16,
    thresh: f32,
    trim: bool,
    incoming: VoxelMessage,
    raw: Octree,
    integrated: Octree,
}

impl TsdfFusion {
    pub fn new(truncate: u32, thresh: f32, trim: bool) -> Self {
        let depth = OctreeConfig::default().depth;
        Self {
            truncate: truncate.clamp(1, u16::MAX as u32) as u16,
            thresh,
            trim,
            incoming: VoxelMessage::default(),
            raw: Octree::new(depth, CELL_BYTES),
            integrated: Octree::new(depth, CELL_BYTES),
        }
    }
}

impl FusionStrategy for TsdfFusion {
    fn fuse<R: SerialReader>(&mut self, frame: &mut VoxelMessage, r: &mut R, _source: u8) -> bool {
        self.incoming.clear();
        if !self.incoming.merge_from(r) {
            return false;
        }
        let payload = self.incoming.octree.vox_bytes() as usize;
        if payload > MAX_TSDF_PAYLOAD {
            log::warn!(
                "TSDF: {} byte voxels exceed the {} byte cell payload",
                payload,
                MAX_TSDF_PAYLOAD
            );
            return false;
        }

        let depth = self.incoming.octree.depth();
        if self.integrated.depth() != depth {
            if !self.integrated.is_empty() {
                log::warn!(
                    "TSDF: depth {} source in a depth {} frame",
                    depth,
                    self.integrated.depth()
                );
                return false;
            }
            self.integrated.configure(depth, CELL_BYTES);
        }
        if self.raw.depth() != depth {
            self.raw.configure(depth, CELL_BYTES);
        } else {
            self.raw.clear();
        }

        from_octree(&self.incoming.octree, self.truncate, &mut self.raw);
        integrate(&self.raw, &mut self.integrated, self.truncate);

        frame.encoding = self.incoming.encoding.clone();
        for pose in &self.incoming.poses {
            frame.push_pose(*pose);
        }
        true
    }

    fn finish_frame(&mut self, frame: &mut VoxelMessage) {
        let depth = self.integrated.depth();
        let bytes = frame.encoding.bytes_total().clamp(1, MAX_TSDF_PAYLOAD) as u8;
        if frame.octree.depth() != depth || frame.octree.vox_bytes() != bytes {
            frame.octree.configure(depth, bytes);
        } else {
            frame.octree.clear();
        }
        extract_zero_crossing(&self.integrated, self.thresh, self.trim, &mut frame.octree);
        log::trace!(
            "TSDF: {} field cells -> {} surface cells",
            self.integrated.vox_count(),
            frame.octree.vox_count()
        );
        self.integrated.clear();
        self.raw.clear();
    }
}
