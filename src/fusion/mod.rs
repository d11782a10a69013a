//! Merging per-source voxel frames into one scene

pub mod engine;
pub mod naive;
pub mod tsdf;
pub mod pipeline;

pub use engine::{Fusion, FusionStrategy, Strategy};
pub use naive::NaiveFusion;
pub use tsdf::TsdfFusion;
pub use pipeline::FusionPipeline;
