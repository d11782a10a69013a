//! Voxlink - transport and storage core for multi-source voxel video

pub mod core;
pub mod math;
pub mod serial;
pub mod voxel;
pub mod sync;
pub mod net;
pub mod fusion;

pub use crate::core::error::Error;
pub use crate::core::types::Result;
