//! Lattice math and small numeric utilities

pub mod grid_vec;
pub mod morton;
pub mod freq;

pub use grid_vec::GridVec;
pub use freq::FrequencyEstimator;
