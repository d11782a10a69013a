//! Runtime configuration loaded from a JSON component file
//!
//! Every field has a default, so a config file only needs the keys it wants
//! to override:
//!
//! ```json
//! { "fusion": { "mode": "tsdf", "min_frame_sources": 2 } }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::sync::MIN_RING_CAPACITY;
use crate::voxel::{MAX_DEPTH, MAX_VOXEL_BYTES};

/// Octree construction parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OctreeConfig {
    /// Tree depth; grid width is `2^depth` cells per axis
    pub depth: u8,
    /// Payload bytes stored per leaf
    pub vox_bytes: u8,
    /// Leaves allocated up front
    pub voxel_pool_size: usize,
    /// Slots added whenever a pool runs out
    pub pool_grow_size: usize,
}

impl Default for OctreeConfig {
    fn default() -> Self {
        Self {
            depth: 9,
            vox_bytes: 4,
            voxel_pool_size: 4096,
            pool_grow_size: 4096,
        }
    }
}

/// Network stream parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Slots in the fragment send/receive ring buffers
    pub fragment_ring_capacity: usize,
    /// Pause after each fragment send, in microseconds (0 disables pacing)
    pub send_interval_us: u64,
    /// LZ4-compress whole messages before fragmenting
    pub compress: bool,
    /// Interval between pairing hellos
    pub pair_poll_ms: u64,
    /// Pairing attempts before giving up (`None` retries forever)
    pub pair_max_attempts: Option<u32>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            fragment_ring_capacity: 128,
            send_interval_us: 700,
            compress: false,
            pair_poll_ms: 1500,
            pair_max_attempts: None,
        }
    }
}

impl StreamConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_micros(self.send_interval_us)
    }

    pub fn pair_poll(&self) -> Duration {
        Duration::from_millis(self.pair_poll_ms)
    }
}

/// Which fusion strategy a merge node runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMode {
    #[default]
    Naive,
    Tsdf,
}

/// Fusion engine parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub mode: FusionMode,
    /// Frames with fewer reporting sources count as failures
    pub min_frame_sources: usize,
    /// Consecutive failures after which the shortfall is logged as an error
    pub alert_after_failures: u32,
    /// Slots in each per-source receive buffer
    pub receive_capacity: usize,
    /// Slots in the fused output buffer
    pub output_capacity: usize,
    /// TSDF truncation band, in cells
    pub tsdf_truncate: u32,
    /// Mean distance (in cells) below which a TSDF cell is on the surface
    pub tsdf_thresh: f32,
    /// Drop extracted cells that no source saw on its hull
    pub tsdf_trim: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            mode: FusionMode::Naive,
            min_frame_sources: 0,
            alert_after_failures: 30,
            receive_capacity: 8,
            output_capacity: 8,
            tsdf_truncate: 16,
            tsdf_thresh: 1.0,
            tsdf_trim: true,
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxlinkConfig {
    pub octree: OctreeConfig,
    pub stream: StreamConfig,
    pub fusion: FusionConfig,
}

impl VoxlinkConfig {
    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a JSON config string
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values that would otherwise panic at construction time
    pub fn validate(&self) -> Result<()> {
        let o = &self.octree;
        if o.depth == 0 || o.depth > MAX_DEPTH {
            return Err(Error::Config(format!(
                "octree.depth must be in 1..={}, got {}",
                MAX_DEPTH, o.depth
            )));
        }
        if o.vox_bytes == 0 || o.vox_bytes as usize > MAX_VOXEL_BYTES {
            return Err(Error::Config(format!(
                "octree.vox_bytes must be in 1..={}, got {}",
                MAX_VOXEL_BYTES, o.vox_bytes
            )));
        }
        for (name, cap) in [
            ("stream.fragment_ring_capacity", self.stream.fragment_ring_capacity),
            ("fusion.receive_capacity", self.fusion.receive_capacity),
            ("fusion.output_capacity", self.fusion.output_capacity),
        ] {
            if cap < MIN_RING_CAPACITY {
                return Err(Error::Config(format!(
                    "{} must be at least {}, got {}",
                    name, MIN_RING_CAPACITY, cap
                )));
            }
        }
        if self.fusion.tsdf_truncate == 0 {
            return Err(Error::Config("fusion.tsdf_truncate must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        assert!(VoxlinkConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = VoxlinkConfig::from_json_str(
            r#"{ "fusion": { "mode": "tsdf", "min_frame_sources": 2 } }"#,
        )
        .unwrap();
        assert_eq!(config.fusion.mode, FusionMode::Tsdf);
        assert_eq!(config.fusion.min_frame_sources, 2);
        assert_eq!(config.fusion.tsdf_truncate, 16);
        assert_eq!(config.octree, OctreeConfig::default());
    }

    #[test]
    fn test_rejects_bad_depth() {
        let err = VoxlinkConfig::from_json_str(r#"{ "octree": { "depth": 17 } }"#);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_small_ring() {
        let err = VoxlinkConfig::from_json_str(r#"{ "fusion": { "output_capacity": 2 } }"#);
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "stream": {{ "send_interval_us": 0, "compress": true }} }}"#).unwrap();

        let config = VoxlinkConfig::load(file.path()).unwrap();
        assert_eq!(config.stream.send_interval(), Duration::ZERO);
        assert!(config.stream.compress);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            VoxlinkConfig::from_json_str("{ not json"),
            Err(Error::Json(_))
        ));
    }
}
