//! Core type aliases and re-exports

pub use glam::{DQuat, DVec3, I64Vec3};

/// Standard Result type for voxlink
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;

/// Milliseconds since the Unix epoch
pub type TimeMs = u64;

/// Current wall-clock time in milliseconds
pub fn now_ms() -> TimeMs {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as TimeMs)
        .unwrap_or(0)
}
