//! Timestamped rigid poses of cameras and tracked devices

use std::path::Path;

use glam::{DQuat, DVec3};

use crate::core::error::Error;
use crate::core::types::{Result, TimeMs};
use crate::serial::{SerialMessage, SerialReader, SerialType, SerialWriter, Serializable};

/// What a pose belongs to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PoseType {
    #[default]
    Invalid,
    Hmd,
    Actor,
    LeftController,
    RightController,
    /// Tracking camera `n`, 0..=3 on the wire
    TrackingCamera(u8),
    /// RGBD capture camera `n`
    ///
    /// Only indices up to [`PoseType::MAX_RGBD`] have a wire tag; larger ones
    /// encode as `Rgbd(MAX_RGBD)`. Build through [`PoseType::rgbd`] to reject
    /// them instead.
    Rgbd(u8),
    Checkerboard,
    StylusTip,
    LiveManualUpdate,
    Other(i64),
}

impl PoseType {
    pub const MAX_TRACKING_CAMERA: u8 = 3;
    pub const MAX_RGBD: u8 = 6;

    /// RGBD camera `n`, if it has a wire tag
    pub fn rgbd(n: u8) -> Option<Self> {
        (n <= Self::MAX_RGBD).then_some(PoseType::Rgbd(n))
    }

    pub fn tag(self) -> i64 {
        match self {
            PoseType::Invalid => -1,
            PoseType::Hmd => 0,
            PoseType::Actor => 1,
            PoseType::LeftController => 4,
            PoseType::RightController => 5,
            PoseType::TrackingCamera(n) => 6 + n.min(Self::MAX_TRACKING_CAMERA) as i64,
            PoseType::Rgbd(n) => 16 + n.min(Self::MAX_RGBD) as i64,
            PoseType::Checkerboard => 32,
            PoseType::StylusTip => 33,
            PoseType::LiveManualUpdate => 99,
            PoseType::Other(t) => t,
        }
    }

    pub fn from_tag(tag: i64) -> Self {
        match tag {
            -1 => PoseType::Invalid,
            0 => PoseType::Hmd,
            1 => PoseType::Actor,
            4 => PoseType::LeftController,
            5 => PoseType::RightController,
            6..=9 => PoseType::TrackingCamera((tag - 6) as u8),
            16..=22 => PoseType::Rgbd((tag - 16) as u8),
            32 => PoseType::Checkerboard,
            33 => PoseType::StylusTip,
            99 => PoseType::LiveManualUpdate,
            t => PoseType::Other(t),
        }
    }
}

/// Translation plus rotation at a point in time
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub time_ms: TimeMs,
    pub kind: PoseType,
    pub translation: DVec3,
    pub rotation: DQuat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            time_ms: 0,
            kind: PoseType::Invalid,
            translation: DVec3::ZERO,
            rotation: DQuat::IDENTITY,
        }
    }
}

impl Pose {
    pub fn new(time_ms: TimeMs, kind: PoseType, translation: DVec3, rotation: DQuat) -> Self {
        Self {
            time_ms,
            kind,
            translation,
            rotation,
        }
    }

    pub fn update(&mut self, time_ms: TimeMs, translation: DVec3, rotation: DQuat) {
        self.time_ms = time_ms;
        self.translation = translation;
        self.rotation = rotation;
    }

    /// `tx,ty,tz,qw,qx,qy,qz`
    pub fn to_csv(&self, precision: usize) -> String {
        let t = self.translation;
        let q = self.rotation;
        [t.x, t.y, t.z, q.w, q.x, q.y, q.z]
            .iter()
            .map(|v| format!("{:.*}", precision, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse `tx,ty,tz,qw,qx,qy,qz`; time and kind are left untouched
    pub fn from_csv(&mut self, line: &str) -> Result<()> {
        let values: Vec<f64> = line
            .trim()
            .split(',')
            .map(|s| s.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Decode(format!("pose csv: {}", e)))?;
        let [tx, ty, tz, qw, qx, qy, qz] = values[..] else {
            return Err(Error::Decode(format!(
                "pose csv needs 7 values, got {}",
                values.len()
            )));
        };
        self.translation = DVec3::new(tx, ty, tz);
        self.rotation = DQuat::from_xyzw(qx, qy, qz, qw);
        Ok(())
    }

    pub fn save_csv(&self, path: impl AsRef<Path>, precision: usize) -> Result<()> {
        std::fs::write(path, self.to_csv(precision) + "\n")?;
        Ok(())
    }

    pub fn load_csv(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        self.from_csv(&text)
    }
}

impl Serializable for Pose {
    fn serial_type(&self) -> SerialType {
        SerialType::Pose
    }

    fn encode<W: SerialWriter>(&self, w: &mut W) -> bool {
        let t = self.translation;
        let q = self.rotation;
        w.put(self.time_ms)
            && w.put(self.kind.tag())
            && [t.x, t.y, t.z, q.w, q.x, q.y, q.z].iter().all(|&v| w.put(v))
    }

    fn decode<R: SerialReader>(&mut self, r: &mut R) -> bool {
        let (Some(time_ms), Some(kind)) = (r.pop::<u64>(), r.pop::<i64>()) else {
            return false;
        };
        let mut v = [0f64; 7];
        for slot in v.iter_mut() {
            match r.pop::<f64>() {
                Some(x) => *slot = x,
                None => return false,
            }
        }
        self.time_ms = time_ms;
        self.kind = PoseType::from_tag(kind);
        self.translation = DVec3::new(v[0], v[1], v[2]);
        self.rotation = DQuat::from_xyzw(v[4], v[5], v[6], v[3]);
        true
    }
}

/// A standalone pose update
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PoseMessage {
    pub pose: Pose,
}

impl Serializable for PoseMessage {
    fn serial_type(&self) -> SerialType {
        SerialType::PoseMessage
    }

    fn encode<W: SerialWriter>(&self, w: &mut W) -> bool {
        self.pose.pack(w)
    }

    fn decode<R: SerialReader>(&mut self, r: &mut R) -> bool {
        self.pose.unpack(r)
    }
}

impl SerialMessage for PoseMessage {}
