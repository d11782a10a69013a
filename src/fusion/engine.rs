//! Frame bookkeeping shared by every fusion strategy

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::core::config::{FusionConfig, FusionMode, OctreeConfig};
use crate::core::error::Error;
use crate::core::types::Result;
use crate::fusion::naive::NaiveFusion;
use crate::fusion::tsdf::TsdfFusion;
use crate::math::FrequencyEstimator;
use crate::serial::SerialReader;
use crate::sync::RingBuffer;
use crate::voxel::encoding::flags;
use crate::voxel::VoxelMessage;

/// Sources a frame can distinguish; indices fit the metadata source bits
pub const MAX_SOURCES: usize = flags::SOURCE_MASK as usize + 1;

/// How source messages are combined into a frame
pub trait FusionStrategy: Send {
    /// Fold one packed [`VoxelMessage`] from `source` into `frame`
    fn fuse<R: SerialReader>(&mut self, frame: &mut VoxelMessage, r: &mut R, source: u8) -> bool;

    /// Complete `frame` before it is published
    fn finish_frame(&mut self, frame: &mut VoxelMessage);
}

/// Strategy chosen at runtime from [`FusionMode`]
pub enum Strategy {
    Naive(NaiveFusion),
    Tsdf(TsdfFusion),
}

impl Strategy {
    pub fn from_config(config: &FusionConfig) -> Self {
        match config.mode {
            FusionMode::Naive => Strategy::Naive(NaiveFusion),
            FusionMode::Tsdf => Strategy::Tsdf(TsdfFusion::new(
                config.tsdf_truncate,
                config.tsdf_thresh,
                config.tsdf_trim,
            )),
        }
    }
}

impl FusionStrategy for Strategy {
    fn fuse<R: SerialReader>(&mut self, frame: &mut VoxelMessage, r: &mut R, source: u8) -> bool {
        match self {
            Strategy::Naive(s) => s.fuse(frame, r, source),
            Strategy::Tsdf(s) => s.fuse(frame, r, source),
        }
    }

    fn finish_frame(&mut self, frame: &mut VoxelMessage) {
        match self {
            Strategy::Naive(s) => s.finish_frame(frame),
            Strategy::Tsdf(s) => s.finish_frame(frame),
        }
    }
}

struct FrameState<S> {
    strategy: S,
    sources: HashMap<String, u8>,
    received: Vec<bool>,
    sequential_fail_count: u32,
    frame_number: i64,
    rate: FrequencyEstimator,
}

impl<S> FrameState<S> {
    fn reported(&self) -> usize {
        self.received.iter().filter(|&&r| r).count()
    }
}

/// Collects one message per registered source and publishes fused frames
///
/// The frame under construction lives in the output ring's head slot. A
/// frame is finalized once every source reported, when a source reports a
/// second time, or on [`Fusion::flush`]. Calls are serialized internally.
///
/// `min_frame_sources` never closes a frame; it only decides whether a
/// finalized frame counts towards `sequential_fail_count`.
pub struct Fusion<S: FusionStrategy = Strategy> {
    min_frame_sources: usize,
    alert_after_failures: u32,
    output: Arc<RingBuffer<VoxelMessage>>,
    state: Mutex<FrameState<S>>,
}

impl Fusion<Strategy> {
    /// Engine with its own output ring, shaped by `octree`
    pub fn from_config(config: &FusionConfig, octree: &OctreeConfig) -> Self {
        let output = Arc::new(RingBuffer::from_fn(config.output_capacity, |_| {
            VoxelMessage::from_config(octree)
        }));
        Self::new(config, output, Strategy::from_config(config))
    }
}

impl<S: FusionStrategy> Fusion<S> {
    pub fn new(config: &FusionConfig, output: Arc<RingBuffer<VoxelMessage>>, strategy: S) -> Self {
        output.current_head().clear();
        Self {
            min_frame_sources: config.min_frame_sources,
            alert_after_failures: config.alert_after_failures,
            output,
            state: Mutex::new(FrameState {
                strategy,
                sources: HashMap::new(),
                received: Vec::new(),
                sequential_fail_count: 0,
                frame_number: 0,
                rate: FrequencyEstimator::default(),
            }),
        }
    }

    /// Fused frames are published here
    pub fn output(&self) -> Arc<RingBuffer<VoxelMessage>> {
        self.output.clone()
    }

    /// Register `id` and return its source index; idempotent
    pub fn register_source(&self, id: &str) -> Result<u8> {
        let mut state = self.lock();
        if let Some(&index) = state.sources.get(id) {
            return Ok(index);
        }
        if state.sources.len() >= MAX_SOURCES {
            return Err(Error::Config(format!(
                "cannot register '{}': {} sources already registered",
                id, MAX_SOURCES
            )));
        }
        let index = state.sources.len() as u8;
        state.sources.insert(id.to_string(), index);
        state.received.push(false);
        log::info!("Fusion source '{}' registered as {}", id, index);
        Ok(index)
    }

    pub fn source_count(&self) -> usize {
        self.lock().sources.len()
    }

    /// Fuse one packed [`VoxelMessage`] from source `id`
    ///
    /// Returns `false` for unknown sources and undecodable messages. A
    /// malformed message still counts as the source having reported.
    pub fn process<R: SerialReader>(&self, reader: &mut R, id: &str) -> bool {
        let mut state = self.lock();
        let Some(&index) = state.sources.get(id) else {
            log::warn!("Fusion: message from unregistered source '{}'", id);
            return false;
        };
        if state.received[index as usize] {
            log::debug!("Fusion: '{}' reported twice, closing frame early", id);
            self.finalize(&mut state);
        }

        let ok = {
            let mut frame = self.output.current_head();
            state.strategy.fuse(&mut frame, reader, index)
        };
        if !ok {
            log::warn!("Fusion: could not merge message from '{}'", id);
        }
        state.received[index as usize] = true;

        if state.received.iter().all(|&r| r) {
            self.finalize(&mut state);
        }
        ok
    }

    /// Publish the partial frame, if any source reported
    pub fn flush(&self) -> bool {
        let mut state = self.lock();
        if state.reported() == 0 {
            return false;
        }
        self.finalize(&mut state);
        true
    }

    /// Consecutive frames with fewer than `min_frame_sources` sources
    pub fn sequential_fail_count(&self) -> u32 {
        self.lock().sequential_fail_count
    }

    /// Frames finalized so far
    pub fn frames_emitted(&self) -> i64 {
        self.lock().frame_number
    }

    /// Recent finalize rate
    pub fn fused_hz(&self) -> f64 {
        self.lock().rate.hz()
    }

    fn finalize(&self, state: &mut FrameState<S>) {
        let reported = state.reported();
        if reported < self.min_frame_sources {
            state.sequential_fail_count += 1;
            let fails = state.sequential_fail_count;
            if self.alert_after_failures > 0 && fails % self.alert_after_failures == 0 {
                log::error!(
                    "Fusion: {} consecutive frames short of sources ({} of {})",
                    fails,
                    reported,
                    self.min_frame_sources
                );
            } else {
                log::warn!(
                    "Fusion: frame {} has {} of {} required sources",
                    state.frame_number,
                    reported,
                    self.min_frame_sources
                );
            }
        } else {
            state.sequential_fail_count = 0;
        }

        {
            let mut frame = self.output.current_head();
            state.strategy.finish_frame(&mut frame);
            frame.frame_number = state.frame_number;
            frame.octree.finalize();
        }
        if !self.output.try_advance_head() {
            log::warn!("Fusion: output full, dropping frame {}", state.frame_number);
        }
        self.output.current_head().clear();

        state.frame_number += 1;
        state.received.iter_mut().for_each(|r| *r = false);
        state.rate.tick();
        if state.frame_number % 100 == 0 {
            log::debug!("Fusion: {} frames, {:.1} Hz", state.frame_number, state.rate.hz());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FrameState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::GridVec;
    use crate::serial::{SerialBuffer, SerialMessage};
    use crate::voxel::{Octree, Pose, PoseType, VoxelEncoding};
    use glam::{DQuat, DVec3};
    use std::time::Duration;

    fn packed(points: &[(i64, i64, i64)]) -> SerialBuffer {
        let mut msg = VoxelMessage::with_octree(Octree::new(6, 4));
        msg.set_encoding(VoxelEncoding::new(false, true, 0));
        for &(x, y, z) in points {
            let v = msg.octree.ensure_voxel(GridVec::new(x, y, z));
            msg.encoding.encode_rgb(&mut v.data, [x as u8, y as u8, z as u8]);
        }
        let mut buf = SerialBuffer::message();
        assert!(msg.pack_message(&mut buf));
        buf
    }

    fn engine(min_sources: usize) -> Fusion<NaiveFusion> {
        let config = FusionConfig {
            min_frame_sources: min_sources,
            alert_after_failures: 2,
            ..FusionConfig::default()
        };
        let output = Arc::new(RingBuffer::from_fn(4, |_| {
            VoxelMessage::with_octree(Octree::new(6, 4))
        }));
        Fusion::new(&config, output, NaiveFusion)
    }

    #[test]
    fn test_frame_completes_when_all_sources_report() {
        let fusion = engine(2);
        assert_eq!(fusion.register_source("a").unwrap(), 0);
        assert_eq!(fusion.register_source("b").unwrap(), 1);
        assert_eq!(fusion.register_source("a").unwrap(), 0);

        assert!(fusion.process(&mut packed(&[(1, 1, 1)]), "a"));
        assert!(fusion.output().is_empty());
        assert!(fusion.process(&mut packed(&[(2, 2, 2)]), "b"));

        let out = fusion.output();
        let frame = out.advance_tail_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(frame.frame_number, 0);
        assert_eq!(frame.octree.vox_count(), 2);
        let v = frame.octree.try_get_voxel(GridVec::new(2, 2, 2)).unwrap();
        assert_eq!(frame.encoding.source(&v.data), Some(1));
        assert_eq!(fusion.sequential_fail_count(), 0);
    }

    #[test]
    fn test_frame_keeps_every_source_pose() {
        let fusion = engine(2);
        for (i, id) in ["a", "b"].into_iter().enumerate() {
            fusion.register_source(id).unwrap();
            let mut msg = VoxelMessage::with_octree(Octree::new(6, 4));
            msg.set_encoding(VoxelEncoding::new(false, true, 0));
            msg.octree.ensure_voxel(GridVec::new(i as i64, 0, 0));
            let at = DVec3::new(i as f64, 0.0, 0.0);
            msg.push_pose(Pose::new(10, PoseType::Rgbd(i as u8), at, DQuat::IDENTITY));
            let mut buf = SerialBuffer::message();
            assert!(msg.pack_message(&mut buf));
            assert!(fusion.process(&mut buf, id));
        }

        let out = fusion.output();
        let frame = out.advance_tail_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(frame.octree.vox_count(), 2);
        let kinds: Vec<PoseType> = frame.poses.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![PoseType::Rgbd(0), PoseType::Rgbd(1)]);
        drop(frame);

        // the next frame starts without the previous poses
        fusion.process(&mut packed(&[(5, 5, 5)]), "a");
        assert!(fusion.flush());
        let frame = out.advance_tail_timeout(Duration::from_secs(1)).unwrap();
        assert!(frame.poses.is_empty());
    }

    #[test]
    fn test_minimum_does_not_close_frame() {
        let fusion = engine(1);
        fusion.register_source("a").unwrap();
        fusion.register_source("b").unwrap();

        fusion.process(&mut packed(&[(1, 1, 1)]), "a");
        assert_eq!(fusion.frames_emitted(), 0);
        assert!(fusion.output().is_empty());

        assert!(fusion.flush());
        assert_eq!(fusion.frames_emitted(), 1);
        assert_eq!(fusion.sequential_fail_count(), 0);
    }

    #[test]
    fn test_repeat_report_closes_frame() {
        let fusion = engine(0);
        fusion.register_source("a").unwrap();
        fusion.register_source("b").unwrap();

        fusion.process(&mut packed(&[(1, 1, 1)]), "a");
        fusion.process(&mut packed(&[(3, 3, 3)]), "a");
        assert_eq!(fusion.frames_emitted(), 1);

        let out = fusion.output();
        let frame = out.advance_tail().unwrap();
        assert_eq!(frame.octree.vox_count(), 1);
        assert!(frame.octree.try_get_voxel(GridVec::new(1, 1, 1)).is_some());
    }

    #[test]
    fn test_shortfall_counts_and_still_emits() {
        let fusion = engine(2);
        fusion.register_source("a").unwrap();
        fusion.register_source("b").unwrap();

        for i in 0..3 {
            fusion.process(&mut packed(&[(i, 0, 0)]), "a");
            assert!(fusion.flush());
        }
        assert_eq!(fusion.sequential_fail_count(), 3);
        assert_eq!(fusion.output().len(), 2);

        fusion.process(&mut packed(&[(0, 0, 0)]), "a");
        fusion.process(&mut packed(&[(0, 0, 1)]), "b");
        assert_eq!(fusion.sequential_fail_count(), 0);
    }

    #[test]
    fn test_unknown_source_and_empty_flush() {
        let fusion = engine(0);
        assert!(!fusion.flush());
        assert!(!fusion.process(&mut packed(&[(0, 0, 0)]), "ghost"));
        assert_eq!(fusion.frames_emitted(), 0);
    }

    #[test]
    fn test_source_limit() {
        let fusion = engine(0);
        for i in 0..MAX_SOURCES {
            fusion.register_source(&format!("cam{}", i)).unwrap();
        }
        assert!(fusion.register_source("one-too-many").is_err());
    }
}
