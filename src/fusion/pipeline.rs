//! Per-source receive threads feeding one fusion engine

use std::sync::Arc;

use crate::core::config::VoxlinkConfig;
use crate::core::types::Result;
use crate::fusion::engine::{Fusion, FusionStrategy, Strategy};
use crate::serial::SerialBuffer;
use crate::sync::{BufferProcessor, RingBuffer};
use crate::voxel::VoxelMessage;

/// One receive [`BufferProcessor`] per source, all feeding a shared [`Fusion`]
///
/// Hand the ring returned by [`FusionPipeline::add_source`] to whatever
/// produces that source's packed messages, e.g. a
/// [`VoxelStream`](crate::net::VoxelStream).
pub struct FusionPipeline<S: FusionStrategy + 'static = Strategy> {
    fusion: Arc<Fusion<S>>,
    receive_capacity: usize,
    receivers: Vec<BufferProcessor<SerialBuffer>>,
}

impl FusionPipeline<Strategy> {
    pub fn from_config(config: &VoxlinkConfig) -> Self {
        Self::new(
            Arc::new(Fusion::from_config(&config.fusion, &config.octree)),
            config.fusion.receive_capacity,
        )
    }
}

impl<S: FusionStrategy + 'static> FusionPipeline<S> {
    pub fn new(fusion: Arc<Fusion<S>>, receive_capacity: usize) -> Self {
        Self {
            fusion,
            receive_capacity,
            receivers: Vec::new(),
        }
    }

    /// Register `id` and start its receive thread
    pub fn add_source(&mut self, id: &str) -> Result<Arc<RingBuffer<SerialBuffer>>> {
        self.fusion.register_source(id)?;
        let fusion = self.fusion.clone();
        let source = id.to_string();
        let ring = Arc::new(RingBuffer::from_fn(self.receive_capacity, |_| {
            SerialBuffer::message()
        }));
        let receiver = BufferProcessor::with_ring(
            &format!("fuse-{}", id),
            ring.clone(),
            move |msg: &mut SerialBuffer| {
                msg.seek_start();
                fusion.process(msg, &source);
            },
        )?;
        self.receivers.push(receiver);
        Ok(ring)
    }

    pub fn fusion(&self) -> &Fusion<S> {
        &self.fusion
    }

    /// Fused frames
    pub fn output(&self) -> Arc<RingBuffer<VoxelMessage>> {
        self.fusion.output()
    }

    pub fn source_count(&self) -> usize {
        self.receivers.len()
    }

    /// Stop every receive thread and wake output consumers
    pub fn release(&self) {
        for receiver in &self.receivers {
            receiver.release();
        }
        self.fusion.output().release();
    }
}

impl<S: FusionStrategy + 'static> Drop for FusionPipeline<S> {
    fn drop(&mut self) {
        self.release();
    }
}
