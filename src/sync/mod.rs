//! Producer/consumer building blocks shared by every pipeline stage

pub mod ring_buffer;
pub mod processor;

pub use ring_buffer::{RingBuffer, MIN_RING_CAPACITY};
pub use processor::BufferProcessor;
