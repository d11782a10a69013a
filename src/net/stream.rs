//! Message streams to one or many peers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::core::config::StreamConfig;
use crate::core::types::Result;
use crate::net::assembler::{AssemblerStats, MessageAssembler};
use crate::net::fragmenter::{FragmenterStats, MessageFragmenter};
use crate::net::transport::Transport;
use crate::serial::compress::{compress_into, decompress_into};
use crate::serial::{SerialBuffer, SerialMessage};
use crate::sync::{BufferProcessor, RingBuffer};

/// Slots between reassembly and decompression
const INFLATE_CAPACITY: usize = 4;

/// Bidirectional message channel to one peer over a [`Transport`]
///
/// Outgoing messages are fragmented and paced by a [`MessageFragmenter`];
/// incoming datagrams are reassembled by a [`MessageAssembler`] into the
/// `received` ring the caller supplies. With compression on, whole messages
/// are LZ4-compressed before fragmenting and inflated after reassembly.
pub struct VoxelStream {
    peer: String,
    transport: Arc<dyn Transport>,
    fragmenter: MessageFragmenter,
    assembler: Arc<MessageAssembler>,
    inflater: Option<BufferProcessor<SerialBuffer>>,
    compress: bool,
    enabled: AtomicBool,
    scratch: Mutex<SerialBuffer>,
}

impl VoxelStream {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: &StreamConfig,
        received: Arc<RingBuffer<SerialBuffer>>,
    ) -> Result<Self> {
        let peer = transport.peer_id();

        let sender = transport.clone();
        let fragmenter = MessageFragmenter::new(&peer, config, move |d| sender.send_to_peer(d))?;

        let (assembled, inflater) = if config.compress {
            let staged = Arc::new(RingBuffer::from_fn(INFLATE_CAPACITY, |_| SerialBuffer::message()));
            let out = received.clone();
            let name = peer.clone();
            let inflater = BufferProcessor::with_ring(
                &format!("inflate-{}", peer),
                staged.clone(),
                move |packed: &mut SerialBuffer| {
                    let mut head = out.current_head();
                    if let Err(e) = decompress_into(packed.as_slice(), &mut head) {
                        log::warn!("{}: dropping message: {}", name, e);
                        return;
                    }
                    drop(head);
                    if !out.try_advance_head() {
                        log::warn!("{}: receive buffer full, reusing current slot", name);
                    }
                },
            )?;
            (staged, Some(inflater))
        } else {
            (received, None)
        };

        let assembler = Arc::new(MessageAssembler::new(
            &peer,
            config.fragment_ring_capacity,
            assembled,
        )?);
        let rx = assembler.clone();
        transport.set_receive_handler(Arc::new(move |d| {
            rx.receive(d);
        }));

        log::info!(
            "Stream to {} ready (datagram {} B, compression {})",
            peer,
            transport.max_frag_payload(),
            if config.compress { "on" } else { "off" }
        );

        Ok(Self {
            peer,
            transport,
            fragmenter,
            assembler,
            inflater,
            compress: config.compress,
            enabled: AtomicBool::new(true),
            scratch: Mutex::new(SerialBuffer::message()),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn connect(&self, address: &str) -> bool {
        self.transport.connect_and_pair(address)
    }

    pub fn is_paired(&self) -> bool {
        self.transport.is_paired()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Disabled streams silently refuse to send
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Queue serialized bytes for the peer
    pub fn send_bytes(&self, message: &[u8]) -> bool {
        if !self.is_enabled() || !self.is_paired() {
            return false;
        }
        let budget = self.transport.max_frag_payload();
        if !self.compress {
            return self.fragmenter.send(message, budget);
        }
        let mut scratch = self.scratch.lock().unwrap_or_else(PoisonError::into_inner);
        if !compress_into(message, &mut scratch) {
            log::warn!("{}: compressed message exceeds buffer", self.peer);
            return false;
        }
        self.fragmenter.send(scratch.as_slice(), budget)
    }

    pub fn send(&self, message: &SerialBuffer) -> bool {
        self.send_bytes(message.as_slice())
    }

    /// Pack and queue a message
    pub fn send_message<M: SerialMessage>(&self, message: &M) -> bool {
        let mut packed = SerialBuffer::message();
        if !message.pack_message(&mut packed) {
            log::warn!("{}: could not pack {:?}", self.peer, message.serial_type());
            return false;
        }
        self.send(&packed)
    }

    pub fn fragmenter_stats(&self) -> FragmenterStats {
        self.fragmenter.stats()
    }

    pub fn assembler_stats(&self) -> AssemblerStats {
        self.assembler.stats()
    }

    /// Stop all workers; the stream is unusable afterwards
    pub fn release(&self) {
        self.set_enabled(false);
        self.transport.set_receive_handler(Arc::new(|_| {}));
        self.fragmenter.release();
        self.assembler.release();
        if let Some(inflater) = &self.inflater {
            inflater.release();
        }
    }
}

impl Drop for VoxelStream {
    fn drop(&mut self) {
        self.release();
    }
}

/// Broadcasts each message to every paired, enabled stream
///
/// Sending only copies the message into the broadcaster's ring; fan-out runs
/// on the broadcaster's worker.
pub struct MultiStream {
    streams: Arc<RwLock<Vec<Arc<VoxelStream>>>>,
    processor: BufferProcessor<SerialBuffer>,
}

impl MultiStream {
    pub fn new(name: &str, capacity: usize) -> Result<Self> {
        let streams: Arc<RwLock<Vec<Arc<VoxelStream>>>> = Arc::new(RwLock::new(Vec::new()));
        let targets = streams.clone();
        let processor = BufferProcessor::with_ring(
            name,
            Arc::new(RingBuffer::from_fn(capacity, |_| SerialBuffer::message())),
            move |msg: &mut SerialBuffer| {
                let targets = targets.read().unwrap_or_else(PoisonError::into_inner);
                for stream in targets.iter() {
                    if stream.is_enabled() && stream.is_paired() && !stream.send(msg) {
                        log::debug!("broadcast to {} failed", stream.peer());
                    }
                }
            },
        )?;
        Ok(Self { streams, processor })
    }

    pub fn add_stream(&self, stream: Arc<VoxelStream>) {
        self.streams
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stream);
    }

    /// Remove the stream to `peer`; returns whether one was found
    pub fn remove_stream(&self, peer: &str) -> bool {
        let mut streams = self.streams.write().unwrap_or_else(PoisonError::into_inner);
        let before = streams.len();
        streams.retain(|s| s.peer() != peer);
        streams.len() != before
    }

    pub fn stream_count(&self) -> usize {
        self.streams.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Queue a copy of `message`; `false` if the broadcaster is behind
    pub fn send_bytes(&self, message: &[u8]) -> bool {
        {
            let mut head = self.processor.current_head();
            head.reset();
            if !crate::serial::SerialWriter::put_bytes(&mut *head, message) {
                log::warn!("broadcast message of {} bytes exceeds buffer", message.len());
                return false;
            }
        }
        self.try_publish()
    }

    /// Pack `message` straight into the broadcaster's ring
    pub fn send_message<M: SerialMessage>(&self, message: &M) -> bool {
        if !message.pack_message(&mut self.processor.current_head()) {
            log::warn!("could not pack {:?} for broadcast", message.serial_type());
            return false;
        }
        self.try_publish()
    }

    pub fn release(&self) {
        self.processor.release();
    }

    fn try_publish(&self) -> bool {
        if !self.processor.try_advance_head() {
            log::warn!("broadcast queue full, dropping message");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::loopback::LoopbackTransport;
    use std::time::Duration;

    fn config(compress: bool) -> StreamConfig {
        StreamConfig {
            send_interval_us: 0,
            compress,
            ..StreamConfig::default()
        }
    }

    fn inbox() -> Arc<RingBuffer<SerialBuffer>> {
        Arc::new(RingBuffer::from_fn(8, |_| SerialBuffer::message()))
    }

    #[test]
    fn test_stream_roundtrip() {
        for compress in [false, true] {
            let (a, b) = LoopbackTransport::pair(200).unwrap();
            let a_in = inbox();
            let b_in = inbox();
            let to_b = VoxelStream::new(a, &config(compress), a_in).unwrap();
            let _from_a = VoxelStream::new(b, &config(compress), b_in.clone()).unwrap();

            let message: Vec<u8> = (0..5000u32).map(|i| (i % 13) as u8).collect();
            assert!(to_b.send_bytes(&message));

            let got = b_in.advance_tail_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(got.as_slice(), message.as_slice());
        }
    }

    #[test]
    fn test_disabled_stream_refuses() {
        let (a, _b) = LoopbackTransport::pair(200).unwrap();
        let s = VoxelStream::new(a, &config(false), inbox()).unwrap();
        s.set_enabled(false);
        assert!(!s.send_bytes(b"x"));
        assert_eq!(s.fragmenter_stats().messages_queued, 0);
    }

    #[test]
    fn test_multistream_fans_out() {
        let multi = MultiStream::new("bcast", 4).unwrap();
        let mut inboxes = Vec::new();
        let mut keep = Vec::new();
        for _ in 0..3 {
            let (a, b) = LoopbackTransport::pair(128).unwrap();
            let rx = inbox();
            multi.add_stream(Arc::new(VoxelStream::new(a, &config(false), inbox()).unwrap()));
            keep.push(VoxelStream::new(b, &config(false), rx.clone()).unwrap());
            inboxes.push(rx);
        }
        assert_eq!(multi.stream_count(), 3);

        assert!(multi.send_bytes(b"to everyone"));
        for rx in &inboxes {
            let got = rx.advance_tail_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(got.as_slice(), b"to everyone");
        }
        assert!(multi.remove_stream("loop-a"));
    }
}
