//! Splits serialized messages into datagrams and paces them onto a transport

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::core::config::StreamConfig;
use crate::core::types::{now_ms, Result};
use crate::net::fragment::{MessageFragment, HEADER_SIZE};
use crate::serial::{SerialReader, SliceReader};
use crate::sync::BufferProcessor;

/// Counters since construction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FragmenterStats {
    pub messages_queued: u64,
    pub messages_dropped: u64,
    pub fragments_sent: u64,
    pub send_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    messages_queued: AtomicU64,
    messages_dropped: AtomicU64,
    fragments_sent: AtomicU64,
    send_failures: AtomicU64,
}

/// Sender half of the fragmentation protocol
///
/// Fragments are queued without blocking; a worker thread hands them to the
/// send function one at a time, pausing `send_interval` after each. If the
/// queue fills up mid-message the rest of that message is dropped.
pub struct MessageFragmenter {
    peer: String,
    processor: BufferProcessor<MessageFragment>,
    /// Keeps fragments of concurrent `send` calls from interleaving
    queue_lock: Mutex<()>,
    last_id: AtomicU64,
    counters: Arc<Counters>,
}

impl MessageFragmenter {
    pub fn new<F>(peer: &str, config: &StreamConfig, mut send: F) -> Result<Self>
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        let counters = Arc::new(Counters::default());
        let interval = config.send_interval();
        let worker_counters = counters.clone();
        let worker_peer = peer.to_string();

        let processor = BufferProcessor::new(
            &format!("frag-tx-{}", peer),
            config.fragment_ring_capacity,
            move |frag: &mut MessageFragment| {
                if send(frag.datagram()) {
                    worker_counters.fragments_sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    worker_counters.send_failures.fetch_add(1, Ordering::Relaxed);
                    log::warn!(
                        "{}: transport refused fragment {}/{} of message {}",
                        worker_peer,
                        frag.frag_number + 1,
                        frag.frag_count,
                        frag.message_id
                    );
                }
                if !interval.is_zero() {
                    std::thread::sleep(interval);
                }
            },
        )?;

        Ok(Self {
            peer: peer.to_string(),
            processor,
            queue_lock: Mutex::new(()),
            last_id: AtomicU64::new(0),
            counters,
        })
    }

    /// Queue `message` as datagrams of at most `datagram_size` bytes
    ///
    /// Returns `false` if the message could not be queued completely.
    pub fn send(&self, message: &[u8], datagram_size: usize) -> bool {
        if datagram_size <= HEADER_SIZE {
            log::error!(
                "{}: datagram size {} leaves no room for payload",
                self.peer,
                datagram_size
            );
            return false;
        }
        let max_payload = datagram_size - HEADER_SIZE;
        let frag_count = message.len().div_ceil(max_payload).max(1);
        let Ok(frag_count) = u16::try_from(frag_count) else {
            log::warn!(
                "{}: message of {} bytes needs {} fragments, limit is {}",
                self.peer,
                message.len(),
                frag_count,
                u16::MAX
            );
            self.counters.messages_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let _queue = self.queue_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let message_id = self.next_message_id();
        let mut src = SliceReader::new(message);
        for frag_number in 0..frag_count {
            {
                let mut frag = self.processor.current_head();
                frag.message_id = message_id;
                frag.frag_number = frag_number;
                frag.frag_count = frag_count;
                if !frag.pack_payload(&mut src, max_payload) {
                    log::error!("{}: could not copy message into fragment buffer", self.peer);
                    self.counters.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    return false;
                }
            }
            if !self.processor.try_advance_head() {
                log::warn!(
                    "{}: send queue full, dropping message {} at fragment {}/{}",
                    self.peer,
                    message_id,
                    frag_number + 1,
                    frag_count
                );
                self.counters.messages_dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }
        debug_assert_eq!(src.read_headroom(), 0);
        self.counters.messages_queued.fetch_add(1, Ordering::Relaxed);
        log::trace!(
            "{}: queued message {} ({} bytes, {} fragments)",
            self.peer,
            message_id,
            message.len(),
            frag_count
        );
        true
    }

    /// Fragments waiting for the worker
    pub fn pending(&self) -> usize {
        self.processor.len()
    }

    pub fn stats(&self) -> FragmenterStats {
        let c = &self.counters;
        FragmenterStats {
            messages_queued: c.messages_queued.load(Ordering::Relaxed),
            messages_dropped: c.messages_dropped.load(Ordering::Relaxed),
            fragments_sent: c.fragments_sent.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
        }
    }

    /// Stop the worker; queued fragments are discarded
    pub fn release(&self) {
        self.processor.release();
    }

    /// Send time in milliseconds, bumped so ids strictly increase
    fn next_message_id(&self) -> u64 {
        let now = now_ms();
        let prev = self
            .last_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(prev + 1)
    }

    /// Block until every queued fragment was handed to the transport
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while !self.processor.is_empty() {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_micros(200));
        }
        true
    }
}
