//! Reassembles fragments into complete messages

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::core::types::Result;
use crate::net::fragment::MessageFragment;
use crate::serial::{SerialBuffer, SerialWriter};
use crate::sync::{BufferProcessor, RingBuffer};

/// Counters since construction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Messages published to the output ring
    pub completed: u64,
    /// Partial messages discarded on a wrong id or fragment number
    pub desyncs: u64,
    /// Partial messages abandoned because a new message started
    pub abandoned: u64,
    /// Completed messages overwritten because the output ring was full
    pub overwritten: u64,
    /// Fragments dropped because the fragment queue was full
    pub overruns: u64,
    /// Datagrams that did not parse as fragments
    pub malformed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    desyncs: AtomicU64,
    abandoned: AtomicU64,
    overwritten: AtomicU64,
    overruns: AtomicU64,
    malformed: AtomicU64,
}

/// Receiver half of the fragmentation protocol
///
/// Fragments must arrive in order. Anything out of sequence discards the
/// message being assembled and waits for the next first fragment, skipping
/// the rest of the discarded message without counting it again; completed
/// messages are published to `output` without blocking, reusing the head slot
/// (latest message wins) when the consumer falls behind.
pub struct MessageAssembler {
    peer: String,
    processor: BufferProcessor<MessageFragment>,
    counters: Arc<Counters>,
}

impl MessageAssembler {
    pub fn new(peer: &str, capacity: usize, output: Arc<RingBuffer<SerialBuffer>>) -> Result<Self> {
        let counters = Arc::new(Counters::default());
        let c = counters.clone();
        let name = peer.to_string();
        let mut expected_id = 0u64;
        let mut expected_frag = 0u16;
        let mut discarded: Option<u64> = None;

        let processor = BufferProcessor::new(
            &format!("frag-rx-{}", peer),
            capacity,
            move |frag: &mut MessageFragment| {
                if output.is_released() {
                    return;
                }
                if !frag.is_first() && discarded == Some(frag.message_id) {
                    log::trace!(
                        "{}: skipping fragment {}/{} of discarded message {}",
                        name,
                        frag.frag_number + 1,
                        frag.frag_count,
                        frag.message_id
                    );
                    return;
                }
                let mut target = output.current_head();

                if frag.is_first() {
                    discarded = None;
                    if expected_frag != 0 {
                        log::warn!(
                            "{}: message {} abandoned at fragment {}, message {} started",
                            name,
                            expected_id,
                            expected_frag,
                            frag.message_id
                        );
                        c.abandoned.fetch_add(1, Ordering::Relaxed);
                    }
                    target.reset();
                    expected_id = frag.message_id;
                    expected_frag = 0;
                } else if frag.message_id != expected_id {
                    log::warn!(
                        "{}: unexpected message id {} (expected {})",
                        name,
                        frag.message_id,
                        expected_id
                    );
                    target.reset();
                    expected_frag = 0;
                    discarded = Some(frag.message_id);
                    c.desyncs.fetch_add(1, Ordering::Relaxed);
                    return;
                } else if frag.frag_number != expected_frag {
                    log::warn!(
                        "{}: out of sequence fragment, expected {} got {}/{}",
                        name,
                        expected_frag,
                        frag.frag_number,
                        frag.frag_count
                    );
                    target.reset();
                    expected_frag = 0;
                    discarded = Some(frag.message_id);
                    c.desyncs.fetch_add(1, Ordering::Relaxed);
                    return;
                }

                if !target.put_bytes(frag.payload()) {
                    log::warn!(
                        "{}: message {} does not fit receive buffer at fragment {}/{}",
                        name,
                        frag.message_id,
                        frag.frag_number + 1,
                        frag.frag_count
                    );
                    target.reset();
                    expected_frag = 0;
                    discarded = Some(frag.message_id);
                    c.desyncs.fetch_add(1, Ordering::Relaxed);
                    return;
                }

                if frag.is_last() {
                    drop(target);
                    if output.try_advance_head() {
                        c.completed.fetch_add(1, Ordering::Relaxed);
                    } else {
                        log::warn!("{}: receive buffer full, reusing current slot", name);
                        c.overwritten.fetch_add(1, Ordering::Relaxed);
                    }
                    expected_frag = 0;
                } else {
                    expected_frag = (expected_frag + 1) % frag.frag_count;
                }
            },
        )?;

        Ok(Self {
            peer: peer.to_string(),
            processor,
            counters,
        })
    }

    /// Queue one received datagram; never blocks
    pub fn receive(&self, datagram: &[u8]) -> bool {
        {
            let mut head = self.processor.current_head();
            if !head.from_datagram(datagram) {
                log::debug!("{}: ignoring malformed datagram of {} bytes", self.peer, datagram.len());
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }
        if !self.processor.try_advance_head() {
            log::warn!("{}: fragment queue full, dropping fragment", self.peer);
            self.counters.overruns.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Fragments waiting for the worker
    pub fn pending(&self) -> usize {
        self.processor.len()
    }

    pub fn stats(&self) -> AssemblerStats {
        let c = &self.counters;
        AssemblerStats {
            completed: c.completed.load(Ordering::Relaxed),
            desyncs: c.desyncs.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            overwritten: c.overwritten.load(Ordering::Relaxed),
            overruns: c.overruns.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
        }
    }

    pub fn release(&self) {
        self.processor.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::SliceReader;
    use std::time::Duration;

    fn datagram(id: u64, number: u16, count: u16, body: &[u8]) -> Vec<u8> {
        let mut f = MessageFragment::default();
        f.message_id = id;
        f.frag_number = number;
        f.frag_count = count;
        f.pack_payload(&mut SliceReader::new(body), body.len());
        f.datagram().to_vec()
    }

    fn setup() -> (MessageAssembler, Arc<RingBuffer<SerialBuffer>>) {
        let out = Arc::new(RingBuffer::from_fn(4, |_| SerialBuffer::short()));
        (MessageAssembler::new("test", 16, out.clone()).unwrap(), out)
    }

    fn settle(asm: &MessageAssembler) {
        for _ in 0..1000 {
            if asm.pending() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(10));
    }

    #[test]
    fn test_in_order_fragments_complete() {
        let (asm, out) = setup();
        asm.receive(&datagram(5, 0, 3, b"ab"));
        asm.receive(&datagram(5, 1, 3, b"cd"));
        asm.receive(&datagram(5, 2, 3, b"e"));

        let msg = out.advance_tail_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(msg.as_slice(), b"abcde");
        drop(msg);
        assert_eq!(asm.stats().completed, 1);
    }

    #[test]
    fn test_out_of_order_discards_message() {
        let (asm, out) = setup();
        asm.receive(&datagram(9, 0, 3, b"a"));
        asm.receive(&datagram(9, 2, 3, b"c"));
        asm.receive(&datagram(9, 1, 3, b"b"));
        settle(&asm);

        assert!(out.is_empty());
        let stats = asm.stats();
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.desyncs, 1);
    }

    #[test]
    fn test_one_desync_per_discarded_message() {
        let (asm, out) = setup();
        asm.receive(&datagram(3, 0, 5, b"a"));
        for number in [2, 1, 3, 4] {
            asm.receive(&datagram(3, number, 5, b"x"));
        }
        asm.receive(&datagram(4, 2, 3, b"stray"));
        asm.receive(&datagram(4, 1, 3, b"stray"));
        asm.receive(&datagram(5, 0, 1, b"ok"));

        let msg = out.advance_tail_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(msg.as_slice(), b"ok");
        drop(msg);
        let stats = asm.stats();
        assert_eq!(stats.desyncs, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.abandoned, 0);
    }

    #[test]
    fn test_recovers_at_next_first_fragment() {
        let (asm, out) = setup();
        asm.receive(&datagram(1, 1, 2, b"lost head"));
        asm.receive(&datagram(2, 0, 2, b"x"));
        asm.receive(&datagram(2, 1, 2, b"y"));

        let msg = out.advance_tail_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(msg.as_slice(), b"xy");
        drop(msg);
        assert_eq!(asm.stats().desyncs, 1);
    }

    #[test]
    fn test_new_message_abandons_partial() {
        let (asm, out) = setup();
        asm.receive(&datagram(1, 0, 3, b"old"));
        asm.receive(&datagram(2, 0, 1, b"new"));

        let msg = out.advance_tail_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(msg.as_slice(), b"new");
        drop(msg);
        assert_eq!(asm.stats().abandoned, 1);
    }

    #[test]
    fn test_full_output_keeps_latest() {
        let (asm, out) = setup();
        for id in 1..=4u64 {
            asm.receive(&datagram(id, 0, 1, &[id as u8]));
        }
        settle(&asm);

        // capacity 4 holds two; the third and fourth share the head slot
        assert_eq!(out.len(), 2);
        assert_eq!(asm.stats().overwritten, 2);
        assert_eq!(out.advance_tail().unwrap().as_slice(), &[1]);
        assert_eq!(out.advance_tail().unwrap().as_slice(), &[2]);
        assert_eq!(out.current_head().as_slice(), &[4]);
    }

    #[test]
    fn test_malformed_datagram_counted() {
        let (asm, _out) = setup();
        assert!(!asm.receive(&[1, 2, 3]));
        assert_eq!(asm.stats().malformed, 1);
    }
}
