//! One datagram's worth of a larger message
//!
//! Datagram layout: `message_id: u64`, `frag_number: u16`,
//! `frag_count: u16` (all little-endian), then the payload.

use crate::serial::{SerialBuffer, SerialReader, SerialWriter};

/// Bytes of header in front of every fragment payload
pub const HEADER_SIZE: usize = 8 + 2 + 2;

#[derive(Clone, Debug)]
pub struct MessageFragment {
    pub message_id: u64,
    pub frag_number: u16,
    pub frag_count: u16,
    datagram: SerialBuffer,
}

impl Default for MessageFragment {
    fn default() -> Self {
        Self {
            message_id: 0,
            frag_number: 0,
            frag_count: 0,
            datagram: SerialBuffer::fragment(),
        }
    }
}

impl MessageFragment {
    pub fn is_first(&self) -> bool {
        self.frag_number == 0
    }

    pub fn is_last(&self) -> bool {
        self.frag_count > 0 && self.frag_number == self.frag_count - 1
    }

    /// Header and payload as sent on the wire
    pub fn datagram(&self) -> &[u8] {
        self.datagram.as_slice()
    }

    /// Message bytes carried by this fragment
    pub fn payload(&self) -> &[u8] {
        self.datagram.as_slice().get(HEADER_SIZE..).unwrap_or(&[])
    }

    /// Parse a received datagram
    ///
    /// Fails on a short datagram or an impossible header
    /// (`frag_count == 0` or `frag_number >= frag_count`).
    pub fn from_datagram(&mut self, bytes: &[u8]) -> bool {
        self.datagram.reset();
        if bytes.len() < HEADER_SIZE || !self.datagram.put_bytes(bytes) {
            return false;
        }
        let (Some(id), Some(number), Some(count)) = (
            self.datagram.pop::<u64>(),
            self.datagram.pop::<u16>(),
            self.datagram.pop::<u16>(),
        ) else {
            return false;
        };
        self.message_id = id;
        self.frag_number = number;
        self.frag_count = count;
        count > 0 && number < count
    }

    /// Write the header, then up to `max_payload` bytes taken from `src`
    pub fn pack_payload<R: SerialReader>(&mut self, src: &mut R, max_payload: usize) -> bool {
        self.datagram.reset();
        let n = src.read_headroom().min(max_payload);
        self.datagram.put(self.message_id)
            && self.datagram.put(self.frag_number)
            && self.datagram.put(self.frag_count)
            && self.datagram.put_from(src, n)
    }
}
