//! Byte buffers and the reader/writer traits every encoding goes through
//!
//! Scalars are little-endian on the wire. Writes and reads are
//! all-or-nothing: a `put_bytes` that would exceed the buffer's capacity, or
//! a `pop_bytes` that asks for more than is left, fails without touching the
//! buffer.

use std::io::{Read, Write};

use crate::core::error::Error;
use crate::core::types::Result;

/// Fixed-width value that can be written to and read from the wire
pub trait WireScalar: Copy {
    const SIZE: usize;

    fn to_wire(self, out: &mut [u8]);
    fn from_wire(bytes: &[u8]) -> Self;
}

macro_rules! impl_wire_scalar {
    ($($t:ty),* $(,)?) => {$(
        impl WireScalar for $t {
            const SIZE: usize = std::mem::size_of::<$t>();

            #[inline]
            fn to_wire(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_le_bytes());
            }

            #[inline]
            fn from_wire(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_le_bytes(raw)
            }
        }
    )*};
}

impl_wire_scalar!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

/// Consuming side of a byte stream
pub trait SerialReader {
    /// Bytes left to read
    fn read_headroom(&self) -> usize;

    /// Fill `out` from the stream; fails (consuming nothing) if short
    fn pop_bytes(&mut self, out: &mut [u8]) -> bool;

    /// Borrow the next `n` bytes without consuming them
    fn peek_bytes(&self, n: usize) -> Option<&[u8]>;

    /// Borrow and consume the next `n` bytes
    fn take_bytes(&mut self, n: usize) -> Option<&[u8]>;

    fn pop<S: WireScalar>(&mut self) -> Option<S> {
        let mut raw = [0u8; 8];
        let raw = &mut raw[..S::SIZE];
        self.pop_bytes(raw).then(|| S::from_wire(&raw[..]))
    }

    fn peek<S: WireScalar>(&self) -> Option<S> {
        self.peek_bytes(S::SIZE).map(S::from_wire)
    }

    fn skip(&mut self, n: usize) -> bool {
        self.take_bytes(n).is_some()
    }
}

/// Producing side of a byte stream
pub trait SerialWriter {
    /// Bytes that can still be appended
    fn write_headroom(&self) -> usize;

    /// Append `bytes`; fails (writing nothing) if there is no room
    fn put_bytes(&mut self, bytes: &[u8]) -> bool;

    fn put<S: WireScalar>(&mut self, value: S) -> bool {
        let mut raw = [0u8; 8];
        let raw = &mut raw[..S::SIZE];
        value.to_wire(raw);
        self.put_bytes(raw)
    }
}

impl SerialWriter for Vec<u8> {
    fn write_headroom(&self) -> usize {
        usize::MAX - self.len()
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> bool {
        self.extend_from_slice(bytes);
        true
    }
}

/// Zero-copy reader over a borrowed slice
#[derive(Clone, Copy, Debug)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Unread remainder
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

impl SerialReader for SliceReader<'_> {
    fn read_headroom(&self) -> usize {
        self.data.len() - self.pos
    }

    fn pop_bytes(&mut self, out: &mut [u8]) -> bool {
        match self.take_bytes(out.len()) {
            Some(src) => {
                out.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    fn peek_bytes(&self, n: usize) -> Option<&[u8]> {
        self.data.get(self.pos..self.pos.checked_add(n)?)
    }

    fn take_bytes(&mut self, n: usize) -> Option<&[u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }
}

/// Growable byte buffer with a read cursor and a hard size limit
///
/// `capacity` is the current logical limit. When a write would exceed it the
/// buffer grows to `required + grow_margin`, but never to `max_capacity` or
/// beyond; a buffer with a zero grow margin never grows. Physical storage is
/// reserved on demand, so large presets cost nothing until used.
#[derive(Clone, Debug)]
pub struct SerialBuffer {
    data: Vec<u8>,
    read_pos: usize,
    capacity: usize,
    max_capacity: usize,
    grow_margin: usize,
}

impl SerialBuffer {
    pub fn new(capacity: usize, max_capacity: usize, grow_margin: usize) -> Self {
        Self {
            data: Vec::new(),
            read_pos: 0,
            capacity: capacity.min(max_capacity),
            max_capacity,
            grow_margin,
        }
    }

    /// Whole serialized messages (5 MB, growing to 50 MB)
    pub fn message() -> Self {
        Self::new(5_000_000, 50_000_000, 10_240)
    }

    /// Small control messages such as poses
    pub fn short() -> Self {
        Self::new(1024, 1025, 0)
    }

    /// One datagram
    pub fn fragment() -> Self {
        Self::new(65_536, 65_536, 0)
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }

    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Everything written, regardless of the read cursor
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Bytes not yet read
    pub fn unread(&self) -> &[u8] {
        &self.data[self.read_pos..]
    }

    /// Forget all content; keeps the allocation
    pub fn reset(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }

    /// Rewind the read cursor to the first byte
    pub fn seek_start(&mut self) {
        self.read_pos = 0;
    }

    /// Move `n` bytes from `src` into this buffer
    pub fn put_from<R: SerialReader>(&mut self, src: &mut R, n: usize) -> bool {
        if !self.ensure_room(n) {
            return false;
        }
        match src.take_bytes(n) {
            Some(bytes) => {
                self.data.extend_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Replace the content with everything left in `src`
    pub fn slurp_from<R: SerialReader>(&mut self, src: &mut R) -> bool {
        self.reset();
        let n = src.read_headroom();
        self.put_from(src, n)
    }

    /// Write a length-prefixed copy of the content to `w`
    pub fn dump<W: Write>(&self, w: &mut W) -> Result<()> {
        if self.data.is_empty() {
            return Err(Error::Decode("refusing to dump an empty buffer".into()));
        }
        w.write_all(&(self.data.len() as u64).to_le_bytes())?;
        w.write_all(&self.data)?;
        Ok(())
    }

    /// Replace the content with a length-prefixed block read from `r`
    pub fn slurp<R: Read>(&mut self, r: &mut R) -> Result<()> {
        self.reset();
        let mut len = [0u8; 8];
        r.read_exact(&mut len)?;
        let len = u64::from_le_bytes(len) as usize;
        if !self.ensure_room(len) {
            return Err(Error::Decode(format!(
                "stored block of {} bytes exceeds buffer limit {}",
                len, self.max_capacity
            )));
        }
        self.data.resize(len, 0);
        if let Err(e) = r.read_exact(&mut self.data) {
            self.reset();
            return Err(e.into());
        }
        Ok(())
    }

    fn ensure_room(&mut self, n: usize) -> bool {
        let Some(required) = self.data.len().checked_add(n) else {
            return false;
        };
        if required <= self.capacity {
            return true;
        }
        if self.grow_margin == 0 || required >= self.max_capacity {
            return false;
        }
        let grown = (required + self.grow_margin).min(self.max_capacity);
        log::trace!("SerialBuffer growing {} -> {}", self.capacity, grown);
        self.capacity = grown;
        true
    }
}

impl Default for SerialBuffer {
    fn default() -> Self {
        Self::message()
    }
}

impl SerialReader for SerialBuffer {
    fn read_headroom(&self) -> usize {
        self.data.len() - self.read_pos
    }

    fn pop_bytes(&mut self, out: &mut [u8]) -> bool {
        match self.take_bytes(out.len()) {
            Some(src) => {
                out.copy_from_slice(src);
                true
            }
            None => false,
        }
    }

    fn peek_bytes(&self, n: usize) -> Option<&[u8]> {
        self.data.get(self.read_pos..self.read_pos.checked_add(n)?)
    }

    fn take_bytes(&mut self, n: usize) -> Option<&[u8]> {
        let start = self.read_pos;
        let end = start.checked_add(n)?;
        if end > self.data.len() {
            return None;
        }
        self.read_pos = end;
        Some(&self.data[start..end])
    }
}

impl SerialWriter for SerialBuffer {
    fn write_headroom(&self) -> usize {
        let limit = if self.grow_margin == 0 {
            self.capacity
        } else {
            self.max_capacity.saturating_sub(1).max(self.capacity)
        };
        limit.saturating_sub(self.data.len())
    }

    fn put_bytes(&mut self, bytes: &[u8]) -> bool {
        if !self.ensure_room(bytes.len()) {
            return false;
        }
        self.data.extend_from_slice(bytes);
        true
    }
}
