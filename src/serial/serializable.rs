//! Type-tagged serialization

use crate::serial::buffer::{SerialBuffer, SerialReader, SerialWriter};

/// Tag written in front of every packed object
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SerialType {
    Invalid,
    Octree,
    Pose,
    ColourPalette,
    PointCloud,
    VoxelMessage,
    PoseMessage,
    VoxelEncoding,
}

impl SerialType {
    pub fn tag(self) -> i64 {
        match self {
            SerialType::Invalid => -1,
            SerialType::Octree => 1,
            SerialType::Pose => 2,
            SerialType::ColourPalette => 3,
            SerialType::PointCloud => 4,
            SerialType::VoxelMessage => 5,
            SerialType::PoseMessage => 6,
            SerialType::VoxelEncoding => 7,
        }
    }

    pub fn from_tag(tag: i64) -> Self {
        match tag {
            1 => SerialType::Octree,
            2 => SerialType::Pose,
            3 => SerialType::ColourPalette,
            4 => SerialType::PointCloud,
            5 => SerialType::VoxelMessage,
            6 => SerialType::PoseMessage,
            7 => SerialType::VoxelEncoding,
            _ => SerialType::Invalid,
        }
    }
}

/// An object with a wire representation
///
/// `encode`/`decode` handle the body only; `pack`/`unpack` add and check the
/// type tag. A `false` return means the stream ran out, the writer was full,
/// or the data was malformed. The object may be partially updated after a
/// failed decode.
pub trait Serializable {
    fn serial_type(&self) -> SerialType;

    fn encode<W: SerialWriter>(&self, w: &mut W) -> bool;

    fn decode<R: SerialReader>(&mut self, r: &mut R) -> bool;

    fn pack<W: SerialWriter>(&self, w: &mut W) -> bool {
        w.put(self.serial_type().tag()) && self.encode(w)
    }

    fn unpack<R: SerialReader>(&mut self, r: &mut R) -> bool {
        match r.pop::<i64>() {
            Some(tag) if tag == self.serial_type().tag() => self.decode(r),
            Some(tag) => {
                log::debug!(
                    "unpack: expected {:?}, found {:?}",
                    self.serial_type(),
                    SerialType::from_tag(tag)
                );
                false
            }
            None => false,
        }
    }
}

/// Tag of the next packed object, without consuming it
pub fn peek_type<R: SerialReader>(r: &R) -> SerialType {
    r.peek::<i64>().map_or(SerialType::Invalid, SerialType::from_tag)
}

/// A top-level object that owns a whole buffer
///
/// Packing starts from an empty buffer; unpacking reads from the start and
/// fails if bytes are left over.
pub trait SerialMessage: Serializable {
    fn pack_message(&self, buf: &mut SerialBuffer) -> bool {
        buf.reset();
        self.pack(buf)
    }

    fn unpack_message(&mut self, buf: &mut SerialBuffer) -> bool {
        buf.seek_start();
        if !self.unpack(buf) {
            return false;
        }
        if buf.read_headroom() != 0 {
            log::warn!(
                "{:?} message has {} trailing bytes",
                self.serial_type(),
                buf.read_headroom()
            );
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Pair(u32, u32);

    impl Serializable for Pair {
        fn serial_type(&self) -> SerialType {
            SerialType::Pose
        }

        fn encode<W: SerialWriter>(&self, w: &mut W) -> bool {
            w.put(self.0) && w.put(self.1)
        }

        fn decode<R: SerialReader>(&mut self, r: &mut R) -> bool {
            match (r.pop(), r.pop()) {
                (Some(a), Some(b)) => {
                    *self = Pair(a, b);
                    true
                }
                _ => false,
            }
        }
    }

    impl SerialMessage for Pair {}

    #[test]
    fn test_tags_roundtrip() {
        for t in [
            SerialType::Octree,
            SerialType::Pose,
            SerialType::VoxelMessage,
            SerialType::PoseMessage,
            SerialType::VoxelEncoding,
        ] {
            assert_eq!(SerialType::from_tag(t.tag()), t);
        }
        assert_eq!(SerialType::from_tag(99), SerialType::Invalid);
    }

    #[test]
    fn test_pack_peek_unpack() {
        let mut buf = SerialBuffer::short();
        assert!(Pair(3, 4).pack(&mut buf));
        assert_eq!(peek_type(&buf), SerialType::Pose);

        let mut out = Pair::default();
        assert!(out.unpack(&mut buf));
        assert_eq!((out.0, out.1), (3, 4));
    }

    #[test]
    fn test_wrong_tag_rejected() {
        let mut buf = SerialBuffer::short();
        buf.put(SerialType::Octree.tag());
        buf.put(1u32);
        buf.put(2u32);
        assert!(!Pair::default().unpack(&mut buf));
    }

    #[test]
    fn test_message_rejects_trailing_bytes() {
        let mut buf = SerialBuffer::short();
        assert!(Pair(1, 2).pack_message(&mut buf));
        let mut out = Pair::default();
        assert!(out.unpack_message(&mut buf));

        buf.put(0u8);
        assert!(!out.unpack_message(&mut buf));
    }

    #[test]
    fn test_pack_message_resets_buffer() {
        let mut buf = SerialBuffer::short();
        buf.put_bytes(&[0xAA; 10]);
        assert!(Pair(1, 2).pack_message(&mut buf));
        assert_eq!(buf.len(), 8 + 8);
    }
}
