//! Interpretation of the per-voxel payload bytes
//!
//! Payload layout, in order:
//!
//! | bytes            | content                                     |
//! |------------------|---------------------------------------------|
//! | 3, or 1 (RGB332) | colour                                      |
//! | 0 or 1           | metadata: source id (low 4 bits) and flags  |
//! | `label_bytes`    | application label                           |

use bytemuck::Pod;

use crate::core::types::TimeMs;
use crate::serial::{SerialReader, SerialType, SerialWriter, Serializable};
use crate::voxel::MAX_VOXEL_BYTES;

/// Metadata byte flags
pub mod flags {
    /// Low nibble carries the source id
    pub const SOURCE_MASK: u8 = 0x0F;
    pub const SPECIAL: u8 = 1 << 4;
    pub const INVISIBLE: u8 = 1 << 5;
    pub const F2: u8 = 1 << 6;
    pub const F3: u8 = 1 << 7;
}

/// Layout and metadata of the voxels in a stream
#[derive(Clone, Debug, PartialEq)]
pub struct VoxelEncoding {
    compressed_colour: bool,
    meta_enabled: bool,
    label_bytes: u8,
    pub vox_size_mm: f64,
    pub target_fps: f64,
    pub timestamp_ms: TimeMs,
    pub descriptor: String,
}

impl Default for VoxelEncoding {
    fn default() -> Self {
        Self {
            compressed_colour: false,
            meta_enabled: false,
            label_bytes: 0,
            vox_size_mm: 1.0,
            target_fps: 30.0,
            timestamp_ms: 0,
            descriptor: String::new(),
        }
    }
}

impl VoxelEncoding {
    /// Panics if the layout needs more than 16 bytes
    pub fn new(compressed_colour: bool, meta_enabled: bool, label_bytes: u8) -> Self {
        let enc = Self {
            compressed_colour,
            meta_enabled,
            label_bytes,
            ..Self::default()
        };
        assert!(
            enc.bytes_total() <= MAX_VOXEL_BYTES,
            "voxel encoding needs {} bytes, limit is {}",
            enc.bytes_total(),
            MAX_VOXEL_BYTES
        );
        enc
    }

    pub fn compressed_colour(&self) -> bool {
        self.compressed_colour
    }

    pub fn meta_enabled(&self) -> bool {
        self.meta_enabled
    }

    pub fn label_bytes(&self) -> u8 {
        self.label_bytes
    }

    /// Toggle RGB332 colour; fails if the layout would not fit
    pub fn set_colour_compression(&mut self, on: bool) -> bool {
        self.relayout(on, self.meta_enabled, self.label_bytes)
    }

    pub fn set_meta_enabled(&mut self, on: bool) -> bool {
        self.relayout(self.compressed_colour, on, self.label_bytes)
    }

    pub fn set_label_bytes(&mut self, n: u8) -> bool {
        self.relayout(self.compressed_colour, self.meta_enabled, n)
    }

    fn relayout(&mut self, compressed: bool, meta: bool, labels: u8) -> bool {
        let total = colour_bytes(compressed) + meta as usize + labels as usize;
        if total > MAX_VOXEL_BYTES {
            log::warn!("voxel encoding of {} bytes exceeds {}", total, MAX_VOXEL_BYTES);
            return false;
        }
        self.compressed_colour = compressed;
        self.meta_enabled = meta;
        self.label_bytes = labels;
        true
    }

    /// Payload bytes each voxel needs
    pub fn bytes_total(&self) -> usize {
        colour_bytes(self.compressed_colour) + self.meta_enabled as usize + self.label_bytes as usize
    }

    fn meta_offset(&self) -> usize {
        colour_bytes(self.compressed_colour)
    }

    fn label_offset(&self) -> usize {
        self.meta_offset() + self.meta_enabled as usize
    }

    pub fn encode_rgb(&self, data: &mut [u8], rgb: [u8; 3]) {
        if self.compressed_colour {
            data[0] = rgb_to_332(rgb);
        } else {
            data[..3].copy_from_slice(&rgb);
        }
    }

    pub fn encode_bgr(&self, data: &mut [u8], bgr: [u8; 3]) {
        self.encode_rgb(data, [bgr[2], bgr[1], bgr[0]]);
    }

    pub fn decode_rgb(&self, data: &[u8]) -> [u8; 3] {
        if self.compressed_colour {
            rgb_from_332(data[0])
        } else {
            [data[0], data[1], data[2]]
        }
    }

    /// Source id, if the layout carries a metadata byte
    pub fn source(&self, data: &[u8]) -> Option<u8> {
        self.meta_enabled
            .then(|| data[self.meta_offset()] & flags::SOURCE_MASK)
    }

    /// Stamp the source id (low 4 bits of `src`); no-op without metadata
    pub fn set_source(&self, data: &mut [u8], src: u8) -> bool {
        if !self.meta_enabled {
            return false;
        }
        let meta = &mut data[self.meta_offset()];
        *meta = (*meta & !flags::SOURCE_MASK) | (src & flags::SOURCE_MASK);
        true
    }

    pub fn has_flag(&self, data: &[u8], flag: u8) -> bool {
        self.meta_enabled && data[self.meta_offset()] & flag != 0
    }

    pub fn set_flag(&self, data: &mut [u8], flag: u8) -> bool {
        if !self.meta_enabled {
            return false;
        }
        data[self.meta_offset()] |= flag & !flags::SOURCE_MASK;
        true
    }

    pub fn clear_flag(&self, data: &mut [u8], flag: u8) -> bool {
        if !self.meta_enabled {
            return false;
        }
        data[self.meta_offset()] &= !(flag & !flags::SOURCE_MASK);
        true
    }

    /// Store `label` in the label bytes; fails if it does not fit
    pub fn set_label<T: Pod>(&self, data: &mut [u8], label: T) -> bool {
        let bytes = bytemuck::bytes_of(&label);
        if bytes.len() > self.label_bytes as usize {
            return false;
        }
        let off = self.label_offset();
        data[off..off + bytes.len()].copy_from_slice(bytes);
        true
    }

    pub fn get_label<T: Pod>(&self, data: &[u8]) -> Option<T> {
        let n = std::mem::size_of::<T>();
        if n > self.label_bytes as usize {
            return None;
        }
        let off = self.label_offset();
        Some(bytemuck::pod_read_unaligned(&data[off..off + n]))
    }

    /// One-line human readable summary
    pub fn describe(&self) -> String {
        format!(
            "{} bytes/voxel (colour {}, meta {}, labels {}), {} mm, {} fps, t={} '{}'",
            self.bytes_total(),
            if self.compressed_colour { "rgb332" } else { "rgb888" },
            if self.meta_enabled { "on" } else { "off" },
            self.label_bytes,
            self.vox_size_mm,
            self.target_fps,
            self.timestamp_ms,
            self.descriptor
        )
    }
}

impl Serializable for VoxelEncoding {
    fn serial_type(&self) -> SerialType {
        SerialType::VoxelEncoding
    }

    fn encode<W: SerialWriter>(&self, w: &mut W) -> bool {
        w.put(self.compressed_colour as u8)
            && w.put(self.meta_enabled as u8)
            && w.put(self.label_bytes)
            && w.put(self.vox_size_mm)
            && w.put(self.target_fps)
            && w.put(self.timestamp_ms)
            && w.put(self.descriptor.len() as u32)
            && w.put_bytes(self.descriptor.as_bytes())
    }

    fn decode<R: SerialReader>(&mut self, r: &mut R) -> bool {
        let (Some(cc), Some(meta), Some(labels), Some(mm), Some(fps), Some(ts), Some(len)) = (
            r.pop::<u8>(),
            r.pop::<u8>(),
            r.pop::<u8>(),
            r.pop::<f64>(),
            r.pop::<f64>(),
            r.pop::<u64>(),
            r.pop::<u32>(),
        ) else {
            return false;
        };
        let Some(text) = r.take_bytes(len as usize) else {
            return false;
        };
        let Ok(descriptor) = std::str::from_utf8(text) else {
            return false;
        };
        let descriptor = descriptor.to_owned();
        if !self.relayout(cc != 0, meta != 0, labels) {
            return false;
        }
        self.vox_size_mm = mm;
        self.target_fps = fps;
        self.timestamp_ms = ts;
        self.descriptor = descriptor;
        true
    }
}

fn colour_bytes(compressed: bool) -> usize {
    if compressed { 1 } else { 3 }
}

fn rgb_to_332(rgb: [u8; 3]) -> u8 {
    (rgb[0] & 0xE0) | ((rgb[1] & 0xE0) >> 3) | (rgb[2] >> 6)
}

fn rgb_from_332(c: u8) -> [u8; 3] {
    let r = c >> 5;
    let g = (c >> 2) & 0x7;
    let b = c & 0x3;
    [
        (r << 5) | (r << 2) | (r >> 1),
        (g << 5) | (g << 2) | (g >> 1),
        b * 0x55,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::SerialBuffer;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(VoxelEncoding::default().bytes_total(), 3);
        assert_eq!(VoxelEncoding::new(true, true, 2).bytes_total(), 4);
        let mut enc = VoxelEncoding::new(false, true, 12);
        assert_eq!(enc.bytes_total(), 16);
        assert!(!enc.set_label_bytes(13));
        assert_eq!(enc.label_bytes(), 12);
    }

    #[test]
    #[should_panic]
    fn test_oversized_layout_panics() {
        VoxelEncoding::new(false, true, 13);
    }

    #[test]
    fn test_colour_roundtrip() {
        let enc = VoxelEncoding::default();
        let mut data = [0u8; 16];
        enc.encode_bgr(&mut data, [1, 2, 3]);
        assert_eq!(enc.decode_rgb(&data), [3, 2, 1]);
    }

    #[test]
    fn test_compressed_colour_extremes() {
        let enc = VoxelEncoding::new(true, false, 0);
        let mut data = [0u8; 16];
        enc.encode_rgb(&mut data, [255, 255, 255]);
        assert_eq!(data[0], 0xFF);
        assert_eq!(enc.decode_rgb(&data), [255, 255, 255]);
        enc.encode_rgb(&mut data, [0, 0, 0]);
        assert_eq!(enc.decode_rgb(&data), [0, 0, 0]);
        enc.encode_rgb(&mut data, [200, 100, 50]);
        let [r, g, b] = enc.decode_rgb(&data);
        assert!(r.abs_diff(200) < 32 && g.abs_diff(100) < 32 && b.abs_diff(50) < 64);
    }

    #[test]
    fn test_source_and_flags_share_byte() {
        let enc = VoxelEncoding::new(false, true, 0);
        let mut data = [0u8; 16];
        assert!(enc.set_source(&mut data, 0x1B));
        assert_eq!(enc.source(&data), Some(0xB));
        assert!(enc.set_flag(&mut data, flags::INVISIBLE));
        assert!(enc.has_flag(&data, flags::INVISIBLE));
        assert!(!enc.has_flag(&data, flags::SPECIAL));
        assert_eq!(enc.source(&data), Some(0xB));
        enc.clear_flag(&mut data, flags::INVISIBLE);
        assert!(!enc.has_flag(&data, flags::INVISIBLE));
        assert_eq!(data[3], 0xB);
    }

    #[test]
    fn test_no_meta_byte() {
        let enc = VoxelEncoding::default();
        let mut data = [0u8; 16];
        assert!(!enc.set_source(&mut data, 2));
        assert_eq!(enc.source(&data), None);
        assert!(!enc.set_flag(&mut data, flags::SPECIAL));
    }

    #[test]
    fn test_labels() {
        let enc = VoxelEncoding::new(true, true, 4);
        let mut data = [0u8; 16];
        assert!(enc.set_label(&mut data, 0xDEADBEEFu32));
        assert_eq!(enc.get_label::<u32>(&data), Some(0xDEADBEEF));
        assert_eq!(enc.get_label::<u16>(&data), Some(0xBEEF));
        assert!(!enc.set_label(&mut data, 1u64));
        assert_eq!(enc.get_label::<u64>(&data), None);
    }

    #[test]
    fn test_serialize() {
        let mut enc = VoxelEncoding::new(true, true, 2);
        enc.vox_size_mm = 8.0;
        enc.timestamp_ms = 1234;
        enc.descriptor = "studio-a".into();

        let mut buf = SerialBuffer::short();
        assert!(enc.pack(&mut buf));
        let mut out = VoxelEncoding::default();
        assert!(out.unpack(&mut buf));
        assert_eq!(out, enc);
        assert!(out.describe().contains("studio-a"));
    }
}
