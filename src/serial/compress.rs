//! LZ4 whole-message compression

use crate::core::error::Error;
use crate::core::types::Result;
use crate::serial::buffer::{SerialBuffer, SerialWriter};

/// Replace `dst` with the size-prepended LZ4 block of `src`
pub fn compress_into(src: &[u8], dst: &mut SerialBuffer) -> bool {
    dst.reset();
    dst.put_bytes(&lz4_flex::compress_prepend_size(src))
}

/// Replace `dst` with the decompressed content of a size-prepended block
pub fn decompress_into(src: &[u8], dst: &mut SerialBuffer) -> Result<()> {
    let Some(prefix) = src.get(..4) else {
        return Err(Error::Decode("compressed block shorter than its header".into()));
    };
    let size = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    if size >= dst.max_capacity() {
        return Err(Error::Decode(format!(
            "decompressed size {} exceeds buffer limit {}",
            size,
            dst.max_capacity()
        )));
    }
    let raw = lz4_flex::decompress_size_prepended(src)
        .map_err(|e| Error::Decode(format!("lz4: {}", e)))?;
    dst.reset();
    if !dst.put_bytes(&raw) {
        return Err(Error::Decode("decompressed message does not fit".into()));
    }
    Ok(())
}
