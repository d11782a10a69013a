//! Wire and file encoding

pub mod buffer;
pub mod serializable;
pub mod compress;

pub use buffer::{SerialBuffer, SerialReader, SerialWriter, SliceReader, WireScalar};
pub use serializable::{peek_type, SerialMessage, SerialType, Serializable};
