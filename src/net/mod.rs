//! Datagram transport: fragmentation, reassembly and peer streams

pub mod fragment;
pub mod fragmenter;
pub mod assembler;
pub mod transport;
pub mod loopback;
pub mod stream;

pub use fragment::{MessageFragment, HEADER_SIZE};
pub use fragmenter::{FragmenterStats, MessageFragmenter};
pub use assembler::{AssemblerStats, MessageAssembler};
pub use transport::{ReceiveHandler, Transport};
pub use loopback::{Faults, LoopbackTransport};
pub use stream::{MultiStream, VoxelStream};
