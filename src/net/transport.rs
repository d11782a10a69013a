//! Boundary to the datagram layer

use std::sync::Arc;

/// Called with every datagram that arrives from the peer
pub type ReceiveHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// An unreliable, unordered datagram channel to one peer
///
/// Nothing above this trait assumes delivery or ordering. Implementations
/// invoke the receive handler on a thread they own.
pub trait Transport: Send + Sync {
    /// Reach `address` and complete the pairing handshake
    fn connect_and_pair(&self, address: &str) -> bool;

    fn is_paired(&self) -> bool;

    /// Send one datagram; `false` if it was not handed to the network
    fn send_to_peer(&self, datagram: &[u8]) -> bool;

    /// Largest datagram, header included, that `send_to_peer` accepts
    fn max_frag_payload(&self) -> usize;

    /// Replace the receive handler
    fn set_receive_handler(&self, handler: ReceiveHandler);

    /// Name used in log lines
    fn peer_id(&self) -> String;
}
