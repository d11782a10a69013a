//! UDP transport for voxlink streams
//!
//! Each [`UdpTransport`] owns a small tokio runtime that receives datagrams
//! and runs the pairing handshake; sending is a non-blocking `try_send_to`
//! from the caller's thread.
//!
//! ```ignore
//! let transport = Arc::new(UdpTransport::bind("0.0.0.0:9400", &config.stream)?);
//! let stream = VoxelStream::new(transport, &config.stream, inbox)?;
//! stream.connect("10.0.0.7:9400");
//! ```

pub mod pairing;

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use voxlink::core::StreamConfig;
use voxlink::net::{ReceiveHandler, Transport};
use voxlink::{Error, Result};

pub use pairing::{Control, Pairing};

/// Datagram size that fits a typical Ethernet MTU
pub const DEFAULT_DATAGRAM: usize = 1400;

const RECV_BUFFER: usize = 64 * 1024;

/// [`Transport`] over one UDP socket
pub struct UdpTransport {
    runtime: Runtime,
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    pairing: Arc<Pairing>,
    handler: Arc<RwLock<Option<ReceiveHandler>>>,
    max_datagram: usize,
    poll: Duration,
    max_attempts: Option<u32>,
    receiver: JoinHandle<()>,
}

impl UdpTransport {
    /// Bind to `local` (e.g. `"0.0.0.0:9400"`; port 0 picks one)
    pub fn bind(local: &str, config: &StreamConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("voxlink-udp")
            .enable_all()
            .build()?;
        let socket = Arc::new(runtime.block_on(UdpSocket::bind(local))?);
        let local = socket.local_addr()?;

        let pairing = Arc::new(Pairing::default());
        let handler: Arc<RwLock<Option<ReceiveHandler>>> = Arc::new(RwLock::new(None));
        let receiver = runtime.spawn(receive_loop(socket.clone(), pairing.clone(), handler.clone()));
        log::info!("UDP transport listening on {}", local);

        Ok(Self {
            runtime,
            socket,
            local,
            pairing,
            handler,
            max_datagram: DEFAULT_DATAGRAM,
            poll: config.pair_poll(),
            max_attempts: config.pair_max_attempts,
            receiver,
        })
    }

    /// Override the largest datagram this transport sends
    pub fn with_max_datagram(mut self, max_datagram: usize) -> Self {
        self.max_datagram = max_datagram;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.pairing.paired_peer()
    }

    /// Resolve `address` and run the handshake
    ///
    /// Must not be called from inside a tokio runtime.
    pub fn pair(&self, address: &str) -> Result<()> {
        let peer = address
            .to_socket_addrs()?
            .find(|a| a.is_ipv4() == self.local.is_ipv4())
            .ok_or_else(|| Error::Transport(format!("no usable address for '{}'", address)))?;
        log::info!("Pairing {} with {}", self.local, peer);
        self.runtime.block_on(pairing::pair(
            &self.socket,
            &self.pairing,
            peer,
            self.poll,
            self.max_attempts,
        ))
    }
}

impl Transport for UdpTransport {
    fn connect_and_pair(&self, address: &str) -> bool {
        match self.pair(address) {
            Ok(()) => true,
            Err(e) => {
                log::error!("{}", e);
                false
            }
        }
    }

    fn is_paired(&self) -> bool {
        self.pairing.is_paired()
    }

    fn send_to_peer(&self, datagram: &[u8]) -> bool {
        if datagram.len() > self.max_datagram {
            return false;
        }
        let Some(peer) = self.pairing.paired_peer() else {
            return false;
        };
        match self.socket.try_send_to(datagram, peer) {
            Ok(n) => n == datagram.len(),
            Err(e) => {
                log::trace!("send to {} failed: {}", peer, e);
                false
            }
        }
    }

    fn max_frag_payload(&self) -> usize {
        self.max_datagram
    }

    fn set_receive_handler(&self, handler: ReceiveHandler) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn peer_id(&self) -> String {
        format!("udp-{}", self.local)
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    pairing: Arc<Pairing>,
    handler: Arc<RwLock<Option<ReceiveHandler>>>,
) {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                // ICMP port-unreachable surfaces here on some platforms
                log::debug!("UDP receive error: {}", e);
                continue;
            }
        };
        let datagram = &buf[..n];

        if let Some(control) = Control::decode(datagram) {
            if let Some(reply) = pairing.on_control(control, from) {
                if let Err(e) = socket.send_to(&reply.encode(), from).await {
                    log::warn!("Failed to answer {}: {}", from, e);
                }
            }
            continue;
        }
        if pairing.paired_peer() != Some(from) {
            log::trace!("Dropping {} bytes from unpaired {}", n, from);
            continue;
        }
        let h = handler.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(h) = h {
            h(datagram);
        }
    }
}
