//! Hello/ack handshake that fixes the remote address of a transport

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Notify;

use voxlink::{Error, Result};

/// Prefix of every control datagram
pub const MAGIC: [u8; 8] = *b"VXLKPAIR";

/// Length of a control datagram
pub const CONTROL_LEN: usize = MAGIC.len() + 4;

/// Handshake datagrams
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Hello,
    Ack,
}

impl Control {
    fn code(self) -> u32 {
        match self {
            Control::Hello => 1,
            Control::Ack => 2,
        }
    }

    pub fn encode(self) -> [u8; CONTROL_LEN] {
        let mut out = [0u8; CONTROL_LEN];
        out[..MAGIC.len()].copy_from_slice(&MAGIC);
        out[MAGIC.len()..].copy_from_slice(&self.code().to_le_bytes());
        out
    }

    /// `None` for anything that is not exactly a control datagram
    pub fn decode(datagram: &[u8]) -> Option<Self> {
        if datagram.len() != CONTROL_LEN || datagram[..MAGIC.len()] != MAGIC {
            return None;
        }
        let mut code = [0u8; 4];
        code.copy_from_slice(&datagram[MAGIC.len()..]);
        match u32::from_le_bytes(code) {
            1 => Some(Control::Hello),
            2 => Some(Control::Ack),
            _ => None,
        }
    }
}

/// Who we are paired with
///
/// A side that never initiates adopts the first peer that says hello.
#[derive(Default)]
pub struct Pairing {
    peer: Mutex<Option<SocketAddr>>,
    paired: AtomicBool,
    changed: Notify,
}

impl Pairing {
    pub fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The peer, once the handshake completed
    pub fn paired_peer(&self) -> Option<SocketAddr> {
        if self.is_paired() { self.peer() } else { None }
    }

    pub fn is_paired(&self) -> bool {
        self.paired.load(Ordering::Acquire)
    }

    /// Start pairing with `peer`, forgetting any previous one
    pub fn begin(&self, peer: SocketAddr) {
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = Some(peer);
        self.paired.store(false, Ordering::Release);
    }

    /// Apply a control datagram from `from`; returns the reply to send
    pub fn on_control(&self, control: Control, from: SocketAddr) -> Option<Control> {
        let mut peer = self.peer.lock().unwrap_or_else(PoisonError::into_inner);
        match *peer {
            Some(p) if p != from => {
                log::debug!("Ignoring {:?} from {}, pairing with {}", control, from, p);
                return None;
            }
            None if control == Control::Ack => return None,
            _ => {}
        }
        if !self.paired.swap(true, Ordering::AcqRel) {
            log::info!("Paired with {}", from);
        }
        *peer = Some(from);
        self.changed.notify_one();
        (control == Control::Hello).then_some(Control::Ack)
    }

    async fn wait_paired(&self, timeout: Duration) -> bool {
        let wait = async {
            while !self.is_paired() {
                self.changed.notified().await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

/// Say hello to `peer` every `poll` until it answers
///
/// Gives up with [`Error::Pairing`] after `max_attempts` hellos, if set.
pub async fn pair(
    socket: &UdpSocket,
    pairing: &Pairing,
    peer: SocketAddr,
    poll: Duration,
    max_attempts: Option<u32>,
) -> Result<()> {
    pairing.begin(peer);
    let hello = Control::Hello.encode();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        socket.send_to(&hello, peer).await?;
        if pairing.wait_paired(poll).await {
            log::debug!("Handshake with {} took {} attempts", peer, attempts);
            return Ok(());
        }
        if max_attempts.is_some_and(|max| attempts >= max) {
            return Err(Error::Pairing {
                peer: peer.to_string(),
                attempts,
            });
        }
        log::info!("Waiting for {} (attempt {})", peer, attempts);
    }
}
