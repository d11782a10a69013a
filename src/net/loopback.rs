//! In-process transport pair with fault injection

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;

use crate::core::types::Result;
use crate::net::transport::{ReceiveHandler, Transport};

/// Deliberate damage applied to outgoing datagrams
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Faults {
    /// Drop every n-th datagram (0 disables)
    pub drop_every: u64,
    /// Deliver datagrams in swapped pairs
    pub swap_pairs: bool,
}

/// One end of a [`LoopbackTransport::pair`]
///
/// Datagrams are delivered in order on a per-endpoint thread, unless
/// [`Faults`] say otherwise.
pub struct LoopbackTransport {
    name: String,
    outbox: Mutex<Sender<Vec<u8>>>,
    handler: Arc<RwLock<Option<ReceiveHandler>>>,
    paired: AtomicBool,
    max_datagram: usize,
    faults: Mutex<Faults>,
    held: Mutex<Option<Vec<u8>>>,
    sent: AtomicU64,
}

impl LoopbackTransport {
    /// Two connected endpoints accepting datagrams of up to `max_datagram`
    /// bytes
    pub fn pair(max_datagram: usize) -> Result<(Arc<Self>, Arc<Self>)> {
        let (a_tx, a_rx) = mpsc::channel::<Vec<u8>>();
        let (b_tx, b_rx) = mpsc::channel::<Vec<u8>>();

        let a = Arc::new(Self::endpoint("loop-a", b_tx, max_datagram));
        let b = Arc::new(Self::endpoint("loop-b", a_tx, max_datagram));

        for (end, rx) in [(&a, a_rx), (&b, b_rx)] {
            let handler = end.handler.clone();
            thread::Builder::new()
                .name(format!("{}-rx", end.name))
                .spawn(move || {
                    for datagram in rx {
                        let h = handler.read().unwrap_or_else(PoisonError::into_inner).clone();
                        if let Some(h) = h {
                            h(&datagram);
                        }
                    }
                })?;
        }
        Ok((a, b))
    }

    fn endpoint(name: &str, outbox: Sender<Vec<u8>>, max_datagram: usize) -> Self {
        Self {
            name: name.to_string(),
            outbox: Mutex::new(outbox),
            handler: Arc::new(RwLock::new(None)),
            paired: AtomicBool::new(true),
            max_datagram,
            faults: Mutex::new(Faults::default()),
            held: Mutex::new(None),
            sent: AtomicU64::new(0),
        }
    }

    pub fn set_faults(&self, faults: Faults) {
        *self.faults.lock().unwrap_or_else(PoisonError::into_inner) = faults;
    }

    /// Simulate losing the peer; sends fail until the next pairing
    pub fn disconnect(&self) {
        self.paired.store(false, Ordering::Release);
    }

    /// Datagrams accepted by `send_to_peer`
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    fn post(&self, datagram: Vec<u8>) -> bool {
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(datagram)
            .is_ok()
    }
}

impl Transport for LoopbackTransport {
    fn connect_and_pair(&self, address: &str) -> bool {
        log::debug!("{}: loopback pairing with '{}'", self.name, address);
        self.paired.store(true, Ordering::Release);
        true
    }

    fn is_paired(&self) -> bool {
        self.paired.load(Ordering::Acquire)
    }

    fn send_to_peer(&self, datagram: &[u8]) -> bool {
        if !self.is_paired() || datagram.len() > self.max_datagram {
            return false;
        }
        let n = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        let faults = *self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        if faults.drop_every > 0 && n % faults.drop_every == 0 {
            log::trace!("{}: dropping datagram {}", self.name, n);
            return true;
        }
        if faults.swap_pairs {
            let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
            return match held.take() {
                None => {
                    *held = Some(datagram.to_vec());
                    true
                }
                Some(first) => self.post(datagram.to_vec()) && self.post(first),
            };
        }
        self.post(datagram.to_vec())
    }

    fn max_frag_payload(&self) -> usize {
        self.max_datagram
    }

    fn set_receive_handler(&self, handler: ReceiveHandler) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn peer_id(&self) -> String {
        self.name.clone()
    }
}
