//! Ring buffer with a dedicated consumer thread

use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::core::types::Result;
use crate::sync::ring_buffer::RingBuffer;

/// Runs `handler` on every element published into its ring, on its own thread
///
/// The worker stops when the ring is released. [`BufferProcessor::release`]
/// and `Drop` release the ring and join the worker, so a handler must return
/// promptly. A panicking handler ends the worker; the panic is logged when
/// the worker is joined.
pub struct BufferProcessor<T: Send + 'static> {
    name: String,
    ring: Arc<RingBuffer<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + Default + 'static> BufferProcessor<T> {
    pub fn new<F>(name: &str, capacity: usize, handler: F) -> Result<Self>
    where
        F: FnMut(&mut T) + Send + 'static,
    {
        Self::with_ring(name, Arc::new(RingBuffer::new(capacity)), handler)
    }
}

impl<T: Send + 'static> BufferProcessor<T> {
    /// Consume an existing ring, e.g. one built with [`RingBuffer::from_fn`]
    pub fn with_ring<F>(name: &str, ring: Arc<RingBuffer<T>>, mut handler: F) -> Result<Self>
    where
        F: FnMut(&mut T) + Send + 'static,
    {
        let worker_ring = ring.clone();
        let worker_name = name.to_string();
        let worker = thread::Builder::new().name(name.to_string()).spawn(move || {
            log::debug!("{} worker started", worker_name);
            while let Some(mut slot) = worker_ring.advance_tail() {
                handler(&mut slot);
            }
            log::debug!("{} worker stopped", worker_name);
        })?;

        Ok(Self {
            name: name.to_string(),
            ring,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the underlying ring
    pub fn ring(&self) -> Arc<RingBuffer<T>> {
        self.ring.clone()
    }

    /// Release the ring and join the worker
    ///
    /// Idempotent. Called from the worker itself (inside the handler) it only
    /// releases; the worker then exits after the handler returns.
    pub fn release(&self) {
        self.ring.release();
        let handle = {
            let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            match worker.as_ref() {
                Some(h) if h.thread().id() == thread::current().id() => return,
                _ => worker.take(),
            }
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("{} worker panicked", self.name);
            }
        }
    }

    /// Whether the worker thread is still running
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl<T: Send + 'static> Deref for BufferProcessor<T> {
    type Target = RingBuffer<T>;

    fn deref(&self) -> &RingBuffer<T> {
        &self.ring
    }
}

impl<T: Send + 'static> Drop for BufferProcessor<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Send + 'static> std::fmt::Debug for BufferProcessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferProcessor")
            .field("name", &self.name)
            .field("ring", &self.ring)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_handler_sees_every_element() {
        let (tx, rx) = mpsc::channel();
        let proc = BufferProcessor::<u32>::new("test-sum", 4, move |v| {
            tx.send(*v).unwrap();
        })
        .unwrap();

        for i in 1..=50 {
            *proc.current_head() = i;
            assert!(proc.advance_head());
        }
        let got: Vec<u32> = (0..50).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
        assert_eq!(got, (1..=50).collect::<Vec<_>>());
        proc.release();
        assert!(!proc.is_running());
    }

    #[test]
    fn test_release_stops_worker_and_is_idempotent() {
        let proc = BufferProcessor::<u8>::new("test-idle", 3, |_| {}).unwrap();
        assert!(proc.is_running());
        proc.release();
        proc.release();
        assert!(!proc.is_running());
        assert!(!proc.advance_head());
    }

    #[test]
    fn test_drop_joins_worker() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let count = count.clone();
            let proc = BufferProcessor::<u8>::new("test-drop", 3, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
            assert!(proc.advance_head());
            while !proc.is_empty() {
                thread::sleep(Duration::from_millis(1));
            }
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        crate::core::logging::init_for_tests();
        let proc = BufferProcessor::<u8>::new("test-panic", 3, |_| panic!("boom")).unwrap();
        assert!(proc.advance_head());
        for _ in 0..500 {
            if !proc.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(!proc.is_running());
        proc.release();
    }

    #[test]
    fn test_release_from_handler() {
        let slot: Arc<Mutex<Option<Arc<BufferProcessor<u8>>>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let proc = Arc::new(
            BufferProcessor::<u8>::new("test-self-release", 3, move |_| {
                if let Some(p) = inner.lock().unwrap().take() {
                    p.release();
                }
            })
            .unwrap(),
        );
        *slot.lock().unwrap() = Some(proc.clone());
        assert!(proc.advance_head());
        for _ in 0..500 {
            if proc.is_released() && !proc.is_running() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(proc.is_released());
        proc.release();
    }
}
