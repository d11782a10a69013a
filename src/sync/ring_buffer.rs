//! Bounded ring buffer connecting one producer to one consumer
//!
//! The producer fills the slot returned by [`RingBuffer::current_head`] in
//! place and publishes it with [`RingBuffer::advance_head`]; the consumer
//! receives published slots in order from [`RingBuffer::advance_tail`]. Slots
//! are reused, never reallocated, so large payloads (octrees, message
//! buffers) keep their allocations across frames.
//!
//! One slot is always held back for the consumer's current element and one
//! for the producer's head, so a ring of capacity `n` holds at most `n - 2`
//! published elements.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

/// Smallest allowed ring capacity
pub const MIN_RING_CAPACITY: usize = 3;

#[derive(Debug, Default)]
struct Cursors {
    head: u64,
    tail: u64,
    released: bool,
}

pub struct RingBuffer<T> {
    slots: Box<[Mutex<T>]>,
    cursors: Mutex<Cursors>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T: Default> RingBuffer<T> {
    /// Panics if `capacity < 3`
    pub fn new(capacity: usize) -> Self {
        Self::from_fn(capacity, |_| T::default())
    }
}

impl<T> RingBuffer<T> {
    /// Ring whose slot `i` starts as `init(i)`; panics if `capacity < 3`
    pub fn from_fn(capacity: usize, init: impl FnMut(usize) -> T) -> Self {
        assert!(
            capacity >= MIN_RING_CAPACITY,
            "ring buffer capacity must be at least {}, got {}",
            MIN_RING_CAPACITY,
            capacity
        );
        let slots: Vec<Mutex<T>> = (0..capacity).map(init).map(Mutex::new).collect();
        Self {
            slots: slots.into_boxed_slice(),
            cursors: Mutex::new(Cursors::default()),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Published elements not yet consumed
    pub fn len(&self) -> usize {
        let c = self.lock_cursors();
        (c.head - c.tail) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let c = self.lock_cursors();
        self.full(&c)
    }

    pub fn is_released(&self) -> bool {
        self.lock_cursors().released
    }

    /// The slot the producer is filling
    pub fn current_head(&self) -> MutexGuard<'_, T> {
        let head = self.lock_cursors().head;
        self.lock_slot(head)
    }

    /// Publish the head slot, waiting while the ring is full
    ///
    /// Returns `false` (publishing nothing) once the ring is released.
    pub fn advance_head(&self) -> bool {
        let c = self.lock_cursors();
        let mut c = self
            .not_full
            .wait_while(c, |c| !c.released && self.full(c))
            .unwrap_or_else(PoisonError::into_inner);
        if c.released {
            return false;
        }
        c.head += 1;
        self.not_empty.notify_one();
        true
    }

    /// Publish the head slot if there is room; never waits
    pub fn try_advance_head(&self) -> bool {
        let mut c = self.lock_cursors();
        if c.released || self.full(&c) {
            return false;
        }
        c.head += 1;
        self.not_empty.notify_one();
        true
    }

    /// Take the oldest published slot, waiting while the ring is empty
    ///
    /// Returns `None` once the ring is released.
    pub fn advance_tail(&self) -> Option<MutexGuard<'_, T>> {
        let c = self.lock_cursors();
        let c = self
            .not_empty
            .wait_while(c, |c| !c.released && c.head == c.tail)
            .unwrap_or_else(PoisonError::into_inner);
        self.take_tail(c)
    }

    /// [`RingBuffer::advance_tail`] giving up after `timeout`
    pub fn advance_tail_timeout(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        let c = self.lock_cursors();
        let (c, _) = self
            .not_empty
            .wait_timeout_while(c, timeout, |c| !c.released && c.head == c.tail)
            .unwrap_or_else(PoisonError::into_inner);
        self.take_tail(c)
    }

    /// The oldest published slot, without consuming it; never waits
    pub fn peek_tail(&self) -> Option<MutexGuard<'_, T>> {
        let c = self.lock_cursors();
        if c.released || c.head == c.tail {
            return None;
        }
        let index = (c.tail % self.slots.len() as u64) as usize;
        drop(c);
        match self.slots[index].try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Wake every waiter; all later waits return immediately
    pub fn release(&self) {
        let mut c = self.lock_cursors();
        if !c.released {
            c.released = true;
            log::trace!("ring buffer released at head {} tail {}", c.head, c.tail);
        }
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Drop every published element
    pub fn reset(&self) {
        let mut c = self.lock_cursors();
        c.head = 0;
        c.tail = 0;
        self.not_full.notify_all();
    }

    fn full(&self, c: &Cursors) -> bool {
        c.head - c.tail >= self.slots.len() as u64 - 2
    }

    fn take_tail(&self, mut c: MutexGuard<'_, Cursors>) -> Option<MutexGuard<'_, T>> {
        if c.released || c.head == c.tail {
            return None;
        }
        let tail = c.tail;
        c.tail += 1;
        self.not_full.notify_one();
        drop(c);
        Some(self.lock_slot(tail))
    }

    fn lock_cursors(&self) -> MutexGuard<'_, Cursors> {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_slot(&self, cursor: u64) -> MutexGuard<'_, T> {
        let index = (cursor % self.slots.len() as u64) as usize;
        self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = self.lock_cursors();
        f.debug_struct("RingBuffer")
            .field("capacity", &self.slots.len())
            .field("head", &c.head)
            .field("tail", &c.tail)
            .field("released", &c.released)
            .finish()
    }
}
