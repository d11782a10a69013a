//! Slot pool with epoch-checked handles
//!
//! Slots are handed out in order and never individually freed. `reset()`
//! recycles every slot at once, keeps the memory, and bumps the epoch so
//! handles issued before the reset stop resolving.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Reference to a pool slot, valid for one epoch
pub struct Handle<T> {
    index: u32,
    epoch: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    fn new(index: u32, epoch: u32) -> Self {
        Self {
            index,
            epoch,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.epoch == other.epoch
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.epoch.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}@{})", self.index, self.epoch)
    }
}

/// Growable arena of `T` slots
#[derive(Clone, Debug)]
pub struct Pool<T> {
    slots: Vec<T>,
    head: usize,
    grow_size: usize,
    epoch: u32,
}

impl<T: Default> Pool<T> {
    /// Pre-allocate `initial` slots; grow by `grow_size` (at least one) when
    /// they run out
    pub fn new(initial: usize, grow_size: usize) -> Self {
        let mut slots = Vec::with_capacity(initial);
        slots.resize_with(initial, T::default);
        Self {
            slots,
            head: 0,
            grow_size: grow_size.max(1),
            epoch: 0,
        }
    }

    /// Hand out the next free slot, reinitialised to `T::default()`
    pub fn get_next(&mut self) -> Handle<T> {
        let index = self.alloc();
        Handle::new(index, self.epoch)
    }

    pub(crate) fn alloc(&mut self) -> u32 {
        if self.head == self.slots.len() {
            let grown = self.slots.len() + self.grow_size;
            log::trace!("Pool growing {} -> {} slots", self.slots.len(), grown);
            self.slots.resize_with(grown, T::default);
        } else {
            self.slots[self.head] = T::default();
        }
        let index = self.head as u32;
        self.head += 1;
        index
    }
}

impl<T> Pool<T> {
    /// Recycle every slot; outstanding handles become stale
    pub fn reset(&mut self) {
        self.head = 0;
        self.epoch = self.epoch.wrapping_add(1);
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        if handle.epoch != self.epoch || handle.index as usize >= self.head {
            return None;
        }
        self.slots.get(handle.index as usize)
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if handle.epoch != self.epoch || handle.index as usize >= self.head {
            return None;
        }
        self.slots.get_mut(handle.index as usize)
    }

    /// Slots handed out since the last reset
    pub fn len(&self) -> usize {
        self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == 0
    }

    /// Slots currently backed by memory
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Live slots in allocation order
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.slots[..self.head].iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.slots[..self.head].iter_mut()
    }

    pub(crate) fn handle_for(&self, index: u32) -> Handle<T> {
        Handle::new(index, self.epoch)
    }

    #[inline]
    pub(crate) fn at(&self, index: u32) -> &T {
        &self.slots[index as usize]
    }

    #[inline]
    pub(crate) fn at_mut(&mut self, index: u32) -> &mut T {
        &mut self.slots[index as usize]
    }
}
