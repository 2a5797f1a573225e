// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Host-mapped storage and reference-counted views over it.

A [`MappedStorage`] is the owned arena backing a persistently mapped buffer.
Views hand out offset+length index pairs into it rather than raw pointer
arithmetic, and every view is bounds-checked against the arena length at
construction.
*/

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The owned backing arena for one host-visible buffer.
///
/// The storage address is stable for the object's lifetime.  Interior
/// mutability is required because the GPU (and CPU writers on other threads)
/// mutate the contents while readers hold views; the fence registry and the
/// buffer holder's locking discipline are what keep overlapping accesses
/// exclusive.
pub struct MappedStorage {
    bytes: UnsafeCell<Box<[u8]>>,
    pins: AtomicUsize,
}

//safety: all access to `bytes` goes through the holder's fence/lock
//discipline; the type itself is just an arena.
unsafe impl Send for MappedStorage {}
unsafe impl Sync for MappedStorage {}

impl MappedStorage {
    pub fn zeroed(len: u64) -> Arc<Self> {
        Arc::new(MappedStorage {
            bytes: UnsafeCell::new(vec![0u8; len as usize].into_boxed_slice()),
            pins: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> u64 {
        //safety: the length of the arena never changes
        unsafe { (&*self.bytes.get()).len() as u64 }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of outstanding pinned views.
    pub fn pins(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    /// Copies `out.len()` bytes out of the arena at `offset`.
    ///
    /// # Safety
    /// The caller must guarantee no conflicting write overlaps the range for
    /// the duration of the copy.
    pub(crate) unsafe fn read_into(&self, offset: u64, out: &mut [u8]) {
        let offset = offset as usize;
        assert!(
            offset + out.len() <= self.len() as usize,
            "read out of bounds"
        );
        let bytes = unsafe { &*self.bytes.get() };
        out.copy_from_slice(&bytes[offset..offset + out.len()]);
    }

    /// Copies `data` into the arena at `offset`.
    ///
    /// # Safety
    /// The caller must hold the write side of the owning holder's access
    /// discipline for `offset..offset+data.len()`: no live GPU fence may
    /// cover the range and no reader may hold an overlapping view.
    pub(crate) unsafe fn write(&self, offset: u64, data: &[u8]) {
        let offset = offset as usize;
        assert!(
            offset + data.len() <= self.len() as usize,
            "write out of bounds"
        );
        let bytes = unsafe { &mut *self.bytes.get() };
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }
}

impl std::fmt::Debug for MappedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedStorage")
            .field("len", &self.len())
            .field("pins", &self.pins())
            .finish()
    }
}

/// A transient, reference-counted view over a sub-range of mapped memory.
///
/// Holding one pins the storage: the arena cannot be torn down underneath
/// the view even if the owning buffer is deleted, because the span keeps the
/// arena alive and the pin count records the outstanding borrow.
#[derive(Debug)]
pub struct PinnedSpan {
    storage: Arc<MappedStorage>,
    offset: usize,
    len: usize,
}

impl PinnedSpan {
    /// Bounds-checks the view and increments the pin count.
    pub(crate) fn new(storage: Arc<MappedStorage>, offset: u64, len: u64) -> Self {
        assert!(
            offset + len <= storage.len(),
            "view out of bounds: {offset}+{len} > {storage_len}",
            storage_len = storage.len()
        );
        storage.pins.fetch_add(1, Ordering::AcqRel);
        PinnedSpan {
            storage,
            offset: offset as usize,
            len: len as usize,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Deref for PinnedSpan {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        //safety: the fence/lock discipline guarantees no conflicting write
        //overlaps this range while the view is outstanding
        unsafe { &(&*self.storage.bytes.get())[self.offset..self.offset + self.len] }
    }
}

impl Drop for PinnedSpan {
    fn drop(&mut self) {
        self.storage.pins.fetch_sub(1, Ordering::AcqRel);
    }
}
