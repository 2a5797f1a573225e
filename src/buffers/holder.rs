// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
One persistently mapped GPU buffer and its synchronization state.

The holder owns the native buffer (deferred-destruction semantics via shared
ownership), the buffer's [`FenceRegistry`], and the single-slot
[`FlushFence`] used to make readbacks consistent with a preceding flush.

Thread safety: holders are the one structure in this crate designed for
cross-thread access.  Reads and writes may arrive from any thread; the pass
state machine and pool stay on the submission thread.

Locking discipline: ordinary accessors (readers and range writers) take the
shared side of `flush_rw`; the thread installing or clearing the flush fence
takes the exclusive side.  A reader that finds a flush fence installed
upgrades to exclusive, registers as a waiter, then waits on the fence with
no lock held so it cannot block other readers.
*/

use crate::buffers::span::{MappedStorage, PinnedSpan};
use crate::imp::{CommandBufferPool, DeviceBufferRef, FenceRef};
use crate::sync::fence_registry::FenceRegistry;
use crate::sync::flush_fence::FlushFence;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Errors for buffer holder accessors.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// Reading a buffer with no host mapping is a programmer error; fail
    /// loudly rather than return empty data.
    #[error("buffer '{0}' has no host mapping")]
    Unmapped(String),
    /// Lookups against a deleted or unknown handle; callers are expected to
    /// no-op on this.
    #[error("no buffer for handle {0}")]
    UnknownHandle(u64),
}

pub struct BufferHolder {
    size: u64,
    device_buffer: DeviceBufferRef,
    /// Present only for host-visible buffers; never changes once set.
    mapping: Option<Arc<MappedStorage>>,
    fences: FenceRegistry,
    flush_rw: RwLock<()>,
    flush_fence: FlushFence,
    pool: Arc<dyn CommandBufferPool>,
    /// Bumped by [`Self::signal_write`]; the hook collaborators use to
    /// invalidate cached derived representations of the contents.
    write_generation: AtomicU64,
    label: String,
}

impl BufferHolder {
    pub(crate) fn new(device_buffer: DeviceBufferRef, pool: Arc<dyn CommandBufferPool>) -> Self {
        let label = device_buffer.label().to_string();
        BufferHolder {
            size: device_buffer.len(),
            mapping: device_buffer.host_mapping(),
            device_buffer,
            fences: FenceRegistry::new(),
            flush_rw: RwLock::new(()),
            flush_fence: FlushFence::new(),
            pool,
            write_generation: AtomicU64::new(0),
            label,
        }
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn device_buffer(&self) -> &DeviceBufferRef {
        &self.device_buffer
    }

    /// Returns a reference-counted view of `size` bytes at `offset`,
    /// clamped to the buffer length.
    ///
    /// Waits for any pending flush fence first, so bytes written by GPU work
    /// submitted at the last flush are visible.  The view is pinned before
    /// the shared lock is released; the backing memory stays valid for the
    /// view's lifetime even if the buffer is deleted meanwhile.
    pub fn read(&self, offset: u64, size: u64) -> Result<PinnedSpan, AccessError> {
        let mut shared = self.flush_rw.read().unwrap();
        if self.flush_fence.is_pending() {
            drop(shared);
            {
                //upgrade: mutually exclusive with a concurrent install
                let _exclusive = self.flush_rw.write().unwrap();
            }
            //wait outside the lock so other readers are not blocked on us
            self.flush_fence.wait();
            //downgrade back to shared
            shared = self.flush_rw.read().unwrap();
        }
        let mapping = self
            .mapping
            .as_ref()
            .ok_or_else(|| AccessError::Unmapped(self.label.clone()))?;
        let len = size.min(self.size.saturating_sub(offset));
        let span = PinnedSpan::new(mapping.clone(), offset.min(self.size), len);
        drop(shared);
        Ok(span)
    }

    /// Writes `data` at `offset`, clamped to the buffer length; zero-length
    /// writes are a no-op.
    ///
    /// If the buffer is not host-mapped the write is a no-op at this layer
    /// (the device-side write path belongs to a collaborator).  Otherwise
    /// the write waits for exactly the fences overlapping the target range
    /// before touching mapped memory, then registers the range as freshly
    /// written.
    ///
    /// When the range is in conflicting use by a command buffer that has
    /// been rented but not submitted, we wait the conflict out and then
    /// write directly (rather than routing the update through the command
    /// stream).  See DESIGN.md for the policy discussion.
    pub fn write(&self, offset: u64, data: &[u8]) {
        let len = (data.len() as u64).min(self.size.saturating_sub(offset));
        if len == 0 {
            return;
        }
        let Some(mapping) = self.mapping.as_ref() else {
            logwise::debuginternal_sync!(
                "write to unmapped buffer '{label}' deferred to device-side path",
                label = self.label.clone()
            );
            return;
        };
        let range = offset..offset + len;
        let _shared = self.flush_rw.read().unwrap();
        if self.pool.has_unsubmitted_reference(&self.device_buffer)
            && self.fences.is_range_in_use(&range, true)
        {
            //if the conflicting fence belongs to the unsubmitted command
            //buffer, this wait only finishes after a flush submits it; the
            //submission thread must flush before writing such a range
            logwise::debuginternal_sync!(
                "buffer '{label}' range conflicts with unsubmitted work; waiting",
                label = self.label.clone()
            );
        }
        self.fences.wait_for_range(&range);
        //safety: every fence covering the range has signaled and we hold the
        //shared lock, so no flush-fence install races this copy
        unsafe { mapping.write(offset, &data[..len as usize]) };
        self.signal_write(range);
    }

    /// Writes with no fence or usage check; never blocks.
    ///
    /// Only sound for contents the caller knows are not concurrently read
    /// or written by the GPU, such as just-created buffers.
    pub fn write_unchecked(&self, offset: u64, data: &[u8]) {
        let len = (data.len() as u64).min(self.size.saturating_sub(offset));
        if len == 0 {
            return;
        }
        let Some(mapping) = self.mapping.as_ref() else {
            return;
        };
        //safety: caller guarantees no concurrent GPU access to the range
        unsafe { mapping.write(offset, &data[..len as usize]) };
    }

    /// Marks `range` as freshly written.
    ///
    /// Hook for collaborators that cache derived or converted
    /// representations of the contents; observing the generation tells them
    /// to invalidate.
    pub fn signal_write(&self, range: Range<u64>) {
        let _ = range;
        self.write_generation.fetch_add(1, Ordering::Release);
    }

    pub fn write_generation(&self) -> u64 {
        self.write_generation.load(Ordering::Acquire)
    }

    /// Records that submitted GPU work guarded by `fence` touches `range`.
    pub(crate) fn record_fence_usage(&self, range: Range<u64>, fence: FenceRef, is_write: bool) {
        self.fences.record_usage(range, fence, is_write);
    }

    /// Installs the flush fence a subsequent readback must wait on.
    ///
    /// Takes the exclusive side of the lock: mutually exclusive with every
    /// ordinary accessor.
    pub(crate) fn set_flush_fence(&self, fence: FenceRef) {
        let _exclusive = self.flush_rw.write().unwrap();
        self.flush_fence.install(fence);
    }

    /// Releases synchronization state ahead of destruction.
    ///
    /// The native buffer itself is destroyed whenever the last reference
    /// drops, which may be later than this call if a command buffer still
    /// holds one.
    pub(crate) fn dispose(&self) {
        self.flush_fence.clear();
        if let Some(mapping) = self.mapping.as_ref() {
            let outstanding = mapping.pins();
            if outstanding != 0 {
                logwise::warn_sync!(
                    "buffer '{label}' disposed with {pins} outstanding views; storage outlives the buffer",
                    label = self.label.clone(),
                    pins = outstanding
                );
            }
        }
    }
}

impl std::fmt::Debug for BufferHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHolder")
            .field("label", &self.label)
            .field("size", &self.size)
            .field("mapped", &self.mapping.is_some())
            .field("fences", &self.fences)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::BufferHolder;
    use crate::imp::soft::{SoftCommandBufferPool, SoftDevice, SoftFence};
    use crate::imp::{CommandBufferPool, Device};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn holder(size: u64) -> BufferHolder {
        let device = SoftDevice::new();
        let pool: Arc<dyn CommandBufferPool> = SoftCommandBufferPool::new(true);
        let buffer = device
            .allocate_host_visible_buffer(size, "test")
            .expect("allocation");
        BufferHolder::new(buffer, pool)
    }

    #[test]
    fn write_then_read_round_trips() {
        let holder = holder(256);
        holder.write_unchecked(0, &[0xAA; 256]);
        let all = holder.read(0, 256).unwrap();
        assert!(all.iter().all(|&b| b == 0xAA));
        drop(all);

        holder.write(64, &[0xBB; 16]);
        let window = holder.read(60, 24).unwrap();
        assert_eq!(&window[..4], &[0xAA; 4]);
        assert_eq!(&window[4..20], &[0xBB; 16]);
        assert_eq!(&window[20..], &[0xAA; 4]);
    }

    #[test]
    fn reads_and_writes_clamp_to_length() {
        let holder = holder(16);
        //write past the end: only the in-range prefix lands
        holder.write(8, &[1u8; 64]);
        let span = holder.read(8, 64).unwrap();
        assert_eq!(span.len(), 8);
        assert!(span.iter().all(|&b| b == 1));
        //entirely out of range
        let empty = holder.read(32, 4).unwrap();
        assert!(empty.is_empty());
        holder.write(32, &[2u8; 4]); //no-op
    }

    #[test]
    fn unmapped_read_fails_loudly() {
        let device = SoftDevice::new();
        let pool: Arc<dyn CommandBufferPool> = SoftCommandBufferPool::new(true);
        let holder = BufferHolder::new(device.allocate_device_local(64, "private"), pool);
        assert!(holder.read(0, 64).is_err());
        //writes are a no-op at this layer, not a fault
        holder.write(0, &[1, 2, 3]);
    }

    #[test]
    fn write_unchecked_ignores_outstanding_fences() {
        let holder = holder(64);
        let fence = SoftFence::new();
        holder.record_fence_usage(0..64, fence.clone(), true);
        //would deadlock if any safety check consulted the registry
        holder.write_unchecked(0, &[7u8; 64]);
        fence.signal();
        let span = holder.read(0, 64).unwrap();
        assert!(span.iter().all(|&b| b == 7));
    }

    #[test]
    fn write_waits_for_overlapping_fences_only() {
        let holder = Arc::new(holder(128));
        let blocking = SoftFence::new();
        holder.record_fence_usage(0..32, blocking.clone(), true);

        //disjoint range proceeds immediately
        holder.write(64, &[3u8; 16]);

        let wrote = Arc::new(AtomicBool::new(false));
        let thread = {
            let holder = holder.clone();
            let wrote = wrote.clone();
            std::thread::spawn(move || {
                holder.write(16, &[9u8; 16]);
                wrote.store(true, Ordering::SeqCst);
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!wrote.load(Ordering::SeqCst), "write skipped the fence");
        blocking.signal();
        thread.join().unwrap();
        assert!(wrote.load(Ordering::SeqCst));
        let span = holder.read(16, 16).unwrap();
        assert!(span.iter().all(|&b| b == 9));
    }

    #[test]
    fn read_waits_for_the_flush_fence() {
        let holder = Arc::new(holder(32));
        holder.write_unchecked(0, &[5u8; 32]);
        let fence = SoftFence::new();
        holder.set_flush_fence(fence.clone());

        let done = Arc::new(AtomicBool::new(false));
        let thread = {
            let holder = holder.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let span = holder.read(0, 32).unwrap();
                assert!(span.iter().all(|&b| b == 5));
                done.store(true, Ordering::SeqCst);
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(!done.load(Ordering::SeqCst), "read skipped the flush fence");
        fence.signal();
        thread.join().unwrap();
    }

    #[test]
    fn signal_write_bumps_the_generation() {
        let holder = holder(16);
        let before = holder.write_generation();
        holder.write(0, &[1]);
        assert!(holder.write_generation() > before);
    }
}
