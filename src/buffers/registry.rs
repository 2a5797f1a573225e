// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Opaque-handle table of buffer holders.

Handles are 64-bit, allocated monotonically, and never reused: a deleted
handle keeps reporting "not found" forever, so a stale handle can never
resolve to a different buffer that later landed in the same table slot.
*/

use crate::buffers::holder::BufferHolder;
use crate::imp::{CommandBufferPool, Device, DeviceBufferRef};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Opaque, stable identifier for a registered buffer.
///
/// Carries no ownership; used only for lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(u64);

impl BufferHandle {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

pub struct BufferRegistry {
    device: Arc<dyn Device>,
    pool: Arc<dyn CommandBufferPool>,
    buffers: Mutex<HashMap<u64, Arc<BufferHolder>>>,
    //starts at 1; handle ids are never reused
    next_id: AtomicU64,
    created_total: AtomicU64,
}

impl BufferRegistry {
    pub fn new(device: Arc<dyn Device>, pool: Arc<dyn CommandBufferPool>) -> Self {
        BufferRegistry {
            device,
            pool,
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            created_total: AtomicU64::new(0),
        }
    }

    /// Requests a host-visible allocation of `size` bytes.
    ///
    /// Returns `None` on allocation failure, with a diagnostic; allocation
    /// failure is an expected condition, not a fault.  Zero-size requests
    /// are rejected the same way.
    pub fn create(&self, size: u64) -> Option<BufferHandle> {
        if size == 0 {
            logwise::error_sync!("rejecting zero-size buffer allocation");
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let label = format!("buffer#{id}");
        let Some(device_buffer) = self.device.allocate_host_visible_buffer(size, &label) else {
            logwise::error_sync!(
                "device refused a {size} byte host-visible allocation",
                size = size
            );
            return None;
        };
        let holder = Arc::new(BufferHolder::new(device_buffer, self.pool.clone()));
        self.buffers.lock().unwrap().insert(id, holder);
        self.created_total.fetch_add(1, Ordering::Relaxed);
        Some(BufferHandle(id))
    }

    /// Looks up the native buffer for device-side encoding.
    ///
    /// Stale handles fail silently with `None`.  With `is_write` set, the
    /// holder is proactively told the range is about to be written
    /// (conservative invalidation ahead of the actual encoding).
    pub fn get(
        &self,
        handle: BufferHandle,
        offset: u64,
        size: u64,
        is_write: bool,
    ) -> Option<DeviceBufferRef> {
        let holder = self.holder(handle)?;
        if is_write {
            let end = (offset + size).min(holder.len());
            holder.signal_write(offset.min(holder.len())..end);
        }
        Some(holder.device_buffer().clone())
    }

    /// The holder itself; this is the surface other threads read and write
    /// through.
    pub fn holder(&self, handle: BufferHandle) -> Option<Arc<BufferHolder>> {
        self.buffers.lock().unwrap().get(&handle.0).cloned()
    }

    /// Disposes the holder and removes it from the table.  Stale handles
    /// no-op.
    pub fn delete(&self, handle: BufferHandle) {
        let removed = self.buffers.lock().unwrap().remove(&handle.0);
        match removed {
            Some(holder) => holder.dispose(),
            None => {
                logwise::trace_sync!(
                    "delete of unknown buffer handle {handle}",
                    handle = handle.0
                );
            }
        }
    }

    /// Buffers currently registered.
    pub fn live_count(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    /// Buffers ever created through this registry.
    pub fn created_total(&self) -> u64 {
        self.created_total.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for BufferRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferRegistry")
            .field("live", &self.live_count())
            .field("created_total", &self.created_total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::BufferRegistry;
    use crate::imp::soft::{SoftCommandBufferPool, SoftDevice};
    use std::sync::Arc;

    fn registry() -> (Arc<SoftDevice>, BufferRegistry) {
        let device = SoftDevice::new();
        let pool = SoftCommandBufferPool::new(true);
        (device.clone(), BufferRegistry::new(device, pool))
    }

    #[test]
    fn create_and_lookup() {
        let (_device, registry) = registry();
        let handle = registry.create(128).expect("create");
        assert_eq!(registry.live_count(), 1);
        let buffer = registry.get(handle, 0, 128, false).expect("get");
        assert_eq!(buffer.len(), 128);
    }

    #[test]
    fn zero_size_create_is_an_allocation_failure() {
        let (_device, registry) = registry();
        assert!(registry.create(0).is_none());
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.created_total(), 0);
    }

    #[test]
    fn allocation_failure_reports_none() {
        let (device, registry) = registry();
        device.set_fail_allocations(true);
        assert!(registry.create(64).is_none());
        device.set_fail_allocations(false);
        assert!(registry.create(64).is_some());
        assert_eq!(registry.created_total(), 1);
    }

    #[test]
    fn deleted_handles_never_resolve_again() {
        let (_device, registry) = registry();
        let first = registry.create(32).expect("create");
        registry.delete(first);
        assert!(registry.get(first, 0, 32, false).is_none());
        //a later creation must not be reachable through the stale handle
        let second = registry.create(32).expect("create");
        assert_ne!(first, second);
        assert!(registry.get(first, 0, 32, false).is_none());
        assert!(registry.get(second, 0, 32, false).is_some());
        //deleting twice is a silent no-op
        registry.delete(first);
    }

    #[test]
    fn write_lookup_signals_the_holder() {
        let (_device, registry) = registry();
        let handle = registry.create(64).expect("create");
        let holder = registry.holder(handle).expect("holder");
        let before = holder.write_generation();
        registry.get(handle, 0, 64, true);
        assert!(holder.write_generation() > before);
        registry.get(handle, 0, 64, false);
        assert_eq!(holder.write_generation(), before + 1);
    }
}
