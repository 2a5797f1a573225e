// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Software reference backend.

Implements the whole backend surface over host memory.  Fences are plain
condvars that tests signal by hand (or that submission signals immediately
when the pool is constructed with `auto_signal`), buffer copies execute at
encode time, and every pool/encoder interaction is appended to an event log
that tests assert against.
*/

use crate::buffers::span::MappedStorage;
use crate::encoding::pass::PassKind;
use crate::imp::{
    BlitEncoder, CommandBuffer, CommandBufferPool, CommandBufferScoped, ComputeEncoder, Device,
    DeviceBuffer, DeviceBufferRef, EncoderStateManager, FenceRef, FlushObserver, GpuFence,
    RenderEncoder,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// A fence signaled from the CPU.
pub struct SoftFence {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl SoftFence {
    pub fn new() -> Arc<Self> {
        Arc::new(SoftFence {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    pub fn signal(&self) {
        *self.signaled.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

impl GpuFence for SoftFence {
    fn wait(&self) {
        let mut signaled = self.signaled.lock().unwrap();
        while !*signaled {
            signaled = self.cond.wait(signaled).unwrap();
        }
    }

    fn is_signaled(&self) -> bool {
        *self.signaled.lock().unwrap()
    }
}

impl std::fmt::Debug for SoftFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftFence")
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

/// A "native" buffer backed by a host arena (or nothing, for device-local
/// allocations).
pub struct SoftDeviceBuffer {
    len: u64,
    storage: Option<Arc<MappedStorage>>,
    label: String,
}

impl DeviceBuffer for SoftDeviceBuffer {
    fn len(&self) -> u64 {
        self.len
    }

    fn host_mapping(&self) -> Option<Arc<MappedStorage>> {
        self.storage.clone()
    }

    fn label(&self) -> &str {
        &self.label
    }
}

/// Allocates [`SoftDeviceBuffer`]s.  Tests can force allocation failure.
pub struct SoftDevice {
    fail_allocations: AtomicBool,
}

impl SoftDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(SoftDevice {
            fail_allocations: AtomicBool::new(false),
        })
    }

    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::Relaxed);
    }

    /// Allocates a buffer with no host mapping, as a discrete-memory device
    /// would for device-local storage.
    pub fn allocate_device_local(&self, size: u64, label: &str) -> DeviceBufferRef {
        Arc::new(SoftDeviceBuffer {
            len: size,
            storage: None,
            label: label.to_string(),
        })
    }
}

impl Device for SoftDevice {
    fn allocate_host_visible_buffer(&self, size: u64, label: &str) -> Option<DeviceBufferRef> {
        if self.fail_allocations.load(Ordering::Relaxed) {
            return None;
        }
        Some(Arc::new(SoftDeviceBuffer {
            len: size,
            storage: Some(MappedStorage::zeroed(size)),
            label: label.to_string(),
        }))
    }
}

/// One entry in the backend's event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoftEvent {
    Rent { slot: usize },
    Submit { slot: usize },
    BeginPass(PassKind),
    EndPass(PassKind),
    Draw { vertices: u32, instances: u32 },
    Dispatch { workgroups: [u32; 3] },
    CopyBuffer { src: String, dst: String, len: u64 },
    Barrier(PassKind),
    Present { slot: usize },
}

struct RentedSlot {
    fence: Arc<SoftFence>,
    references: Vec<DeviceBufferRef>,
}

struct InFlight {
    fence: Arc<SoftFence>,
    //held so deferred destruction is deferred until completion
    #[allow(dead_code)]
    references: Vec<DeviceBufferRef>,
}

struct PoolShared {
    auto_signal: bool,
    next_slot: AtomicUsize,
    events: Mutex<Vec<SoftEvent>>,
    rented: Mutex<HashMap<usize, RentedSlot>>,
    in_flight: Mutex<Vec<InFlight>>,
}

impl PoolShared {
    fn log(&self, event: SoftEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Rotating command buffer pool over [`SoftCommandBuffer`]s.
///
/// With `auto_signal` set, submission signals the command buffer's fence
/// immediately, modeling a device that completes work as fast as it is
/// submitted.  Without it, tests drive completion through
/// [`Self::complete_submitted`].
pub struct SoftCommandBufferPool {
    shared: Arc<PoolShared>,
}

impl SoftCommandBufferPool {
    pub fn new(auto_signal: bool) -> Arc<Self> {
        Arc::new(SoftCommandBufferPool {
            shared: Arc::new(PoolShared {
                auto_signal,
                next_slot: AtomicUsize::new(0),
                events: Mutex::new(Vec::new()),
                rented: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(Vec::new()),
            }),
        })
    }

    /// A copy of the event log.
    pub fn events(&self) -> Vec<SoftEvent> {
        self.shared.events.lock().unwrap().clone()
    }

    /// Drains and returns the event log.
    pub fn take_events(&self) -> Vec<SoftEvent> {
        std::mem::take(&mut *self.shared.events.lock().unwrap())
    }

    /// Signals every submitted-but-incomplete fence and releases the buffer
    /// references those submissions held.
    pub fn complete_submitted(&self) {
        let drained: Vec<InFlight> = self.shared.in_flight.lock().unwrap().drain(..).collect();
        for submission in &drained {
            submission.fence.signal();
        }
    }

    fn rent_slot(&self) -> CommandBufferScoped {
        let slot = self.shared.next_slot.fetch_add(1, Ordering::Relaxed);
        let fence = SoftFence::new();
        self.shared.rented.lock().unwrap().insert(
            slot,
            RentedSlot {
                fence: fence.clone(),
                references: Vec::new(),
            },
        );
        self.shared.log(SoftEvent::Rent { slot });
        CommandBufferScoped {
            command_buffer: Box::new(SoftCommandBuffer {
                slot,
                fence,
                shared: self.shared.clone(),
            }),
            slot,
        }
    }
}

impl CommandBufferPool for SoftCommandBufferPool {
    fn rent(&self) -> CommandBufferScoped {
        self.rent_slot()
    }

    fn return_and_rent(&self, current: CommandBufferScoped) -> CommandBufferScoped {
        let rented = self.shared.rented.lock().unwrap().remove(&current.slot);
        let rented = rented.expect("returned a command buffer this pool did not rent");
        self.shared.log(SoftEvent::Submit { slot: current.slot });
        if self.shared.auto_signal {
            rented.fence.signal();
        } else {
            self.shared.in_flight.lock().unwrap().push(InFlight {
                fence: rented.fence,
                references: rented.references,
            });
        }
        drop(current);
        self.rent_slot()
    }

    fn has_unsubmitted_reference(&self, buffer: &DeviceBufferRef) -> bool {
        let rented = self.shared.rented.lock().unwrap();
        rented
            .values()
            .any(|slot| slot.references.iter().any(|r| Arc::ptr_eq(r, buffer)))
    }
}

struct SoftCommandBuffer {
    slot: usize,
    fence: Arc<SoftFence>,
    shared: Arc<PoolShared>,
}

impl CommandBuffer for SoftCommandBuffer {
    fn fence(&self) -> FenceRef {
        self.fence.clone()
    }

    fn add_reference(&self, buffer: &DeviceBufferRef) {
        let mut rented = self.shared.rented.lock().unwrap();
        if let Some(slot) = rented.get_mut(&self.slot) {
            slot.references.push(buffer.clone());
        }
    }

    fn begin_blit(&mut self) -> Box<dyn BlitEncoder> {
        self.shared.log(SoftEvent::BeginPass(PassKind::Blit));
        Box::new(SoftPassEncoder {
            kind: PassKind::Blit,
            shared: self.shared.clone(),
        })
    }

    fn begin_compute(&mut self) -> Box<dyn ComputeEncoder> {
        self.shared.log(SoftEvent::BeginPass(PassKind::Compute));
        Box::new(SoftPassEncoder {
            kind: PassKind::Compute,
            shared: self.shared.clone(),
        })
    }

    fn begin_render(&mut self) -> Box<dyn RenderEncoder> {
        self.shared.log(SoftEvent::BeginPass(PassKind::Render));
        Box::new(SoftPassEncoder {
            kind: PassKind::Render,
            shared: self.shared.clone(),
        })
    }

    fn present(&mut self) {
        self.shared.log(SoftEvent::Present { slot: self.slot });
    }
}

struct SoftPassEncoder {
    kind: PassKind,
    shared: Arc<PoolShared>,
}

impl BlitEncoder for SoftPassEncoder {
    fn copy_buffer(
        &mut self,
        src: &DeviceBufferRef,
        src_offset: u64,
        dst: &DeviceBufferRef,
        dst_offset: u64,
        len: u64,
    ) {
        //execute immediately; completion is still reported through the fence
        if let (Some(src_storage), Some(dst_storage)) = (src.host_mapping(), dst.host_mapping()) {
            let mut bytes = vec![0u8; len as usize];
            //safety: the core's fence discipline serialized this range
            unsafe {
                src_storage.read_into(src_offset, &mut bytes);
                dst_storage.write(dst_offset, &bytes);
            }
        }
        self.shared.log(SoftEvent::CopyBuffer {
            src: src.label().to_string(),
            dst: dst.label().to_string(),
            len,
        });
    }

    fn barrier(&mut self) {
        self.shared.log(SoftEvent::Barrier(self.kind));
    }

    fn end_encoding(&mut self) {
        self.shared.log(SoftEvent::EndPass(self.kind));
    }
}

impl ComputeEncoder for SoftPassEncoder {
    fn dispatch(&mut self, workgroups: [u32; 3]) {
        self.shared.log(SoftEvent::Dispatch { workgroups });
    }

    fn barrier(&mut self) {
        self.shared.log(SoftEvent::Barrier(self.kind));
    }

    fn end_encoding(&mut self) {
        self.shared.log(SoftEvent::EndPass(self.kind));
    }
}

impl RenderEncoder for SoftPassEncoder {
    fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.shared.log(SoftEvent::Draw {
            vertices: vertex_count,
            instances: instance_count,
        });
    }

    fn barrier(&mut self) {
        self.shared.log(SoftEvent::Barrier(self.kind));
    }

    fn end_encoding(&mut self) {
        self.shared.log(SoftEvent::EndPass(self.kind));
    }
}

/// Records checkpoint/rebind traffic so tests can verify the flush
/// round-trip and pass-boundary rebinding.
///
/// "Bound state" is just a string description; this manager is an opaque
/// sink as far as the core is concerned.
#[derive(Clone)]
pub struct SoftStateManager {
    inner: Arc<Mutex<StateInner>>,
}

#[derive(Default)]
struct StateInner {
    bound: String,
    saved: Vec<String>,
    render_rebinds: usize,
    compute_rebinds: usize,
}

impl SoftStateManager {
    pub fn new() -> Self {
        SoftStateManager {
            inner: Arc::new(Mutex::new(StateInner::default())),
        }
    }

    /// Stand-in for the per-feature update calls a real state manager has.
    pub fn bind(&self, description: &str) {
        self.inner.lock().unwrap().bound = description.to_string();
    }

    pub fn bound(&self) -> String {
        self.inner.lock().unwrap().bound.clone()
    }

    pub fn render_rebinds(&self) -> usize {
        self.inner.lock().unwrap().render_rebinds
    }

    pub fn compute_rebinds(&self) -> usize {
        self.inner.lock().unwrap().compute_rebinds
    }
}

impl EncoderStateManager for SoftStateManager {
    fn save_state(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        let bound = inner.bound.clone();
        inner.saved.push(bound);
    }

    fn save_and_reset_state(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        let bound = std::mem::take(&mut inner.bound);
        inner.saved.push(bound);
    }

    fn restore_state(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(saved) = inner.saved.pop() {
            inner.bound = saved;
        }
    }

    fn rebind_render(&mut self, _encoder: &mut dyn RenderEncoder) {
        self.inner.lock().unwrap().render_rebinds += 1;
    }

    fn rebind_compute(&mut self, _encoder: &mut dyn ComputeEncoder) {
        self.inner.lock().unwrap().compute_rebinds += 1;
    }
}

/// Counts flush notifications.
#[derive(Clone)]
pub struct SoftFlushObserver {
    count: Arc<AtomicUsize>,
}

impl SoftFlushObserver {
    pub fn new() -> Self {
        SoftFlushObserver {
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn flush_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl FlushObserver for SoftFlushObserver {
    fn flushed(&mut self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
