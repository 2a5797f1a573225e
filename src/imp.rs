// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Backend abstraction.

The core never talks to a native GPU API directly.  Everything it needs from
the native layer (device allocation, fences, command buffers, encoding
passes, pipeline-state rebinding) is expressed here as traits, and the
driver above us supplies implementations for its platform.

The [`soft`] module is the crate's reference backend: a software
implementation over host memory with manually signaled fences.  It exists so
the core's synchronization and pass-sequencing semantics can be exercised
deterministically without GPU hardware, and it is what the crate's own tests
run against.
*/

pub mod soft;

use crate::buffers::span::MappedStorage;
use std::sync::Arc;

/// A GPU completion fence.
///
/// Waits are real blocking waits with no timeout: a hung fence is a fatal
/// condition for the process, and no retry policy exists at this layer.
/// Release back to the backend's fence pool is reference-counted: dropping
/// the last [`FenceRef`] clone is the release, and is only reachable once
/// every waiter has observed the signal.
pub trait GpuFence: Send + Sync {
    /// Blocks the calling thread until the fence signals.
    fn wait(&self);
    /// Non-blocking signal check.
    fn is_signaled(&self) -> bool;
}

pub type FenceRef = Arc<dyn GpuFence>;

/// A native GPU buffer with deferred-destruction semantics.
///
/// Shared ownership models the deferral: the holder keeps one reference and
/// every command buffer that encodes against the buffer keeps another, so
/// the native object is only freed once no unsubmitted or in-flight work can
/// still touch it.
pub trait DeviceBuffer: Send + Sync {
    fn len(&self) -> u64;
    /// The persistent host mapping, absent for device-local buffers.
    ///
    /// Once established, the mapping never changes for the buffer's
    /// lifetime.
    fn host_mapping(&self) -> Option<Arc<MappedStorage>>;
    fn label(&self) -> &str;
}

pub type DeviceBufferRef = Arc<dyn DeviceBuffer>;

/// The native device, reduced to the one operation this core needs from it.
pub trait Device: Send + Sync {
    /// Returns `None` on allocation failure; out-of-memory is an expected,
    /// recoverable condition at this layer.
    fn allocate_host_visible_buffer(&self, size: u64, label: &str) -> Option<DeviceBufferRef>;
}

/// Blit (transfer) pass encoder.
pub trait BlitEncoder {
    fn copy_buffer(
        &mut self,
        src: &DeviceBufferRef,
        src_offset: u64,
        dst: &DeviceBufferRef,
        dst_offset: u64,
        len: u64,
    );
    fn barrier(&mut self);
    /// Explicit end-of-encoding; must be called exactly once, in the order
    /// the pass was opened.
    fn end_encoding(&mut self);
}

/// Compute pass encoder.
pub trait ComputeEncoder {
    fn dispatch(&mut self, workgroups: [u32; 3]);
    fn barrier(&mut self);
    fn end_encoding(&mut self);
}

/// Render pass encoder.
pub trait RenderEncoder {
    fn draw(&mut self, vertex_count: u32, instance_count: u32);
    fn barrier(&mut self);
    fn end_encoding(&mut self);
}

/// One rented command buffer.
///
/// The native layer does not retain encoder state across pass boundaries;
/// re-binding after a `begin_*` is the state manager's job.
pub trait CommandBuffer {
    /// The fence that will signal when this command buffer's submission
    /// completes on the device.
    fn fence(&self) -> FenceRef;
    /// Marks `buffer` as referenced by not-yet-submitted work, pinning it
    /// for deferred destruction and making it visible to
    /// [`CommandBufferPool::has_unsubmitted_reference`].
    fn add_reference(&self, buffer: &DeviceBufferRef);
    fn begin_blit(&mut self) -> Box<dyn BlitEncoder>;
    fn begin_compute(&mut self) -> Box<dyn ComputeEncoder>;
    fn begin_render(&mut self) -> Box<dyn RenderEncoder>;
    /// Issues the present request.  Only legal with no pass open.
    fn present(&mut self);
}

/// A rented command buffer plus the pool slot it came from.
///
/// Owned by the pass state machine for exactly the span between one flush
/// and the next, then handed back whole.
pub struct CommandBufferScoped {
    pub command_buffer: Box<dyn CommandBuffer>,
    pub slot: usize,
}

impl std::fmt::Debug for CommandBufferScoped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBufferScoped")
            .field("slot", &self.slot)
            .finish()
    }
}

/// Rotating pool of command buffers.
///
/// Exclusively owned and driven by the single submission thread, except for
/// [`Self::has_unsubmitted_reference`] which buffer writers on other threads
/// consult.
pub trait CommandBufferPool: Send + Sync {
    fn rent(&self) -> CommandBufferScoped;
    /// Submits `current` for device execution and rents a replacement.  This
    /// is the only point at which work reaches the device.
    fn return_and_rent(&self, current: CommandBufferScoped) -> CommandBufferScoped;
    /// True if `buffer` has been referenced by a rented command buffer that
    /// has not yet been submitted.
    fn has_unsubmitted_reference(&self, buffer: &DeviceBufferRef) -> bool;
}

/// The external encoder-state manager.
///
/// Tracks bound pipeline state (programs, textures, vertex/blend/depth
/// state, viewports) on behalf of the pass machine; this core treats it as
/// an opaque sink and only tells it *when* to checkpoint and re-bind.
pub trait EncoderStateManager {
    fn save_state(&mut self);
    fn save_and_reset_state(&mut self);
    fn restore_state(&mut self);
    /// Re-binds the full render state onto a freshly opened render pass.
    fn rebind_render(&mut self, encoder: &mut dyn RenderEncoder);
    /// Re-binds compute-only state onto a freshly opened compute pass.
    fn rebind_compute(&mut self, encoder: &mut dyn ComputeEncoder);
}

/// Notified after every flush, for external sync-point accounting.
pub trait FlushObserver {
    fn flushed(&mut self);
}
