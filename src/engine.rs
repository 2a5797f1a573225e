// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The driver facade.

Ties the buffer registry and the pass state machine together and exposes the
surface the rest of a graphics driver calls: buffer
create/delete/read/write/copy, pass-scoped draw/dispatch/barrier, flush and
present.

Encoding operations take `&mut self` because the pass machine belongs to a
single submission thread.  Buffer reads and writes take `&self` and may be
issued from any thread, through the holders the registry hands out.
*/

use crate::buffers::holder::{AccessError, BufferHolder};
use crate::buffers::registry::{BufferHandle, BufferRegistry};
use crate::buffers::span::PinnedSpan;
use crate::encoding::pipeline::Pipeline;
use crate::imp::{CommandBufferPool, Device, EncoderStateManager, FlushObserver};
use std::sync::Arc;

pub struct Engine {
    buffers: BufferRegistry,
    pipeline: Pipeline,
    //holders written by GPU work in the current command buffer; they get
    //the submission fence as their flush fence at the next flush
    written_this_segment: Vec<Arc<BufferHolder>>,
}

impl Engine {
    pub fn new(
        device: Arc<dyn Device>,
        pool: Arc<dyn CommandBufferPool>,
        state: Box<dyn EncoderStateManager>,
        observer: Box<dyn FlushObserver>,
    ) -> Self {
        Engine {
            buffers: BufferRegistry::new(device, pool.clone()),
            pipeline: Pipeline::new(pool, state, observer),
            written_this_segment: Vec::new(),
        }
    }

    pub fn buffers(&self) -> &BufferRegistry {
        &self.buffers
    }

    // Buffer surface.  Thread-safe via the registry and holders.

    pub fn create_buffer(&self, size: u64) -> Option<BufferHandle> {
        self.buffers.create(size)
    }

    pub fn delete_buffer(&self, handle: BufferHandle) {
        self.buffers.delete(handle);
    }

    pub fn read_buffer(
        &self,
        handle: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<PinnedSpan, AccessError> {
        let holder = self
            .buffers
            .holder(handle)
            .ok_or(AccessError::UnknownHandle(handle.raw()))?;
        holder.read(offset, size)
    }

    pub fn write_buffer(&self, handle: BufferHandle, offset: u64, data: &[u8]) {
        match self.buffers.holder(handle) {
            Some(holder) => holder.write(offset, data),
            None => {
                logwise::trace_sync!(
                    "write to unknown buffer handle {handle}",
                    handle = handle.raw()
                );
            }
        }
    }

    pub fn write_buffer_unchecked(&self, handle: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(holder) = self.buffers.holder(handle) {
            holder.write_unchecked(offset, data);
        }
    }

    // Encoding surface.  Submission thread only.

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.pipeline.draw(vertex_count, instance_count);
    }

    pub fn dispatch(&mut self, workgroups: [u32; 3]) {
        self.pipeline.dispatch(workgroups);
    }

    pub fn barrier(&mut self) {
        self.pipeline.barrier();
    }

    /// Copies between two registered buffers through the command stream.
    ///
    /// Records fence usage for both ranges against the current command
    /// buffer, so CPU accesses overlapping them wait for this copy to
    /// complete on the device.  Stale handles no-op.
    pub fn copy_buffer(
        &mut self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        len: u64,
    ) {
        let (Some(src_holder), Some(dst_holder)) =
            (self.buffers.holder(src), self.buffers.holder(dst))
        else {
            logwise::trace_sync!("copy with stale buffer handle; ignoring");
            return;
        };
        let len = len
            .min(src_holder.len().saturating_sub(src_offset))
            .min(dst_holder.len().saturating_sub(dst_offset));
        if len == 0 {
            return;
        }
        self.pipeline.copy_buffer(
            src_holder.device_buffer(),
            src_offset,
            dst_holder.device_buffer(),
            dst_offset,
            len,
        );
        let fence = self.pipeline.current_fence();
        src_holder.record_fence_usage(src_offset..src_offset + len, fence.clone(), false);
        dst_holder.record_fence_usage(dst_offset..dst_offset + len, fence, true);
        dst_holder.signal_write(dst_offset..dst_offset + len);
        self.written_this_segment.push(dst_holder);
    }

    /// Ends the open pass, submits the current command buffer, and rotates
    /// in a fresh one.  Buffers the segment wrote get the submission fence
    /// installed as their flush fence, so readbacks issued after this flush
    /// observe the flushed writes.
    pub fn flush(&mut self) {
        let fence = self.pipeline.flush();
        for holder in self.written_this_segment.drain(..) {
            holder.set_flush_fence(fence.clone());
        }
    }

    /// Presents and rotates.  The pending-readback bookkeeping is settled
    /// the same way as [`Self::flush`], against the segment being submitted.
    pub fn present(&mut self) {
        let fence = self.pipeline.current_fence();
        self.pipeline.present();
        for holder in self.written_this_segment.drain(..) {
            holder.set_flush_fence(fence.clone());
        }
    }

    pub fn pipeline(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("buffers", &self.buffers)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
