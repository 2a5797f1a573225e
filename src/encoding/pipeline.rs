// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The pass state machine.

Owns the currently open command buffer, decides which encoding pass is open,
and coordinates with the encoder-state manager so bound pipeline state
survives pass boundaries and command-buffer rotations.

Driven by a single logical submission thread; nothing here is shared across
threads.
*/

use crate::encoding::pass::{EncoderState, PassKind};
use crate::imp::{
    CommandBufferPool, CommandBufferScoped, DeviceBufferRef, EncoderStateManager, FenceRef,
    FlushObserver,
};
use std::sync::Arc;

pub struct Pipeline {
    pool: Arc<dyn CommandBufferPool>,
    //always Some between public calls; Option only so rotation can take it
    current: Option<CommandBufferScoped>,
    encoder: EncoderState,
    state: Box<dyn EncoderStateManager>,
    observer: Box<dyn FlushObserver>,
}

impl Pipeline {
    pub fn new(
        pool: Arc<dyn CommandBufferPool>,
        state: Box<dyn EncoderStateManager>,
        observer: Box<dyn FlushObserver>,
    ) -> Self {
        let current = pool.rent();
        Pipeline {
            pool,
            current: Some(current),
            encoder: EncoderState::None,
            state,
            observer,
        }
    }

    /// The pass currently open, if any.
    pub fn pass_kind(&self) -> PassKind {
        self.encoder.kind()
    }

    /// The fence for the command buffer currently being encoded.  Work
    /// recorded now completes when this fence signals, after the next flush.
    pub fn current_fence(&self) -> FenceRef {
        self.current().command_buffer.fence()
    }

    /// Marks `buffer` as referenced by the current command buffer.
    pub fn reference_buffer(&self, buffer: &DeviceBufferRef) {
        self.current().command_buffer.add_reference(buffer);
    }

    /// Records a draw, opening (or reusing) a render pass.
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) {
        self.render_encoder().draw(vertex_count, instance_count);
    }

    /// Records a compute dispatch, opening (or reusing) a compute pass.
    pub fn dispatch(&mut self, workgroups: [u32; 3]) {
        self.compute_encoder().dispatch(workgroups);
    }

    /// Records a buffer-to-buffer copy, opening (or reusing) a blit pass.
    ///
    /// Both buffers are referenced by the current command buffer so neither
    /// can be destroyed while the copy is unsubmitted.
    pub fn copy_buffer(
        &mut self,
        src: &DeviceBufferRef,
        src_offset: u64,
        dst: &DeviceBufferRef,
        dst_offset: u64,
        len: u64,
    ) {
        self.reference_buffer(src);
        self.reference_buffer(dst);
        self.blit_encoder()
            .copy_buffer(src, src_offset, dst, dst_offset, len);
    }

    /// Records a memory barrier on the open pass, opening a blit pass if
    /// none is open.
    pub fn barrier(&mut self) {
        if matches!(self.encoder, EncoderState::None) {
            self.blit_encoder().barrier();
            return;
        }
        match &mut self.encoder {
            EncoderState::None => unreachable!("handled above"),
            EncoderState::Blit(e) => e.barrier(),
            EncoderState::Compute(e) => e.barrier(),
            EncoderState::Render(e) => e.barrier(),
        }
    }

    /// Ends the open pass, if any.  Idempotent.
    pub fn end_current_pass(&mut self) {
        match std::mem::replace(&mut self.encoder, EncoderState::None) {
            EncoderState::None => {}
            EncoderState::Blit(mut e) => e.end_encoding(),
            EncoderState::Compute(mut e) => e.end_encoding(),
            EncoderState::Render(mut e) => e.end_encoding(),
        }
    }

    /// Submits the current command buffer and rotates in a fresh one.
    ///
    /// Pipeline state is checkpointed around the rotation: saved before the
    /// pass ends, restored after, with actual re-binding deferred to the
    /// next pass open.  Returns the submission's fence so callers can make
    /// later readbacks wait on it.
    pub fn flush(&mut self) -> FenceRef {
        self.state.save_state();
        self.end_current_pass();
        let fence = self.current_fence();
        let previous = self.take_current();
        self.current = Some(self.pool.return_and_rent(previous));
        self.observer.flushed();
        self.state.restore_state();
        fence
    }

    /// Ends the open pass, presents against the now-closed command buffer,
    /// then performs the same rotation as [`Self::flush`].  Presentation is
    /// always followed by a fresh command buffer.
    pub fn present(&mut self) {
        self.end_current_pass();
        self.current_mut().command_buffer.present();
        let previous = self.take_current();
        self.current = Some(self.pool.return_and_rent(previous));
        self.observer.flushed();
    }

    /// Indirect draws are not implemented by this backend yet; the request
    /// is reported and dropped so the driver stays usable in degraded form.
    pub fn draw_indirect(&mut self, buffer: &DeviceBufferRef, offset: u64) {
        let _ = (buffer, offset);
        logwise::warn_sync!("indirect draw is not implemented; ignoring");
    }

    fn current(&self) -> &CommandBufferScoped {
        self.current.as_ref().expect("command buffer always rented")
    }

    fn current_mut(&mut self) -> &mut CommandBufferScoped {
        self.current.as_mut().expect("command buffer always rented")
    }

    fn take_current(&mut self) -> CommandBufferScoped {
        self.current.take().expect("command buffer always rented")
    }

    fn render_encoder(&mut self) -> &mut dyn crate::imp::RenderEncoder {
        if !matches!(self.encoder, EncoderState::Render(_)) {
            self.end_current_pass();
            let mut encoder = self.current_mut().command_buffer.begin_render();
            //the native layer retains nothing across pass boundaries
            self.state.rebind_render(encoder.as_mut());
            self.encoder = EncoderState::Render(encoder);
        }
        match &mut self.encoder {
            EncoderState::Render(e) => e.as_mut(),
            _ => unreachable!("just installed a render encoder"),
        }
    }

    fn compute_encoder(&mut self) -> &mut dyn crate::imp::ComputeEncoder {
        if !matches!(self.encoder, EncoderState::Compute(_)) {
            self.end_current_pass();
            let mut encoder = self.current_mut().command_buffer.begin_compute();
            self.state.rebind_compute(encoder.as_mut());
            self.encoder = EncoderState::Compute(encoder);
        }
        match &mut self.encoder {
            EncoderState::Compute(e) => e.as_mut(),
            _ => unreachable!("just installed a compute encoder"),
        }
    }

    fn blit_encoder(&mut self) -> &mut dyn crate::imp::BlitEncoder {
        if !matches!(self.encoder, EncoderState::Blit(_)) {
            self.end_current_pass();
            let encoder = self.current_mut().command_buffer.begin_blit();
            self.encoder = EncoderState::Blit(encoder);
        }
        match &mut self.encoder {
            EncoderState::Blit(e) => e.as_mut(),
            _ => unreachable!("just installed a blit encoder"),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("pass", &self.encoder.kind())
            .field("current", &self.current)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Pipeline;
    use crate::encoding::pass::PassKind;
    use crate::imp::soft::{SoftCommandBufferPool, SoftEvent, SoftFlushObserver, SoftStateManager};
    use std::sync::Arc;

    fn pipeline() -> (Arc<SoftCommandBufferPool>, SoftStateManager, SoftFlushObserver, Pipeline) {
        let pool = SoftCommandBufferPool::new(true);
        let state = SoftStateManager::new();
        let observer = SoftFlushObserver::new();
        let pipeline = Pipeline::new(
            pool.clone(),
            Box::new(state.clone()),
            Box::new(observer.clone()),
        );
        (pool, state, observer, pipeline)
    }

    #[test]
    fn same_pass_type_reuses_the_encoder() {
        let (pool, _state, _observer, mut pipeline) = pipeline();
        pool.take_events();
        pipeline.draw(3, 1);
        pipeline.draw(6, 1);
        assert_eq!(pipeline.pass_kind(), PassKind::Render);
        let begins = pool
            .events()
            .iter()
            .filter(|e| matches!(e, SoftEvent::BeginPass(PassKind::Render)))
            .count();
        assert_eq!(begins, 1);
    }

    #[test]
    fn switching_pass_type_ends_the_previous_pass() {
        let (pool, _state, _observer, mut pipeline) = pipeline();
        pool.take_events();
        pipeline.draw(3, 1);
        pipeline.dispatch([1, 1, 1]);
        assert_eq!(pipeline.pass_kind(), PassKind::Compute);
        let events = pool.events();
        let render_ends = events
            .iter()
            .filter(|e| matches!(e, SoftEvent::EndPass(PassKind::Render)))
            .count();
        assert_eq!(render_ends, 1, "exactly one end-encoding for the render pass");
        //and it happened before the compute pass opened
        let end_at = events
            .iter()
            .position(|e| matches!(e, SoftEvent::EndPass(PassKind::Render)))
            .unwrap();
        let begin_at = events
            .iter()
            .position(|e| matches!(e, SoftEvent::BeginPass(PassKind::Compute)))
            .unwrap();
        assert!(end_at < begin_at);
    }

    #[test]
    fn end_current_pass_is_idempotent() {
        let (pool, _state, _observer, mut pipeline) = pipeline();
        pool.take_events();
        pipeline.end_current_pass();
        pipeline.draw(3, 1);
        pipeline.end_current_pass();
        pipeline.end_current_pass();
        let ends = pool
            .events()
            .iter()
            .filter(|e| matches!(e, SoftEvent::EndPass(_)))
            .count();
        assert_eq!(ends, 1);
        assert_eq!(pipeline.pass_kind(), PassKind::None);
    }

    #[test]
    fn pass_opens_rebind_state() {
        let (_pool, state, _observer, mut pipeline) = pipeline();
        pipeline.draw(3, 1);
        assert_eq!(state.render_rebinds(), 1);
        pipeline.dispatch([1, 1, 1]);
        assert_eq!(state.compute_rebinds(), 1);
        //reopening render after the boundary rebinds again
        pipeline.draw(3, 1);
        assert_eq!(state.render_rebinds(), 2);
    }

    #[test]
    fn flush_rotates_and_restores_state() {
        let (pool, state, observer, mut pipeline) = pipeline();
        state.bind("render-pipeline-A");
        pipeline.draw(3, 1);
        let fence = pipeline.flush();
        assert!(fence.is_signaled(), "auto-signal pool completes on submit");
        assert_eq!(observer.flush_count(), 1);
        //the save/restore round trip leaves bound state untouched
        assert_eq!(state.bound(), "render-pipeline-A");
        assert_eq!(pipeline.pass_kind(), PassKind::None);
        let events = pool.events();
        let submits = events
            .iter()
            .filter(|e| matches!(e, SoftEvent::Submit { .. }))
            .count();
        let rents = events
            .iter()
            .filter(|e| matches!(e, SoftEvent::Rent { .. }))
            .count();
        assert_eq!(submits, 1);
        assert_eq!(rents, 2, "initial rent plus the rotation");
    }

    #[test]
    fn present_closes_the_pass_first() {
        let (pool, _state, _observer, mut pipeline) = pipeline();
        pool.take_events();
        pipeline.draw(3, 1);
        pipeline.present();
        let events = pool.events();
        let end_at = events
            .iter()
            .position(|e| matches!(e, SoftEvent::EndPass(PassKind::Render)))
            .unwrap();
        let present_at = events
            .iter()
            .position(|e| matches!(e, SoftEvent::Present { .. }))
            .unwrap();
        let submit_at = events
            .iter()
            .position(|e| matches!(e, SoftEvent::Submit { .. }))
            .unwrap();
        assert!(end_at < present_at);
        assert!(present_at < submit_at, "present lands before the rotation");
        assert_eq!(pipeline.pass_kind(), PassKind::None);
    }
}
