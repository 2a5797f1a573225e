// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Single-slot flush fence.

When a flush submits GPU work that wrote a buffer, the buffer remembers the
submission's fence here.  A later readback waits on the slot before it looks
at mapped memory, so it can never observe bytes from before the flushed
write.

The slot is an explicit state machine rather than ad-hoc counters, so the
"last waiter releases the fence" rule is a structural invariant:

* `Idle`: no flush outstanding; waits return immediately.
* `Pending`: a fence is installed; waiters register and block on it.
* `Draining`: the fence has been observed signaled; late arrivals no longer
  conflict, but the fence is only released once the waiter count reaches
  zero.

Releasing a fence means dropping the slot's [`FenceRef`] clone; the backend
pool reclaims the fence once the last reference is gone.
*/

use crate::imp::FenceRef;
use std::sync::{Arc, Condvar, Mutex};

enum SlotState {
    Idle,
    Pending { fence: FenceRef, waiters: usize },
    Draining { fence: FenceRef, waiters: usize },
}

impl SlotState {
    fn waiters(&self) -> usize {
        match self {
            SlotState::Idle => 0,
            SlotState::Pending { waiters, .. } | SlotState::Draining { waiters, .. } => *waiters,
        }
    }
}

pub struct FlushFence {
    state: Mutex<SlotState>,
    drained: Condvar,
}

impl FlushFence {
    pub fn new() -> Self {
        FlushFence {
            state: Mutex::new(SlotState::Idle),
            drained: Condvar::new(),
        }
    }

    /// True if a flush fence is installed and a reader must go through
    /// [`Self::wait`] before touching mapped memory.
    pub fn is_pending(&self) -> bool {
        !matches!(*self.state.lock().unwrap(), SlotState::Idle)
    }

    /// Installs `fence` as the current flush fence.
    ///
    /// Only the submission thread installs fences, and only at a flush
    /// boundary.  If the previous fence still has registered waiters we block
    /// until they drain, so the waiter count always describes exactly one
    /// fence.  A waiterless previous fence is simply replaced (its release is
    /// the drop of our clone).
    pub fn install(&self, fence: FenceRef) {
        let mut state = self.state.lock().unwrap();
        while state.waiters() != 0 {
            state = self.drained.wait(state).unwrap();
        }
        *state = SlotState::Pending { fence, waiters: 0 };
    }

    /// Blocks until the installed fence (if any) has signaled.
    ///
    /// The actual fence wait happens outside the slot lock; concurrent
    /// waiters share it through the waiter count.  The waiter that brings the
    /// count back to zero retires the slot to `Idle`, releasing the fence.
    pub fn wait(&self) {
        let fence = {
            let mut state = self.state.lock().unwrap();
            match &mut *state {
                SlotState::Idle => return,
                SlotState::Pending { fence, waiters } | SlotState::Draining { fence, waiters } => {
                    *waiters += 1;
                    fence.clone()
                }
            }
        };
        fence.wait();
        let mut state = self.state.lock().unwrap();
        *state = match std::mem::replace(&mut *state, SlotState::Idle) {
            //cleared while we waited; nothing left to retire
            SlotState::Idle => SlotState::Idle,
            SlotState::Pending { fence: current, waiters } => {
                Self::retire(current, waiters, &fence)
            }
            SlotState::Draining { fence: current, waiters } => {
                Self::retire(current, waiters, &fence)
            }
        };
        if state.waiters() == 0 {
            self.drained.notify_all();
        }
    }

    /// Drops any installed fence.  Outstanding waiters keep their own clones,
    /// so they still observe the signal; they just find the slot already
    /// idle when they return.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        *state = SlotState::Idle;
        self.drained.notify_all();
    }

    fn retire(current: FenceRef, waiters: usize, observed: &FenceRef) -> SlotState {
        if !Arc::ptr_eq(&current, observed) {
            //a different fence was installed after ours was cleared;
            //our registration does not apply to it
            return SlotState::Pending {
                fence: current,
                waiters,
            };
        }
        let waiters = waiters - 1;
        if waiters == 0 {
            SlotState::Idle
        } else {
            SlotState::Draining {
                fence: current,
                waiters,
            }
        }
    }
}

impl std::fmt::Debug for FlushFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        let name = match *state {
            SlotState::Idle => "Idle",
            SlotState::Pending { .. } => "Pending",
            SlotState::Draining { .. } => "Draining",
        };
        f.debug_struct("FlushFence")
            .field("state", &name)
            .field("waiters", &state.waiters())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::FlushFence;
    use crate::imp::soft::SoftFence;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn idle_wait_returns_immediately() {
        let slot = FlushFence::new();
        assert!(!slot.is_pending());
        slot.wait();
    }

    #[test]
    fn last_waiter_retires_the_slot() {
        let slot = Arc::new(FlushFence::new());
        let fence = SoftFence::new();
        slot.install(fence.clone());
        assert!(slot.is_pending());

        let finished = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::new();
        for _ in 0..4 {
            let slot = slot.clone();
            let finished = finished.clone();
            threads.push(std::thread::spawn(move || {
                slot.wait();
                finished.fetch_add(1, Ordering::SeqCst);
            }));
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(finished.load(Ordering::SeqCst), 0, "waiters ran early");
        fence.signal();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(finished.load(Ordering::SeqCst), 4);
        //the last waiter out turned off the light
        assert!(!slot.is_pending());
    }

    #[test]
    fn install_replaces_a_waiterless_fence() {
        let slot = FlushFence::new();
        let first = SoftFence::new();
        let second = SoftFence::new();
        slot.install(first);
        slot.install(second.clone());
        second.signal();
        slot.wait();
        assert!(!slot.is_pending());
    }

    #[test]
    fn clear_releases_without_a_wait() {
        let slot = FlushFence::new();
        slot.install(SoftFence::new());
        slot.clear();
        assert!(!slot.is_pending());
        slot.wait();
    }
}
