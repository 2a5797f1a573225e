/*! fences_and_passes is the synchronization and command-encoding core of a
GPU backend driver.

It sits between two worlds that disagree about time: host code that wants to
read and write persistently mapped buffer memory *now*, and an asynchronous
GPU command stream whose work completes whenever the device gets around to
it.  The crate's job is to let both proceed without the CPU ever observing
or clobbering bytes the GPU still owns, and without stalling more than the
actually-conflicting byte ranges require.

# What lives here

* **Fence-tracked buffers** ([`buffers`]): every buffer carries a
  range-based registry of outstanding GPU fences.  Reads and writes consult
  it and wait on exactly the fences whose ranges they intersect.  Readbacks
  after a flush additionally wait on a single-slot flush fence so they see
  the flushed writes.  Views handed to callers are reference-counted
  ([`buffers::span::PinnedSpan`]); deleting a buffer never invalidates a
  live view.
* **Pass sequencing** ([`encoding`]): callers ask for draws, dispatches and
  blits without caring about pass boundaries.  The
  [`Pipeline`](encoding::pipeline::Pipeline) keeps exactly one encoding pass
  open at a time, closes and reopens passes as the requested work changes
  type, and rotates command buffers at flush boundaries, checkpointing bound
  pipeline state across the rotation.
* **A backend seam** ([`imp`]): the native device, fences, command buffers
  and encoder-state manager are traits.  [`imp::soft`] is a deterministic
  software backend used by the crate's own tests.

[`Engine`] is the facade tying the two cores together into the surface the
rest of a driver calls.

# Threading

One logical submission thread drives encoding, flushes and presentation.
Buffer holders are independently thread-safe and may be read/written from
any thread; they are the only cross-thread surface.  All waits are real
blocking waits on GPU-signaled fences; there are no timeouts and no
cancellation at this layer.
*/

logwise::declare_logging_domain!();

pub mod buffers;
pub mod encoding;
mod engine;
pub mod imp;
pub mod sync;

pub use engine::Engine;
