// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
CPU/GPU synchronization primitives.

Everything in here is driven by [fences](crate::imp::GpuFence) the backend
signals when submitted work completes.  The two pieces are:

* [`FenceRegistry`](fence_registry::FenceRegistry): per-buffer, range-based
  tracking of outstanding GPU work, so CPU accesses only stall on the
  sub-ranges they actually touch.
* [`FlushFence`](flush_fence::FlushFence): a single-slot fence used to make
  a readback wait for the flush that preceded it.
*/

pub mod fence_registry;
pub mod flush_fence;

/// True if the two half-open byte ranges share at least one byte.
pub(crate) fn ranges_intersect(a: &std::ops::Range<u64>, b: &std::ops::Range<u64>) -> bool {
    !a.is_empty() && !b.is_empty() && a.start < b.end && b.start < a.end
}

#[cfg(test)]
mod tests {
    use super::ranges_intersect;

    #[test]
    fn intersection() {
        assert!(ranges_intersect(&(0..4), &(3..5)));
        assert!(ranges_intersect(&(3..5), &(0..4)));
        assert!(!ranges_intersect(&(0..4), &(4..8)));
        //empty ranges never intersect, on either side
        assert!(!ranges_intersect(&(4..4), &(0..8)));
        assert!(!ranges_intersect(&(0..8), &(4..4)));
    }
}
