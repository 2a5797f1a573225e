// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Range-based fence tracking for a single buffer.

Each record says "the GPU work guarded by this fence reads (or writes) this
byte range".  CPU-side accesses consult the registry to decide whether they
can proceed immediately or must wait, and waits are scoped to the fences
whose ranges actually intersect the access.  Tracking at range granularity
avoids false stalls when disjoint sub-allocations of a large buffer are used
concurrently by unrelated draws.

Records are evicted lazily: every query prunes entries whose fence has
already signaled.
*/

use crate::imp::FenceRef;
use crate::sync::ranges_intersect;
use std::ops::Range;
use std::sync::Mutex;

struct FenceUse {
    range: Range<u64>,
    fence: FenceRef,
    is_write: bool,
}

/// Tracks which in-flight GPU submissions touch which sub-ranges of a buffer.
///
/// All methods are thread-safe.  Blocking waits never hold the internal lock,
/// so concurrent queries against other ranges proceed while a waiter sleeps.
pub struct FenceRegistry {
    uses: Mutex<Vec<FenceUse>>,
}

impl FenceRegistry {
    pub fn new() -> Self {
        FenceRegistry {
            uses: Mutex::new(Vec::new()),
        }
    }

    /// Records that `fence` must signal before `range` is safe to write
    /// (always) or read (when `is_write` is set).
    pub fn record_usage(&self, range: Range<u64>, fence: FenceRef, is_write: bool) {
        if range.is_empty() {
            return;
        }
        let mut uses = self.uses.lock().unwrap();
        Self::prune_signaled(&mut uses);
        uses.push(FenceUse {
            range,
            fence,
            is_write,
        });
    }

    /// Non-blocking check: does any live fence conflict with the requested
    /// access?
    ///
    /// A pending write conflicts with everything; a pending read only
    /// conflicts with a new write (write-after-read hazard).
    pub fn is_range_in_use(&self, range: &Range<u64>, for_write: bool) -> bool {
        if range.is_empty() {
            return false;
        }
        let mut uses = self.uses.lock().unwrap();
        Self::prune_signaled(&mut uses);
        uses.iter()
            .any(|u| (u.is_write || for_write) && ranges_intersect(&u.range, range))
    }

    /// Blocks until every live fence intersecting `range` has signaled, then
    /// evicts those records.
    pub fn wait_for_range(&self, range: &Range<u64>) {
        if range.is_empty() {
            return;
        }
        let pending: Vec<FenceRef> = {
            let mut uses = self.uses.lock().unwrap();
            Self::prune_signaled(&mut uses);
            uses.iter()
                .filter(|u| ranges_intersect(&u.range, range))
                .map(|u| u.fence.clone())
                .collect()
        };
        //wait with the lock released; other ranges stay usable meanwhile
        for fence in &pending {
            fence.wait();
        }
        let mut uses = self.uses.lock().unwrap();
        Self::prune_signaled(&mut uses);
    }

    /// Blocks until every live fence for the whole buffer has signaled.
    ///
    /// Waits on a snapshot of the registry; records added while we were
    /// waiting are not covered and must stay live afterwards.
    pub fn wait_all(&self) {
        let pending: Vec<FenceRef> = {
            let uses = self.uses.lock().unwrap();
            uses.iter().map(|u| u.fence.clone()).collect()
        };
        for fence in &pending {
            fence.wait();
        }
        let mut uses = self.uses.lock().unwrap();
        Self::prune_signaled(&mut uses);
    }

    /// Number of live (unsignaled) records.
    pub fn live_uses(&self) -> usize {
        let mut uses = self.uses.lock().unwrap();
        Self::prune_signaled(&mut uses);
        uses.len()
    }

    fn prune_signaled(uses: &mut Vec<FenceUse>) {
        uses.retain(|u| !u.fence.is_signaled());
    }
}

impl std::fmt::Debug for FenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let uses = self.uses.lock().unwrap();
        f.debug_struct("FenceRegistry")
            .field("uses", &uses.len())
            .finish()
    }
}
