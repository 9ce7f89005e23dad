use std::alloc::Layout;

use crate::state::try_state;

// Byte accounting feeds the auto-collect trigger; a thread whose state is
// already torn down simply stops counting.

#[inline]
pub(crate) fn record_allocation(layout: Layout) {
    let _ = try_state(|state| state.record_allocation(layout));
}

#[inline]
pub(crate) fn record_deallocation(layout: Layout) {
    let _ = try_state(|state| state.record_deallocation(layout));
}
