//! Process-local handle identifiers.
//!
//! Two independent monotonic counters, one per handle kind. Ids start at 1;
//! 0 is reserved to mean "no handle" and is skipped if a counter ever wraps.

use std::sync::atomic::{AtomicU32, Ordering};

static STATE_IDS: AtomicU32 = AtomicU32::new(1);
static TRANSACTION_IDS: AtomicU32 = AtomicU32::new(1);

fn next_id(counter: &AtomicU32) -> u32 {
    loop {
        let id = counter.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

pub(crate) fn next_state_id() -> u32 {
    next_id(&STATE_IDS)
}

pub(crate) fn next_transaction_id() -> u32 {
    next_id(&TRANSACTION_IDS)
}
