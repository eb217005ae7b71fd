//! Process-wide finished-callback registry.
//!
//! Players register their callback under a monotonically assigned 64-bit id.
//! The render thread only ever captures the id; delivery looks the id up
//! again on the host thread. A player freed (or re-registered) between the
//! render thread's notification and delivery simply misses the lookup, so
//! the user closure is never invoked for a dead registration.
//!
//! Dispatch holds the global table lock only for the lookup; the closure
//! runs under its own entry lock, so callbacks may re-enter the engine API
//! (including freeing the very player that finished).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

pub(crate) type FinishedFn = Box<dyn FnMut() + Send>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn table() -> &'static Mutex<HashMap<u64, Arc<Mutex<FinishedFn>>>> {
    static TABLE: OnceLock<Mutex<HashMap<u64, Arc<Mutex<FinishedFn>>>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a callback and mint its id. Ids are never reused.
pub(crate) fn register(callback: FinishedFn) -> u64 {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    table().lock().unwrap().insert(id, Arc::new(Mutex::new(callback)));
    id
}

/// Retire a registration. Id 0 means "no registration" and is ignored.
pub(crate) fn retire(id: u64) {
    if id != 0 {
        table().lock().unwrap().remove(&id);
    }
}

/// Deliver one finished event. Returns whether a callback ran; a retired or
/// unknown id drops the event silently.
pub(crate) fn dispatch(id: u64) -> bool {
    let entry = table().lock().unwrap().get(&id).cloned();
    match entry {
        Some(entry) => {
            let mut callback = entry.lock().unwrap();
            (*callback)();
            true
        }
        None => false,
    }
}

#[cfg(test)]
pub(crate) fn is_registered(id: u64) -> bool {
    table().lock().unwrap().contains_key(&id)
}
