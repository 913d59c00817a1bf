#![allow(unsafe_op_in_unsafe_fn)]

use crate::activity::header::Header;
use crate::waker::{WakeableHeader, WakeableVtable, Waker};
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// Weak wakeup indirection for one activity.
///
/// Subscribers that may fire long after the activity is cancelled and
/// freed (timers, I/O registrations) hold wakers against this small
/// side allocation instead of the activity itself. The back-pointer
/// is broken exactly once when the activity deallocates, and a wakeup
/// promotes the activity's refcount only while it is still nonzero,
/// so there is no ownership cycle and no use-after-free.
#[repr(C)]
pub(super) struct WeakHandle {
    /// Wakeable hook; first field so waker pointers round-trip.
    wakeable: WakeableHeader,

    /// Shares: one held by the activity's handle slot, one per
    /// outstanding non-owning waker.
    refs: AtomicU32,

    /// Back-pointer to the activity; `None` once the activity is
    /// gone.
    activity: Mutex<Option<NonNull<Header>>>,
}

// Safety: the back-pointer is only dereferenced under the handle
// lock, and only after a successful refcount promotion.
unsafe impl Send for WeakHandle {}
unsafe impl Sync for WeakHandle {}

static WEAK_VTABLE: WakeableVtable = WakeableVtable {
    wakeup: weak_wakeup,
    drop: weak_drop,
};

unsafe fn weak_wakeup(ptr: NonNull<WakeableHeader>) {
    let handle = ptr.cast::<WeakHandle>();
    // Promote under the lock; deliver after releasing it, so a
    // scheduler that runs the wakeup inline cannot dead-lock against
    // this same handle.
    let promoted = {
        let slot = handle.as_ref().activity.lock();
        match *slot {
            Some(activity) if activity.as_ref().ref_if_nonzero() => Some(activity),
            _ => None,
        }
    };
    if let Some(activity) = promoted {
        // The promoted reference is released when wakeup processing
        // completes, like any owning waker's.
        (activity.as_ref().wakeable.vtable.wakeup)(activity.cast());
    }
    handle_unref(handle);
}

unsafe fn weak_drop(ptr: NonNull<WakeableHeader>) {
    handle_unref(ptr.cast::<WeakHandle>());
}

unsafe fn handle_unref(handle: NonNull<WeakHandle>) {
    if handle.as_ref().refs.fetch_sub(1, Ordering::AcqRel) == 1 {
        drop(Box::from_raw(handle.as_ptr()));
    }
}

/// Returns a non-owning waker for `activity`, creating the weak
/// handle on first use. Caller must guarantee the activity is live.
pub(super) fn non_owning_waker(activity: NonNull<Header>) -> Waker {
    let mut slot = unsafe { activity.as_ref() }.handle.lock();
    let handle = *slot.get_or_insert_with(|| {
        let handle = Box::new(WeakHandle {
            wakeable: WakeableHeader {
                vtable: &WEAK_VTABLE,
            },
            // The activity's own share.
            refs: AtomicU32::new(1),
            activity: Mutex::new(Some(activity)),
        });
        unsafe { NonNull::new_unchecked(Box::into_raw(handle)) }
    });
    // One share per outstanding waker.
    unsafe { handle.as_ref() }.refs.fetch_add(1, Ordering::Relaxed);
    Waker::from_raw(handle.cast())
}

/// Breaks the back-pointer and releases the activity's share. Called
/// exactly once, from the activity's deallocation.
pub(super) fn drop_activity(handle: NonNull<WeakHandle>) {
    *unsafe { handle.as_ref() }.activity.lock() = None;
    unsafe { handle_unref(handle) };
}
