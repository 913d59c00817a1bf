use crate::activity::layout::Vtable;
use crate::activity::weak::WeakHandle;
use crate::waker::{WakeableHeader, WakeableVtable};
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

/// Action observed while an activity's poll loop is on the stack.
///
/// When more than one arrives during a single poll they are combined
/// with `max`, so Cancel overrides Wakeup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub(super) enum ActionDuringRun {
    None = 0,
    Wakeup = 1,
    Cancel = 2,
}

impl ActionDuringRun {
    fn from_u8(value: u8) -> ActionDuringRun {
        match value {
            0 => ActionDuringRun::None,
            1 => ActionDuringRun::Wakeup,
            2 => ActionDuringRun::Cancel,
            _ => unreachable!("invalid action encoding"),
        }
    }
}

/// Monomorphic hot data of one activity.
///
/// Every activity allocation starts with this header, so thin
/// pointers to it can service wakers, reference counting, and the
/// type-erased vtable operations without knowing the promise type.
#[repr(C)]
pub(crate) struct Header {
    /// Wakeable hook targeted by owning wakers. Must stay the first
    /// field so a `WakeableHeader` pointer round-trips to the
    /// activity header.
    pub(super) wakeable: WakeableHeader,

    /// Monomorphized entry points into the generic activity layout.
    pub(super) vtable: &'static Vtable,

    /// Reference count. The creator holds the initial count as the
    /// primary reference; every owning waker holds one more.
    refs: AtomicU32,

    /// Gate for deferred re-polls: true iff one has been handed to
    /// the scheduler and has not run yet.
    pub(super) wakeup_scheduled: AtomicBool,

    /// Mirror of the lock-guarded completion state, for lock-free
    /// observation. The flag under the mutex stays the source of
    /// truth for polling decisions.
    pub(super) done: AtomicBool,

    /// Action recorded during the current poll. Written only by the
    /// thread that holds the activity mutex; atomic so the in-poll
    /// wakeup path can record a note without re-entering the lock.
    action_during_run: AtomicU8,

    /// Lazily created weak-wakeup handle. Guarded by its own small
    /// lock so waker creation from inside a poll does not touch the
    /// activity mutex.
    pub(super) handle: Mutex<Option<NonNull<WeakHandle>>>,
}

// Safety: the raw handle pointer is only dereferenced under the
// handle lock or from the single deallocating thread.
unsafe impl Send for Header {}
unsafe impl Sync for Header {}

impl Header {
    pub(super) fn new(wakeable: &'static WakeableVtable, vtable: &'static Vtable) -> Header {
        Header {
            wakeable: WakeableHeader { vtable: wakeable },
            vtable,
            refs: AtomicU32::new(1),
            wakeup_scheduled: AtomicBool::new(false),
            done: AtomicBool::new(false),
            action_during_run: AtomicU8::new(ActionDuringRun::None as u8),
            handle: Mutex::new(None),
        }
    }

    pub(super) fn ref_inc(&self) {
        self.refs.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns true when the caller released the last reference.
    pub(super) fn ref_dec(&self) -> bool {
        self.refs.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Weak promotion: take a reference only if the count is already
    /// nonzero, so an activity whose count reached zero is never
    /// resurrected.
    pub(super) fn ref_if_nonzero(&self) -> bool {
        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| {
                (refs > 0).then_some(refs + 1)
            })
            .is_ok()
    }

    /// Record an action for the running poll loop; Cancel wins over
    /// Wakeup. Caller must hold the activity mutex.
    pub(super) fn set_action_during_run(&self, action: ActionDuringRun) {
        self.action_during_run
            .fetch_max(action as u8, Ordering::Relaxed);
    }

    /// Sample and clear the recorded action. Caller must hold the
    /// activity mutex.
    pub(super) fn take_action_during_run(&self) -> ActionDuringRun {
        ActionDuringRun::from_u8(
            self.action_during_run
                .swap(ActionDuringRun::None as u8, Ordering::Relaxed),
        )
    }

    pub(super) fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}
