use crate::activity::header::Header;
use crate::activity::raw::RawActivity;
use crate::waker::Waker;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

thread_local! {
    /// Activity being polled on this thread. Being set implies the
    /// activity's mutex is held by this thread.
    static CURRENT_ACTIVITY: Cell<Option<NonNull<Header>>> = const { Cell::new(None) };
}

/// Scoped installation of the current activity.
///
/// Saves the prior value on entry and restores it on drop, on every
/// exit path, so the saved values form a per-thread stack. Different
/// activities may nest (a scheduler inlining a sub-activity);
/// re-entering the activity that is already current is a bug.
pub(super) struct EnterGuard {
    prior: Option<NonNull<Header>>,
}

impl EnterGuard {
    pub(super) fn enter(activity: NonNull<Header>) -> EnterGuard {
        let prior = CURRENT_ACTIVITY.replace(Some(activity));
        debug_assert!(
            prior != Some(activity),
            "activity polled re-entrantly on one thread"
        );
        EnterGuard { prior }
    }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT_ACTIVITY.set(self.prior);
    }
}

pub(super) fn is_current(activity: NonNull<Header>) -> bool {
    CURRENT_ACTIVITY.get() == Some(activity)
}

/// Borrowed view of the activity whose poll is on the current
/// thread's stack.
///
/// Promise bodies use this to identify themselves: to register wakers
/// against the activity or to ask for another loop iteration, without
/// threading the activity through every call. The view is only
/// meaningful on the polling thread while the poll is in progress, so
/// it is neither `Send` nor `Sync`.
#[derive(Clone, Copy)]
pub struct ActivityRef {
    raw: RawActivity,
    _not_send: PhantomData<*const ()>,
}

impl ActivityRef {
    fn new(raw: RawActivity) -> ActivityRef {
        ActivityRef {
            raw,
            _not_send: PhantomData,
        }
    }

    /// An owning waker for this activity; holding it keeps the
    /// activity alive until the waker fires or is dropped.
    pub fn make_owning_waker(&self) -> Waker {
        self.raw.make_owning_waker()
    }

    /// A non-owning waker that does not extend the activity's
    /// lifetime; suitable for signals that may fire long after the
    /// activity is gone.
    pub fn make_non_owning_waker(&self) -> Waker {
        self.raw.make_non_owning_waker()
    }

    /// Equivalent to making an owning waker and firing it at once.
    pub fn force_wakeup(&self) {
        self.raw.force_wakeup();
    }

    /// Ask the running poll loop to iterate again instead of going
    /// idle when the promise returns Pending.
    ///
    /// # Panics
    ///
    /// Panics when called from outside this activity's own poll. Once
    /// the promise has returned Ready the activity leaves the current
    /// slot before any user code runs again, so calling this after
    /// completion is unreachable from a well-formed promise.
    pub fn force_immediate_repoll(&self) {
        self.raw.force_immediate_repoll();
    }

    /// Request cancellation. From inside the activity's own poll this
    /// marks the loop to terminate with a cancelled outcome instead
    /// of polling again.
    pub fn cancel(&self) {
        self.raw.cancel();
    }
}

impl fmt::Debug for ActivityRef {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_tuple("ActivityRef").field(&self.raw).finish()
    }
}

/// The activity currently being polled on this thread.
///
/// # Panics
///
/// Panics when no activity is current, i.e. outside a promise poll.
pub fn current() -> ActivityRef {
    try_current().expect("no activity is current on this thread")
}

/// Like [`current`], but returns `None` outside a poll.
pub fn try_current() -> Option<ActivityRef> {
    CURRENT_ACTIVITY
        .get()
        .map(|header| ActivityRef::new(RawActivity::from_raw(header)))
}
