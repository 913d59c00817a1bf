use crate::activity::raw::RawActivity;
use crate::waker::Waker;
use std::fmt;

/// The primary, owning reference to an activity.
///
/// Dropping the handle orphans the activity: cancellation is
/// requested, the promise is driven to done, and the completion
/// callback fires with a cancelled outcome if it had not fired
/// already. Wakers still in flight keep the allocation alive until
/// they drain; once the last reference drops the activity is freed.
pub struct ActivityHandle {
    pub(super) raw: RawActivity,
}

// Safety: every operation on the handle goes through the activity's
// atomics or its mutex; `make_activity` requires the promise,
// callback, and contexts to be `Send` and the scheduler `Sync`.
unsafe impl Send for ActivityHandle {}
unsafe impl Sync for ActivityHandle {}

impl ActivityHandle {
    pub(super) fn new(raw: RawActivity) -> ActivityHandle {
        ActivityHandle { raw }
    }

    /// Request cancellation without giving up the handle.
    ///
    /// If the promise is still running, it is destroyed and the
    /// completion callback fires with a cancelled outcome. Calling
    /// this on a settled activity does nothing.
    pub fn cancel(&self) {
        self.raw.cancel();
    }

    /// Lock-free check whether the promise has settled (completed or
    /// cancelled). May lag a completion that is in flight on another
    /// thread.
    pub fn is_finished(&self) -> bool {
        self.raw.header().is_finished()
    }

    /// Wake the activity from outside, forcing at least one more poll
    /// if it has not settled.
    ///
    /// Rarely needed: prefer handing out a waker and letting the
    /// interested party fire it.
    pub fn force_wakeup(&self) {
        self.raw.force_wakeup();
    }

    /// An owning waker; holding it keeps the activity alive until the
    /// waker fires or is dropped.
    pub fn make_owning_waker(&self) -> Waker {
        self.raw.make_owning_waker()
    }

    /// A non-owning waker that will not extend the activity's
    /// lifetime; firing it after the activity is gone is a safe
    /// no-op.
    pub fn make_non_owning_waker(&self) -> Waker {
        self.raw.make_non_owning_waker()
    }
}

impl Drop for ActivityHandle {
    fn drop(&mut self) {
        self.raw.cancel();
        self.raw.drop_reference();
    }
}

impl fmt::Debug for ActivityHandle {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("ActivityHandle")
            .field("raw", &self.raw)
            .field("finished", &self.is_finished())
            .finish()
    }
}
