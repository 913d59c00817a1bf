use crate::activity::current;
use crate::activity::header::{ActionDuringRun, Header};
use crate::activity::weak;
use crate::waker::Waker;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

/// Type-erased activity pointer.
///
/// Operations that depend on the concrete promise, scheduler, or
/// callback types dispatch through the header vtable; everything else
/// works directly on the monomorphic header.
#[derive(Clone, Copy)]
pub(crate) struct RawActivity {
    ptr: NonNull<Header>,
}

impl RawActivity {
    pub(super) fn from_raw(ptr: NonNull<Header>) -> RawActivity {
        RawActivity { ptr }
    }

    pub(super) fn header(&self) -> &Header {
        unsafe { self.ptr.as_ref() }
    }

    /// Produce an owning waker; holding it keeps the activity alive.
    pub(super) fn make_owning_waker(self) -> Waker {
        self.header().ref_inc();
        Waker::from_raw(self.ptr.cast())
    }

    /// Produce a waker backed by the weak handle; it does not extend
    /// the activity's lifetime.
    pub(super) fn make_non_owning_waker(self) -> Waker {
        weak::non_owning_waker(self.ptr)
    }

    /// Fire-and-forget wakeup, safe from any thread.
    pub(super) fn force_wakeup(self) {
        self.make_owning_waker().wakeup();
    }

    /// Ask the running poll loop to iterate again instead of going
    /// idle. Only valid from within this activity's own poll.
    pub(super) fn force_immediate_repoll(self) {
        assert!(
            current::is_current(self.ptr),
            "force_immediate_repoll called outside the activity's own poll"
        );
        self.header().set_action_during_run(ActionDuringRun::Wakeup);
    }

    pub(super) fn cancel(self) {
        let vtable = self.header().vtable;
        unsafe { (vtable.cancel)(self.ptr) }
    }

    pub(crate) fn run_scheduled_wakeup(self) {
        let vtable = self.header().vtable;
        unsafe { (vtable.run_scheduled)(self.ptr) }
    }

    pub(super) fn ref_inc(self) {
        self.header().ref_inc();
    }

    /// Release one reference, deallocating on the last.
    pub(super) fn drop_reference(self) {
        if self.header().ref_dec() {
            self.dealloc();
        }
    }

    fn dealloc(self) {
        let vtable = self.header().vtable;
        unsafe { (vtable.dealloc)(self.ptr) }
    }

    /// Reopen the wakeup gate after a scheduler discarded its token,
    /// then give back the token's reference.
    pub(crate) fn abandon_scheduled_wakeup(self) {
        self.header()
            .wakeup_scheduled
            .store(false, Ordering::Release);
        self.drop_reference();
    }
}

impl fmt::Debug for RawActivity {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "RawActivity({:p})", self.ptr.as_ptr())
    }
}
