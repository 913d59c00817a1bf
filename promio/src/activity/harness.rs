use crate::activity::current::{self, EnterGuard};
use crate::activity::header::{ActionDuringRun, Header};
use crate::activity::layout::{ActivityLayout, Core, Inner, Stage};
use crate::activity::raw::RawActivity;
use crate::context::ContextSet;
use crate::outcome::{ActivityError, IntoOutcome, Outcome};
use crate::promise::Promise;
use crate::scheduler::{ScheduledWakeup, WakeupScheduler};
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::task::Poll;

/// Terminal outcome produced by a promise of type `P`.
pub(super) type PromiseOutcome<P> =
    Outcome<<<P as Promise>::Output as IntoOutcome>::Ready>;

/// Typed view over a raw activity allocation.
pub(super) struct Harness<F, P, S, D, C> {
    layout: NonNull<ActivityLayout<F, P, S, D, C>>,
}

impl<F, P, S, D, C> Harness<F, P, S, D, C>
where
    F: FnOnce() -> P + 'static,
    P: Promise + Send + 'static,
    P::Output: IntoOutcome,
    S: WakeupScheduler,
    D: FnOnce(PromiseOutcome<P>) + Send + 'static,
    C: ContextSet,
{
    pub(super) unsafe fn from_raw(ptr: NonNull<Header>) -> Harness<F, P, S, D, C> {
        Harness {
            layout: ptr.cast::<ActivityLayout<F, P, S, D, C>>(),
        }
    }

    fn header_ptr(&self) -> NonNull<Header> {
        self.layout.cast()
    }

    fn header(&self) -> &Header {
        unsafe { &self.layout.as_ref().header }
    }

    fn core(&self) -> &Core<F, P, S, D, C> {
        unsafe { &self.layout.as_ref().core }
    }

    fn raw(&self) -> RawActivity {
        RawActivity::from_raw(self.header_ptr())
    }

    /// Constructs the promise from its factory and runs the first
    /// step. Called exactly once, immediately after allocation; may
    /// already complete the activity, in which case the completion
    /// callback fires here, outside the lock.
    pub(super) fn start(&self) {
        let mut inner = self.core().inner.lock();
        let final_outcome = {
            let _scope = EnterGuard::enter(self.header_ptr());
            let _contexts = self.core().contexts.install();
            let factory = match mem::replace(&mut inner.stage, Stage::Consumed) {
                Stage::Factory(factory) => factory,
                _ => unreachable!("activity started twice"),
            };
            inner.stage = Stage::Running(factory());
            self.step_loop(&mut inner)
        };
        self.finish(inner, final_outcome);
    }

    /// Delivery of a fired owning waker. The waker's reference is
    /// released once wakeup processing is done.
    pub(super) fn wakeup(&self) {
        // A wake from inside this activity's own poll: the loop is on
        // the stack right below us, so just leave it a note.
        if current::is_current(self.header_ptr()) {
            self.header().set_action_during_run(ActionDuringRun::Wakeup);
            self.raw().drop_reference();
            return;
        }
        if !self.header().wakeup_scheduled.swap(true, Ordering::AcqRel) {
            // We won the gate; the waker's reference rides along in
            // the token. Hold one extra reference across the call so
            // the allocation outlives `schedule_wakeup` even when the
            // scheduler runs the wakeup inline.
            tracing::trace!(activity = ?self.header_ptr().as_ptr(), "scheduling wakeup");
            self.raw().ref_inc();
            self.core()
                .scheduler
                .schedule_wakeup(ScheduledWakeup::new(self.raw()));
            self.raw().drop_reference();
        } else {
            // A deferred re-poll is already pending; this wake folds
            // into it.
            self.raw().drop_reference();
        }
    }

    /// Performs a deferred re-poll handed to the scheduler, then
    /// releases the reference the token carried.
    pub(super) fn run_scheduled(&self) {
        let was_scheduled = self.header().wakeup_scheduled.swap(false, Ordering::AcqRel);
        assert!(was_scheduled, "scheduled wakeup ran without being scheduled");
        self.step();
        self.raw().drop_reference();
    }

    /// Cancellation, either from the promise itself mid-poll or from
    /// outside (orphaning, an explicit cancel).
    pub(super) fn cancel(&self) {
        if current::is_current(self.header_ptr()) {
            // The running loop observes Cancel as dominant and
            // terminates without polling the promise again.
            self.header().set_action_during_run(ActionDuringRun::Cancel);
            return;
        }
        let mut inner = self.core().inner.lock();
        let was_done = inner.stage.done();
        if !was_done {
            tracing::trace!(activity = ?self.header_ptr().as_ptr(), "cancelling");
            let _scope = EnterGuard::enter(self.header_ptr());
            let _contexts = self.core().contexts.install();
            self.mark_done(&mut inner);
        }
        let outcome = (!was_done).then_some(Err(ActivityError::Cancelled));
        self.finish(inner, outcome);
    }

    /// One wakeup-driven polling pass. Tolerates spurious wakes after
    /// completion.
    fn step(&self) {
        let mut inner = self.core().inner.lock();
        if inner.stage.done() {
            return;
        }
        let final_outcome = {
            let _scope = EnterGuard::enter(self.header_ptr());
            let _contexts = self.core().contexts.install();
            self.step_loop(&mut inner)
        };
        self.finish(inner, final_outcome);
    }

    /// Polls the promise until it settles or no in-run wakeups
    /// remain. Runs with the mutex held and the activity current.
    fn step_loop(&self, inner: &mut Inner<F, P, D>) -> Option<PromiseOutcome<P>> {
        debug_assert!(current::is_current(self.header_ptr()));
        loop {
            let poll = match &mut inner.stage {
                Stage::Running(promise) => promise.poll(),
                _ => unreachable!("polled a finished activity"),
            };
            if let Poll::Ready(value) = poll {
                self.mark_done(inner);
                return Some(value.into_outcome());
            }
            match self.header().take_action_during_run() {
                // Nothing happened during the poll; go idle and wait
                // for a waker.
                ActionDuringRun::None => return None,
                ActionDuringRun::Wakeup => continue,
                ActionDuringRun::Cancel => {
                    self.mark_done(inner);
                    return Some(Err(ActivityError::Cancelled));
                }
            }
        }
    }

    /// Destroys the promise exactly once and flags completion.
    fn mark_done(&self, inner: &mut Inner<F, P, D>) {
        assert!(!inner.stage.done());
        // Replacing the stage drops the promise here, still under the
        // lock and the ambient scope.
        inner.stage = Stage::Consumed;
        self.header().done.store(true, Ordering::Release);
        tracing::trace!(activity = ?self.header_ptr().as_ptr(), "activity done");
    }

    /// Unlocks and, if the activity just settled, fires the
    /// completion callback exactly once, outside the lock.
    fn finish(
        &self,
        mut inner: parking_lot::MutexGuard<'_, Inner<F, P, D>>,
        final_outcome: Option<PromiseOutcome<P>>,
    ) {
        let callback = if final_outcome.is_some() {
            inner.on_done.take()
        } else {
            None
        };
        drop(inner);
        if let Some(outcome) = final_outcome {
            let on_done = callback.expect("completion callback already taken");
            on_done(outcome);
        }
    }

    /// Releases the allocation. Caller just dropped the last
    /// reference.
    pub(super) fn dealloc(self) {
        unsafe { drop(Box::from_raw(self.layout.as_ptr())) }
    }
}
