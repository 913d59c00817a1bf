#![allow(unsafe_op_in_unsafe_fn)]

use crate::activity::harness::Harness;
use crate::activity::header::Header;
use crate::activity::raw::RawActivity;
use crate::activity::weak;
use crate::context::ContextSet;
use crate::outcome::{IntoOutcome, Outcome};
use crate::promise::Promise;
use crate::scheduler::WakeupScheduler;
use crate::waker::{WakeableHeader, WakeableVtable};
use parking_lot::Mutex;
use std::ptr::NonNull;

/// The activity cell.
///
/// It is critical for `Header` to stay the first field, as the
/// allocation is referenced both as `*mut ActivityLayout` and as
/// `*mut Header` (and, through the wakeable hook, as
/// `*mut WakeableHeader`).
#[repr(C)]
pub(super) struct ActivityLayout<F, P, S, D, C> {
    /// Monomorphic hot state.
    pub(super) header: Header,

    /// Typed cold state.
    pub(super) core: Core<F, P, S, D, C>,
}

pub(super) struct Core<F, P, S, D, C> {
    /// Dispatcher for deferred re-polls.
    pub(super) scheduler: S,

    /// Ambient values installed around every poll.
    pub(super) contexts: C,

    /// Everything the activity mutex guards: the promise and the
    /// completion callback.
    pub(super) inner: Mutex<Inner<F, P, D>>,
}

pub(super) struct Inner<F, P, D> {
    pub(super) stage: Stage<F, P>,

    /// Taken exactly once, by whoever marks the activity done, and
    /// always invoked outside the lock.
    pub(super) on_done: Option<D>,
}

/// Promise lifecycle inside the lock.
pub(super) enum Stage<F, P> {
    /// The factory has not run yet. It executes under the first poll,
    /// with the activity current, so it may grab wakers and read
    /// contexts.
    Factory(F),

    /// Live promise being driven.
    Running(P),

    /// Promise destroyed: completed, cancelled, or orphaned.
    Consumed,
}

impl<F, P> Stage<F, P> {
    pub(super) fn done(&self) -> bool {
        matches!(self, Stage::Consumed)
    }
}

impl<F, P, S, D, C> ActivityLayout<F, P, S, D, C>
where
    F: FnOnce() -> P + 'static,
    P: Promise + Send + 'static,
    P::Output: IntoOutcome,
    S: WakeupScheduler,
    D: FnOnce(Outcome<<P::Output as IntoOutcome>::Ready>) + Send + 'static,
    C: ContextSet,
{
    pub(super) fn new(promise_factory: F, scheduler: S, on_done: D, contexts: C) -> Box<Self> {
        Box::new(ActivityLayout {
            header: Header::new(
                wakeable_vtable::<F, P, S, D, C>(),
                vtable::<F, P, S, D, C>(),
            ),
            core: Core {
                scheduler,
                contexts,
                inner: Mutex::new(Inner {
                    stage: Stage::Factory(promise_factory),
                    on_done: Some(on_done),
                }),
            },
        })
    }
}

impl<F, P, S, D, C> Drop for ActivityLayout<F, P, S, D, C> {
    fn drop(&mut self) {
        // Cancellation always precedes the final reference drop, so
        // the promise must already be destroyed by now.
        let inner = self.core.inner.get_mut();
        assert!(inner.stage.done(), "activity deallocated while live");
        debug_assert!(inner.on_done.is_none(), "completion callback never fired");

        // Break the weak handle's back-pointer exactly once.
        if let Some(handle) = self.header.handle.get_mut().take() {
            weak::drop_activity(handle);
        }
    }
}

/// Type-erased entry points into the generic layout.
pub(crate) struct Vtable {
    /// Cancel the activity, driving the promise to done if needed.
    pub(super) cancel: unsafe fn(NonNull<Header>),

    /// Perform a previously scheduled deferred re-poll.
    pub(super) run_scheduled: unsafe fn(NonNull<Header>),

    /// Release the allocation; called on the last reference drop.
    pub(super) dealloc: unsafe fn(NonNull<Header>),
}

/// Wakeable entry points used by owning wakers that target the
/// activity directly.
fn wakeable_vtable<F, P, S, D, C>() -> &'static WakeableVtable
where
    F: FnOnce() -> P + 'static,
    P: Promise + Send + 'static,
    P::Output: IntoOutcome,
    S: WakeupScheduler,
    D: FnOnce(Outcome<<P::Output as IntoOutcome>::Ready>) + Send + 'static,
    C: ContextSet,
{
    &WakeableVtable {
        wakeup: wakeup::<F, P, S, D, C>,
        drop: drop_waker,
    }
}

/// Get the vtable for the requested generics.
fn vtable<F, P, S, D, C>() -> &'static Vtable
where
    F: FnOnce() -> P + 'static,
    P: Promise + Send + 'static,
    P::Output: IntoOutcome,
    S: WakeupScheduler,
    D: FnOnce(Outcome<<P::Output as IntoOutcome>::Ready>) + Send + 'static,
    C: ContextSet,
{
    &Vtable {
        cancel: cancel::<F, P, S, D, C>,
        run_scheduled: run_scheduled::<F, P, S, D, C>,
        dealloc: dealloc::<F, P, S, D, C>,
    }
}

unsafe fn wakeup<F, P, S, D, C>(ptr: NonNull<WakeableHeader>)
where
    F: FnOnce() -> P + 'static,
    P: Promise + Send + 'static,
    P::Output: IntoOutcome,
    S: WakeupScheduler,
    D: FnOnce(Outcome<<P::Output as IntoOutcome>::Ready>) + Send + 'static,
    C: ContextSet,
{
    Harness::<F, P, S, D, C>::from_raw(ptr.cast()).wakeup();
}

// An owning waker discarded without firing releases its reference;
// nothing here depends on the concrete types.
unsafe fn drop_waker(ptr: NonNull<WakeableHeader>) {
    RawActivity::from_raw(ptr.cast()).drop_reference();
}

unsafe fn cancel<F, P, S, D, C>(ptr: NonNull<Header>)
where
    F: FnOnce() -> P + 'static,
    P: Promise + Send + 'static,
    P::Output: IntoOutcome,
    S: WakeupScheduler,
    D: FnOnce(Outcome<<P::Output as IntoOutcome>::Ready>) + Send + 'static,
    C: ContextSet,
{
    Harness::<F, P, S, D, C>::from_raw(ptr).cancel();
}

unsafe fn run_scheduled<F, P, S, D, C>(ptr: NonNull<Header>)
where
    F: FnOnce() -> P + 'static,
    P: Promise + Send + 'static,
    P::Output: IntoOutcome,
    S: WakeupScheduler,
    D: FnOnce(Outcome<<P::Output as IntoOutcome>::Ready>) + Send + 'static,
    C: ContextSet,
{
    Harness::<F, P, S, D, C>::from_raw(ptr).run_scheduled();
}

unsafe fn dealloc<F, P, S, D, C>(ptr: NonNull<Header>)
where
    F: FnOnce() -> P + 'static,
    P: Promise + Send + 'static,
    P::Output: IntoOutcome,
    S: WakeupScheduler,
    D: FnOnce(Outcome<<P::Output as IntoOutcome>::Ready>) + Send + 'static,
    C: ContextSet,
{
    Harness::<F, P, S, D, C>::from_raw(ptr).dealloc();
}
