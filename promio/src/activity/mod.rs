use crate::context::ContextSet;
use crate::outcome::{IntoOutcome, Outcome};
use crate::promise::Promise;
use crate::scheduler::WakeupScheduler;
use std::ptr::NonNull;

// Public API
mod current;
pub use self::current::{ActivityRef, current, try_current};

mod handle;
pub use self::handle::ActivityHandle;

// Internals
mod harness;
use self::harness::Harness;

mod header;
use self::header::Header;

mod layout;
use self::layout::ActivityLayout;

mod raw;
pub(crate) use self::raw::RawActivity;

mod weak;


/// Spawns a new activity and returns its owning handle.
///
/// `promise_factory` is invoked exactly once, under the activity's
/// lock, with the activity installed as current and `contexts` in
/// ambient scope — so the factory, like every later poll, may grab
/// wakers and read contexts. The promise is polled immediately; if it
/// settles on the spot, `on_done` fires before this function returns.
///
/// `on_done` is invoked exactly once with the terminal outcome: the
/// promise's converted Ready value, or a cancelled error if the
/// activity is cancelled first. Dropping the returned handle requests
/// cancellation.
///
/// Whenever the promise goes idle and a waker later fires from some
/// other thread, `wakeup_scheduler` is handed the deferred re-poll.
pub fn make_activity<F, P, S, D, C>(
    promise_factory: F,
    wakeup_scheduler: S,
    on_done: D,
    contexts: C,
) -> ActivityHandle
where
    F: FnOnce() -> P + 'static,
    P: Promise + Send + 'static,
    P::Output: IntoOutcome,
    S: WakeupScheduler,
    D: FnOnce(Outcome<<P::Output as IntoOutcome>::Ready>) + Send + 'static,
    C: ContextSet,
{
    let layout = ActivityLayout::new(promise_factory, wakeup_scheduler, on_done, contexts);
    // Safety: `Box::into_raw` never returns null, and `Header` is the
    // first field of the `#[repr(C)]` layout.
    let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(layout)) }.cast::<Header>();
    let raw = RawActivity::from_raw(ptr);
    // Initial poll: may complete inline (the callback fires here) or
    // leave the activity idle awaiting wakeups.
    unsafe { Harness::<F, P, S, D, C>::from_raw(ptr) }.start();
    ActivityHandle::new(raw)
}
