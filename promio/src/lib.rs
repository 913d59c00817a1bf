//! A promise-activity cooperative concurrency core.
//!
//! An [`Activity`](activity) drives one stateful pollable computation
//! (a [`Promise`]) to completion, re-polling it whenever a [`Waker`]
//! signals that progress may be possible. Polling is serialized under
//! the activity's own mutex; wakeups arriving from other threads are
//! deferred through a pluggable [`WakeupScheduler`]. Dropping the
//! owning [`ActivityHandle`] cancels the activity, and the completion
//! callback fires exactly once with the terminal [`Outcome`].

pub mod activity;
pub use activity::{ActivityHandle, ActivityRef, current, make_activity, try_current};

pub mod context;
pub use context::{ContextHolder, ContextSet, try_with_context, with_context};

pub mod outcome;
pub use outcome::{ActivityError, IntoOutcome, Outcome};

pub mod promise;
pub use promise::Promise;

pub mod scheduler;
pub use scheduler::{InlineWakeupScheduler, ScheduledWakeup, WakeupScheduler};

pub mod waker;
pub use waker::{AtomicWaker, Waker};

#[cfg(test)]
pub(crate) mod test_utils;
