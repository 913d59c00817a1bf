use crate::outcome::Outcome;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// Exports
pub(crate) mod mocks;

/// Records the terminal outcome delivered to a completion callback,
/// and how many times the callback fired (which must never exceed
/// one).
pub(crate) struct CompletionProbe<T> {
    outcome: Mutex<Option<Outcome<T>>>,
    calls: AtomicUsize,
}

impl<T> CompletionProbe<T> {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn outcome(&self) -> Option<Outcome<T>>
    where
        T: Clone,
    {
        self.outcome.lock().clone()
    }
}

/// Builds an `on_done` callback plus a probe observing it.
pub(crate) fn completion_probe<T: Send + 'static>() -> (
    impl FnOnce(Outcome<T>) + Send + 'static,
    Arc<CompletionProbe<T>>,
) {
    let probe = Arc::new(CompletionProbe {
        outcome: Mutex::new(None),
        calls: AtomicUsize::new(0),
    });
    let recorder = Arc::clone(&probe);
    let on_done = move |outcome: Outcome<T>| {
        recorder.calls.fetch_add(1, Ordering::SeqCst);
        *recorder.outcome.lock() = Some(outcome);
    };
    (on_done, probe)
}
