#![allow(unsafe_op_in_unsafe_fn)]

use crate::scheduler::{ScheduledWakeup, WakeupScheduler};
use crate::waker::{WakeableHeader, WakeableVtable, Waker};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A counting wakeup sink.
///
/// The wakeable hook has to be the first field: wakers carry a bare
/// pointer to it, and the vtable shims cast that pointer back to the
/// whole mock (and to the `Arc` data it lives in).
#[repr(C)]
pub(crate) struct MockWakeable {
    wakeable: WakeableHeader,
    wakeups: AtomicUsize,
    drops: AtomicUsize,
}

impl MockWakeable {
    pub(crate) fn wakeups(&self) -> usize {
        self.wakeups.load(Ordering::SeqCst)
    }

    pub(crate) fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

unsafe fn mock_wakeup(ptr: NonNull<WakeableHeader>) {
    // Consumes the waker's Arc share after recording the signal.
    let mock = Arc::<MockWakeable>::from_raw(ptr.cast().as_ptr());
    mock.wakeups.fetch_add(1, Ordering::SeqCst);
}

unsafe fn mock_drop(ptr: NonNull<WakeableHeader>) {
    let mock = Arc::<MockWakeable>::from_raw(ptr.cast().as_ptr());
    mock.drops.fetch_add(1, Ordering::SeqCst);
}

static MOCK_VTABLE: WakeableVtable = WakeableVtable {
    wakeup: mock_wakeup,
    drop: mock_drop,
};

/// Returns a waker backed by a counting sink, plus a handle to the
/// counters. The waker holds one `Arc` share; firing or dropping it
/// gives the share back.
pub(crate) fn mock_wakeable() -> (Waker, Arc<MockWakeable>) {
    let mock = Arc::new(MockWakeable {
        wakeable: WakeableHeader {
            vtable: &MOCK_VTABLE,
        },
        wakeups: AtomicUsize::new(0),
        drops: AtomicUsize::new(0),
    });
    let raw = Arc::into_raw(Arc::clone(&mock)) as *mut MockWakeable;
    // Safety: `Arc::into_raw` never returns null.
    let ptr = unsafe { NonNull::new_unchecked(raw) };
    (Waker::from_raw(ptr.cast()), mock)
}

/// Scheduler that queues deferred wakeups for explicit draining and
/// counts how many times the activity asked for one.
#[derive(Clone)]
pub(crate) struct QueueScheduler {
    shared: Arc<QueueSchedulerShared>,
}

struct QueueSchedulerShared {
    queue: Mutex<VecDeque<ScheduledWakeup>>,
    scheduled: AtomicUsize,
}

impl QueueScheduler {
    pub(crate) fn new() -> QueueScheduler {
        QueueScheduler {
            shared: Arc::new(QueueSchedulerShared {
                queue: Mutex::new(VecDeque::new()),
                scheduled: AtomicUsize::new(0),
            }),
        }
    }

    /// Total `schedule_wakeup` calls observed so far.
    pub(crate) fn times_scheduled(&self) -> usize {
        self.shared.scheduled.load(Ordering::SeqCst)
    }

    pub(crate) fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Pop the next queued wakeup without running it.
    pub(crate) fn pop(&self) -> Option<ScheduledWakeup> {
        self.shared.queue.lock().pop_front()
    }

    /// Run the next queued wakeup; returns false if none was queued.
    pub(crate) fn run_next(&self) -> bool {
        match self.pop() {
            Some(wakeup) => {
                wakeup.run();
                true
            }
            None => false,
        }
    }

    /// Drain the queue, returning how many wakeups ran.
    pub(crate) fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl WakeupScheduler for QueueScheduler {
    fn schedule_wakeup(&self, wakeup: ScheduledWakeup) {
        self.shared.scheduled.fetch_add(1, Ordering::SeqCst);
        self.shared.queue.lock().push_back(wakeup);
    }
}
