use crate::waker::{WakeableHeader, Waker, unwakeable};
use std::fmt;
use std::marker::PhantomPinned;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, Ordering};

/// A thread-safe, single-slot waker cell.
///
/// The slot holds at most one registration. Storing a new waker with
/// [`AtomicWaker::set`] wakes the registration it replaces, so a
/// producer that re-registers never loses a notification and a
/// consumer that takes-and-wakes is always correct: every waker
/// successfully placed in the slot is either taken by a wakeup or is
/// replaced and then fired.
///
/// The cell's address is published to concurrent wakers, so the cell
/// must stay put once shared; it is `!Unpin` so that pinned containers
/// refuse to move it.
pub struct AtomicWaker {
    wakeable: AtomicPtr<WakeableHeader>,
    _pinned: PhantomPinned,
}

impl AtomicWaker {
    /// An empty (unarmed) slot.
    pub fn new() -> AtomicWaker {
        AtomicWaker {
            wakeable: AtomicPtr::new(unwakeable().as_ptr()),
            _pinned: PhantomPinned,
        }
    }

    /// A slot primed with `waker`'s registration.
    pub fn from_waker(mut waker: Waker) -> AtomicWaker {
        AtomicWaker {
            wakeable: AtomicPtr::new(waker.take().as_ptr()),
            _pinned: PhantomPinned,
        }
    }

    /// Returns true if a real registration is present. Advisory only:
    /// the answer can be stale by the time the caller acts on it.
    pub fn armed(&self) -> bool {
        self.wakeable.load(Ordering::Relaxed) != unwakeable().as_ptr()
    }

    /// Take the current registration and wake it. Empties the slot.
    pub fn wakeup(&self) {
        let wakeable = self.take();
        unsafe { (wakeable.as_ref().vtable.wakeup)(wakeable) }
    }

    /// Store `waker`'s registration, waking whatever it replaced.
    ///
    /// Waking the prior occupant is what makes the race between a
    /// re-registering producer and a consuming [`wakeup`] benign:
    /// whichever side takes a registration out of the slot also
    /// signals it, so none is silently lost.
    ///
    /// [`wakeup`]: AtomicWaker::wakeup
    pub fn set(&self, mut waker: Waker) {
        let prior = self.wakeable.swap(waker.take().as_ptr(), Ordering::AcqRel);
        // Safety: the slot only ever holds pointers produced by
        // `Waker::take`, which are non-null.
        let prior = unsafe { NonNull::new_unchecked(prior) };
        unsafe { (prior.as_ref().vtable.wakeup)(prior) }
    }

    fn take(&self) -> NonNull<WakeableHeader> {
        let prior = self
            .wakeable
            .swap(unwakeable().as_ptr(), Ordering::AcqRel);
        // Safety: as above, the slot never holds a null pointer.
        unsafe { NonNull::new_unchecked(prior) }
    }
}

impl Default for AtomicWaker {
    fn default() -> AtomicWaker {
        AtomicWaker::new()
    }
}

impl Drop for AtomicWaker {
    fn drop(&mut self) {
        let wakeable = self.wakeable.load(Ordering::Acquire);
        // Safety: non-null per the slot invariant; releasing the
        // registration without waking is the drop contract.
        let wakeable = unsafe { NonNull::new_unchecked(wakeable) };
        unsafe { (wakeable.as_ref().vtable.drop)(wakeable) }
    }
}

impl fmt::Debug for AtomicWaker {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("AtomicWaker")
            .field("armed", &self.armed())
            .finish()
    }
}
