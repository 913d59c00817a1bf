use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem;
use std::ptr::NonNull;

mod atomic;
pub use atomic::AtomicWaker;

/// Dispatch table for one wakeup sink.
///
/// Both entries consume the registration: after either runs, the
/// header pointer must not be touched again by the caller. Sinks use
/// these two paths to release whatever reservation (typically a
/// reference count) the registration was holding.
pub(crate) struct WakeableVtable {
    /// Signal the sink and invalidate the registration.
    pub(crate) wakeup: unsafe fn(NonNull<WakeableHeader>),

    /// Invalidate the registration without signalling.
    pub(crate) drop: unsafe fn(NonNull<WakeableHeader>),
}

/// Thin dispatch hook embedded as the first field of every wakeup
/// sink.
///
/// Carrying only a vtable pointer keeps wakers thin: a bare
/// `NonNull<WakeableHeader>` is enough to reach the concrete sink, and
/// implementors recover their own layout by casting the header pointer
/// back (they are `#[repr(C)]` with the hook first).
#[repr(C)]
pub(crate) struct WakeableHeader {
    pub(crate) vtable: &'static WakeableVtable,
}

unsafe fn unwakeable_wakeup(_: NonNull<WakeableHeader>) {}
unsafe fn unwakeable_drop(_: NonNull<WakeableHeader>) {}

static UNWAKEABLE_VTABLE: WakeableVtable = WakeableVtable {
    wakeup: unwakeable_wakeup,
    drop: unwakeable_drop,
};

/// Sentinel sink stored in emptied slots; waking or dropping it does
/// nothing. Never written through.
static UNWAKEABLE: WakeableHeader = WakeableHeader {
    vtable: &UNWAKEABLE_VTABLE,
};

pub(crate) fn unwakeable() -> NonNull<WakeableHeader> {
    NonNull::from(&UNWAKEABLE)
}

/// An owning handle to one wakeup sink.
///
/// Firing the waker ([`Waker::wakeup`]) signals the underlying
/// activity and spends the registration; dropping it releases the
/// registration silently. Either way the reservation behind it (for
/// activity-owned wakers, a reference keeping the activity alive) is
/// given back exactly once.
///
/// `Waker` is move-only; ownership of the registration travels with
/// the value. The default waker holds the sentinel sink and is safe to
/// fire or drop. Equality and hashing are by sink identity, so two
/// owning wakers for the same activity compare equal and deduplicate
/// in wait queues.
pub struct Waker {
    wakeable: NonNull<WakeableHeader>,
}

// Safety: every sink a waker can point at (an activity header, a
// weak handle, the sentinel) is thread-safe by the wakeable contract.
unsafe impl Send for Waker {}
unsafe impl Sync for Waker {}

impl Waker {
    pub(crate) fn from_raw(wakeable: NonNull<WakeableHeader>) -> Waker {
        Waker { wakeable }
    }

    /// Wake the underlying activity, spending this waker's
    /// registration.
    pub fn wakeup(mut self) {
        let wakeable = self.take();
        unsafe { (wakeable.as_ref().vtable.wakeup)(wakeable) }
    }

    /// Swap the held pointer for the sentinel and hand it out. The
    /// waker stays valid but no longer wakes anything.
    pub(crate) fn take(&mut self) -> NonNull<WakeableHeader> {
        mem::replace(&mut self.wakeable, unwakeable())
    }

    /// Returns true if firing this waker would do nothing.
    pub fn is_unwakeable(&self) -> bool {
        self.wakeable == unwakeable()
    }
}

impl Default for Waker {
    fn default() -> Waker {
        Waker {
            wakeable: unwakeable(),
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        let wakeable = self.take();
        unsafe { (wakeable.as_ref().vtable.drop)(wakeable) }
    }
}

impl PartialEq for Waker {
    fn eq(&self, other: &Waker) -> bool {
        self.wakeable == other.wakeable
    }
}

impl Eq for Waker {}

impl Hash for Waker {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.wakeable.hash(state);
    }
}

impl fmt::Debug for Waker {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "Waker({:p})", self.wakeable.as_ptr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mocks::mock_wakeable;

    #[test]
    fn wakeup_signals_once_and_spends_registration() {
        let (waker, counts) = mock_wakeable();
        waker.wakeup();
        assert_eq!(counts.wakeups(), 1);
        assert_eq!(counts.drops(), 0);
    }

    #[test]
    fn drop_releases_without_signalling() {
        let (waker, counts) = mock_wakeable();
        drop(waker);
        assert_eq!(counts.wakeups(), 0);
        assert_eq!(counts.drops(), 1);
    }

    #[test]
    fn default_waker_is_inert() {
        let waker = Waker::default();
        assert!(waker.is_unwakeable());
        // Both consuming paths must be safe on the sentinel.
        waker.wakeup();
        drop(Waker::default());
    }

    #[test]
    fn equality_is_by_sink_identity() {
        let (a, _counts_a) = mock_wakeable();
        let (b, _counts_b) = mock_wakeable();
        assert_ne!(a, b);
        assert_eq!(Waker::default(), Waker::default());

        use std::collections::hash_map::DefaultHasher;
        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        Waker::default().hash(&mut ha);
        Waker::default().hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn moved_from_state_transfers_ownership() {
        let (waker, counts) = mock_wakeable();
        let moved = waker;
        moved.wakeup();
        assert_eq!(counts.wakeups(), 1);
        assert_eq!(counts.drops(), 0);
    }
}
