//! Ambient per-activity context values.
//!
//! An activity is parameterised at construction by a tuple of
//! [`ContextHolder`]s, one per context kind. For the duration of every
//! poll the holders are installed onto a thread-local spine, and the
//! promise body reads them back by type with [`with_context`] — no
//! need to thread them through every call. The set of kinds is fixed
//! when the activity is built; there is no dynamic registration.

use smallvec::SmallVec;
use std::any::TypeId;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

/// One ambient value, held by an activity for its whole lifetime.
///
/// The variants mirror the ways a value can be handed to an activity:
/// owned inline, owned on the heap, shared, or borrowed from static
/// data.
pub enum ContextHolder<C: 'static> {
    Owned(C),
    Boxed(Box<C>),
    Shared(Arc<C>),
    Static(&'static C),
}

impl<C: 'static> ContextHolder<C> {
    /// Hold `value` inline.
    pub fn owned(value: C) -> ContextHolder<C> {
        ContextHolder::Owned(value)
    }

    /// Hold a heap-owned value, released when the activity is freed.
    pub fn boxed(value: Box<C>) -> ContextHolder<C> {
        ContextHolder::Boxed(value)
    }

    /// Hold one share of `value`.
    pub fn shared(value: Arc<C>) -> ContextHolder<C> {
        ContextHolder::Shared(value)
    }

    /// Borrow a value that outlives every activity.
    pub fn borrowed(value: &'static C) -> ContextHolder<C> {
        ContextHolder::Static(value)
    }

    fn get(&self) -> &C {
        match self {
            ContextHolder::Owned(value) => value,
            ContextHolder::Boxed(value) => value,
            ContextHolder::Shared(value) => value,
            ContextHolder::Static(value) => value,
        }
    }
}

struct AmbientEntry {
    kind: TypeId,
    value: NonNull<()>,
}

thread_local! {
    /// Stack of contexts installed by the polls on this thread's
    /// stack. Entries of an inner poll shadow an outer poll's entries
    /// of the same kind.
    static AMBIENT: RefCell<SmallVec<[AmbientEntry; 8]>> = RefCell::new(SmallVec::new());
}

/// Bundle of ambient values installed for every poll of an activity.
///
/// Implemented for `()` and for tuples of [`ContextHolder`]s. The
/// tuple shape fixes the context kinds at activity construction.
pub trait ContextSet: Send + 'static {
    /// Push this set's values onto the thread's ambient stack; the
    /// returned guard pops them again when the poll ends.
    fn install(&self) -> ContextGuard<'_>;
}

/// Scoped installation of a [`ContextSet`]; pops the installed
/// entries on drop, restoring whatever an enclosing poll had in
/// scope.
pub struct ContextGuard<'a> {
    installed: usize,
    _set: PhantomData<&'a ()>,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        AMBIENT.with(|spine| {
            let mut spine = spine.borrow_mut();
            let len = spine.len();
            debug_assert!(len >= self.installed, "ambient context stack corrupted");
            spine.truncate(len - self.installed);
        });
    }
}

fn push_entry<C: 'static>(value: &C) {
    AMBIENT.with(|spine| {
        spine.borrow_mut().push(AmbientEntry {
            kind: TypeId::of::<C>(),
            value: NonNull::from(value).cast(),
        });
    });
}

impl ContextSet for () {
    fn install(&self) -> ContextGuard<'_> {
        ContextGuard {
            installed: 0,
            _set: PhantomData,
        }
    }
}

macro_rules! impl_context_set {
    ($($kind:ident),+) => {
        impl<$($kind: Send + Sync + 'static),+> ContextSet for ($(ContextHolder<$kind>,)+) {
            fn install(&self) -> ContextGuard<'_> {
                #[allow(non_snake_case)]
                let ($($kind,)+) = self;
                let mut installed = 0;
                $(
                    push_entry($kind.get());
                    installed += 1;
                )+
                ContextGuard {
                    installed,
                    _set: PhantomData,
                }
            }
        }
    };
}

impl_context_set!(A);
impl_context_set!(A, B);
impl_context_set!(A, B, C);
impl_context_set!(A, B, C, D);

/// Runs `f` with the ambient value of kind `C`.
///
/// # Panics
///
/// Panics when no `C` is in scope, i.e. outside a poll of an activity
/// carrying one.
pub fn with_context<C: 'static, R>(f: impl FnOnce(&C) -> R) -> R {
    try_with_context(f).expect("no ambient context of the requested kind is in scope")
}

/// Like [`with_context`], but returns `None` when no `C` is in scope.
///
/// Lookup scans from the innermost poll outwards, so a nested
/// activity's contexts shadow the enclosing activity's.
pub fn try_with_context<C: 'static, R>(f: impl FnOnce(&C) -> R) -> Option<R> {
    let found = AMBIENT.with(|spine| {
        spine
            .borrow()
            .iter()
            .rev()
            .find(|entry| entry.kind == TypeId::of::<C>())
            .map(|entry| entry.value)
    });
    // The spine borrow is released before `f` runs so the body may
    // itself read contexts or enter a nested activity.
    found.map(|value| {
        // Safety: the entry was pushed from a live `&C` by a
        // ContextGuard further up this thread's stack, so the value
        // outlives this call; the reference cannot escape `f`.
        let value = unsafe { value.cast::<C>().as_ref() };
        f(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Deadline(u64);

    #[derive(Debug, PartialEq)]
    struct Peer(&'static str);

    #[test]
    fn installed_contexts_are_readable_by_kind() {
        let set = (
            ContextHolder::owned(Deadline(90)),
            ContextHolder::shared(Arc::new(Peer("alpha"))),
        );
        let guard = set.install();

        assert_eq!(with_context(|d: &Deadline| d.0), 90);
        assert_eq!(with_context(|p: &Peer| p.0), "alpha");
        assert!(try_with_context(|_: &String| ()).is_none());

        drop(guard);
        assert!(try_with_context(|_: &Deadline| ()).is_none());
    }

    #[test]
    fn inner_scope_shadows_outer_scope() {
        let outer = (ContextHolder::owned(Deadline(1)),);
        let _outer = outer.install();
        assert_eq!(with_context(|d: &Deadline| d.0), 1);

        {
            let inner = (ContextHolder::boxed(Box::new(Deadline(2))),);
            let _inner = inner.install();
            assert_eq!(with_context(|d: &Deadline| d.0), 2);
        }

        // The outer value is visible again once the inner poll ends.
        assert_eq!(with_context(|d: &Deadline| d.0), 1);
    }

    #[test]
    fn static_holders_borrow_without_ownership() {
        static PEER: Peer = Peer("static");
        let set = (ContextHolder::borrowed(&PEER),);
        let _guard = set.install();
        assert_eq!(with_context(|p: &Peer| p.0), "static");
    }

    #[test]
    fn empty_set_installs_nothing() {
        let _guard = ().install();
        assert!(try_with_context(|_: &Deadline| ()).is_none());
    }
}
