//! Cancellable task handles and releasable resources.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// A cancellable unit of work or a releasable resource.
///
/// `dispose` is idempotent and may be called from any thread; once
/// `is_disposed` reports `true` it never reports `false` again.
pub trait Disposable: Send + Sync {
    /// Cancel or release the underlying resource.
    fn dispose(&self);

    /// Whether the resource has been disposed.
    fn is_disposed(&self) -> bool {
        false
    }
}

/// Shared handle returned by every scheduling call.
pub type DisposableRef = Arc<dyn Disposable>;

/// A disposable that only tracks its own disposed flag.
#[derive(Debug, Default)]
pub struct SimpleDisposable {
    disposed: AtomicBool,
}

impl SimpleDisposable {
    /// Create an active disposable.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            disposed: AtomicBool::new(false),
        }
    }
}

impl Disposable for SimpleDisposable {
    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// A set of disposables released together.
///
/// Once disposed, the composite disposes anything added to it afterwards and
/// reports the addition as refused.
pub struct CompositeDisposable {
    // None once disposed
    members: Mutex<Option<Vec<DisposableRef>>>,
}

impl CompositeDisposable {
    /// Create an empty, active composite.
    #[must_use]
    pub fn new() -> Self {
        Self {
            members: Mutex::new(Some(Vec::new())),
        }
    }

    /// Add a member. Returns `false` and disposes `member` if the composite
    /// is already disposed.
    pub fn add(&self, member: DisposableRef) -> bool {
        {
            let mut members = self.members.lock();
            if let Some(list) = members.as_mut() {
                list.push(member);
                return true;
            }
        }
        member.dispose();
        false
    }

    /// Detach a member without disposing it. Returns whether it was present.
    pub fn remove(&self, member: &DisposableRef) -> bool {
        self.remove_addr(Arc::as_ptr(member).cast::<()>())
    }

    /// Detach the member living at `target`, used by members removing
    /// themselves without holding their own `Arc`.
    pub(crate) fn remove_addr(&self, target: *const ()) -> bool {
        let mut members = self.members.lock();
        let Some(list) = members.as_mut() else {
            return false;
        };
        match list.iter().position(|m| std::ptr::addr_eq(Arc::as_ptr(m), target)) {
            Some(idx) => {
                list.swap_remove(idx);
                true
            }
            None => false,
        }
    }

    /// Number of live members.
    pub fn size(&self) -> usize {
        self.members.lock().as_ref().map_or(0, Vec::len)
    }
}

impl Disposable for CompositeDisposable {
    fn dispose(&self) {
        let taken = self.members.lock().take();
        if let Some(list) = taken {
            for member in list {
                member.dispose();
            }
        }
    }

    fn is_disposed(&self) -> bool {
        self.members.lock().is_none()
    }
}

impl Default for CompositeDisposable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CompositeDisposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeDisposable")
            .field("size", &self.size())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Slot holding the executor future of a submitted sub-task.
///
/// Setting a future after the slot was disposed cancels that future right
/// away, so a late submission can never outlive its owner.
pub(crate) struct FutureSlot(Mutex<SlotState>);

enum SlotState {
    Empty,
    Set(DisposableRef),
    Disposed,
}

impl FutureSlot {
    pub(crate) const fn new() -> Self {
        Self(Mutex::new(SlotState::Empty))
    }

    pub(crate) fn set(&self, future: DisposableRef) {
        let mut state = self.0.lock();
        if matches!(*state, SlotState::Disposed) {
            drop(state);
            future.dispose();
        } else {
            *state = SlotState::Set(future);
        }
    }

    pub(crate) fn dispose(&self) {
        let previous = std::mem::replace(&mut *self.0.lock(), SlotState::Disposed);
        if let SlotState::Set(future) = previous {
            future.dispose();
        }
    }
}
