use crate::entry::Entry;
use crossbeam::epoch::{Atomic, Guard, Shared};
use std::borrow::Borrow;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

/// Weak handle to an interned entry.
///
/// The slot outlives the node that links it: a resize rebuilds nodes but
/// moves the same slot into the new chain, so a clearing notification that
/// is already queued still resolves to the node currently holding it.
pub(crate) struct Slot<T> {
    pub(crate) referent: Weak<Entry<T>>,
    /// Back-pointer to the node linking this slot. Null before the node is
    /// published and again once the node has been claimed for removal.
    pub(crate) owner: Atomic<Node<T>>,
}

impl<T> Slot<T> {
    pub(crate) fn new(referent: Weak<Entry<T>>) -> Self {
        Self {
            referent,
            owner: Atomic::null(),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.referent.strong_count() > 0
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<Entry<T>>> {
        self.referent.upgrade()
    }

    /// Takes the owning node out of the slot.
    ///
    /// At most one caller ever observes a non-null node here, which is what
    /// makes removal idempotent when the same slot is reported twice.
    pub(crate) fn claim<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<T>> {
        self.owner.swap(Shared::null(), Ordering::AcqRel, guard)
    }
}

pub(crate) struct Node<T> {
    pub(crate) hash: u64,
    pub(crate) key: Arc<Slot<T>>,
    pub(crate) next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    pub(crate) fn new(hash: u64, key: Arc<Slot<T>>, next: Shared<'_, Node<T>>) -> Self {
        Self {
            hash,
            key,
            next: Atomic::from(next),
        }
    }
}

/// Walks a chain from `node` up to (not including) `stop` and returns the
/// first live entry equal to `key`.
///
/// A slot whose referent can no longer be upgraded is treated as cleared
/// even if its notification has not been processed yet.
pub(crate) fn find_live<'g, T, Q>(
    mut node: Shared<'g, Node<T>>,
    stop: Shared<'g, Node<T>>,
    hash: u64,
    key: &Q,
    guard: &'g Guard,
) -> Option<Arc<Entry<T>>>
where
    T: Borrow<Q>,
    Q: Eq + ?Sized,
{
    while node != stop {
        // SAFETY: nodes reachable from a table are only destroyed through the
        // epoch, and `guard` keeps the current epoch pinned.
        let node_ref = unsafe { node.as_ref() }?;
        if node_ref.hash == hash {
            if let Some(entry) = node_ref.key.upgrade() {
                if entry.value.borrow() == key {
                    return Some(entry);
                }
            }
        }
        node = node_ref.next.load(Ordering::Acquire, guard);
    }
    None
}
