use crate::node::Slot;
use crossbeam::queue::SegQueue;
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Weak};

/// Slots whose entry has been dropped, waiting to be unlinked.
pub(crate) type ClearQueue<T> = SegQueue<Arc<Slot<T>>>;

pub(crate) struct Entry<T> {
    pub(crate) value: T,
    slot: Arc<Slot<T>>,
    cleared: Weak<ClearQueue<T>>,
}

impl<T> Entry<T> {
    pub(crate) fn new(value: T, cleared: Weak<ClearQueue<T>>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            value,
            slot: Arc::new(Slot::new(this.clone())),
            cleared,
        })
    }

    pub(crate) fn slot(&self) -> &Arc<Slot<T>> {
        &self.slot
    }
}

impl<T> Drop for Entry<T> {
    fn drop(&mut self) {
        // The map may already be gone, in which case there is nothing to sweep.
        if let Some(cleared) = self.cleared.upgrade() {
            cleared.push(Arc::clone(&self.slot));
        }
    }
}

/// The canonical instance of an equivalence class.
///
/// Every `Interned<T>` obtained from the same map for equal values points to
/// the same allocation for as long as one of them is alive. Once the last one
/// is dropped the entry is evicted from the map.
pub struct Interned<T>(Arc<Entry<T>>);

impl<T> Interned<T> {
    pub(crate) fn new(entry: Arc<Entry<T>>) -> Self {
        Self(entry)
    }

    #[cfg(test)]
    pub(crate) fn entry(&self) -> &Arc<Entry<T>> {
        &self.0
    }

    /// Returns `true` if both handles refer to the same canonical instance.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.0, &other.0)
    }

    /// Number of live handles to this instance.
    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.0)
    }
}

impl<T> Clone for Interned<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Deref for Interned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0.value
    }
}

impl<T> AsRef<T> for Interned<T> {
    fn as_ref(&self) -> &T {
        &self.0.value
    }
}

impl<T> Borrow<T> for Interned<T> {
    fn borrow(&self) -> &T {
        &self.0.value
    }
}

impl<T: PartialEq> PartialEq for Interned<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other) || self.0.value == other.0.value
    }
}

impl<T: Eq> Eq for Interned<T> {}

impl<T: Hash> Hash for Interned<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.value.hash(state)
    }
}

impl<T: fmt::Debug> fmt::Debug for Interned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0.value, f)
    }
}

impl<T: fmt::Display> fmt::Display for Interned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.value, f)
    }
}

#[cfg(test)]
mod tests {
    use super::{ClearQueue, Entry, Interned};
    use std::sync::Arc;

    #[test]
    fn drop_reports_slot() {
        let cleared = Arc::new(ClearQueue::<u32>::new());
        let entry = Entry::new(7, Arc::downgrade(&cleared));
        let slot = Arc::clone(entry.slot());
        assert!(slot.is_live());
        drop(entry);
        assert!(!slot.is_live());
        let reported = cleared.pop().unwrap();
        assert!(Arc::ptr_eq(&reported, &slot));
        assert!(cleared.pop().is_none());
    }

    #[test]
    fn drop_without_map() {
        let cleared = Arc::new(ClearQueue::<u32>::new());
        let entry = Entry::new(7, Arc::downgrade(&cleared));
        drop(cleared);
        // Nothing to report to, must not panic.
        drop(entry);
    }

    #[test]
    fn equality_falls_back_to_value() {
        let cleared = Arc::new(ClearQueue::<&str>::new());
        let a = Interned::new(Entry::new("x", Arc::downgrade(&cleared)));
        let b = Interned::new(Entry::new("x", Arc::downgrade(&cleared)));
        assert_eq!(a, b);
        assert!(!Interned::ptr_eq(&a, &b));
        let c = a.clone();
        assert!(Interned::ptr_eq(&a, &c));
        assert_eq!(Interned::strong_count(&a), 2);
    }
}
