use crate::entry::Interned;
use crate::node::Node;
use crate::table::Table;
use crossbeam::epoch::{Guard, Shared};
use std::sync::atomic::Ordering;

/// Iterator over the live canonical instances of a [`ConsingMap`](crate::ConsingMap).
///
/// Walks the table that was current when iteration started. Entries interned
/// or dropped concurrently may or may not be observed; entries whose last
/// handle is already gone are skipped.
pub struct Iter<'g, T> {
    /// table snapshot; retired tables stay readable while `guard` is pinned
    table: Option<&'g Table<T>>,
    /// next bin to load once the current chain is exhausted
    bin_i: usize,
    node: Shared<'g, Node<T>>,
    guard: &'g Guard,
}

impl<'g, T> Iter<'g, T> {
    pub(crate) fn new(table: Shared<'g, Table<T>>, guard: &'g Guard) -> Self {
        Self {
            // SAFETY: the map only retires tables through the epoch, so a
            // table loaded under `guard` outlives it.
            table: unsafe { table.as_ref() },
            bin_i: 0,
            node: Shared::null(),
            guard,
        }
    }
}

impl<'g, T> Iterator for Iter<'g, T> {
    type Item = Interned<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // SAFETY: as above, chain nodes are retired through the epoch.
            if let Some(node) = unsafe { self.node.as_ref() } {
                self.node = node.next.load(Ordering::Acquire, self.guard);
                if let Some(entry) = node.key.upgrade() {
                    return Some(Interned::new(entry));
                }
                continue;
            }
            let table = self.table?;
            if self.bin_i >= table.len() {
                return None;
            }
            self.node = table.head(self.bin_i, self.guard);
            self.bin_i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::iter::Iter;
    use crate::table::Table;
    use crossbeam::epoch::{pin, Owned, Shared};

    #[test]
    fn iter_null_table() {
        let guard = &pin();
        let iter = Iter::<usize>::new(Shared::null(), guard);
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn iter_empty() {
        let table = Owned::new(Table::<usize>::new(16));
        let guard = &pin();
        let table = table.into_shared(guard);
        let iter = Iter::new(table, guard);
        assert_eq!(iter.count(), 0);
        // SAFETY: nothing holds on to references into the table anymore
        let _ = unsafe { table.into_owned() };
    }
}
