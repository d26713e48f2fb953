use crate::node::Node;
use crossbeam::epoch::{Atomic, CompareExchangeError, Guard, Pointer, Shared};
use std::sync::atomic::Ordering;

pub(crate) struct Table<T> {
    pub(crate) bins: Box<[Atomic<Node<T>>]>,
}

impl<T> Table<T> {
    pub(crate) fn new(len: usize) -> Self {
        debug_assert!(len.is_power_of_two());
        let bins: Vec<_> = (0..len).map(|_| Atomic::null()).collect();
        Self {
            bins: bins.into_boxed_slice(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.bins.len()
    }

    pub(crate) fn bin_index(&self, hash: u64) -> usize {
        // Fold the high bits down before masking, a power-of-two length only
        // ever looks at the low ones.
        let mixed = hash ^ (hash >> 16);
        let mask = self.bins.len() as u64 - 1;
        (mixed & mask) as usize
    }

    pub(crate) fn head<'g>(&self, bin_i: usize, guard: &'g Guard) -> Shared<'g, Node<T>> {
        self.bins[bin_i].load(Ordering::Acquire, guard)
    }

    pub(crate) fn compare_and_swap<'g, P>(
        &self,
        bin_i: usize,
        current: Shared<'_, Node<T>>,
        new: P,
        guard: &'g Guard,
    ) -> Result<Shared<'g, Node<T>>, CompareExchangeError<'g, Node<T>, P>>
    where
        P: Pointer<Node<T>>,
    {
        self.bins[bin_i].compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire, guard)
    }

    /// Only valid while the table is still private to the thread building it.
    pub(crate) fn store_bin(&self, bin_i: usize, new: Shared<'_, Node<T>>) {
        self.bins[bin_i].store(new, Ordering::Release);
    }

    /// Unlinks `target` from its chain.
    ///
    /// Inserters only ever swap the bucket head, so a failed swap on the head
    /// means a fresh node was prepended and the predecessor has to be found
    /// again. Interior `next` pointers are only rewritten here, and callers
    /// serialize unlinking per map. Returns `false` if `target` is not
    /// reachable from its bucket.
    pub(crate) fn unlink<'g>(&self, target: Shared<'g, Node<T>>, guard: &'g Guard) -> bool {
        // SAFETY: the caller claimed `target` from its slot, so it is still
        // linked and has not been handed to the epoch yet.
        let target_ref = unsafe { target.deref() };
        let bin_i = self.bin_index(target_ref.hash);
        loop {
            let successor = target_ref.next.load(Ordering::Acquire, guard);
            let head = self.head(bin_i, guard);
            if head == target {
                if self.compare_and_swap(bin_i, target, successor, guard).is_ok() {
                    return true;
                }
                continue;
            }
            let mut pred = head;
            loop {
                // SAFETY: see `find_live`, the guard keeps chain nodes alive.
                let Some(pred_ref) = (unsafe { pred.as_ref() }) else {
                    return false;
                };
                let next = pred_ref.next.load(Ordering::Acquire, guard);
                if next == target {
                    if pred_ref
                        .next
                        .compare_exchange(
                            target,
                            successor,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                            guard,
                        )
                        .is_ok()
                    {
                        return true;
                    }
                    break;
                }
                pred = next;
            }
        }
    }

    /// Frees every node still linked into the table.
    ///
    /// Requires exclusive access: no reader may hold a reference into the
    /// table or any of its chains.
    pub(crate) fn drop_bins(&mut self, guard: &Guard) {
        for bin in self.bins.iter() {
            let mut node = bin.swap(Shared::null(), Ordering::AcqRel, guard);
            while !node.is_null() {
                // SAFETY: exclusive access, nothing else can observe the node.
                let owned = unsafe { node.into_owned() };
                owned.key.owner.store(Shared::null(), Ordering::Release);
                node = owned.next.load(Ordering::Acquire, guard);
            }
        }
    }
}
