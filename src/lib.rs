//! A concurrent hash-consing cache.
//!
//! [`ConsingMap::intern`] returns the single canonical instance equal to a
//! candidate value, registering the candidate if no equal instance is alive.
//! Entries are held weakly: once every [`Interned`] handle to an instance is
//! dropped, the entry is reported to its map and unlinked by the sweeper.
//!
//! Lookups of present values never take a lock. Insertions publish a new
//! chain node with a compare-and-swap on the bucket head while holding the
//! shared side of a reader/writer lock whose exclusive side is only taken to
//! replace the bucket table on resize.
//!
//! ```
//! use consing_map::{ConsingMap, Interned};
//!
//! let map = ConsingMap::new();
//! let a = map.intern(String::from("node"));
//! let b = map.intern(String::from("node"));
//! assert!(Interned::ptr_eq(&a, &b));
//! ```

mod config;
mod entry;
mod error;
mod iter;
mod node;
mod sweeper;
mod table;

pub use crate::config::{Config, ConfigBuilder, ConfigBuilderError};
pub use crate::entry::Interned;
pub use crate::error::ConsError;
pub use crate::iter::Iter;
pub use crate::sweeper::SWEEP_INTERVAL;

use crate::entry::{ClearQueue, Entry};
use crate::node::Node;
use crate::sweeper::Sweep;
use crate::table::Table;
use crossbeam::epoch::{self, Atomic, Guard, Owned, Shared};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// The smallest bucket table length. Tables never shrink below it.
pub const MINIMAL_CAPACITY: usize = 16;

/// The largest bucket table length. Tables never grow beyond it.
pub const MAX_CAPACITY: usize = 1 << 30;

/// A drain that unlinks more nodes than this re-evaluates the table size.
const SHRINK_SWEEP_THRESHOLD: usize = 1024;

/// Table length to use for `projected` live entries in a table of `len`.
///
/// Grows once the fill ratio would exceed 0.8. Shrinks once it drops under a
/// quarter, leaving the smallest power of two able to hold `projected` twice.
fn resize_target(len: usize, projected: usize) -> usize {
    let target = if projected.saturating_mul(5) > len.saturating_mul(4) {
        len.saturating_mul(2)
    } else if len > MINIMAL_CAPACITY && projected < len / 4 {
        projected.next_power_of_two() << 1
    } else {
        len
    };
    target.clamp(MINIMAL_CAPACITY, MAX_CAPACITY)
}

/// A concurrent interning cache.
///
/// See the [crate-level documentation](index.html) for details.
pub struct ConsingMap<T, S = RandomState> {
    core: Arc<Core<T, S>>,
}

struct Core<T, S> {
    /// Current bucket table, replaced wholesale on resize. Never null until
    /// the map is dropped.
    table: Atomic<Table<T>>,
    /// Approximate number of linked nodes whose entry has not been claimed
    /// for removal. Only drives resizing.
    count: AtomicUsize,
    /// Shared by inserters and drains, exclusive while replacing `table`.
    resize_lock: RwLock<()>,
    /// Drains of the same map run one at a time.
    drain_lock: Mutex<()>,
    /// Entries push their slot here when their last handle is dropped.
    cleared: Arc<ClearQueue<T>>,
    hash_builder: S,
}

impl<T> Default for ConsingMap<T, RandomState>
where
    T: Hash + Eq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConsingMap<T, RandomState>
where
    T: Hash + Eq + Send + Sync + 'static,
{
    /// Creates an empty map with `MINIMAL_CAPACITY` buckets, registered with
    /// the background sweeper.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    /// Creates an empty map whose table starts with at least `n` buckets.
    pub fn with_capacity(n: usize) -> Self {
        Self::with_capacity_and_hasher(n, RandomState::new())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_config_and_hasher(config, RandomState::new())
    }
}

impl<T, S> ConsingMap<T, S>
where
    T: Hash + Eq + Send + Sync + 'static,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Creates an empty map which will use `hash_builder` to hash values.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_config_and_hasher(Config::default(), hash_builder)
    }

    pub fn with_capacity_and_hasher(n: usize, hash_builder: S) -> Self {
        let config = Config {
            initial_capacity: n,
            ..Config::default()
        };
        Self::with_config_and_hasher(config, hash_builder)
    }

    pub fn with_config_and_hasher(config: Config, hash_builder: S) -> Self {
        let core = Arc::new(Core {
            table: Atomic::new(Table::new(config.table_len())),
            count: AtomicUsize::new(0),
            resize_lock: RwLock::new(()),
            drain_lock: Mutex::new(()),
            cleared: Arc::new(ClearQueue::new()),
            hash_builder,
        });
        if config.background_sweep {
            let handle: Weak<Core<T, S>> = Arc::downgrade(&core);
            sweeper::register(handle);
        }
        Self { core }
    }

    /// Returns the canonical instance equal to `candidate`.
    ///
    /// If an equal instance is alive it is returned and `candidate` is
    /// dropped. Otherwise `candidate` becomes the canonical instance.
    ///
    /// Never blocks when an equal instance is present. A miss may wait for a
    /// concurrent resize to finish.
    pub fn intern(&self, candidate: T) -> Interned<T> {
        self.core.intern(candidate)
    }

    /// Like [`intern`](Self::intern), rejecting a missing candidate.
    pub fn get(&self, candidate: Option<T>) -> Result<Interned<T>, ConsError> {
        candidate
            .map(|candidate| self.intern(candidate))
            .ok_or(ConsError::InvalidArgument)
    }

    /// Unlinks the entries dropped so far on the calling thread and returns
    /// how many were removed. The background sweeper runs the same routine.
    pub fn sweep(&self) -> usize {
        self.core.drain()
    }

    /// Returns the canonical instance equal to `key` if one is alive, without
    /// inserting anything.
    pub fn lookup<Q>(&self, key: &Q) -> Option<Interned<T>>
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.core.hash(key);
        let guard = &epoch::pin();
        let table = self.core.table(guard);
        let head = table.head(table.bin_index(hash), guard);
        node::find_live(head, Shared::null(), hash, key, guard).map(Interned::new)
    }
}

impl<T, S> ConsingMap<T, S> {
    /// Approximate number of live entries.
    ///
    /// Entries whose last handle was dropped are counted until they are
    /// swept, and concurrent inserts may not be reflected yet.
    pub fn len(&self) -> usize {
        self.core.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current length of the bucket table.
    pub fn capacity(&self) -> usize {
        let guard = &epoch::pin();
        self.core.table(guard).len()
    }

    /// Iterates over the live canonical instances.
    pub fn iter<'g>(&'g self, guard: &'g Guard) -> Iter<'g, T> {
        Iter::new(self.core.table.load(Ordering::Acquire, guard), guard)
    }
}

impl<T, S> fmt::Debug for ConsingMap<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsingMap")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<T, S> Core<T, S> {
    fn table<'g>(&self, guard: &'g Guard) -> &'g Table<T> {
        let table = self.table.load(Ordering::Acquire, guard);
        // SAFETY: the table is never null while the map is alive, and
        // replaced tables are only destroyed through the epoch.
        unsafe { table.deref() }
    }

    /// Resizes the table if `incoming` more entries would put it outside the
    /// load factor bounds.
    ///
    /// The count includes dead nodes nobody has swept yet, so before settling
    /// on a new length those are unlinked and discounted. Otherwise a table
    /// full of dead entries would grow on one insert and shrink on the next.
    fn ensure_capacity(&self, incoming: usize, guard: &Guard) {
        let len = self.table(guard).len();
        if resize_target(len, self.count.load(Ordering::Relaxed) + incoming) == len {
            return;
        }
        let _exclusive = self.resize_lock.write();
        // Another thread may have resized while we waited for the lock.
        let table = self.table.load(Ordering::Acquire, guard);
        // SAFETY: see `table`.
        let table_ref = unsafe { table.deref() };
        let len = table_ref.len();
        if resize_target(len, self.count.load(Ordering::Relaxed) + incoming) == len {
            return;
        }
        self.purge(table_ref, guard);
        let target = resize_target(len, self.count.load(Ordering::Relaxed) + incoming);
        if target != len {
            self.rehash(table, target, guard);
        }
    }

    /// Unlinks every node of `table` whose entry is dead, claiming it so its
    /// pending notification becomes a no-op. Must hold the exclusive resize
    /// lock, which keeps drains out and makes this the only unlinker.
    fn purge(&self, table: &Table<T>, guard: &Guard) {
        let mut dead = 0;
        for bin_i in 0..table.len() {
            let mut node = table.head(bin_i, guard);
            // SAFETY: nodes are only destroyed through the epoch.
            while let Some(node_ref) = unsafe { node.as_ref() } {
                // Unlinking leaves the node's own `next` untouched.
                let next = node_ref.next.load(Ordering::Acquire, guard);
                if !node_ref.key.is_live() {
                    let claimed = node_ref.key.claim(guard);
                    if !claimed.is_null() && table.unlink(claimed, guard) {
                        // SAFETY: unlinked, readers still on it hold a guard.
                        unsafe { guard.defer_destroy(claimed) };
                        dead += 1;
                    }
                }
                node = next;
            }
        }
        if dead > 0 {
            self.count.fetch_sub(dead, Ordering::Relaxed);
            log::trace!("purged {dead} dead entries ahead of a resize");
        }
    }

    /// Moves every live node of `old` into a fresh table of `len` buckets.
    ///
    /// Slots are carried over and pointed at their new node. Entries that
    /// died since the purge are dropped and claimed here, so their pending
    /// notification becomes a no-op. Must hold the exclusive resize lock.
    fn rehash<'g>(&self, old: Shared<'g, Table<T>>, len: usize, guard: &'g Guard) {
        // SAFETY: see `table`.
        let old_ref = unsafe { old.deref() };
        let new_table = Table::new(len);
        let mut dead = 0;
        for bin_i in 0..old_ref.len() {
            let mut node = old_ref.head(bin_i, guard);
            // SAFETY: the exclusive lock keeps the chains still, and nodes
            // are only destroyed through the epoch.
            while let Some(node_ref) = unsafe { node.as_ref() } {
                let next = node_ref.next.load(Ordering::Acquire, guard);
                if node_ref.key.is_live() {
                    let new_i = new_table.bin_index(node_ref.hash);
                    let moved = Owned::new(Node::new(
                        node_ref.hash,
                        Arc::clone(&node_ref.key),
                        new_table.head(new_i, guard),
                    ))
                    .into_shared(guard);
                    new_table.store_bin(new_i, moved);
                    node_ref.key.owner.store(moved, Ordering::Release);
                } else if !node_ref.key.claim(guard).is_null() {
                    dead += 1;
                }
                // SAFETY: the node is unreachable once the new table is
                // published, readers still walking it hold a guard.
                unsafe { guard.defer_destroy(node) };
                node = next;
            }
        }
        if dead > 0 {
            self.count.fetch_sub(dead, Ordering::Relaxed);
        }
        let old = self.table.swap(Owned::new(new_table), Ordering::AcqRel, guard);
        // SAFETY: as above, the old table is no longer reachable from the map.
        unsafe { guard.defer_destroy(old) };
        log::debug!(
            "resized consing map from {} to {} buckets, dropped {} dead entries",
            old_ref.len(),
            len,
            dead
        );
    }
}

impl<T, S: BuildHasher> Core<T, S> {
    fn hash<Q: Hash + ?Sized>(&self, key: &Q) -> u64 {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }
}

impl<T, S> Core<T, S>
where
    T: Hash + Eq + Send + Sync,
    S: BuildHasher + Send + Sync,
{
    fn intern(&self, candidate: T) -> Interned<T> {
        let hash = self.hash(&candidate);
        let guard = &epoch::pin();
        let table = self.table.load(Ordering::Acquire, guard);
        // SAFETY: see `table`.
        let table_ref = unsafe { table.deref() };
        let head = table_ref.head(table_ref.bin_index(hash), guard);
        if let Some(entry) = node::find_live(head, Shared::null(), hash, &candidate, guard) {
            return Interned::new(entry);
        }
        self.insert(hash, candidate, table, head, guard)
    }

    /// Publishes `candidate` unless another thread publishes an equal value
    /// first, in which case that value is returned.
    ///
    /// `seen_table` and `seen_head` describe the chain the caller already
    /// searched, so only nodes prepended since then are searched again.
    fn insert<'g>(
        &self,
        hash: u64,
        candidate: T,
        mut seen_table: Shared<'g, Table<T>>,
        mut seen_head: Shared<'g, Node<T>>,
        guard: &'g Guard,
    ) -> Interned<T> {
        self.relieve_backlog();
        let entry = Entry::new(candidate, Arc::downgrade(&self.cleared));
        loop {
            self.ensure_capacity(1, guard);
            let table = self.table.load(Ordering::Acquire, guard);
            // SAFETY: see `table`.
            let table_ref = unsafe { table.deref() };
            let bin_i = table_ref.bin_index(hash);
            let head = table_ref.head(bin_i, guard);
            if table != seen_table || head != seen_head {
                // After a resize the whole chain is new to us.
                let stop = if table == seen_table {
                    seen_head
                } else {
                    Shared::null()
                };
                if let Some(winner) = node::find_live(head, stop, hash, &entry.value, guard) {
                    return Interned::new(winner);
                }
                seen_table = table;
                seen_head = head;
            }
            let node = Owned::new(Node::new(hash, Arc::clone(entry.slot()), head));
            let _shared = self.resize_lock.read();
            if self.table.load(Ordering::Acquire, guard) != table {
                continue;
            }
            if let Ok(node) = table_ref.compare_and_swap(bin_i, head, node, guard) {
                self.count.fetch_add(1, Ordering::Relaxed);
                entry.slot().owner.store(node, Ordering::Release);
                return Interned::new(entry);
            }
        }
    }
}

impl<T, S> Sweep for Core<T, S>
where
    T: Send + Sync,
    S: Send + Sync,
{
    fn drain(&self) -> usize {
        self.drain_serialized(self.drain_lock.lock())
    }
}

impl<T, S> Core<T, S>
where
    T: Send + Sync,
    S: Send + Sync,
{
    /// Drains on the inserting thread once enough dropped entries piled up.
    ///
    /// Maps without the background sweeper rely on this to keep the
    /// notification queue, and the entry allocations it keeps alive, bounded.
    /// Skipped if another drain is already running.
    fn relieve_backlog(&self) {
        if self.cleared.len() <= SHRINK_SWEEP_THRESHOLD {
            return;
        }
        if let Some(serial) = self.drain_lock.try_lock() {
            self.drain_serialized(serial);
        }
    }

    fn drain_serialized(&self, _serial: MutexGuard<'_, ()>) -> usize {
        // Entries dropped while we drain wait for the next pass.
        let pending = self.cleared.len();
        if pending == 0 {
            return 0;
        }
        let guard = &epoch::pin();
        let mut claimed = 0;
        {
            let _shared = self.resize_lock.read();
            let table = self.table(guard);
            for _ in 0..pending {
                let Some(slot) = self.cleared.pop() else {
                    break;
                };
                let node = slot.claim(guard);
                if node.is_null() {
                    // never published, or already removed
                    continue;
                }
                claimed += 1;
                let unlinked = table.unlink(node, guard);
                debug_assert!(unlinked, "claimed node missing from its chain");
                if unlinked {
                    // SAFETY: unlinked, readers still on it hold a guard.
                    unsafe { guard.defer_destroy(node) };
                }
            }
        }
        if claimed > 0 {
            self.count.fetch_sub(claimed, Ordering::Relaxed);
        }
        if claimed > SHRINK_SWEEP_THRESHOLD {
            self.ensure_capacity(0, guard);
        }
        log::trace!("swept {claimed} of {pending} cleared entries");
        claimed
    }
}

impl<T, S> Drop for Core<T, S> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no reader, inserter or drain can still
        // reach the table.
        let guard = unsafe { epoch::unprotected() };
        let table = self.table.swap(Shared::null(), Ordering::AcqRel, guard);
        if table.is_null() {
            return;
        }
        // SAFETY: same as above, and we own the table.
        let mut table = unsafe { table.into_owned() }.into_box();
        table.drop_bins(guard);
    }
}
