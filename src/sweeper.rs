//! The process-wide background sweeper.
//!
//! One thread serves every map that opted into background sweeping. It only
//! holds weak handles, so a registered map is freed as soon as its last owner
//! drops it and is then forgotten on the next tick.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// Time between two passes over the registered maps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A map whose cleared entries can be unlinked.
pub(crate) trait Sweep: Send + Sync {
    /// Unlinks every node whose entry has been dropped so far and returns how
    /// many were removed.
    fn drain(&self) -> usize;
}

type Registry = Mutex<Vec<Weak<dyn Sweep>>>;

static SWEEPER: Lazy<Sweeper> = Lazy::new(Sweeper::start);

struct Sweeper {
    caches: Arc<Registry>,
}

impl Sweeper {
    fn start() -> Self {
        let caches: Arc<Registry> = Arc::default();
        let registry = Arc::clone(&caches);
        let spawned = thread::Builder::new()
            .name("consing-sweeper".into())
            .spawn(move || loop {
                thread::sleep(SWEEP_INTERVAL);
                tick(&registry);
            });
        if let Err(err) = spawned {
            // Maps keep working, they just hold on to dead nodes until a
            // manual sweep, an insert past the backlog limit or a resize
            // gets rid of them.
            log::error!("failed to start the sweeper thread: {err}");
        }
        Self { caches }
    }
}

pub(crate) fn register(cache: Weak<dyn Sweep>) {
    register_in(&SWEEPER.caches, cache);
}

/// Adds `cache` to `registry`, forgetting maps that are already gone so the
/// registry stays bounded even when no tick ever runs.
fn register_in(registry: &Registry, cache: Weak<dyn Sweep>) {
    let mut caches = registry.lock();
    caches.retain(|cache| cache.strong_count() > 0);
    caches.push(cache);
    log::trace!("registered map with the sweeper, {} tracked", caches.len());
}

/// One pass over `registry`: forget expired maps, drain the live ones.
///
/// A panic while draining one map is logged and does not keep the others
/// from being drained.
pub(crate) fn tick(registry: &Registry) -> usize {
    let live: Vec<Arc<dyn Sweep>> = {
        let mut caches = registry.lock();
        caches.retain(|cache| cache.strong_count() > 0);
        caches.iter().filter_map(Weak::upgrade).collect()
    };
    let mut unlinked = 0;
    for cache in live {
        match panic::catch_unwind(AssertUnwindSafe(|| cache.drain())) {
            Ok(n) => unlinked += n,
            Err(_) => log::error!("sweeping a map panicked, retrying on the next tick"),
        }
    }
    unlinked
}
