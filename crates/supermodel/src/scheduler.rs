#![forbid(unsafe_code)]

//! Next-tick task queue for deferred dispatch.
//!
//! Tasks are spawned onto a single-threaded [`LocalPool`] and only run when
//! the host calls [`Scheduler::run_pending`]. Each task is independent, so
//! no ordering between tasks spawned in the same turn is promised.
//!
//! A task that panics is isolated: the panic is caught, logged, and the
//! remaining tasks keep running.

use std::cell::RefCell;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};

use futures::FutureExt;
use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;

pub struct Scheduler {
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.pool.try_borrow_mut().is_err())
            .finish()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            pool: RefCell::new(pool),
            spawner,
        }
    }

    /// Run `task` on a later turn.
    pub fn defer(&self, label: &str, task: impl FnOnce() + 'static) {
        let label = label.to_owned();
        self.spawn(async move {
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                tracing::error!(task = %label, "deferred handler panicked");
            }
        });
    }

    /// Spawn a future that completes on some later turn.
    pub fn spawn(&self, fut: impl Future<Output = ()> + 'static) {
        let guarded = AssertUnwindSafe(fut).catch_unwind().map(|outcome| {
            if outcome.is_err() {
                tracing::error!("deferred task panicked");
            }
        });
        if let Err(err) = self.spawner.spawn_local(guarded) {
            tracing::warn!(error = %err, "scheduler refused deferred task");
        }
    }

    /// Drive every ready task until none can make progress.
    ///
    /// Returns `false` when called re-entrantly from inside a running task,
    /// in which case nothing is run.
    pub fn run_pending(&self) -> bool {
        let Ok(mut pool) = self.pool.try_borrow_mut() else {
            tracing::trace!("run_pending called from inside a deferred task; skipping");
            return false;
        };
        pool.run_until_stalled();
        true
    }
}
