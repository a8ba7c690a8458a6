//! Chunked parallel execution with first-error capture.
//!
//! The engine distributes loop indices over the long-lived rayon pool: a
//! broadcast wakes every worker, a monotonic atomic counter dispenses
//! indices, and the first worker that fails stores its error and zeroes the
//! shared limit so the others drain quickly. After the join the stored error
//! is returned on the calling thread. Panics in a body are converted into
//! fatal worker errors.
//!
//! `ProcessAssigner` selects the subset of indices this process handles when
//! several processes cooperate; `Communicator` provides the barrier and
//! broadcast they synchronize with (a single-process no-op by default).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Maps the loop indices `[0, n_values)` of one process onto absolute
/// indices of the global problem.
pub trait ProcessAssigner: Send + Sync {
  /// Number of indices this process handles.
  fn n_values(&self) -> usize;

  /// Absolute index for local index `i`.
  fn absolute_index(&self, i: usize) -> usize;

  /// Whether the local indices may be spread over the thread pool; when
  /// false the calling thread executes all of them.
  fn parallel(&self) -> bool {
    true
  }
}

/// All indices belong to this process.
pub struct SequentialAssigner {
  n: usize,
}

impl SequentialAssigner {
  /// Assign all of `[0, n)`.
  pub fn new(n: usize) -> Self {
    Self { n }
  }
}

impl ProcessAssigner for SequentialAssigner {
  fn n_values(&self) -> usize {
    self.n
  }

  fn absolute_index(&self, i: usize) -> usize {
    i
  }
}

/// Deal absolute indices round-robin over the cooperating processes, so
/// neighboring indices land on different processes.
pub struct StaggeredAssigner {
  rank: usize,
  n_procs: usize,
  n_total: usize,
}

impl StaggeredAssigner {
  /// Assign every `n_procs`-th index of `[0, n_total)` starting at `rank`.
  pub fn new(n_total: usize, rank: usize, n_procs: usize) -> Self {
    debug_assert!(rank < n_procs.max(1));
    Self { rank, n_procs: n_procs.max(1), n_total }
  }

  /// The rank that handles absolute index `value`.
  pub fn rank_for_index(&self, value: usize) -> usize {
    value % self.n_procs
  }
}

impl ProcessAssigner for StaggeredAssigner {
  fn n_values(&self) -> usize {
    if self.rank < self.n_total {
      (self.n_total - self.rank).div_ceil(self.n_procs)
    } else {
      0
    }
  }

  fn absolute_index(&self, i: usize) -> usize {
    self.rank + i * self.n_procs
  }
}

/// Barrier/broadcast contract supplied by the concurrency host when several
/// processes cooperate.
pub trait Communicator: Send + Sync {
  /// Rank of this process.
  fn rank(&self) -> usize;

  /// Number of cooperating processes.
  fn size(&self) -> usize;

  /// True when more than one process cooperates.
  fn is_multi_proc(&self) -> bool {
    self.size() > 1
  }

  /// Block until all processes reach the same point.
  fn wait(&self, scope: &str);

  /// Replace `data` on every process with the values held by `root`.
  fn broadcast(&self, data: &mut [f64], root: usize);
}

/// The trivial single-process communicator.
pub struct SingleProcess;

impl Communicator for SingleProcess {
  fn rank(&self) -> usize {
    0
  }

  fn size(&self) -> usize {
    1
  }

  fn wait(&self, _scope: &str) {}

  fn broadcast(&self, _data: &mut [f64], _root: usize) {}
}

/// Stable small index of the current thread within the pool: 0 for the
/// calling thread, 1-based for pool workers. Used to address thread-local
/// observer queues.
pub fn current_thread_index() -> usize {
  match rayon::current_thread_index() {
    Some(i) => i + 1,
    None => 0,
  }
}

/// Number of distinct thread indices `current_thread_index` can produce.
pub fn thread_slot_count() -> usize {
  rayon::current_num_threads() + 1
}

/// Run `body` for every index of `assigner`, spread over the thread pool.
///
/// The first failing index aborts the loop: its error is stored, the shared
/// limit drops to zero so other workers finish their current index and stop,
/// and the error is re-raised here after the pool drains.
pub fn parallel_call(
  assigner: &dyn ProcessAssigner,
  body: impl Fn(usize) -> Result<()> + Sync,
) -> Result<()> {
  let n = assigner.n_values();
  if n == 0 {
    return Ok(());
  }

  if !assigner.parallel() || rayon::current_num_threads() < 2 {
    for i in 0..n {
      body(assigner.absolute_index(i))?;
    }
    return Ok(());
  }

  let next = AtomicUsize::new(0);
  let limit = AtomicUsize::new(n);
  let failure: Mutex<Option<Error>> = Mutex::new(None);

  let report = |error: Error| {
    let mut slot = failure.lock().expect("worker failure lock");
    // only the first error is kept; taking away the remaining work makes
    // the other workers drain quickly
    if slot.is_none() {
      *slot = Some(error);
      limit.store(0, Ordering::Relaxed);
    }
  };

  rayon::broadcast(|_| loop {
    let i = next.fetch_add(1, Ordering::Relaxed);
    if i >= limit.load(Ordering::Relaxed) {
      break;
    }
    match catch_unwind(AssertUnwindSafe(|| body(assigner.absolute_index(i)))) {
      Ok(Ok(())) => {}
      Ok(Err(error)) => report(error),
      Err(panic) => {
        let msg = panic
          .downcast_ref::<&str>()
          .map(|s| s.to_string())
          .or_else(|| panic.downcast_ref::<String>().cloned())
          .unwrap_or_else(|| "unhandled panic in a parallel worker".to_string());
        report(Error::Worker(msg));
      }
    }
  });

  match failure.into_inner().expect("worker failure lock") {
    Some(Error::Worker(msg)) => Err(Error::Worker(msg)),
    Some(other) => Err(Error::Worker(other.to_string())),
    None => Ok(()),
  }
}

/// Convenience wrapper: run `body` over all of `[0, n)`.
pub fn parallel_for(n: usize, body: impl Fn(usize) -> Result<()> + Sync) -> Result<()> {
  parallel_call(&SequentialAssigner::new(n), body)
}

#[cfg(test)]
#[path = "parallel_test.rs"]
mod parallel_test;
