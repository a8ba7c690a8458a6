use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Error;

use super::*;

#[test]
fn test_all_indices_visited_once() {
  let n = 10_000;
  let visits: Vec<AtomicUsize> = (0..n).map(|_| AtomicUsize::new(0)).collect();
  parallel_for(n, |i| {
    visits[i].fetch_add(1, Ordering::Relaxed);
    Ok(())
  })
  .unwrap();
  assert!(visits.iter().all(|v| v.load(Ordering::Relaxed) == 1));
}

#[test]
fn test_first_error_wins_and_loop_drains() {
  let executed = AtomicUsize::new(0);
  let result = parallel_for(100_000, |i| {
    executed.fetch_add(1, Ordering::Relaxed);
    if i == 17 {
      Err(Error::numerical("index 17 failed"))
    } else {
      Ok(())
    }
  });
  let err = result.unwrap_err();
  assert!(matches!(err, Error::Worker(_)));
  assert!(err.to_string().contains("index 17 failed"));
  // the limit was zeroed, so only a small fraction of the loop ran
  assert!(executed.load(Ordering::Relaxed) < 100_000);
}

#[test]
fn test_panic_becomes_worker_error() {
  let result = parallel_for(1000, |i| {
    if i == 3 {
      panic!("worker blew up");
    }
    Ok(())
  });
  let err = result.unwrap_err();
  assert!(matches!(err, Error::Worker(_)));
  assert!(err.to_string().contains("worker blew up"));
}

#[test]
fn test_staggered_assigner_partition() {
  let n_total = 17;
  let n_procs = 4;
  let mut seen = vec![0usize; n_total];
  for rank in 0..n_procs {
    let assigner = StaggeredAssigner::new(n_total, rank, n_procs);
    for i in 0..assigner.n_values() {
      let abs = assigner.absolute_index(i);
      assert!(abs < n_total);
      assert_eq!(assigner.rank_for_index(abs), rank);
      seen[abs] += 1;
    }
  }
  // the ranks partition the index range exactly
  assert!(seen.iter().all(|&c| c == 1));
}

#[test]
fn test_staggered_assigner_empty_rank() {
  let assigner = StaggeredAssigner::new(2, 2, 3);
  assert_eq!(assigner.n_values(), 0);
}

#[test]
fn test_parallel_call_with_assigner() {
  let n_total = 1000;
  let sum = AtomicUsize::new(0);
  let assigner = StaggeredAssigner::new(n_total, 1, 2);
  parallel_call(&assigner, |i| {
    assert_eq!(i % 2, 1);
    sum.fetch_add(1, Ordering::Relaxed);
    Ok(())
  })
  .unwrap();
  assert_eq!(sum.load(Ordering::Relaxed), 500);
}

#[test]
fn test_thread_indices_are_stable_and_small() {
  assert_eq!(current_thread_index(), 0);
  let slots = thread_slot_count();
  let seen = std::sync::Mutex::new(std::collections::HashSet::new());
  parallel_for(10_000, |_| {
    let idx = current_thread_index();
    assert!(idx < slots);
    seen.lock().unwrap().insert(idx);
    Ok(())
  })
  .unwrap();
  assert!(!seen.lock().unwrap().is_empty());
}

#[test]
fn test_single_process_communicator() {
  let comm = SingleProcess;
  assert_eq!(comm.rank(), 0);
  assert!(!comm.is_multi_proc());
  comm.wait("test");
  let mut data = vec![1.0, 2.0];
  comm.broadcast(&mut data, 0);
  assert_eq!(data, vec![1.0, 2.0]);
}
