//! End-to-end pathfinding cache-hit scenario driven through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sim_core::handle::EntityHandle;
use sim_core::pathfinding::{PathfinderConfig, PathfinderService, RequestOutcome};
use sim_core::worker_pool::{Priority, WorkerPool};

#[test]
fn identical_path_request_hits_cache_on_second_call_with_matching_waypoints() {
    let mut service = PathfinderService::new(PathfinderConfig::default());
    // Open field with a corridor-free grid; gives the walker room to path.
    service.rebuild_grid([0.0, 0.0], 32, 32, |_, _| false);
    let pool = WorkerPool::new(2).unwrap();
    let requester = EntityHandle::new(0, 0);

    let first = Arc::new(Mutex::new(None));
    let f = first.clone();
    let outcome = service.request_path(requester, [50.0, 50.0], [500.0, 500.0], Priority::Normal, move |result| {
        *f.lock().unwrap() = Some(result);
    });
    assert!(matches!(outcome, RequestOutcome::Queued(_)));
    let stats = service.process_frame(&pool, 1.0 / 60.0);
    assert_eq!(stats.cache_misses, 1);
    let first_result = first.lock().unwrap().take().expect("first callback should fire");
    assert!(!first_result.path.is_empty());
    assert!(!first_result.from_cache);

    let second = Arc::new(Mutex::new(None));
    let s = second.clone();
    service.request_path(requester, [50.0, 50.0], [500.0, 500.0], Priority::Normal, move |result| {
        *s.lock().unwrap() = Some(result);
    });
    let stats = service.process_frame(&pool, 1.0 / 60.0);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 0);
    let second_result = second.lock().unwrap().take().expect("second callback should fire");
    assert!(second_result.from_cache);
    assert_eq!(second_result.path, first_result.path);

    pool.shutdown();
}

#[test]
fn cancelled_request_callback_never_runs() {
    let mut service = PathfinderService::new(PathfinderConfig::default());
    service.rebuild_grid([0.0, 0.0], 32, 32, |_, _| false);
    let pool = WorkerPool::new(2).unwrap();
    let requester = EntityHandle::new(1, 0);

    let invoked = Arc::new(AtomicUsize::new(0));
    let i = invoked.clone();
    let RequestOutcome::Queued(id) = service.request_path(requester, [0.0, 0.0], [64.0, 64.0], Priority::Normal, move |_| {
        i.fetch_add(1, Ordering::SeqCst);
    }) else {
        panic!("expected queued outcome");
    };
    service.cancel_request(id);
    let stats = service.process_frame(&pool, 1.0 / 60.0);
    assert_eq!(stats.cancelled, 1);
    pool.shutdown();
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}
