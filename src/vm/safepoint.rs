//! Stop-the-world safepoint coordination
//!
//! Workers call [`SafepointCoordinator::poll`] between bytecode instructions
//! (and whenever otherwise idle). A pending stop request blocks the calling
//! thread until the coordinator is resumed, giving the requester - typically
//! a GC cycle or a snapshot - a window where every worker is parked and no
//! mutator thread is touching the heap.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Why the world was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A garbage collection cycle needs every worker parked
    GarbageCollection,
    /// A snapshot is being taken of VM state
    Snapshot,
}

struct State {
    stopped: bool,
    reason: Option<StopReason>,
    parked: usize,
    stop_started_at: Option<Instant>,
}

/// Coordinates stop-the-world pauses across a fixed set of worker threads
pub struct SafepointCoordinator {
    worker_count: AtomicUsize,
    stop_requested: AtomicBool,
    parked_count: AtomicUsize,
    state: Mutex<State>,
    resumed: Condvar,
    all_parked: Condvar,
    pause_count: AtomicU64,
    pause_time_ns: AtomicU64,
    max_pause_ns: AtomicU64,
}

impl SafepointCoordinator {
    /// Create a coordinator for the given number of workers
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: AtomicUsize::new(worker_count),
            stop_requested: AtomicBool::new(false),
            parked_count: AtomicUsize::new(0),
            state: Mutex::new(State {
                stopped: false,
                reason: None,
                parked: 0,
                stop_started_at: None,
            }),
            resumed: Condvar::new(),
            all_parked: Condvar::new(),
            pause_count: AtomicU64::new(0),
            pause_time_ns: AtomicU64::new(0),
            max_pause_ns: AtomicU64::new(0),
        }
    }

    /// Request that every worker park at its next poll, for the given reason
    ///
    /// Blocks the calling thread until all `worker_count` workers have
    /// parked, or until `timeout` elapses (whichever comes first).
    pub fn request_stop(&self, reason: StopReason, timeout: Duration) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            state.stopped = true;
            state.reason = Some(reason);
            state.stop_started_at = Some(Instant::now());
        }
        self.stop_requested.store(true, Ordering::SeqCst);

        let worker_count = self.worker_count.load(Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let (_guard, result) = self
            .all_parked
            .wait_timeout_while(state, timeout, |s| s.parked < worker_count)
            .unwrap();
        !result.timed_out()
    }

    /// Resume every parked worker
    pub fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = false;
        state.reason = None;
        if let Some(started_at) = state.stop_started_at.take() {
            let elapsed_ns = started_at.elapsed().as_nanos() as u64;
            self.pause_count.fetch_add(1, Ordering::SeqCst);
            self.pause_time_ns.fetch_add(elapsed_ns, Ordering::SeqCst);
            self.max_pause_ns.fetch_max(elapsed_ns, Ordering::SeqCst);
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        self.resumed.notify_all();
    }

    /// Called by a worker between instructions; parks if a stop is pending
    ///
    /// Returns immediately if no stop has been requested.
    pub fn poll(&self) {
        if !self.stop_requested.load(Ordering::SeqCst) {
            return;
        }

        let worker_count = self.worker_count.load(Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if !state.stopped {
            return;
        }

        state.parked += 1;
        self.parked_count.fetch_add(1, Ordering::SeqCst);
        if state.parked >= worker_count {
            self.all_parked.notify_all();
        }

        let _state = self
            .resumed
            .wait_while(state, |s| s.stopped)
            .unwrap();
        self.parked_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Whether a stop is currently pending or in effect
    pub fn is_stopped(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Alias for [`SafepointCoordinator::is_stopped`]
    pub fn is_pause_pending(&self) -> bool {
        self.is_stopped()
    }

    /// The reason the world is currently stopped, if any
    pub fn current_reason(&self) -> Option<StopReason> {
        self.state.lock().unwrap().reason
    }

    /// Number of workers currently parked at a safepoint
    pub fn parked_count(&self) -> usize {
        self.parked_count.load(Ordering::SeqCst)
    }

    /// Alias for [`SafepointCoordinator::parked_count`]
    pub fn workers_at_safepoint(&self) -> usize {
        self.parked_count()
    }

    /// The number of workers this coordinator expects to park
    pub fn worker_count(&self) -> usize {
        self.worker_count.load(Ordering::SeqCst)
    }

    /// Register an additional worker the coordinator should expect to park
    pub fn register_worker(&self) {
        self.worker_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Deregister a worker that has shut down
    pub fn deregister_worker(&self) {
        self.worker_count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Pause statistics: `(pause count, total pause time in nanoseconds, longest single pause in nanoseconds)`
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.pause_count.load(Ordering::SeqCst),
            self.pause_time_ns.load(Ordering::SeqCst),
            self.max_pause_ns.load(Ordering::SeqCst),
        )
    }

    /// Reset pause statistics to zero
    pub fn reset_stats(&self) {
        self.pause_count.store(0, Ordering::SeqCst);
        self.pause_time_ns.store(0, Ordering::SeqCst);
        self.max_pause_ns.store(0, Ordering::SeqCst);
    }
}
