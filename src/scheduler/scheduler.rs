//! Work-stealing scheduler: owns the worker pool and the state they share
//!
//! Mirrors a Go-style runtime's `GOMAXPROCS` worker pool: a fixed set of
//! OS threads (`Worker`), each with its own LIFO deque, steal from each
//! other and from a shared global injector. Spawning a Task just pushes it
//! onto the injector; whichever worker's local queue empties first will
//! pick it up.

use crate::bytecode::Module;
use crate::scheduler::preempt::{PreemptMonitor, DEFAULT_PREEMPT_THRESHOLD};
use crate::scheduler::{Task, TaskHandle, TaskId, TaskState, Worker};
use crate::value::Value;
use crate::vm::SafepointCoordinator;
use crossbeam_deque::{Injector, Worker as CWorker};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;

/// Configurable limits for a [`Scheduler`]
#[derive(Debug, Clone)]
pub struct SchedulerLimits {
    /// Number of worker threads; defaults to the number of logical CPUs
    pub worker_count: usize,

    /// How long a Task may run uninterrupted before it is cooperatively
    /// preempted at its next safepoint poll
    pub preempt_threshold: Duration,
}

impl Default for SchedulerLimits {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            preempt_threshold: DEFAULT_PREEMPT_THRESHOLD,
        }
    }
}

/// Point-in-time scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Number of worker threads
    pub worker_count: usize,

    /// Number of Tasks currently tracked, in any state
    pub task_count: usize,

    /// Number of workers currently parked at a safepoint
    pub parked_count: usize,
}

/// Owns the worker pool and the shared scheduling state for one VM instance
///
/// One `Scheduler` is shared by every [`crate::vm::VmContext`] spawned
/// under the same `Vm`, so Tasks from different contexts can be
/// work-stolen across the same pool of OS threads.
pub struct Scheduler {
    workers: Vec<Worker>,
    injector: Arc<Injector<Arc<Task>>>,
    tasks: Arc<RwLock<FxHashMap<TaskId, Arc<Task>>>>,
    safepoint: Arc<SafepointCoordinator>,
    preempt: PreemptMonitor,
    running: bool,
}

impl Scheduler {
    /// Build a scheduler with the given limits; workers are constructed but
    /// not yet started (call [`Scheduler::start`] to spawn their threads)
    pub fn new(limits: SchedulerLimits) -> Self {
        let worker_count = limits.worker_count.max(1);
        let injector = Arc::new(Injector::new());
        let tasks: Arc<RwLock<FxHashMap<TaskId, Arc<Task>>>> =
            Arc::new(RwLock::new(FxHashMap::default()));
        let safepoint = Arc::new(SafepointCoordinator::new(worker_count));

        // Every worker's local deque is built up front so its Stealer can be
        // handed to every sibling before any worker thread starts - doing
        // this inside the spawned thread closure would be too late.
        let own_deques: Vec<CWorker<Arc<Task>>> =
            (0..worker_count).map(|_| CWorker::new_lifo()).collect();
        let stealers: Vec<_> = own_deques.iter().map(|d| d.stealer()).collect();
        let mut own_deques: Vec<Option<CWorker<Arc<Task>>>> =
            own_deques.into_iter().map(Some).collect();

        let workers = (0..worker_count)
            .map(|id| {
                let own_deque = own_deques[id].take().expect("deque consumed twice");
                let siblings = stealers
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != id)
                    .map(|(_, s)| s.clone())
                    .collect();
                Worker::new(
                    id,
                    own_deque,
                    siblings,
                    injector.clone(),
                    tasks.clone(),
                    safepoint.clone(),
                )
            })
            .collect();

        let preempt = PreemptMonitor::new(tasks.clone(), injector.clone(), limits.preempt_threshold);

        Self {
            workers,
            injector,
            tasks,
            safepoint,
            preempt,
            running: false,
        }
    }

    /// Start every worker thread and the preemption monitor
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        for worker in &mut self.workers {
            worker.start();
        }
        self.preempt.start();
        self.running = true;
    }

    /// Stop every worker thread and the preemption monitor
    ///
    /// Blocks until all worker threads have joined.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.preempt.stop();
        for worker in &mut self.workers {
            worker.stop();
        }
        self.running = false;
    }

    /// Whether the worker pool is currently running
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Spawn a new top-level Task running `function_id` in `module`
    ///
    /// The Task is pushed onto the global injector immediately; any idle
    /// worker may pick it up as soon as it's scheduled.
    pub fn spawn(&self, function_id: usize, module: Arc<Module>) -> TaskHandle<Value> {
        self.spawn_with_parent(function_id, module, None)
    }

    /// Spawn a Task as a child of `parent` (used by the `Spawn` opcode so the
    /// new Task records who spawned it)
    pub fn spawn_with_parent(
        &self,
        function_id: usize,
        module: Arc<Module>,
        parent: Option<TaskId>,
    ) -> TaskHandle<Value> {
        let task = Arc::new(Task::new(function_id, module, parent));
        let task_id = task.id();

        self.tasks.write().insert(task_id, task.clone());
        self.injector.push(task);

        TaskHandle::new(task_id)
    }

    /// Spawn a Task that shares an owning `VmContext`'s sync registries and
    /// carries entry arguments, used by `vm::lifecycle::Vm::run_entry` to
    /// start a top-level entry point
    #[allow(clippy::too_many_arguments)]
    pub fn spawn_in_context(
        &self,
        function_id: usize,
        module: Arc<Module>,
        args: Vec<Value>,
        owner_vm_id: u64,
        mutex_registry: Arc<crate::sync::MutexRegistry>,
        channel_registry: Arc<crate::sync::ChannelRegistry>,
    ) -> TaskHandle<Value> {
        let task = Arc::new(Task::with_context_and_args(
            function_id,
            module,
            None,
            owner_vm_id,
            mutex_registry,
            channel_registry,
            args,
        ));
        let task_id = task.id();

        self.tasks.write().insert(task_id, task.clone());
        self.injector.push(task);

        TaskHandle::new(task_id)
    }

    /// Look up a Task by ID
    pub fn get_task(&self, task_id: TaskId) -> Option<Arc<Task>> {
        self.tasks.read().get(&task_id).cloned()
    }

    /// Current state of a Task, if it's still tracked
    pub fn task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.get_task(task_id).map(|t| t.state())
    }

    /// Result of a completed Task, if it has one
    pub fn task_result(&self, task_id: TaskId) -> Option<Value> {
        self.get_task(task_id).and_then(|t| t.result())
    }

    /// Drop a Task from the registry once its result has been consumed
    pub fn remove_task(&self, task_id: TaskId) -> Option<Arc<Task>> {
        self.tasks.write().remove(&task_id)
    }

    /// Request cancellation of a Task; it terminates at its next safepoint
    /// poll rather than merely being rescheduled like ordinary preemption
    pub fn cancel(&self, task_id: TaskId) {
        if let Some(task) = self.get_task(task_id) {
            task.request_cancel();
        }
    }

    /// Shared safepoint coordinator, for GC and snapshot stop-the-world
    pub fn safepoint(&self) -> &Arc<SafepointCoordinator> {
        &self.safepoint
    }

    /// Shared task registry, for modules (Mutex/Channel opcodes) that need
    /// to resolve a `TaskId` to wake a waiter directly
    pub fn tasks(&self) -> &Arc<RwLock<FxHashMap<TaskId, Arc<Task>>>> {
        &self.tasks
    }

    /// Push an already-registered Task back onto the global injector
    ///
    /// Used to resume a Task that was parked on a Mutex or Channel once the
    /// primitive it was waiting on becomes available.
    pub fn reschedule(&self, task_id: TaskId) {
        if let Some(task) = self.get_task(task_id) {
            task.set_state(TaskState::Created);
            self.injector.push(task);
        }
    }

    /// Snapshot scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            worker_count: self.workers.len(),
            task_count: self.tasks.read().len(),
            parked_count: self.safepoint.parked_count(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
