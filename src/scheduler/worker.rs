//! Worker thread that executes Tasks

use crate::scheduler::{Task, TaskId, TaskState};
use crate::sync::{ChannelBlockReason, ChannelId, MutexId};
use crate::value::Value;
use crate::vm::SafepointCoordinator;
use crate::{VmError, VmResult};
use crossbeam_deque::{Injector, Stealer, Worker as CWorker};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Push a parked Task back onto the global injector, if it's still tracked
///
/// Shared by every opcode handler that wakes a Task blocked on a Mutex,
/// Channel, or another Task - the same hand-off `run_loop` already performs
/// for ordinary Task-completion waiters.
fn wake_task(
    tasks: &Arc<RwLock<FxHashMap<TaskId, Arc<Task>>>>,
    injector: &Arc<Injector<Arc<Task>>>,
    task_id: TaskId,
) {
    if let Some(task) = tasks.read().get(&task_id).cloned() {
        task.set_state(TaskState::Created);
        injector.push(task);
    }
}

/// Worker thread that executes Tasks
pub struct Worker {
    /// Worker ID
    id: usize,

    /// Stealers from other workers
    stealers: Vec<Stealer<Arc<Task>>>,

    /// Global injector
    injector: Arc<Injector<Arc<Task>>>,

    /// Task registry (shared with scheduler)
    tasks: Arc<RwLock<FxHashMap<TaskId, Arc<Task>>>>,

    /// Safepoint coordinator
    safepoint: Arc<SafepointCoordinator>,

    /// Worker thread handle
    handle: Option<thread::JoinHandle<()>>,

    /// Shutdown signal
    shutdown: Arc<AtomicBool>,

    /// This worker's own deque, moved into the thread on `start`
    ///
    /// Created up front by the Scheduler (rather than inside the spawned
    /// closure) so its `Stealer` handle can be handed to sibling workers
    /// before any of them start running.
    own_deque: Option<CWorker<Arc<Task>>>,
}

impl Worker {
    /// Create a new Worker around a pre-built local deque
    ///
    /// `own_deque` must be the deque whose `Stealer` was already
    /// distributed to every other worker's `stealers` list.
    pub fn new(
        id: usize,
        own_deque: CWorker<Arc<Task>>,
        stealers: Vec<Stealer<Arc<Task>>>,
        injector: Arc<Injector<Arc<Task>>>,
        tasks: Arc<RwLock<FxHashMap<TaskId, Arc<Task>>>>,
        safepoint: Arc<SafepointCoordinator>,
    ) -> Self {
        Self {
            id,
            stealers,
            injector,
            tasks,
            safepoint,
            handle: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            own_deque: Some(own_deque),
        }
    }

    /// Start the worker thread
    pub fn start(&mut self) {
        let id = self.id;
        let stealers = self.stealers.clone();
        let injector = self.injector.clone();
        let tasks = self.tasks.clone();
        let safepoint = self.safepoint.clone();
        let shutdown = self.shutdown.clone();
        let worker_deque = self
            .own_deque
            .take()
            .expect("Worker::start called more than once");

        let handle = thread::Builder::new()
            .name(format!("raya-worker-{}", id))
            .spawn(move || {
                Worker::run_loop(id, worker_deque, stealers, injector, tasks, safepoint, shutdown);
            })
            .expect("Failed to spawn worker thread");

        self.handle = Some(handle);
    }

    /// Stop the worker thread
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);

        if let Some(handle) = self.handle.take() {
            handle.join().expect("Failed to join worker thread");
        }
    }

    /// Worker thread main loop
    fn run_loop(
        id: usize,
        worker: CWorker<Arc<Task>>,
        stealers: Vec<Stealer<Arc<Task>>>,
        injector: Arc<Injector<Arc<Task>>>,
        tasks: Arc<RwLock<FxHashMap<TaskId, Arc<Task>>>>,
        safepoint: Arc<SafepointCoordinator>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            // Check for shutdown signal
            if shutdown.load(Ordering::Acquire) {
                break;
            }

            // Find work (local pop, steal, or inject)
            let task = match Self::find_work(&worker, &stealers, &injector) {
                Some(task) => task,
                None => {
                    // No work available, sleep briefly to avoid busy-waiting
                    thread::sleep(Duration::from_micros(100));

                    // Poll safepoint even when idle
                    safepoint.poll();
                    continue;
                }
            };

            // Execute task
            task.set_state(TaskState::Running);

            // Record start time for preemption monitoring (like Go)
            task.set_start_time(std::time::Instant::now());

            match Self::execute_task(&task, &injector, &tasks, &safepoint) {
                Ok(result) => {
                    // Clear execution time tracking
                    task.clear_start_time();

                    task.complete(result);

                    // Resume waiting tasks: they were parked in Suspended state
                    // with nothing but their own Await re-check left to run, so
                    // dropping them straight back onto the injector is enough.
                    let waiters = task.take_waiters();
                    for waiter_id in waiters {
                        if let Some(waiter) = tasks.read().get(&waiter_id).cloned() {
                            waiter.set_state(TaskState::Created);
                            injector.push(waiter);
                        }
                    }
                }
                Err(VmError::TaskPreempted) => {
                    // Clear execution time tracking
                    task.clear_start_time();

                    // Re-queue the task for execution
                    #[cfg(debug_assertions)]
                    eprintln!(
                        "Worker {}: Task {} preempted, re-queueing",
                        id,
                        task.id().as_u64()
                    );

                    // Put it back in the Created state so it can be rescheduled
                    task.set_state(TaskState::Created);
                    injector.push(task.clone());
                }
                Err(VmError::TaskSuspended) => {
                    // Clear execution time tracking
                    task.clear_start_time();

                    // The task already registered itself as a waiter and set
                    // its own state to Suspended; whatever it's waiting on
                    // will push it back onto the injector when it's ready.
                    #[cfg(debug_assertions)]
                    eprintln!(
                        "Worker {}: Task {} suspended, awaiting wakeup",
                        id,
                        task.id().as_u64()
                    );
                }
                Err(VmError::TaskCancelled) => {
                    // Clear execution time tracking
                    task.clear_start_time();

                    #[cfg(debug_assertions)]
                    eprintln!("Worker {}: Task {} cancelled", id, task.id().as_u64());

                    task.fail();

                    let waiters = task.take_waiters();
                    for waiter_id in waiters {
                        wake_task(&tasks, &injector, waiter_id);
                    }
                }
                Err(e) => {
                    // Clear execution time tracking
                    task.clear_start_time();

                    eprintln!("Worker {}: Task {} failed: {:?}", id, task.id().as_u64(), e);
                    task.fail();
                }
            }

            // Check if preemption was requested
            if task.is_preempt_requested() {
                task.clear_preempt();
                #[cfg(debug_assertions)]
                eprintln!(
                    "Worker {}: Task {} yielded after preemption",
                    id,
                    task.id().as_u64()
                );
                // Task will be rescheduled by being pushed back to deque
                // (This happens naturally when we get the next task)
            }
        }

        #[cfg(debug_assertions)]
        eprintln!("Worker {} shutting down", id);
    }

    /// Find work: local pop, then steal, then inject
    fn find_work(
        worker: &CWorker<Arc<Task>>,
        stealers: &[Stealer<Arc<Task>>],
        injector: &Arc<Injector<Arc<Task>>>,
    ) -> Option<Arc<Task>> {
        // 1. Try local deque (LIFO - cache locality)
        if let Some(task) = worker.pop() {
            return Some(task);
        }

        // 2. Try stealing from other workers (FIFO - load balancing)
        loop {
            if let Some(task) = Self::steal_from_others(stealers) {
                return Some(task);
            }

            // 3. Try global injector
            match injector.steal() {
                crossbeam_deque::Steal::Success(task) => return Some(task),
                crossbeam_deque::Steal::Empty => break,
                crossbeam_deque::Steal::Retry => continue,
            }
        }

        None
    }

    /// Steal from other workers
    fn steal_from_others(stealers: &[Stealer<Arc<Task>>]) -> Option<Arc<Task>> {
        use rand::Rng;

        if stealers.is_empty() {
            return None;
        }

        // Randomly select a victim
        let mut rng = rand::thread_rng();
        let start = rng.gen_range(0..stealers.len());

        // Try each stealer starting from random position
        for i in 0..stealers.len() {
            let index = (start + i) % stealers.len();
            let stealer = &stealers[index];

            loop {
                match stealer.steal() {
                    crossbeam_deque::Steal::Success(task) => return Some(task),
                    crossbeam_deque::Steal::Empty => break,
                    crossbeam_deque::Steal::Retry => continue,
                }
            }
        }

        None
    }

    /// Execute a task's bytecode
    fn execute_task(
        task: &Task,
        injector: &Arc<Injector<Arc<Task>>>,
        tasks: &Arc<RwLock<FxHashMap<TaskId, Arc<Task>>>>,
        safepoint: &Arc<SafepointCoordinator>,
    ) -> VmResult<Value> {
        use crate::gc::GarbageCollector;
        use crate::vm::ClassRegistry;
        use crate::VmError;
        use crate::bytecode::Opcode;

        // Get the function to execute
        let module = task.module();
        let func_index = task.function_id();

        if func_index >= module.functions.len() {
            return Err(VmError::RuntimeError(format!(
                "Invalid function index: {}",
                func_index
            )));
        }

        let function = &module.functions[func_index];
        let code = &function.code;

        // Create temporary execution context
        // Note: This is a simplified version - full implementation will use shared GC/Classes
        let _gc = GarbageCollector::default();
        let _classes = ClassRegistry::new();

        // Use task's stack
        let stack = task.stack();
        let mut stack_guard = stack.lock().unwrap();

        // Allocate space for local variables, seeding the first
        // `param_count` slots from the Task's entry arguments (if any)
        let entry_args = task.args();
        for i in 0..function.local_count {
            let value = entry_args.get(i).copied().unwrap_or(Value::null());
            stack_guard.push(value)?;
        }
        let locals_base = stack_guard.depth() - function.local_count;

        // Get/set instruction pointer
        let mut ip = task.ip();

        // Main execution loop
        loop {
            // Poll safepoint regularly
            safepoint.poll();

            // Cancellation takes priority over ordinary preemption: the Task
            // terminates instead of being rescheduled.
            if task.is_cancel_requested() {
                task.clear_cancel();
                task.set_ip(ip);
                drop(stack_guard);
                return Err(VmError::TaskCancelled);
            }

            // Check for asynchronous preemption (like Go)
            if task.is_preempt_requested() {
                // Clear preemption flag
                task.clear_preempt();

                #[cfg(debug_assertions)]
                eprintln!("Task {} preempted at safepoint", task.id().as_u64());

                // Yield task - save state and return
                task.set_ip(ip);
                drop(stack_guard);
                return Err(VmError::TaskPreempted);
            }

            if ip >= code.len() {
                break;
            }

            let opcode_byte = code[ip];
            ip += 1;

            let opcode = Opcode::from_u8(opcode_byte).ok_or(VmError::InvalidOpcode(opcode_byte))?;

            match opcode {
                Opcode::Return => {
                    // Return the top value
                    let result = if stack_guard.is_empty() {
                        Value::null()
                    } else {
                        stack_guard.pop()?
                    };

                    task.set_ip(ip);
                    return Ok(result);
                }

                Opcode::ConstI32 => {
                    let value =
                        i32::from_le_bytes([code[ip], code[ip + 1], code[ip + 2], code[ip + 3]]);
                    ip += 4;
                    stack_guard.push(Value::i32(value))?;
                }

                Opcode::ConstF64 => {
                    let bytes: [u8; 8] = code[ip..ip + 8]
                        .try_into()
                        .map_err(|_| VmError::RuntimeError("Truncated ConstF64 operand".to_string()))?;
                    ip += 8;
                    stack_guard.push(Value::f64(f64::from_le_bytes(bytes)))?;
                }

                Opcode::ConstNull => {
                    stack_guard.push(Value::null())?;
                }

                Opcode::ConstTrue => {
                    stack_guard.push(Value::bool(true))?;
                }

                Opcode::ConstFalse => {
                    stack_guard.push(Value::bool(false))?;
                }

                Opcode::Pop => {
                    stack_guard.pop()?;
                }

                Opcode::Dup => {
                    let value = stack_guard.peek()?;
                    stack_guard.push(value)?;
                }

                Opcode::Swap => {
                    let a = stack_guard.pop()?;
                    let b = stack_guard.pop()?;
                    stack_guard.push(a)?;
                    stack_guard.push(b)?;
                }

                Opcode::Iadd => {
                    let b = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    stack_guard.push(Value::i32(a + b))?;
                }

                Opcode::Imul => {
                    let b = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    stack_guard.push(Value::i32(a * b))?;
                }

                Opcode::Isub => {
                    let b = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    stack_guard.push(Value::i32(a.wrapping_sub(b)))?;
                }

                Opcode::Idiv => {
                    let b = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    if b == 0 {
                        return Err(VmError::RuntimeError("Division by zero".to_string()));
                    }
                    stack_guard.push(Value::i32(a.wrapping_div(b)))?;
                }

                Opcode::Imod => {
                    let b = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    if b == 0 {
                        return Err(VmError::RuntimeError("Modulo by zero".to_string()));
                    }
                    stack_guard.push(Value::i32(a.wrapping_rem(b)))?;
                }

                Opcode::Ineg => {
                    let a = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    stack_guard.push(Value::i32(a.wrapping_neg()))?;
                }

                Opcode::Fadd => {
                    let b = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    stack_guard.push(Value::f64(a + b))?;
                }

                Opcode::Fsub => {
                    let b = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    stack_guard.push(Value::f64(a - b))?;
                }

                Opcode::Fmul => {
                    let b = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    stack_guard.push(Value::f64(a * b))?;
                }

                Opcode::Fdiv => {
                    let b = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    stack_guard.push(Value::f64(a / b))?;
                }

                Opcode::Fneg => {
                    let a = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    stack_guard.push(Value::f64(-a))?;
                }

                Opcode::Feq => {
                    let b = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    stack_guard.push(Value::bool(a == b))?;
                }

                Opcode::Flt => {
                    let b = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    stack_guard.push(Value::bool(a < b))?;
                }

                Opcode::Fgt => {
                    let b = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_f64()
                        .ok_or_else(|| VmError::TypeError("Expected f64".to_string()))?;
                    stack_guard.push(Value::bool(a > b))?;
                }

                Opcode::Nadd => {
                    let b = stack_guard.pop()?;
                    let a = stack_guard.pop()?;
                    let result = if a.is_f64() || b.is_f64() {
                        let af = a
                            .as_f64()
                            .or_else(|| a.as_i32().map(|i| i as f64))
                            .ok_or_else(|| VmError::TypeError("Expected number".to_string()))?;
                        let bf = b
                            .as_f64()
                            .or_else(|| b.as_i32().map(|i| i as f64))
                            .ok_or_else(|| VmError::TypeError("Expected number".to_string()))?;
                        Value::f64(af + bf)
                    } else {
                        let ai = a
                            .as_i32()
                            .ok_or_else(|| VmError::TypeError("Expected number".to_string()))?;
                        let bi = b
                            .as_i32()
                            .ok_or_else(|| VmError::TypeError("Expected number".to_string()))?;
                        Value::i32(ai.wrapping_add(bi))
                    };
                    stack_guard.push(result)?;
                }

                Opcode::Ieq => {
                    let b = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    stack_guard.push(Value::bool(a == b))?;
                }

                Opcode::Ine => {
                    let b = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    stack_guard.push(Value::bool(a != b))?;
                }

                Opcode::Ile => {
                    let b = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    stack_guard.push(Value::bool(a <= b))?;
                }

                Opcode::Igt => {
                    let b = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    stack_guard.push(Value::bool(a > b))?;
                }

                Opcode::Ige => {
                    let b = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    stack_guard.push(Value::bool(a >= b))?;
                }

                Opcode::And => {
                    let b = stack_guard
                        .pop()?
                        .as_bool()
                        .ok_or_else(|| VmError::TypeError("Expected bool".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_bool()
                        .ok_or_else(|| VmError::TypeError("Expected bool".to_string()))?;
                    stack_guard.push(Value::bool(a && b))?;
                }

                Opcode::Or => {
                    let b = stack_guard
                        .pop()?
                        .as_bool()
                        .ok_or_else(|| VmError::TypeError("Expected bool".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_bool()
                        .ok_or_else(|| VmError::TypeError("Expected bool".to_string()))?;
                    stack_guard.push(Value::bool(a || b))?;
                }

                Opcode::Not => {
                    let a = stack_guard
                        .pop()?
                        .as_bool()
                        .ok_or_else(|| VmError::TypeError("Expected bool".to_string()))?;
                    stack_guard.push(Value::bool(!a))?;
                }

                Opcode::LoadLocal => {
                    let index = u16::from_le_bytes([code[ip], code[ip + 1]]) as usize;
                    ip += 2;

                    // Get local variable (directly from stack at locals_base + index)
                    let value = stack_guard.peek_at(locals_base + index)?;
                    stack_guard.push(value)?;
                }

                Opcode::StoreLocal => {
                    let index = u16::from_le_bytes([code[ip], code[ip + 1]]) as usize;
                    ip += 2;

                    let value = stack_guard.pop()?;
                    stack_guard.set_at(locals_base + index, value)?;
                }

                Opcode::Ilt => {
                    let b = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    let a = stack_guard
                        .pop()?
                        .as_i32()
                        .ok_or_else(|| VmError::TypeError("Expected i32".to_string()))?;
                    stack_guard.push(Value::bool(a < b))?;
                }

                Opcode::Jmp => {
                    let offset = i16::from_le_bytes([code[ip], code[ip + 1]]) as isize;
                    ip += 2;

                    // Backward jump - poll safepoint
                    if offset < 0 {
                        safepoint.poll();

                        // Check preemption at backward jumps (loop headers)
                        if task.is_preempt_requested() {
                            task.clear_preempt();
                            task.set_ip(ip);
                            drop(stack_guard);
                            return Err(VmError::RuntimeError(
                                "Task preempted at loop header".to_string(),
                            ));
                        }
                    }

                    ip = (ip as isize + offset) as usize;
                }

                Opcode::JmpIfFalse => {
                    let offset = i16::from_le_bytes([code[ip], code[ip + 1]]) as isize;
                    ip += 2;

                    let condition = stack_guard.pop()?;
                    if !condition.as_bool().unwrap_or(false) {
                        ip = (ip as isize + offset) as usize;
                    }
                }

                Opcode::Nop => {
                    // No operation - just continue
                }

                // SPAWN - Create and start a new task
                Opcode::Spawn => {
                    // Read function index (u16)
                    let func_index = u16::from_le_bytes([code[ip], code[ip + 1]]) as usize;
                    ip += 2;

                    // Create new task, inheriting this task's owning context
                    // so MutexId/ChannelId values created by one are visible
                    // to the other.
                    let new_task = Arc::new(Task::with_context(
                        func_index,
                        module.clone(),
                        Some(task.id()), // This task is the parent
                        task.owner_vm_id(),
                        task.mutex_registry().clone(),
                        task.channel_registry().clone(),
                    ));

                    let task_id = new_task.id();

                    // Register task in registry
                    tasks.write().insert(task_id, new_task.clone());

                    // Push to global injector for scheduling
                    injector.push(new_task);

                    // Push TaskId as u64 onto stack
                    stack_guard.push(Value::u64(task_id.as_u64()))?;
                }

                // AWAIT - Wait for a task to complete
                //
                // The TaskId stays on top of the stack (peeked, not popped)
                // until the awaited task is actually done: if it isn't, this
                // instruction is re-executed from scratch after the worker
                // parks the task, so the operand needs to still be there.
                Opcode::Await => {
                    let task_id_val = stack_guard.peek()?;
                    let task_id_u64 = task_id_val.as_u64().ok_or_else(|| {
                        VmError::TypeError("Expected TaskId (u64) for AWAIT".to_string())
                    })?;

                    let awaited_task_id = TaskId::from_u64(task_id_u64);

                    let awaited_task =
                        tasks.read().get(&awaited_task_id).cloned().ok_or_else(|| {
                            VmError::RuntimeError(format!("Task {:?} not found", awaited_task_id))
                        })?;

                    match awaited_task.state() {
                        TaskState::Completed => {
                            stack_guard.pop()?;
                            let result = awaited_task.result().unwrap_or(Value::null());
                            stack_guard.push(result)?;
                        }
                        TaskState::Failed => {
                            return Err(VmError::RuntimeError(format!(
                                "Awaited task {:?} failed",
                                awaited_task_id
                            )));
                        }
                        _ => {
                            // Register as a waiter and park; the worker that
                            // completes `awaited_task` will push this task
                            // back onto the injector.
                            awaited_task.add_waiter(task.id());
                            task.set_state(TaskState::Suspended);
                            task.set_ip(ip - 1);
                            drop(stack_guard);
                            return Err(VmError::TaskSuspended);
                        }
                    }
                }

                // SLEEP - suspend for a duration (i64 millis on stack)
                //
                // Like AWAIT, the operand is peeked rather than popped so a
                // re-entry after being woken can tell this is a resumption:
                // `Task::sleep_until` carries the deadline across retries
                // since the opcode itself has no state of its own.
                Opcode::Sleep => {
                    if let Some(deadline) = task.sleep_until() {
                        if Instant::now() >= deadline {
                            task.set_sleep_until(None);
                            stack_guard.pop()?;
                        } else {
                            task.set_ip(ip - 1);
                            drop(stack_guard);
                            return Err(VmError::TaskSuspended);
                        }
                    } else {
                        let millis = stack_guard.peek()?.as_i64().ok_or_else(|| {
                            VmError::TypeError("Expected i64 (ms) for SLEEP".to_string())
                        })?;
                        let deadline =
                            Instant::now() + Duration::from_millis(millis.max(0) as u64);
                        task.set_sleep_until(Some(deadline));
                        task.set_state(TaskState::Suspended);
                        task.set_ip(ip - 1);
                        drop(stack_guard);
                        return Err(VmError::TaskSuspended);
                    }
                }

                // YIELD - cooperative fairness yield, no condition to wait on
                //
                // Reuses the preemption reschedule path: the Task goes back
                // onto the injector immediately rather than being parked.
                Opcode::Yield => {
                    task.set_ip(ip);
                    drop(stack_guard);
                    return Err(VmError::TaskPreempted);
                }

                // WAIT_ALL - suspend until every listed Task has completed
                //
                // Simplified operand encoding: an i32 count on top of the
                // stack followed by that many TaskId (u64) values beneath
                // it, rather than a heap Array - Tasks executed here don't
                // share a heap with their owning context yet (see
                // `Still pending` in the design notes), so there's no Array
                // to index into without that wiring.
                Opcode::WaitAll => {
                    let count = stack_guard.peek()?.as_i32().ok_or_else(|| {
                        VmError::TypeError("Expected i32 count for WAIT_ALL".to_string())
                    })? as usize;

                    let mut all_done = true;
                    let mut failed = false;
                    for i in 0..count {
                        let tid = TaskId::from_u64(
                            stack_guard.peek_n(1 + i)?.as_u64().ok_or_else(|| {
                                VmError::TypeError("Expected TaskId in WAIT_ALL list".to_string())
                            })?,
                        );
                        match tasks.read().get(&tid).map(|t| t.state()) {
                            Some(TaskState::Completed) => {}
                            Some(TaskState::Failed) => failed = true,
                            _ => all_done = false,
                        }
                    }

                    if failed {
                        return Err(VmError::RuntimeError(
                            "a Task awaited by WAIT_ALL failed".to_string(),
                        ));
                    }

                    if all_done {
                        for _ in 0..=count {
                            stack_guard.pop()?;
                        }
                        stack_guard.push(Value::null())?;
                    } else {
                        for i in 0..count {
                            let tid = TaskId::from_u64(
                                stack_guard.peek_n(1 + i)?.as_u64().unwrap(),
                            );
                            if let Some(t) = tasks.read().get(&tid) {
                                if t.state() != TaskState::Completed {
                                    t.add_waiter(task.id());
                                }
                            }
                        }
                        task.set_state(TaskState::Suspended);
                        task.set_ip(ip - 1);
                        drop(stack_guard);
                        return Err(VmError::TaskSuspended);
                    }
                }

                // WAIT_ANY - suspend until one of the listed Tasks completes,
                // pushes its index. Same simplified count+ids encoding as
                // WAIT_ALL.
                Opcode::WaitAny => {
                    let count = stack_guard.peek()?.as_i32().ok_or_else(|| {
                        VmError::TypeError("Expected i32 count for WAIT_ANY".to_string())
                    })? as usize;

                    let mut done_index = None;
                    for i in 0..count {
                        let tid = TaskId::from_u64(
                            stack_guard.peek_n(1 + i)?.as_u64().ok_or_else(|| {
                                VmError::TypeError("Expected TaskId in WAIT_ANY list".to_string())
                            })?,
                        );
                        if let Some(TaskState::Completed) =
                            tasks.read().get(&tid).map(|t| t.state())
                        {
                            done_index = Some(i);
                            break;
                        }
                    }

                    if let Some(idx) = done_index {
                        for _ in 0..=count {
                            stack_guard.pop()?;
                        }
                        stack_guard.push(Value::i32(idx as i32))?;
                    } else {
                        for i in 0..count {
                            let tid = TaskId::from_u64(
                                stack_guard.peek_n(1 + i)?.as_u64().unwrap(),
                            );
                            if let Some(t) = tasks.read().get(&tid) {
                                t.add_waiter(task.id());
                            }
                        }
                        task.set_state(TaskState::Suspended);
                        task.set_ip(ip - 1);
                        drop(stack_guard);
                        return Err(VmError::TaskSuspended);
                    }
                }

                // TASK_CANCEL - request cancellation of another Task (TaskId
                // on stack); it terminates at its own next safepoint poll
                Opcode::TaskCancel => {
                    let tid = TaskId::from_u64(stack_guard.pop()?.as_u64().ok_or_else(|| {
                        VmError::TypeError("Expected TaskId (u64) for TASK_CANCEL".to_string())
                    })?);
                    if let Some(target) = tasks.read().get(&tid) {
                        target.request_cancel();
                    }
                }

                // MUTEX_NEW - allocate a Mutex in the owning context's registry
                Opcode::MutexNew => {
                    let mutex_id = task.mutex_registry().create();
                    stack_guard.push(Value::u64(mutex_id.as_u64()))?;
                }

                // MUTEX_LOCK - MutexId peeked (not popped) so a retry after
                // being woken re-reads the same operand
                Opcode::MutexLock => {
                    let mutex_id = MutexId::from_u64(stack_guard.peek()?.as_u64().ok_or_else(
                        || VmError::TypeError("Expected MutexId (u64) for MUTEX_LOCK".to_string()),
                    )?);
                    let mutex = task.mutex_registry().get(mutex_id).ok_or_else(|| {
                        VmError::RuntimeError(format!("Mutex {:?} not found", mutex_id))
                    })?;

                    match mutex.try_lock(task.id()) {
                        Ok(()) => {
                            stack_guard.pop()?;
                            task.add_held_mutex(mutex_id);
                        }
                        Err(_) => {
                            task.set_state(TaskState::Suspended);
                            task.set_ip(ip - 1);
                            drop(stack_guard);
                            return Err(VmError::TaskSuspended);
                        }
                    }
                }

                // MUTEX_UNLOCK
                Opcode::MutexUnlock => {
                    let mutex_id = MutexId::from_u64(stack_guard.pop()?.as_u64().ok_or_else(
                        || {
                            VmError::TypeError(
                                "Expected MutexId (u64) for MUTEX_UNLOCK".to_string(),
                            )
                        },
                    )?);
                    let mutex = task.mutex_registry().get(mutex_id).ok_or_else(|| {
                        VmError::RuntimeError(format!("Mutex {:?} not found", mutex_id))
                    })?;

                    match mutex.unlock(task.id()) {
                        Ok(woken) => {
                            task.remove_held_mutex(mutex_id);
                            if let Some(next) = woken {
                                wake_task(tasks, injector, next);
                            }
                        }
                        Err(e) => return Err(VmError::RuntimeError(e.to_string())),
                    }
                }

                // CHANNEL_NEW - u32 capacity operand, 0 = unbounded
                Opcode::ChannelNew => {
                    let capacity = u32::from_le_bytes([
                        code[ip],
                        code[ip + 1],
                        code[ip + 2],
                        code[ip + 3],
                    ]) as usize;
                    ip += 4;

                    let channel_id = task.channel_registry().create(capacity);
                    stack_guard.push(Value::u64(channel_id.as_u64()))?;
                }

                // CHANNEL_SEND - stack is [..., ChannelId, value] with value
                // on top; both are peeked until the send actually succeeds
                Opcode::ChannelSend => {
                    let value = stack_guard.peek()?;
                    let channel_id = ChannelId::from_u64(
                        stack_guard.peek_n(1)?.as_u64().ok_or_else(|| {
                            VmError::TypeError(
                                "Expected ChannelId (u64) for CHANNEL_SEND".to_string(),
                            )
                        })?,
                    );
                    let channel = task.channel_registry().get(channel_id).ok_or_else(|| {
                        VmError::RuntimeError(format!("Channel {:?} not found", channel_id))
                    })?;

                    match channel.try_send(task.id(), value) {
                        Ok(woken) => {
                            stack_guard.pop()?; // value
                            stack_guard.pop()?; // channel id
                            if let Some(receiver) = woken {
                                wake_task(tasks, injector, receiver);
                            }
                        }
                        Err(ChannelBlockReason::Closed) => {
                            return Err(VmError::RuntimeError(format!(
                                "send on closed channel {:?}",
                                channel_id
                            )));
                        }
                        Err(ChannelBlockReason::AwaitingSend(_)) => {
                            task.set_state(TaskState::Suspended);
                            task.set_ip(ip - 1);
                            drop(stack_guard);
                            return Err(VmError::TaskSuspended);
                        }
                        Err(ChannelBlockReason::AwaitingRecv(_)) => unreachable!(
                            "try_send never blocks on a receive condition"
                        ),
                    }
                }

                // CHANNEL_RECV - ChannelId peeked until the receive succeeds
                Opcode::ChannelRecv => {
                    let channel_id = ChannelId::from_u64(stack_guard.peek()?.as_u64().ok_or_else(
                        || {
                            VmError::TypeError(
                                "Expected ChannelId (u64) for CHANNEL_RECV".to_string(),
                            )
                        },
                    )?);
                    let channel = task.channel_registry().get(channel_id).ok_or_else(|| {
                        VmError::RuntimeError(format!("Channel {:?} not found", channel_id))
                    })?;

                    match channel.try_recv(task.id()) {
                        Ok((value, woken)) => {
                            stack_guard.pop()?;
                            stack_guard.push(value)?;
                            if let Some(sender) = woken {
                                wake_task(tasks, injector, sender);
                            }
                        }
                        Err(ChannelBlockReason::AwaitingRecv(_)) => {
                            task.set_state(TaskState::Suspended);
                            task.set_ip(ip - 1);
                            drop(stack_guard);
                            return Err(VmError::TaskSuspended);
                        }
                        Err(_) => unreachable!("try_recv never blocks on send/close conditions"),
                    }
                }

                // CHANNEL_CLOSE
                Opcode::ChannelClose => {
                    let channel_id = ChannelId::from_u64(stack_guard.pop()?.as_u64().ok_or_else(
                        || {
                            VmError::TypeError(
                                "Expected ChannelId (u64) for CHANNEL_CLOSE".to_string(),
                            )
                        },
                    )?);
                    let channel = task.channel_registry().get(channel_id).ok_or_else(|| {
                        VmError::RuntimeError(format!("Channel {:?} not found", channel_id))
                    })?;

                    let (recv_waiters, send_waiters) = channel.close();
                    for waiter in recv_waiters.into_iter().chain(send_waiters) {
                        wake_task(tasks, injector, waiter);
                    }
                }

                _ => {
                    return Err(VmError::RuntimeError(format!(
                        "Opcode {:?} not implemented in task executor",
                        opcode
                    )));
                }
            }
        }

        // If we exit the loop without returning, return null
        task.set_ip(ip);
        Ok(Value::null())
    }

    /// Get the worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Check if the worker is running
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && !self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
