//! Task structure and execution state

use crate::stack::Stack;
use crate::sync::{ChannelRegistry, MutexId, MutexRegistry};
use crate::value::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

/// State of a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Just created, not yet scheduled
    Created,
    /// Currently executing on a worker
    Running,
    /// Suspended waiting for another Task
    Suspended,
    /// Ready to run (was suspended, now resumed)
    Resumed,
    /// Completed with a result
    Completed,
    /// Failed with an error
    Failed,
}

/// Exception handler entry for try-catch-finally blocks
#[derive(Debug, Clone)]
pub struct ExceptionHandler {
    /// Bytecode offset to catch block (-1 if no catch)
    pub catch_offset: i32,

    /// Bytecode offset to finally block (-1 if no finally)
    pub finally_offset: i32,

    /// Stack size when handler was installed (for unwinding)
    pub stack_size: usize,

    /// Call frame count when handler was installed (for unwinding)
    pub frame_count: usize,

    /// Number of mutexes held when handler was installed (for auto-unlock on unwind)
    pub mutex_count: usize,
}

/// A lightweight green thread
pub struct Task {
    /// Unique identifier
    id: TaskId,

    /// Current state
    state: Mutex<TaskState>,

    /// Function to execute
    function_id: usize,

    /// Module containing the function
    module: Arc<crate::bytecode::Module>,

    /// Execution stack
    stack: Mutex<Stack>,

    /// Instruction pointer
    ip: AtomicUsize,

    /// Result value (if completed)
    result: Mutex<Option<Value>>,

    /// Tasks waiting for this Task to complete
    waiters: Mutex<Vec<TaskId>>,

    /// Parent task (if spawned from another Task)
    parent: Option<TaskId>,

    /// Asynchronous preemption flag (like Go's preemption)
    preempt_requested: AtomicBool,

    /// Cancellation flag, observed at the same safepoints as preemption but
    /// terminating the Task instead of rescheduling it
    cancel_requested: AtomicBool,

    /// When this task started executing (for preemption monitoring)
    start_time: Mutex<Option<Instant>>,

    /// Exception handler stack (for try-catch-finally)
    exception_handlers: Mutex<Vec<ExceptionHandler>>,

    /// Currently thrown exception (if any)
    current_exception: Mutex<Option<Value>>,

    /// Mutexes currently held by this Task (for auto-unlock on exception)
    held_mutexes: Mutex<Vec<MutexId>>,

    /// Id of the owning VmContext (0 if this Task predates any context, e.g.
    /// in standalone scheduler tests)
    owner_vm_id: AtomicU64,

    /// Mutex registry of the owning VmContext, shared so the `MutexLock` /
    /// `MutexUnlock` opcodes can resolve a `MutexId` without reaching back
    /// through the VM
    mutex_registry: Arc<MutexRegistry>,

    /// Channel registry of the owning VmContext, same rationale as
    /// `mutex_registry`
    channel_registry: Arc<ChannelRegistry>,

    /// Wall-clock deadline this Task is sleeping until, set by the `Sleep`
    /// opcode and polled by the preemption monitor's sibling sleep-waker
    sleep_until: Mutex<Option<Instant>>,

    /// Arguments this Task was spawned with; copied into its first locals
    /// slots when execution starts (see `scheduler::worker::execute_task`)
    args: Vec<Value>,
}

impl Task {
    /// Create a new Task with fresh, standalone sync registries and no
    /// owning context. Used by tests and by callers that don't need Mutex
    /// or Channel opcodes to resolve shared state.
    pub fn new(
        function_id: usize,
        module: Arc<crate::bytecode::Module>,
        parent: Option<TaskId>,
    ) -> Self {
        Self::with_context(
            function_id,
            module,
            parent,
            0,
            Arc::new(MutexRegistry::new()),
            Arc::new(ChannelRegistry::new()),
        )
    }

    /// Create a new Task that shares its owning VmContext's sync registries
    /// and owner id. Used by `Spawn` and by `VmContext::spawn` so children
    /// resolve Mutexes/Channels created by their siblings.
    pub fn with_context(
        function_id: usize,
        module: Arc<crate::bytecode::Module>,
        parent: Option<TaskId>,
        owner_vm_id: u64,
        mutex_registry: Arc<MutexRegistry>,
        channel_registry: Arc<ChannelRegistry>,
    ) -> Self {
        Self::with_context_and_args(
            function_id,
            module,
            parent,
            owner_vm_id,
            mutex_registry,
            channel_registry,
            Vec::new(),
        )
    }

    /// Create a new Task carrying entry arguments, used by `vm::lifecycle`
    /// to start a top-level entry point with its call arguments
    #[allow(clippy::too_many_arguments)]
    pub fn with_context_and_args(
        function_id: usize,
        module: Arc<crate::bytecode::Module>,
        parent: Option<TaskId>,
        owner_vm_id: u64,
        mutex_registry: Arc<MutexRegistry>,
        channel_registry: Arc<ChannelRegistry>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            state: Mutex::new(TaskState::Created),
            function_id,
            module,
            stack: Mutex::new(Stack::new()),
            ip: AtomicUsize::new(0),
            result: Mutex::new(None),
            waiters: Mutex::new(Vec::new()),
            parent,
            preempt_requested: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            start_time: Mutex::new(None),
            exception_handlers: Mutex::new(Vec::new()),
            current_exception: Mutex::new(None),
            held_mutexes: Mutex::new(Vec::new()),
            owner_vm_id: AtomicU64::new(owner_vm_id),
            mutex_registry,
            channel_registry,
            sleep_until: Mutex::new(None),
            args,
        }
    }

    /// Entry arguments this Task was spawned with
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Id of the owning VmContext (0 if none)
    pub fn owner_vm_id(&self) -> u64 {
        self.owner_vm_id.load(Ordering::Relaxed)
    }

    /// Shared mutex registry for this Task's owning context
    pub fn mutex_registry(&self) -> &Arc<MutexRegistry> {
        &self.mutex_registry
    }

    /// Shared channel registry for this Task's owning context
    pub fn channel_registry(&self) -> &Arc<ChannelRegistry> {
        &self.channel_registry
    }

    /// Set the deadline this Task should be woken at, or clear it with
    /// `None` once woken
    pub fn set_sleep_until(&self, deadline: Option<Instant>) {
        *self.sleep_until.lock().unwrap() = deadline;
    }

    /// Deadline this Task is sleeping until, if any
    pub fn sleep_until(&self) -> Option<Instant> {
        *self.sleep_until.lock().unwrap()
    }

    /// Get the Task's unique ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the current state
    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap()
    }

    /// Set the current state
    pub fn set_state(&self, state: TaskState) {
        *self.state.lock().unwrap() = state;
    }

    /// Get the function ID this task is executing
    pub fn function_id(&self) -> usize {
        self.function_id
    }

    /// Get the module
    pub fn module(&self) -> &Arc<crate::bytecode::Module> {
        &self.module
    }

    /// Get the instruction pointer
    pub fn ip(&self) -> usize {
        self.ip.load(Ordering::Relaxed)
    }

    /// Set the instruction pointer
    pub fn set_ip(&self, ip: usize) {
        self.ip.store(ip, Ordering::Relaxed);
    }

    /// Get the parent task ID (if any)
    pub fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    /// Complete the task with a result
    pub fn complete(&self, result: Value) {
        *self.result.lock().unwrap() = Some(result);
        self.set_state(TaskState::Completed);
    }

    /// Mark the task as failed
    pub fn fail(&self) {
        self.set_state(TaskState::Failed);
    }

    /// Get the result (if completed)
    pub fn result(&self) -> Option<Value> {
        *self.result.lock().unwrap()
    }

    /// Add a task that is waiting for this task to complete
    pub fn add_waiter(&self, waiter_id: TaskId) {
        self.waiters.lock().unwrap().push(waiter_id);
    }

    /// Take all waiting tasks (used when task completes)
    pub fn take_waiters(&self) -> Vec<TaskId> {
        std::mem::take(&mut *self.waiters.lock().unwrap())
    }

    /// Get the execution stack (for execution)
    pub fn stack(&self) -> &Mutex<Stack> {
        &self.stack
    }

    /// Request asynchronous preemption (like Go's preemption)
    pub fn request_preempt(&self) {
        self.preempt_requested.store(true, Ordering::Release);
    }

    /// Check if preemption is requested
    pub fn is_preempt_requested(&self) -> bool {
        self.preempt_requested.load(Ordering::Acquire)
    }

    /// Clear preemption flag
    pub fn clear_preempt(&self) {
        self.preempt_requested.store(false, Ordering::Release);
    }

    /// Request cancellation; observed at the Task's next safepoint poll
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::Release);
    }

    /// Check if cancellation is requested
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Clear the cancellation flag
    pub fn clear_cancel(&self) {
        self.cancel_requested.store(false, Ordering::Release);
    }

    /// Record when task started executing
    pub fn set_start_time(&self, time: Instant) {
        *self.start_time.lock().unwrap() = Some(time);
    }

    /// Get task execution start time
    pub fn start_time(&self) -> Option<Instant> {
        *self.start_time.lock().unwrap()
    }

    /// Clear start time (when task yields or completes)
    pub fn clear_start_time(&self) {
        *self.start_time.lock().unwrap() = None;
    }

    /// Push an exception handler onto the stack
    pub fn push_exception_handler(&self, handler: ExceptionHandler) {
        self.exception_handlers.lock().unwrap().push(handler);
    }

    /// Pop an exception handler from the stack
    pub fn pop_exception_handler(&self) -> Option<ExceptionHandler> {
        self.exception_handlers.lock().unwrap().pop()
    }

    /// Get the topmost exception handler without removing it
    pub fn peek_exception_handler(&self) -> Option<ExceptionHandler> {
        self.exception_handlers.lock().unwrap().last().cloned()
    }

    /// Get the current exception (if any)
    pub fn current_exception(&self) -> Option<Value> {
        *self.current_exception.lock().unwrap()
    }

    /// Set the current exception
    pub fn set_exception(&self, exception: Value) {
        *self.current_exception.lock().unwrap() = Some(exception);
    }

    /// Clear the current exception
    pub fn clear_exception(&self) {
        *self.current_exception.lock().unwrap() = None;
    }

    /// Check if there is an active exception
    pub fn has_exception(&self) -> bool {
        self.current_exception.lock().unwrap().is_some()
    }

    /// Get the exception handler count (for debugging)
    pub fn exception_handler_count(&self) -> usize {
        self.exception_handlers.lock().unwrap().len()
    }

    /// Record that this task has acquired a mutex
    pub fn add_held_mutex(&self, mutex_id: MutexId) {
        self.held_mutexes.lock().unwrap().push(mutex_id);
    }

    /// Record that this task has released a mutex
    pub fn remove_held_mutex(&self, mutex_id: MutexId) {
        let mut mutexes = self.held_mutexes.lock().unwrap();
        if let Some(pos) = mutexes.iter().position(|&id| id == mutex_id) {
            mutexes.remove(pos);
        }
    }

    /// Get the number of mutexes currently held
    pub fn held_mutex_count(&self) -> usize {
        self.held_mutexes.lock().unwrap().len()
    }

    /// Take all mutexes held after a certain count (for exception unwinding)
    pub fn take_mutexes_since(&self, count: usize) -> Vec<MutexId> {
        let mut mutexes = self.held_mutexes.lock().unwrap();
        if mutexes.len() > count {
            mutexes.drain(count..).collect()
        } else {
            Vec::new()
        }
    }

    /// Get all held mutexes (for debugging)
    pub fn get_held_mutexes(&self) -> Vec<MutexId> {
        self.held_mutexes.lock().unwrap().clone()
    }
}

/// Handle for awaiting a Task's result
pub struct TaskHandle<T> {
    task_id: TaskId,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> TaskHandle<T> {
    /// Create a new TaskHandle
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Get the task ID
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TaskHandle<T> {}
