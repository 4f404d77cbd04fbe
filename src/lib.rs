//! Raya VM Core Runtime
//!
//! This crate provides the virtual machine runtime including:
//! - Bytecode interpreter
//! - Task scheduler (goroutine-style green threads)
//! - Garbage collector
//! - Object model and memory management
//! - Synchronization primitives (Mutex)

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bytecode;
pub mod value;
pub mod types;
pub mod gc;
pub mod stack;
pub mod vm;
pub mod scheduler;
pub mod module;
pub mod object;
pub mod sync;
pub mod snapshot;

pub use value::Value;
pub use types::{PointerMap, TypeInfo, TypeRegistry};
pub use stack::{Stack, CallFrame, StackStats};
pub use vm::{Vm, VmContext, VmContextId, VmOptions, ResourceLimits, ResourceCounters, ContextRegistry, ClassRegistry};
pub use scheduler::Scheduler;
pub use object::{Object, Class, VTable, Array, RayaString};

/// VM execution errors
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    /// Stack overflow
    #[error("Stack overflow")]
    StackOverflow,

    /// Stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Invalid opcode
    #[error("Invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// Null pointer exception
    #[error("Null pointer exception")]
    NullPointer,

    /// Type error
    #[error("Type error: {0}")]
    TypeError(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// An uncaught exception escaped the active exception handler stack
    #[error("Uncaught exception: {0:?}")]
    UncaughtException(Value),

    /// The Task's cooperative preemption flag was set at a safepoint; the
    /// worker should save state and reschedule the Task
    #[error("Task preempted")]
    TaskPreempted,

    /// The Task registered itself as a waiter on another Task, Mutex, or
    /// Channel and must be parked rather than rescheduled or failed; whatever
    /// it is waiting on is responsible for waking it later
    #[error("Task suspended")]
    TaskSuspended,

    /// `TaskCancel` was observed at a safepoint; unlike `TaskPreempted` this
    /// does not reschedule the Task, it terminates it
    #[error("Task cancelled")]
    TaskCancelled,
}

/// VM execution result
pub type VmResult<T> = Result<T, VmError>;
