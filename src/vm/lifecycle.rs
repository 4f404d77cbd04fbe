//! VM Lifecycle & Control API
//!
//! High-level API for creating, managing, and controlling isolated VmContexts.
//! This module provides the public-facing API for Inner VMs.

use crate::scheduler::{Scheduler, SchedulerLimits, TaskId, TaskState};
use crate::snapshot::{resolve_ptr_id, rewrite_ptr_to_id, SerializedTask, SnapshotReader, SnapshotWriter};
use crate::sync::SerializedChannel;
use crate::value::Value;
use crate::vm::{StopReason, VmContext, VmContextId, VmOptions};
use parking_lot::{Mutex, RwLock};
use crate::bytecode::Module;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How long `snapshot()`/`terminate()` will wait for every worker to park
/// at a safepoint before giving up
const SAFEPOINT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during VM operations
#[derive(Debug, Error)]
pub enum VmError {
    /// IO error (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid binary format
    #[error("Invalid binary format: {0}")]
    InvalidBinaryFormat(String),

    /// Checksum mismatch (module integrity verification failed)
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Context not found
    #[error("Context not found: {0:?}")]
    ContextNotFound(VmContextId),

    /// Entry point not found
    #[error("Entry point not found: {0}")]
    EntryPointNotFound(String),

    /// Execution error
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Resource limit exceeded
    #[error("Resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    /// Task creation failed
    #[error("Task creation failed: {0}")]
    TaskCreationFailed(String),
}

/// Statistics for a running VM
#[derive(Debug, Clone)]
pub struct VmStats {
    /// Current heap usage in bytes
    pub heap_bytes_used: usize,

    /// Maximum heap size limit (0 = unlimited)
    pub max_heap_bytes: usize,

    /// Current number of active tasks
    pub tasks: usize,

    /// Maximum task limit (0 = unlimited)
    pub max_tasks: usize,

    /// Total CPU steps executed
    pub steps_executed: u64,
}

/// High-level VM handle
///
/// This is the main public API for working with isolated VmContexts.
/// It owns a VmContext and provides convenient methods for:
/// - Loading bytecode (.rbin files)
/// - Executing code
/// - Managing lifecycle
/// - Observing stats
/// - Snapshotting state
pub struct Vm {
    /// The owned VmContext (wrapped in Arc<RwLock> for interior mutability)
    context: Arc<RwLock<VmContext>>,

    /// Work-stealing scheduler this VM's entry Tasks run on. One scheduler
    /// per `Vm` rather than a process-wide one, so each isolated VmContext
    /// gets its own worker pool.
    scheduler: Arc<Mutex<Scheduler>>,

    /// TaskIds spawned via `run_entry`, tracked so `terminate` can cancel
    /// every Task this Vm owns without scanning the whole scheduler
    spawned_tasks: Mutex<Vec<TaskId>>,
}

impl Vm {
    /// Create a new isolated VmContext
    ///
    /// # Arguments
    /// * `options` - Configuration options for the VM
    ///
    /// # Returns
    /// * `Ok(Vm)` - Successfully created VM
    /// * `Err(VmError)` - Failed to create VM
    ///
    /// # Example
    /// ```
    /// use raya_core::vm::{InnerVm, VmOptions, ResourceLimits};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let vm = InnerVm::new(VmOptions {
    ///     limits: ResourceLimits {
    ///         max_heap_bytes: Some(16 * 1024 * 1024),
    ///         ..Default::default()
    ///     },
    ///     ..Default::default()
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(options: VmOptions) -> Result<Self, VmError> {
        let context = VmContext::with_options(options);
        let mut scheduler = Scheduler::new(SchedulerLimits::default());
        scheduler.start();
        Ok(Self {
            context: Arc::new(RwLock::new(context)),
            scheduler: Arc::new(Mutex::new(scheduler)),
            spawned_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Create a VM from a snapshot
    ///
    /// # Arguments
    /// * `_snapshot` - The snapshot to restore from
    /// * `_options` - Optional new resource limits (can update limits on restore)
    ///
    /// # Returns
    /// * `Ok(Vm)` - Successfully restored VM
    /// * `Err(VmError)` - Failed to restore
    ///
    /// # Example
    /// ```no_run
    /// # use raya_core::vm::{InnerVm, VmSnapshot, VmOptions};
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let vm1 = InnerVm::new(VmOptions::default())?;
    /// let snapshot = vm1.snapshot()?;
    /// let vm2 = InnerVm::from_snapshot(snapshot, None)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_snapshot(
        snapshot: VmSnapshot,
        options: Option<VmOptions>,
    ) -> Result<Self, VmError> {
        let mut vm = Self::new(options.unwrap_or_default())?;
        vm.restore(snapshot)?;
        Ok(vm)
    }

    /// Load a .rbin file into this VM
    ///
    /// # Arguments
    /// * `path` - Path to the .rbin file
    ///
    /// # Returns
    /// * `Ok(())` - Successfully loaded
    /// * `Err(VmError)` - Failed to load
    ///
    /// # Example
    /// ```no_run
    /// # use raya_core::vm::{InnerVm, VmOptions};
    /// # use std::path::Path;
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let vm = InnerVm::new(VmOptions::default())?;
    /// vm.load_rbin(Path::new("./mymodule.rbin"))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn load_rbin(&self, path: &Path) -> Result<(), VmError> {
        let bytes = std::fs::read(path)?;
        self.load_rbin_bytes(&bytes)
    }

    /// Load a .rbin from bytes
    ///
    /// # Arguments
    /// * `bytes` - Raw .rbin file contents
    ///
    /// # Returns
    /// * `Ok(())` - Successfully loaded
    /// * `Err(VmError)` - Failed to load
    ///
    /// # Example
    /// ```no_run
    /// # use raya_core::vm::{InnerVm, VmOptions};
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let vm = InnerVm::new(VmOptions::default())?;
    /// let bytes = std::fs::read("./mymodule.rbin")?;
    /// vm.load_rbin_bytes(&bytes)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn load_rbin_bytes(&self, bytes: &[u8]) -> Result<(), VmError> {
        use sha2::{Digest, Sha256};

        // Parse the .rbin format
        let module = Module::decode(bytes)
            .map_err(|e| VmError::InvalidBinaryFormat(format!("Failed to parse .rbin: {:?}", e)))?;

        // Verify magic number
        if &module.magic != b"RAYA" {
            return Err(VmError::InvalidBinaryFormat(
                "Invalid magic number (expected 'RAYA')".to_string(),
            ));
        }

        // Compute checksum of the payload (excluding header)
        // The checksum in the module was computed during encoding
        // We need to verify it matches
        let payload_start = 48; // Header size: magic(4) + version(4) + flags(4) + crc32(4) + sha256(32)
        if bytes.len() < payload_start {
            return Err(VmError::InvalidBinaryFormat(
                "File too small to contain valid header".to_string(),
            ));
        }

        let payload = &bytes[payload_start..];
        let hash = Sha256::digest(payload);
        let computed_checksum: [u8; 32] = hash.into();

        // Verify checksum
        if module.checksum != computed_checksum {
            return Err(VmError::ChecksumMismatch {
                expected: hex::encode(module.checksum),
                actual: hex::encode(computed_checksum),
            });
        }

        // Get write access to the context
        let mut context = self.context.write();

        // Register the module
        context
            .register_module(Arc::new(module))
            .map_err(|e| VmError::ExecutionError(format!("Failed to register module: {}", e)))?;

        Ok(())
    }

    /// Load raw bytecode (legacy support)
    pub fn load_bytecode(&self, bytecode: &[u8]) -> Result<(), VmError> {
        self.load_rbin_bytes(bytecode)
    }

    /// Run an entry point function
    ///
    /// # Arguments
    /// * `_name` - Name of the function to execute (e.g., "main")
    /// * `_args` - Arguments to pass to the function
    ///
    /// # Returns
    /// * `Ok(TaskId)` - Task ID for the spawned execution
    /// * `Err(VmError)` - Failed to start execution
    ///
    /// # Example
    /// ```no_run
    /// # use raya_core::vm::{InnerVm, VmOptions};
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let vm = InnerVm::new(VmOptions::default())?;
    /// let task_id = vm.run_entry("main", vec![])?;
    /// // Wait for task to complete...
    /// # Ok(())
    /// # }
    /// ```
    pub fn run_entry(&self, name: &str, args: Vec<Value>) -> Result<TaskId, VmError> {
        let context = self.context.read();

        if !context.can_create_task() {
            return Err(VmError::ResourceLimitExceeded(
                "max_tasks limit reached".to_string(),
            ));
        }

        let module = context
            .modules()
            .last_registered()
            .ok_or_else(|| VmError::EntryPointNotFound(name.to_string()))?;

        let function_id = module
            .find_function(name)
            .ok_or_else(|| VmError::EntryPointNotFound(name.to_string()))?;

        let handle = self.scheduler.lock().spawn_in_context(
            function_id,
            module,
            args,
            context.id().as_u64(),
            context.mutex_registry().clone(),
            context.channel_registry().clone(),
        );

        context.counters().increment_tasks();
        let task_id = handle.task_id();
        self.spawned_tasks.lock().push(task_id);

        Ok(task_id)
    }

    /// Block the calling thread until the Task spawned by `run_entry`
    /// reaches a terminal state, returning its result
    ///
    /// Polls rather than blocking on a condvar: Tasks complete on worker
    /// threads that only know how to wake their own waiters, not an
    /// arbitrary caller outside the scheduler.
    pub fn join(&self, task_id: TaskId) -> Result<Value, VmError> {
        loop {
            let scheduler = self.scheduler.lock();
            match scheduler.task_state(task_id) {
                Some(TaskState::Completed) => {
                    return scheduler.task_result(task_id).ok_or_else(|| {
                        VmError::ExecutionError("Task completed without a result".to_string())
                    });
                }
                Some(TaskState::Failed) => {
                    return Err(VmError::ExecutionError(format!(
                        "Task {} failed",
                        task_id.as_u64()
                    )));
                }
                Some(_) => {
                    drop(scheduler);
                    std::thread::sleep(Duration::from_micros(200));
                }
                None => {
                    return Err(VmError::ExecutionError(format!(
                        "Unknown task {}",
                        task_id.as_u64()
                    )));
                }
            }
        }
    }

    /// Terminate this VM and clean up resources
    ///
    /// This:
    /// - Terminates all running tasks
    /// - Releases heap memory
    /// - Unregisters the context
    ///
    /// # Returns
    /// * `Ok(())` - Successfully terminated
    /// * `Err(VmError)` - Failed to terminate
    ///
    /// # Example
    /// ```
    /// # use raya_core::vm::{InnerVm, VmOptions};
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let vm = InnerVm::new(VmOptions::default())?;
    /// vm.terminate()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn terminate(&self) -> Result<(), VmError> {
        {
            let scheduler = self.scheduler.lock();
            for task_id in self.spawned_tasks.lock().drain(..) {
                scheduler.cancel(task_id);
            }
        }

        // Give cancelled Tasks a chance to observe the request at their next
        // safepoint poll before we stop the worker pool out from under them.
        std::thread::sleep(Duration::from_millis(1));
        self.scheduler.lock().stop();

        let mut context = self.context.write();
        context.collect_garbage();

        Ok(())
    }

    /// Get statistics for this VM
    ///
    /// # Returns
    /// * `Ok(VmStats)` - Current statistics
    /// * `Err(VmError)` - Failed to get stats
    ///
    /// # Example
    /// ```
    /// # use raya_core::vm::{InnerVm, VmOptions};
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let vm = InnerVm::new(VmOptions::default())?;
    /// let stats = vm.get_stats()?;
    /// println!("Heap: {} bytes", stats.heap_bytes_used);
    /// # Ok(())
    /// # }
    /// ```
    pub fn get_stats(&self) -> Result<VmStats, VmError> {
        let context = self.context.read();
        let limits = context.limits();
        let counters = context.counters();
        let heap_stats = context.heap_stats();

        Ok(VmStats {
            heap_bytes_used: heap_stats.allocated_bytes,
            max_heap_bytes: limits.max_heap_bytes.unwrap_or(0),
            tasks: counters.active_tasks(),
            max_tasks: limits.max_tasks.unwrap_or(0),
            steps_executed: counters.total_steps(),
        })
    }

    /// Snapshot this VM's complete state
    ///
    /// # Returns
    /// * `Ok(VmSnapshot)` - Snapshot of current state
    /// * `Err(VmError)` - Failed to snapshot
    ///
    /// # Example
    /// ```no_run
    /// # use raya_core::vm::{InnerVm, VmOptions};
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let vm = InnerVm::new(VmOptions::default())?;
    /// let snapshot = vm.snapshot()?;
    /// // Later... restore from snapshot
    /// # Ok(())
    /// # }
    /// ```
    pub fn snapshot(&self) -> Result<VmSnapshot, VmError> {
        let scheduler = self.scheduler.lock();

        // Stop-the-world: no worker may touch a Task's stack or the heap
        // while we're reading them for the snapshot.
        let parked = scheduler
            .safepoint()
            .request_stop(StopReason::Snapshot, SAFEPOINT_TIMEOUT);
        if !parked {
            scheduler.safepoint().resume();
            return Err(VmError::ExecutionError(
                "Timed out waiting for workers to park at a safepoint".to_string(),
            ));
        }

        let context = self.context.read();
        let context_id = context.id();

        // Capture the heap first: every other root (globals, task locals and
        // results, channel buffers) may hold a pointer into it, and those
        // pointers need the address-to-id map this produces before they can
        // be rewritten to stable ids themselves.
        let (heap_snapshot, addr_to_id) = context.gc().snapshot_heap();

        let mut writer = SnapshotWriter::new();
        let mut task_snapshots = Vec::new();

        for task_id in self.spawned_tasks.lock().iter().copied() {
            let Some(task) = scheduler.get_task(task_id) else {
                continue;
            };
            if task.owner_vm_id() != context_id.as_u64() {
                continue;
            }

            let mut serialized = SerializedTask::new(task_id, task.function_id());
            serialized.state = task.state();
            serialized.ip = task.ip();
            serialized.parent = task.parent();
            serialized.result = task
                .result()
                .map(|v| rewrite_ptr_to_id(v, &addr_to_id));
            writer.add_task(serialized);

            let locals: Vec<Value> = task
                .args()
                .iter()
                .map(|v| rewrite_ptr_to_id(*v, &addr_to_id))
                .collect();
            task_snapshots.push(TaskSnapshot {
                id: task_id,
                frames: vec![FrameSnapshot {
                    function_id: task.function_id() as u32,
                    pc: task.ip(),
                    locals,
                }],
            });
        }

        let globals = context
            .all_globals()
            .into_iter()
            .map(|(name, v)| (name, rewrite_ptr_to_id(v, &addr_to_id)))
            .collect();

        writer.set_mutexes(context.mutex_registry().serialize_all());
        writer.set_channels(rewrite_channel_values(
            context.channel_registry().serialize_all(),
            &addr_to_id,
        ));
        writer.set_heap(heap_snapshot);

        let mut heap_data = Vec::new();
        writer
            .write_snapshot(&mut heap_data)
            .map_err(|e| VmError::ExecutionError(format!("Failed to encode snapshot: {}", e)))?;

        scheduler.safepoint().resume();

        Ok(VmSnapshot {
            context: ContextSnapshot {
                id: context_id,
                heap_data,
                globals,
                tasks: task_snapshots,
            },
        })
    }

    /// Restore VM state from a snapshot
    ///
    /// This replaces the current state with the snapshotted state.
    ///
    /// # Arguments
    /// * `_snapshot` - The snapshot to restore
    ///
    /// # Returns
    /// * `Ok(())` - Successfully restored
    /// * `Err(VmError)` - Failed to restore
    ///
    /// # Example
    /// ```no_run
    /// # use raya_core::vm::{InnerVm, VmOptions};
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let mut vm = InnerVm::new(VmOptions::default())?;
    /// let snapshot = vm.snapshot()?;
    /// // ... later ...
    /// vm.restore(snapshot)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn restore(&mut self, snapshot: VmSnapshot) -> Result<(), VmError> {
        let decoded = SnapshotReader::read_snapshot(&snapshot.context.heap_data)
            .map_err(|e| VmError::ExecutionError(format!("Failed to decode snapshot: {}", e)))?;

        // Drop whatever this Vm was already running before installing the
        // snapshotted state. `terminate` stops the scheduler's workers for
        // good (a `Worker` can't be restarted once its deque is consumed),
        // so a fresh `Scheduler` takes its place rather than reusing the
        // stopped one.
        self.terminate()?;
        let mut fresh_scheduler = Scheduler::new(SchedulerLimits::default());
        fresh_scheduler.start();
        *self.scheduler.lock() = fresh_scheduler;

        let (owner_vm_id, mutex_registry, channel_registry, module, id_to_value) = {
            let mut context = self.context.write();

            // Reallocate the heap segment first so every id has a real
            // pointer Value before globals/channels/task locals are
            // rewritten from it.
            let id_to_value = context.gc_mut().restore_heap(&decoded.heap);

            let globals = snapshot
                .context
                .globals
                .iter()
                .map(|(name, v)| (name.clone(), resolve_ptr_id(*v, &id_to_value)))
                .collect();
            context.restore_globals(globals);

            context.mutex_registry().restore_all(decoded.mutexes.clone());
            context.channel_registry().restore_all(resolve_channel_values(
                decoded.channels.clone(),
                &id_to_value,
            ));
            (
                context.id().as_u64(),
                context.mutex_registry().clone(),
                context.channel_registry().clone(),
                context.modules().last_registered(),
                id_to_value,
            )
        };

        // Tasks can only be resumed once the module they belong to has been
        // re-registered with this context (snapshots don't carry bytecode);
        // a caller that wants live tasks back must `load_rbin` first.
        let Some(module) = module else {
            return Ok(());
        };

        let scheduler = self.scheduler.lock();
        let mut spawned = self.spawned_tasks.lock();
        for task_snapshot in &snapshot.context.tasks {
            let still_live = decoded
                .tasks
                .iter()
                .find(|t| t.task_id == task_snapshot.id)
                .map(|t| !matches!(t.state, TaskState::Completed | TaskState::Failed))
                .unwrap_or(false);
            if !still_live {
                continue;
            }
            let Some(frame) = task_snapshot.frames.first() else {
                continue;
            };

            let locals: Vec<Value> = frame
                .locals
                .iter()
                .map(|v| resolve_ptr_id(*v, &id_to_value))
                .collect();

            let handle = scheduler.spawn_in_context(
                frame.function_id as usize,
                module.clone(),
                locals,
                owner_vm_id,
                mutex_registry.clone(),
                channel_registry.clone(),
            );
            spawned.push(handle.task_id());
        }

        Ok(())
    }

    /// Get the context ID
    pub fn context_id(&self) -> VmContextId {
        self.context.read().id()
    }

    /// Set a global variable visible to every Task running in this context
    pub fn set_global(&self, name: impl Into<String>, value: Value) {
        self.context.write().set_global(name.into(), value);
    }

    /// Get a global variable
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.context.read().get_global(name)
    }
}

/// Rewrite every buffered `Value` in a batch of channel snapshots into
/// id-tagged placeholders, ahead of writing them into the sync segment
fn rewrite_channel_values(
    channels: Vec<SerializedChannel>,
    addr_to_id: &std::collections::HashMap<usize, u64>,
) -> Vec<SerializedChannel> {
    channels
        .into_iter()
        .map(|mut c| {
            for v in &mut c.buffer {
                *v = rewrite_ptr_to_id(*v, addr_to_id);
            }
            c
        })
        .collect()
}

/// Inverse of `rewrite_channel_values`: resolve id-tagged placeholders back
/// into real heap pointers once the heap segment has been reallocated
fn resolve_channel_values(
    channels: Vec<SerializedChannel>,
    id_to_value: &std::collections::HashMap<u64, Value>,
) -> Vec<SerializedChannel> {
    channels
        .into_iter()
        .map(|mut c| {
            for v in &mut c.buffer {
                *v = resolve_ptr_id(*v, id_to_value);
            }
            c
        })
        .collect()
}

/// VM snapshot containing complete VM state
///
/// Snapshots can be used to:
/// - Save/restore VM state
/// - Migrate VMs across hosts
/// - Create checkpoints
/// - Implement time-travel debugging
#[derive(Debug, Clone)]
pub struct VmSnapshot {
    /// Snapshot of the VmContext
    context: ContextSnapshot,
}

/// Snapshot of a VmContext
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    /// Context ID
    pub id: VmContextId,

    /// Serialized heap data
    pub heap_data: Vec<u8>,

    /// Global variables
    pub globals: Vec<(String, Value)>,

    /// Task states
    pub tasks: Vec<TaskSnapshot>,
}

/// Snapshot of a single task
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    /// Task ID
    pub id: TaskId,

    /// Stack frames
    pub frames: Vec<FrameSnapshot>,
}

/// Snapshot of a stack frame
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    /// Function ID
    pub function_id: u32,

    /// Program counter
    pub pc: usize,

    /// Local variables
    pub locals: Vec<Value>,
}
