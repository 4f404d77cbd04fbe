//! VM Execution Context
//!
//! Each VmContext represents an isolated execution environment with:
//! - Its own heap and garbage collector
//! - Resource limits and accounting
//! - Global variables
//! - Independent GC policy

use crate::bytecode::Module;
use crate::gc::{GarbageCollector, GcStats, HeapStats};
use crate::sync::{ChannelRegistry, MutexRegistry};
use crate::types::TypeRegistry;
use crate::value::Value;
use crate::vm::{CapabilityRegistry, ModuleRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Unique identifier for a VmContext
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VmContextId(u64);

impl VmContextId {
    /// Create a new unique context ID
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        VmContextId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for VmContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource limits for a VmContext
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    /// Maximum heap size in bytes (None = unlimited)
    pub max_heap_bytes: Option<usize>,

    /// Maximum number of concurrent tasks (None = unlimited)
    pub max_tasks: Option<usize>,

    /// Maximum CPU step budget (None = unlimited)
    pub max_step_budget: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_heap_bytes: None,
            max_tasks: None,
            max_step_budget: None,
        }
    }
}

impl ResourceLimits {
    /// Create unlimited resource limits
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Create resource limits with specific heap size
    pub fn with_heap_limit(max_heap_bytes: usize) -> Self {
        Self {
            max_heap_bytes: Some(max_heap_bytes),
            ..Default::default()
        }
    }

    /// Create resource limits with task limit
    pub fn with_task_limit(max_tasks: usize) -> Self {
        Self {
            max_tasks: Some(max_tasks),
            ..Default::default()
        }
    }

    /// Create resource limits with CPU step budget
    pub fn with_step_budget(max_step_budget: u64) -> Self {
        Self {
            max_step_budget: Some(max_step_budget),
            ..Default::default()
        }
    }
}

/// Resource usage counters for a VmContext
#[derive(Debug)]
pub struct ResourceCounters {
    /// Current number of active tasks
    active_tasks: AtomicUsize,

    /// Total CPU steps executed
    total_steps: AtomicU64,

    /// Peak number of tasks
    peak_tasks: AtomicUsize,
}

impl Default for ResourceCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceCounters {
    /// Create new resource counters
    pub fn new() -> Self {
        Self {
            active_tasks: AtomicUsize::new(0),
            total_steps: AtomicU64::new(0),
            peak_tasks: AtomicUsize::new(0),
        }
    }

    /// Increment active task count
    pub fn increment_tasks(&self) -> usize {
        let count = self.active_tasks.fetch_add(1, Ordering::Relaxed) + 1;

        // Update peak
        let mut peak = self.peak_tasks.load(Ordering::Relaxed);
        while count > peak {
            match self.peak_tasks.compare_exchange_weak(
                peak,
                count,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }

        count
    }

    /// Decrement active task count
    pub fn decrement_tasks(&self) -> usize {
        self.active_tasks.fetch_sub(1, Ordering::Relaxed) - 1
    }

    /// Get current active task count
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::Relaxed)
    }

    /// Get peak task count
    pub fn peak_tasks(&self) -> usize {
        self.peak_tasks.load(Ordering::Relaxed)
    }

    /// Increment step counter
    pub fn increment_steps(&self, count: u64) {
        self.total_steps.fetch_add(count, Ordering::Relaxed);
    }

    /// Get total steps executed
    pub fn total_steps(&self) -> u64 {
        self.total_steps.load(Ordering::Relaxed)
    }

    /// Reset counters
    pub fn reset(&self) {
        self.active_tasks.store(0, Ordering::Relaxed);
        self.total_steps.store(0, Ordering::Relaxed);
        self.peak_tasks.store(0, Ordering::Relaxed);
    }
}

/// Options for creating a VmContext
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Resource limits
    pub limits: ResourceLimits,

    /// Initial GC threshold in bytes
    pub gc_threshold: usize,

    /// Type registry (shared across contexts)
    pub type_registry: Arc<TypeRegistry>,

    /// Host capabilities to grant the new context at construction time
    pub capabilities: crate::vm::capabilities::CapabilityRegistry,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::default(),
            gc_threshold: 1024 * 1024, // 1 MB
            type_registry: Arc::new(crate::types::create_standard_registry()),
            capabilities: crate::vm::capabilities::CapabilityRegistry::new(),
        }
    }
}

/// VM Execution Context
///
/// Each context has its own:
/// - Heap and garbage collector
/// - Global variables
/// - Resource limits and accounting
/// - GC policy
pub struct VmContext {
    /// Unique context ID
    id: VmContextId,

    /// Garbage collector (owns the heap)
    gc: GarbageCollector,

    /// Global variables
    globals: HashMap<String, Value>,

    /// Resource limits
    limits: ResourceLimits,

    /// Resource usage counters
    counters: ResourceCounters,

    /// Type registry (shared)
    type_registry: Arc<TypeRegistry>,

    /// Modules loaded into this context
    modules: ModuleRegistry,

    /// Mutexes allocated by `MutexNew` in this context, shared with every
    /// Task spawned under it so `MutexId`s resolve across Tasks
    mutex_registry: Arc<MutexRegistry>,

    /// Channels allocated by `ChannelNew` in this context, same rationale
    channel_registry: Arc<ChannelRegistry>,

    /// Host capabilities granted to this context's bytecode
    capabilities: CapabilityRegistry,

    /// The context this one was nested from, if any (see `vm/lifecycle.rs`)
    parent_id: Option<VmContextId>,
}

impl VmContext {
    /// Create a new VM context with default options
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    /// Create a new VM context with specific options
    pub fn with_options(options: VmOptions) -> Self {
        Self::with_options_and_parent(options, None)
    }

    /// Create a nested VM context with a known parent
    pub fn with_parent(options: VmOptions, parent_id: VmContextId) -> Self {
        Self::with_options_and_parent(options, Some(parent_id))
    }

    /// Create a nested VM context, recording the parent it was spawned from
    /// (used by `vm/lifecycle.rs`'s inner-VM support)
    pub fn with_options_and_parent(options: VmOptions, parent_id: Option<VmContextId>) -> Self {
        let id = VmContextId::new();
        let mut gc = GarbageCollector::new(id, options.type_registry.clone());

        // Set GC threshold
        gc.set_threshold(options.gc_threshold);

        // Set max heap size if specified
        if let Some(max_heap) = options.limits.max_heap_bytes {
            gc.set_max_heap_size(max_heap);
        }

        Self {
            id,
            gc,
            globals: HashMap::new(),
            limits: options.limits,
            counters: ResourceCounters::new(),
            type_registry: options.type_registry,
            modules: ModuleRegistry::new(),
            mutex_registry: Arc::new(MutexRegistry::new()),
            channel_registry: Arc::new(ChannelRegistry::new()),
            capabilities: options.capabilities,
            parent_id,
        }
    }

    /// Register a loaded module with this context
    pub fn register_module(&mut self, module: Arc<Module>) -> Result<(), String> {
        self.modules.register(module)
    }

    /// Look up a previously registered module by name
    pub fn get_module(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.get(name)
    }

    /// The module registry for this context
    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// Get the context ID
    pub fn id(&self) -> VmContextId {
        self.id
    }

    /// Get a reference to the garbage collector
    pub fn gc(&self) -> &GarbageCollector {
        &self.gc
    }

    /// Get a mutable reference to the garbage collector
    pub fn gc_mut(&mut self) -> &mut GarbageCollector {
        &mut self.gc
    }

    /// Get GC statistics
    pub fn gc_stats(&self) -> &GcStats {
        self.gc.stats()
    }

    /// Get heap statistics
    pub fn heap_stats(&self) -> HeapStats {
        self.gc.heap_stats()
    }

    /// Get a global variable
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).copied()
    }

    /// Set a global variable
    pub fn set_global(&mut self, name: String, value: Value) {
        self.globals.insert(name, value);
    }

    /// Snapshot every global as an owned `(name, value)` pair, for serialization
    pub fn all_globals(&self) -> Vec<(String, Value)> {
        self.globals
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Replace all globals at once, used when restoring from a snapshot
    pub fn restore_globals(&mut self, globals: Vec<(String, Value)>) {
        self.globals = globals.into_iter().collect();
    }

    /// Get resource limits
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Get resource counters
    pub fn counters(&self) -> &ResourceCounters {
        &self.counters
    }

    /// Get type registry
    pub fn type_registry(&self) -> &Arc<TypeRegistry> {
        &self.type_registry
    }

    /// Check if task creation is allowed
    pub fn can_create_task(&self) -> bool {
        if let Some(max_tasks) = self.limits.max_tasks {
            self.counters.active_tasks() < max_tasks
        } else {
            true
        }
    }

    /// Check if step budget is exhausted
    pub fn is_step_budget_exhausted(&self) -> bool {
        if let Some(max_steps) = self.limits.max_step_budget {
            self.counters.total_steps() >= max_steps
        } else {
            false
        }
    }

    /// Run garbage collection
    pub fn collect_garbage(&mut self) {
        self.gc.collect();
    }

    /// Mutex registry shared by every Task running in this context
    pub fn mutex_registry(&self) -> &Arc<MutexRegistry> {
        &self.mutex_registry
    }

    /// Channel registry shared by every Task running in this context
    pub fn channel_registry(&self) -> &Arc<ChannelRegistry> {
        &self.channel_registry
    }

    /// Host capabilities granted to this context
    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    /// Mutably grant or revoke host capabilities
    pub fn capabilities_mut(&mut self) -> &mut CapabilityRegistry {
        &mut self.capabilities
    }

    /// The context this one was nested from, if any
    pub fn parent_id(&self) -> Option<VmContextId> {
        self.parent_id
    }

    /// Alias for [`VmContext::parent_id`]
    pub fn parent(&self) -> Option<VmContextId> {
        self.parent_id
    }
}

impl Default for VmContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide registry of all VM contexts, shared across every worker thread
pub struct ContextRegistry {
    contexts: dashmap::DashMap<VmContextId, Arc<Mutex<VmContext>>>,
}

impl ContextRegistry {
    /// Create a new context registry
    pub fn new() -> Self {
        Self {
            contexts: dashmap::DashMap::new(),
        }
    }

    /// Register a new context
    pub fn register(&self, context: VmContext) -> Arc<Mutex<VmContext>> {
        let id = context.id();
        let context = Arc::new(Mutex::new(context));
        self.contexts.insert(id, context.clone());
        context
    }

    /// Get a context by ID
    pub fn get(&self, id: VmContextId) -> Option<Arc<Mutex<VmContext>>> {
        self.contexts.get(&id).map(|entry| entry.value().clone())
    }

    /// Remove a context
    pub fn remove(&self, id: VmContextId) -> Option<Arc<Mutex<VmContext>>> {
        self.contexts.remove(&id).map(|(_, ctx)| ctx)
    }

    /// Get the number of registered contexts
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get all context IDs
    pub fn all_ids(&self) -> Vec<VmContextId> {
        self.contexts.iter().map(|e| *e.key()).collect()
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}
