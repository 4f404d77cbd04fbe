//! Mark-sweep garbage collector
//!
//! This module implements a simple mark-sweep garbage collector.

use super::header::GcHeader;
use super::heap::Heap;
use super::ptr::GcPtr;
use super::roots::RootSet;
use crate::object::{Array, Object, RayaString};
use crate::types::TypeRegistry;
use crate::value::Value;
use crate::vm::VmContextId;
use std::any::TypeId;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Garbage collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Total bytes freed
    pub bytes_freed: usize,

    /// Total pause time
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,
}

/// Mark-sweep garbage collector
pub struct GarbageCollector {
    /// Heap allocator
    heap: Heap,

    /// Root set
    roots: RootSet,

    /// GC threshold (bytes)
    threshold: usize,

    /// Statistics
    stats: GcStats,
}

impl GarbageCollector {
    /// Create a new garbage collector for a specific context
    pub fn new(context_id: VmContextId, type_registry: Arc<TypeRegistry>) -> Self {
        Self {
            heap: Heap::new(context_id, type_registry),
            roots: RootSet::new(),
            threshold: 1024 * 1024, // 1 MB initial threshold
            stats: GcStats::default(),
        }
    }

    /// Set GC threshold
    pub fn set_threshold(&mut self, bytes: usize) {
        self.threshold = bytes;
    }

    /// Set maximum heap size
    pub fn set_max_heap_size(&mut self, bytes: usize) {
        self.heap.set_max_heap_size(bytes);
    }

    /// Allocate a value
    pub fn allocate<T: 'static>(&mut self, value: T) -> GcPtr<T> {
        // Check if we should collect
        if self.should_collect() {
            self.collect();
        }

        self.heap.allocate(value)
    }

    /// Allocate an array
    pub fn allocate_array<T: 'static>(&mut self, len: usize) -> GcPtr<[T]>
    where
        T: Default + Clone,
    {
        // Check if we should collect
        if self.should_collect() {
            self.collect();
        }

        self.heap.allocate_array(len)
    }

    /// Add a root
    pub fn add_root(&mut self, value: Value) {
        self.roots.add_stack_root(value);
    }

    /// Clear stack roots (called between VM instructions)
    pub fn clear_stack_roots(&mut self) {
        self.roots.clear_stack_roots();
    }

    /// Check if we should collect
    fn should_collect(&self) -> bool {
        self.heap.allocated_bytes() > self.threshold
    }

    /// Run garbage collection
    pub fn collect(&mut self) {
        let start = Instant::now();

        // Mark phase
        self.mark();

        // Sweep phase
        let freed = self.sweep();

        // Update stats
        let duration = start.elapsed();
        self.stats.collections += 1;
        self.stats.objects_freed += freed;
        self.stats.last_pause_time = duration;
        self.stats.total_pause_time += duration;

        // Adjust threshold (grow by 2x current usage)
        let current_usage = self.heap.allocated_bytes();
        self.threshold = (current_usage * 2).max(1024 * 1024); // At least 1MB
    }

    /// Mark phase: mark all reachable objects
    fn mark(&mut self) {
        // Clear all mark bits first
        for header_ptr in self.heap.iter_allocations() {
            unsafe {
                (*header_ptr).unmark();
            }
        }

        // Mark from roots (collect first to avoid borrow checker issues)
        let roots: Vec<Value> = self.roots.iter().collect();
        for root in roots {
            self.mark_value(root);
        }
    }

    /// Mark a single value and, if it has children, recurse into them
    ///
    /// A heap pointer's payload is the address `Heap::allocate` handed back
    /// to the caller, i.e. the value data itself; the header sits exactly
    /// `size_of::<GcHeader>()` bytes before it (see `GcPtr::header`).
    fn mark_value(&mut self, value: Value) {
        if !value.is_heap_allocated() {
            return;
        }

        let data_ptr = match unsafe { value.as_ptr::<u8>() } {
            Some(p) => p.as_ptr(),
            None => return,
        };
        let header_ptr =
            unsafe { data_ptr.sub(std::mem::size_of::<GcHeader>()) } as *mut GcHeader;

        unsafe {
            if (*header_ptr).is_marked() {
                return;
            }
            (*header_ptr).mark();

            let type_id = (*header_ptr).type_id();
            if type_id == TypeId::of::<Object>() {
                let obj = &*(data_ptr as *const Object);
                let children: Vec<Value> = obj.fields.clone();
                for child in children {
                    self.mark_value(child);
                }
            } else if type_id == TypeId::of::<Array>() {
                let arr = &*(data_ptr as *const Array);
                let children: Vec<Value> = arr.elements.clone();
                for child in children {
                    self.mark_value(child);
                }
            } else if type_id == TypeId::of::<RayaString>() {
                // Leaf: owns only raw UTF-8 bytes, no Value children.
            }
            // Primitive payload types (i32, f64, bool, ...) are leaves too.
        }
    }

    /// Sweep phase: free unmarked objects
    fn sweep(&mut self) -> usize {
        let mut freed_count = 0;

        // Collect unmarked allocations
        let to_free: Vec<*mut GcHeader> = self
            .heap
            .iter_allocations()
            .filter(|&header_ptr| unsafe { !(*header_ptr).is_marked() })
            .collect();

        // Free them
        for header_ptr in to_free {
            unsafe {
                self.heap.free(header_ptr);
            }
            freed_count += 1;
        }

        freed_count
    }

    /// Get GC statistics
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Get heap statistics
    pub fn heap_stats(&self) -> HeapStats {
        HeapStats {
            allocated_bytes: self.heap.allocated_bytes(),
            allocation_count: self.heap.allocation_count(),
            threshold: self.threshold,
        }
    }

    /// Borrow the underlying heap allocator (used by the snapshot writer to
    /// walk every live allocation)
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Capture every live heap object into a snapshot segment, re-keying
    /// pointers to stable ids
    ///
    /// Returns the snapshot alongside the address-to-id map the caller needs
    /// to rewrite pointer `Value`s living outside the heap (globals, task
    /// locals/results, sync-primitive state).
    pub fn snapshot_heap(
        &self,
    ) -> (
        crate::snapshot::heap::HeapSnapshot,
        std::collections::HashMap<usize, u64>,
    ) {
        crate::snapshot::heap::HeapSnapshot::capture(&self.heap)
    }

    /// Reallocate a previously captured heap snapshot into this (freshly
    /// created) collector's heap
    ///
    /// Returns a map from the snapshot's stable ids to the restored pointer
    /// `Value`s, for rewriting globals/task-locals/sync state that pointed
    /// into the old heap.
    pub fn restore_heap(
        &mut self,
        snapshot: &crate::snapshot::heap::HeapSnapshot,
    ) -> std::collections::HashMap<u64, Value> {
        snapshot.install(self)
    }
}

/// Heap statistics
#[derive(Debug, Clone)]
pub struct HeapStats {
    /// Total allocated bytes
    pub allocated_bytes: usize,

    /// Number of allocations
    pub allocation_count: usize,

    /// GC threshold
    pub threshold: usize,
}

impl Default for GarbageCollector {
    fn default() -> Self {
        let context_id = VmContextId::new();
        let type_registry = Arc::new(crate::types::create_standard_registry());
        Self::new(context_id, type_registry)
    }
}
