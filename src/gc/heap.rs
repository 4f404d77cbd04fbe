//! Heap allocator for GC-managed objects
//!
//! This module provides the heap allocator that manages memory for all GC objects.

use super::header::GcHeader;
use super::ptr::GcPtr;
use crate::object::{Array, Object, RayaString};
use crate::types::TypeRegistry;
use crate::vm::VmContextId;
use std::alloc::{alloc, dealloc, Layout};
use std::any::TypeId;
use std::ptr::NonNull;
use std::sync::Arc;

/// Heap allocator for GC-managed memory
pub struct Heap {
    /// Context ID (which VmContext owns this heap)
    context_id: VmContextId,

    /// Type registry for precise GC
    type_registry: Arc<TypeRegistry>,

    /// All allocations (pointer to GcHeader)
    allocations: Vec<*mut GcHeader>,

    /// Total bytes allocated
    allocated_bytes: usize,

    /// Maximum heap size (0 = unlimited)
    max_heap_bytes: usize,
}

impl Heap {
    /// Create a new heap for a specific context
    pub fn new(context_id: VmContextId, type_registry: Arc<TypeRegistry>) -> Self {
        Self {
            context_id,
            type_registry,
            allocations: Vec::new(),
            allocated_bytes: 0,
            max_heap_bytes: 0, // Unlimited by default
        }
    }

    /// Set maximum heap size
    pub fn set_max_heap_size(&mut self, bytes: usize) {
        self.max_heap_bytes = bytes;
    }

    /// Get the context ID
    pub fn context_id(&self) -> VmContextId {
        self.context_id
    }

    /// Get the type registry
    pub fn type_registry(&self) -> &Arc<TypeRegistry> {
        &self.type_registry
    }

    /// Allocate a value on the heap
    ///
    /// Returns a GC pointer to the allocated object.
    ///
    /// # Panics
    ///
    /// Panics if allocation fails or heap size limit is exceeded.
    pub fn allocate<T: 'static>(&mut self, value: T) -> GcPtr<T> {
        let type_id = TypeId::of::<T>();

        // Calculate layouts
        let header_layout = Layout::new::<GcHeader>();
        let value_layout = Layout::new::<T>();

        // Combine layouts (header + value)
        let (combined_layout, value_offset) = header_layout
            .extend(value_layout)
            .expect("Failed to calculate layout");

        // Check heap size limit
        if self.max_heap_bytes > 0
            && self.allocated_bytes + combined_layout.size() > self.max_heap_bytes
        {
            panic!("Heap size limit exceeded");
        }

        // Allocate memory
        let ptr = unsafe { alloc(combined_layout) };
        if ptr.is_null() {
            panic!("Out of memory");
        }

        // Initialize header
        let header_ptr = ptr as *mut GcHeader;
        unsafe {
            header_ptr.write(GcHeader::new(
                self.context_id,
                type_id,
                combined_layout.size(),
            ));
        }

        // Initialize value
        let value_ptr = unsafe { ptr.add(value_offset) as *mut T };
        unsafe {
            value_ptr.write(value);
        }

        // Track allocation
        self.allocations.push(header_ptr);
        self.allocated_bytes += combined_layout.size();

        // Return GC pointer
        unsafe { GcPtr::new(NonNull::new_unchecked(value_ptr)) }
    }

    /// Allocate an array on the heap
    pub fn allocate_array<T>(&mut self, len: usize) -> GcPtr<[T]>
    where
        T: 'static + Default + Clone,
    {
        let type_id = TypeId::of::<[T]>();

        // Calculate layouts
        let header_layout = Layout::new::<GcHeader>();
        let array_layout = Layout::array::<T>(len).expect("Failed to calculate array layout");

        // Combine layouts
        let (combined_layout, array_offset) = header_layout
            .extend(array_layout)
            .expect("Failed to calculate layout");

        // Check heap size limit
        if self.max_heap_bytes > 0
            && self.allocated_bytes + combined_layout.size() > self.max_heap_bytes
        {
            panic!("Heap size limit exceeded");
        }

        // Allocate memory
        let ptr = unsafe { alloc(combined_layout) };
        if ptr.is_null() {
            panic!("Out of memory");
        }

        // Initialize header
        let header_ptr = ptr as *mut GcHeader;
        unsafe {
            header_ptr.write(GcHeader::new(
                self.context_id,
                type_id,
                combined_layout.size(),
            ));
        }

        // Initialize array
        let array_ptr = unsafe { ptr.add(array_offset) as *mut T };
        for i in 0..len {
            unsafe {
                array_ptr.add(i).write(T::default());
            }
        }

        // Track allocation
        self.allocations.push(header_ptr);
        self.allocated_bytes += combined_layout.size();

        // Create slice pointer
        let slice_ptr = std::ptr::slice_from_raw_parts_mut(array_ptr, len);
        unsafe { GcPtr::new(NonNull::new_unchecked(slice_ptr)) }
    }

    /// Drop the value in place and deallocate header + value as one block
    ///
    /// `T`'s value data sits immediately after the header with no padding,
    /// which holds for every type this heap actually stores (see
    /// `allocate`): their alignment never exceeds `GcHeader`'s.
    unsafe fn drop_and_dealloc<T>(header_ptr: *mut GcHeader) {
        let base = header_ptr as *mut u8;
        let value_ptr = base.add(std::mem::size_of::<GcHeader>()) as *mut T;
        std::ptr::drop_in_place(value_ptr);
        let size = (*header_ptr).size();
        let layout = Layout::from_size_align_unchecked(size, std::mem::align_of::<GcHeader>());
        dealloc(base, layout);
    }

    /// Free an allocation (called by GC sweep)
    ///
    /// Runs `T`'s destructor and releases the memory back to the allocator.
    /// Allocations of a type this heap doesn't recognize are dropped from
    /// the tracking list without running a destructor or deallocating -
    /// this can only happen for types registered through `allocate_array`,
    /// which isn't exercised by any opcode today.
    ///
    /// # Safety
    ///
    /// The header pointer must be valid and allocated by this heap, and must
    /// not be freed more than once.
    pub unsafe fn free(&mut self, header_ptr: *mut GcHeader) {
        let type_id = (*header_ptr).type_id();
        let size = (*header_ptr).size();

        if type_id == TypeId::of::<Object>() {
            Self::drop_and_dealloc::<Object>(header_ptr);
        } else if type_id == TypeId::of::<Array>() {
            Self::drop_and_dealloc::<Array>(header_ptr);
        } else if type_id == TypeId::of::<RayaString>() {
            Self::drop_and_dealloc::<RayaString>(header_ptr);
        } else if type_id == TypeId::of::<String>() {
            Self::drop_and_dealloc::<String>(header_ptr);
        } else if type_id == TypeId::of::<i32>() {
            Self::drop_and_dealloc::<i32>(header_ptr);
        } else if type_id == TypeId::of::<i64>() {
            Self::drop_and_dealloc::<i64>(header_ptr);
        } else if type_id == TypeId::of::<u32>() {
            Self::drop_and_dealloc::<u32>(header_ptr);
        } else if type_id == TypeId::of::<u64>() {
            Self::drop_and_dealloc::<u64>(header_ptr);
        } else if type_id == TypeId::of::<f32>() {
            Self::drop_and_dealloc::<f32>(header_ptr);
        } else if type_id == TypeId::of::<f64>() {
            Self::drop_and_dealloc::<f64>(header_ptr);
        } else if type_id == TypeId::of::<bool>() {
            Self::drop_and_dealloc::<bool>(header_ptr);
        }

        if let Some(pos) = self.allocations.iter().position(|&p| p == header_ptr) {
            self.allocations.swap_remove(pos);
        }
        self.allocated_bytes = self.allocated_bytes.saturating_sub(size);
    }

    /// Get total allocated bytes
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Get number of allocations
    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// Iterate over all allocations
    pub fn iter_allocations(&self) -> impl Iterator<Item = *mut GcHeader> + '_ {
        self.allocations.iter().copied()
    }
}

impl Default for Heap {
    fn default() -> Self {
        let context_id = VmContextId::new();
        let type_registry = Arc::new(crate::types::create_standard_registry());
        Self::new(context_id, type_registry)
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let remaining: Vec<*mut GcHeader> = self.allocations.clone();
        for header_ptr in remaining {
            unsafe {
                self.free(header_ptr);
            }
        }
    }
}
