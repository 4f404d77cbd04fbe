//! Runtime type registry for precise garbage collection
//!
//! Every heap-allocated Rust type used by the VM is registered here with a
//! [`PointerMap`] describing where, within its memory layout, GC pointers
//! live. The collector uses this instead of conservative stack/heap scanning.

mod pointer_map;
mod registry;

pub use pointer_map::PointerMap;
pub use registry::{create_standard_registry, DropFn, TypeInfo, TypeRegistry, TypeRegistryBuilder};
