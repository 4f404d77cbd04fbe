//! Heap serialization for snapshots
//!
//! Captures every live object reachable through the heap allocator -
//! `Object`, `Array`, and `RayaString` are the only GC-managed types the
//! interpreter ever points a `Value` at - and re-keys pointers by a stable
//! id, per the snapshot format's "references rewritten to ids" contract.
//! Primitive allocations (the `Heap::allocate(42i32)` style used only by
//! unit tests) carry no outgoing pointers and are never reachable from a
//! `Value`, so they're skipped; nothing in a running VM can observe their
//! absence.

use crate::gc::{GarbageCollector, GcHeader, Heap};
use crate::object::{Array, Object, RayaString};
use crate::value::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::ptr::NonNull;

/// Stable object ID for snapshot serialization
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Create a new object ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the object ID as a u64
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

const KIND_OBJECT: u8 = 0;
const KIND_ARRAY: u8 = 1;
const KIND_STRING: u8 = 2;

/// One heap allocation as captured for a snapshot, pointers rewritten to ids
#[derive(Debug, Clone)]
enum HeapEntry {
    Object {
        id: u64,
        class_id: u32,
        fields: Vec<Value>,
    },
    Array {
        id: u64,
        element_type_id: u32,
        elements: Vec<Value>,
    },
    String {
        id: u64,
        data: String,
    },
}

impl HeapEntry {
    fn id(&self) -> u64 {
        match self {
            HeapEntry::Object { id, .. } => *id,
            HeapEntry::Array { id, .. } => *id,
            HeapEntry::String { id, .. } => *id,
        }
    }

    fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writer.write_all(&self.id().to_le_bytes())?;
        match self {
            HeapEntry::Object {
                class_id, fields, ..
            } => {
                writer.write_all(&[KIND_OBJECT])?;
                writer.write_all(&class_id.to_le_bytes())?;
                writer.write_all(&(fields.len() as u32).to_le_bytes())?;
                for v in fields {
                    v.encode(writer)?;
                }
            }
            HeapEntry::Array {
                element_type_id,
                elements,
                ..
            } => {
                writer.write_all(&[KIND_ARRAY])?;
                writer.write_all(&element_type_id.to_le_bytes())?;
                writer.write_all(&(elements.len() as u32).to_le_bytes())?;
                for v in elements {
                    v.encode(writer)?;
                }
            }
            HeapEntry::String { data, .. } => {
                writer.write_all(&[KIND_STRING])?;
                let bytes = data.as_bytes();
                writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
                writer.write_all(bytes)?;
            }
        }
        Ok(())
    }

    fn decode(reader: &mut impl Read) -> std::io::Result<Self> {
        let mut buf8 = [0u8; 8];
        reader.read_exact(&mut buf8)?;
        let id = u64::from_le_bytes(buf8);

        let mut kind = [0u8; 1];
        reader.read_exact(&mut kind)?;

        let mut buf4 = [0u8; 4];
        match kind[0] {
            KIND_OBJECT => {
                reader.read_exact(&mut buf4)?;
                let class_id = u32::from_le_bytes(buf4);
                reader.read_exact(&mut buf4)?;
                let count = u32::from_le_bytes(buf4) as usize;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    fields.push(Value::decode_with_byteswap(reader, false)?);
                }
                Ok(HeapEntry::Object {
                    id,
                    class_id,
                    fields,
                })
            }
            KIND_ARRAY => {
                reader.read_exact(&mut buf4)?;
                let element_type_id = u32::from_le_bytes(buf4);
                reader.read_exact(&mut buf4)?;
                let count = u32::from_le_bytes(buf4) as usize;
                let mut elements = Vec::with_capacity(count);
                for _ in 0..count {
                    elements.push(Value::decode_with_byteswap(reader, false)?);
                }
                Ok(HeapEntry::Array {
                    id,
                    element_type_id,
                    elements,
                })
            }
            KIND_STRING => {
                reader.read_exact(&mut buf4)?;
                let len = u32::from_le_bytes(buf4) as usize;
                let mut bytes = vec![0u8; len];
                reader.read_exact(&mut bytes)?;
                let data = String::from_utf8(bytes)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                Ok(HeapEntry::String { id, data })
            }
            other => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown heap entry kind {other}"),
            )),
        }
    }
}

/// Heap snapshot containing every live allocated object, pointers rewritten
/// to stable ids
#[derive(Debug, Default)]
pub struct HeapSnapshot {
    entries: Vec<HeapEntry>,
}

impl HeapSnapshot {
    /// Create a new empty heap snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty heap snapshot
    pub fn empty() -> Self {
        Self::new()
    }

    /// Number of objects captured
    pub fn object_count(&self) -> usize {
        self.entries.len()
    }

    /// Walk every live allocation in `heap`, re-keying pointers to stable ids
    ///
    /// Returns the snapshot alongside the address-to-id map the caller needs
    /// to rewrite pointer `Value`s living outside the heap itself (globals,
    /// task locals/results, channel buffers, mutex-held values).
    pub fn capture(heap: &Heap) -> (Self, HashMap<usize, u64>) {
        let mut addr_to_id = HashMap::new();
        for (next_id, header_ptr) in heap.iter_allocations().enumerate() {
            let data_addr = unsafe { data_ptr_of(header_ptr) } as usize;
            addr_to_id.insert(data_addr, next_id as u64);
        }

        let mut entries = Vec::with_capacity(addr_to_id.len());
        for header_ptr in heap.iter_allocations() {
            let data_ptr = unsafe { data_ptr_of(header_ptr) };
            let id = addr_to_id[&(data_ptr as usize)];
            let type_id = unsafe { (*header_ptr).type_id() };

            if type_id == TypeId::of::<Object>() {
                let obj = unsafe { &*(data_ptr as *const Object) };
                let fields = obj
                    .fields
                    .iter()
                    .map(|v| rewrite_ptr_to_id(*v, &addr_to_id))
                    .collect();
                entries.push(HeapEntry::Object {
                    id,
                    class_id: obj.class_id as u32,
                    fields,
                });
            } else if type_id == TypeId::of::<Array>() {
                let arr = unsafe { &*(data_ptr as *const Array) };
                let elements = arr
                    .elements
                    .iter()
                    .map(|v| rewrite_ptr_to_id(*v, &addr_to_id))
                    .collect();
                entries.push(HeapEntry::Array {
                    id,
                    element_type_id: arr.type_id as u32,
                    elements,
                });
            } else if type_id == TypeId::of::<RayaString>() {
                let s = unsafe { &*(data_ptr as *const RayaString) };
                entries.push(HeapEntry::String {
                    id,
                    data: s.data.clone(),
                });
            }
            // Any other registered type has no Value children and is never
            // pointed at by a live Value; skipping it loses nothing.
        }

        (Self { entries }, addr_to_id)
    }

    /// Reallocate every captured object into `gc`'s heap and resolve
    /// id-tagged pointer slots to the freshly allocated addresses.
    ///
    /// Returns a map from this snapshot's stable ids to the restored
    /// pointer `Value`s, so callers can rewrite globals, task locals, and
    /// sync-primitive state that referenced the pre-snapshot heap.
    pub fn install(&self, gc: &mut GarbageCollector) -> HashMap<u64, Value> {
        let mut id_to_value = HashMap::with_capacity(self.entries.len());

        enum Pending {
            Object(*mut Object, Vec<Value>),
            Array(*mut Array, Vec<Value>),
        }
        let mut pending = Vec::new();

        for entry in &self.entries {
            match entry {
                HeapEntry::Object {
                    id,
                    class_id,
                    fields,
                } => {
                    let obj = Object::new(*class_id as usize, fields.len());
                    let mut ptr = gc.allocate(obj);
                    let value =
                        unsafe { Value::from_ptr(NonNull::new_unchecked(ptr.as_ptr())) };
                    id_to_value.insert(*id, value);
                    pending.push(Pending::Object(ptr.as_ptr(), fields.clone()));
                }
                HeapEntry::Array {
                    id,
                    element_type_id,
                    elements,
                } => {
                    let arr =
                        Array::new(*element_type_id as usize, elements.len());
                    let mut ptr = gc.allocate(arr);
                    let value =
                        unsafe { Value::from_ptr(NonNull::new_unchecked(ptr.as_ptr())) };
                    id_to_value.insert(*id, value);
                    pending.push(Pending::Array(ptr.as_ptr(), elements.clone()));
                }
                HeapEntry::String { id, data } => {
                    let ptr = gc.allocate(RayaString::new(data.clone()));
                    let value =
                        unsafe { Value::from_ptr(NonNull::new_unchecked(ptr.as_ptr())) };
                    id_to_value.insert(*id, value);
                }
            }
        }

        // Fixup pass: every id now has a real address, rewrite the
        // id-tagged pointer slots recorded above into real pointer Values.
        for entry in pending {
            match entry {
                Pending::Object(ptr, fields) => {
                    let obj = unsafe { &mut *ptr };
                    for (slot, v) in obj.fields.iter_mut().zip(fields.into_iter()) {
                        *slot = resolve_ptr_id(v, &id_to_value);
                    }
                }
                Pending::Array(ptr, elements) => {
                    let arr = unsafe { &mut *ptr };
                    for (slot, v) in arr.elements.iter_mut().zip(elements.into_iter()) {
                        *slot = resolve_ptr_id(v, &id_to_value);
                    }
                }
            }
        }

        id_to_value
    }

    /// Encode heap snapshot to writer
    pub fn encode(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writer.write_all(&(self.entries.len() as u64).to_le_bytes())?;
        for entry in &self.entries {
            entry.encode(writer)?;
        }
        Ok(())
    }

    /// Decode heap snapshot from reader
    pub fn decode(reader: &mut impl Read) -> std::io::Result<Self> {
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        let count = u64::from_le_bytes(buf) as usize;

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(HeapEntry::decode(reader)?);
        }
        Ok(Self { entries })
    }
}

/// The data pointer a `GcPtr<T>` hands out sits exactly `size_of::<GcHeader>()`
/// bytes after the header (see `GcPtr::header`); this is the inverse walk.
unsafe fn data_ptr_of(header_ptr: *mut GcHeader) -> *mut u8 {
    (header_ptr as *mut u8).add(std::mem::size_of::<GcHeader>())
}

/// Rewrite a heap pointer `Value` into an id-tagged placeholder, leaving any
/// non-pointer value untouched
pub fn rewrite_ptr_to_id(v: Value, addr_to_id: &HashMap<usize, u64>) -> Value {
    if !v.is_ptr() {
        return v;
    }
    let Some(addr) = (unsafe { v.as_ptr::<u8>() }) else {
        return v;
    };
    match addr_to_id.get(&(addr.as_ptr() as usize)) {
        Some(&id) => Value::snapshot_ptr_id(id),
        None => v,
    }
}

/// Resolve a (possibly) id-tagged pointer `Value` back into a real pointer,
/// leaving any non-pointer value untouched. An id with no matching object
/// (shouldn't happen for a well-formed snapshot) resolves to null rather
/// than panicking.
pub fn resolve_ptr_id(v: Value, id_to_value: &HashMap<u64, Value>) -> Value {
    let Some(id) = v.as_snapshot_ptr_id() else {
        return v;
    };
    id_to_value.get(&id).copied().unwrap_or(Value::null())
}
