//! Registries of live Mutex and Channel instances, keyed by their IDs

use crate::sync::{Channel, ChannelId, Mutex, MutexId, SerializedChannel, SerializedMutex};
use dashmap::DashMap;
use std::sync::Arc;

/// Thread-safe registry mapping MutexId to its Mutex
///
/// Owned by a VmContext; the `MutexNew` opcode allocates an entry here and
/// pushes the resulting MutexId onto the stack, so the mutex itself never
/// needs to live on the GC heap.
#[derive(Default)]
pub struct MutexRegistry {
    mutexes: DashMap<MutexId, Arc<Mutex>>,
}

impl MutexRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            mutexes: DashMap::new(),
        }
    }

    /// Allocate and register a new mutex, returning its ID
    pub fn create(&self) -> MutexId {
        let id = MutexId::new();
        self.mutexes.insert(id, Arc::new(Mutex::new(id)));
        id
    }

    /// Look up a mutex by ID
    pub fn get(&self, id: MutexId) -> Option<Arc<Mutex>> {
        self.mutexes.get(&id).map(|entry| entry.clone())
    }

    /// Remove a mutex from the registry
    pub fn remove(&self, id: MutexId) -> Option<Arc<Mutex>> {
        self.mutexes.remove(&id).map(|(_, m)| m)
    }

    /// Number of live mutexes
    pub fn len(&self) -> usize {
        self.mutexes.len()
    }

    /// Whether the registry has no mutexes
    pub fn is_empty(&self) -> bool {
        self.mutexes.is_empty()
    }

    /// Serialize every live mutex, for inclusion in a VM snapshot
    pub fn serialize_all(&self) -> Vec<SerializedMutex> {
        self.mutexes.iter().map(|entry| entry.value().serialize()).collect()
    }

    /// Replace the registry's contents with previously serialized mutexes
    pub fn restore_all(&self, serialized: Vec<SerializedMutex>) {
        self.mutexes.clear();
        for data in serialized {
            let id = data.mutex_id;
            self.mutexes.insert(id, Arc::new(Mutex::deserialize(data)));
        }
    }
}

/// Thread-safe registry mapping ChannelId to its Channel
///
/// Owned by a VmContext; the `ChannelNew` opcode allocates an entry here and
/// pushes the resulting ChannelId onto the stack, so the channel itself never
/// needs to live on the GC heap.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: DashMap<ChannelId, Arc<Channel>>,
}

impl ChannelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Allocate and register a new channel, returning its ID
    pub fn create(&self, capacity: usize) -> ChannelId {
        let id = ChannelId::new();
        self.channels.insert(id, Arc::new(Channel::new(id, capacity)));
        id
    }

    /// Look up a channel by ID
    pub fn get(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.channels.get(&id).map(|entry| entry.clone())
    }

    /// Remove a channel from the registry
    pub fn remove(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.channels.remove(&id).map(|(_, c)| c)
    }

    /// Number of live channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the registry has no channels
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Serialize every live channel, for inclusion in a VM snapshot
    pub fn serialize_all(&self) -> Vec<SerializedChannel> {
        self.channels.iter().map(|entry| entry.value().serialize()).collect()
    }

    /// Replace the registry's contents with previously serialized channels
    pub fn restore_all(&self, serialized: Vec<SerializedChannel>) {
        self.channels.clear();
        for data in serialized {
            let id = data.channel_id;
            self.channels.insert(id, Arc::new(Channel::deserialize(data)));
        }
    }
}
