//! Mutex and Channel serialization for VM snapshotting

use crate::scheduler::TaskId;
use crate::sync::{ChannelId, MutexId};
use crate::value::Value;
use std::io::{Read, Write};

/// Serialized form of a Mutex for snapshotting
#[derive(Debug, Clone)]
pub struct SerializedMutex {
    /// Mutex ID
    pub mutex_id: MutexId,
    /// Current owner (None if unlocked)
    pub owner: Option<TaskId>,
    /// FIFO wait queue of blocked Tasks
    pub wait_queue: Vec<TaskId>,
}

impl SerializedMutex {
    /// Create a new serialized mutex
    pub fn new(mutex_id: MutexId) -> Self {
        Self {
            mutex_id,
            owner: None,
            wait_queue: Vec::new(),
        }
    }

    /// Encode serialized mutex to binary format
    pub fn encode<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        // Write mutex ID (8 bytes)
        writer.write_all(&self.mutex_id.as_u64().to_le_bytes())?;

        // Write owner (1 byte presence + 8 bytes if present)
        if let Some(owner) = self.owner {
            writer.write_all(&[1u8])?;
            writer.write_all(&owner.as_u64().to_le_bytes())?;
        } else {
            writer.write_all(&[0u8])?;
        }

        // Write wait queue length (4 bytes)
        writer.write_all(&(self.wait_queue.len() as u32).to_le_bytes())?;

        // Write each waiting task ID (8 bytes each)
        for task_id in &self.wait_queue {
            writer.write_all(&task_id.as_u64().to_le_bytes())?;
        }

        Ok(())
    }

    /// Decode serialized mutex from binary format
    pub fn decode<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        // Read mutex ID (8 bytes)
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf)?;
        let mutex_id = MutexId::from_u64(u64::from_le_bytes(buf));

        // Read owner (1 byte presence + 8 bytes if present)
        let mut presence = [0u8; 1];
        reader.read_exact(&mut presence)?;
        let owner = if presence[0] == 1 {
            reader.read_exact(&mut buf)?;
            Some(TaskId::from_u64(u64::from_le_bytes(buf)))
        } else {
            None
        };

        // Read wait queue length (4 bytes)
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let queue_len = u32::from_le_bytes(len_buf) as usize;

        // Read each waiting task ID (8 bytes each)
        let mut wait_queue = Vec::with_capacity(queue_len);
        for _ in 0..queue_len {
            reader.read_exact(&mut buf)?;
            wait_queue.push(TaskId::from_u64(u64::from_le_bytes(buf)));
        }

        Ok(Self {
            mutex_id,
            owner,
            wait_queue,
        })
    }
}

/// Serialized form of a Channel for snapshotting
#[derive(Debug, Clone)]
pub struct SerializedChannel {
    /// Channel ID
    pub channel_id: ChannelId,
    /// Bounded capacity (0 = unbounded)
    pub capacity: usize,
    /// Whether the channel has been closed
    pub closed: bool,
    /// Buffered values, oldest first
    pub buffer: Vec<Value>,
    /// Tasks parked waiting to send
    pub send_waiters: Vec<TaskId>,
    /// Tasks parked waiting to receive
    pub recv_waiters: Vec<TaskId>,
}

impl SerializedChannel {
    /// Create a new serialized channel with empty state
    pub fn new(channel_id: ChannelId, capacity: usize) -> Self {
        Self {
            channel_id,
            capacity,
            closed: false,
            buffer: Vec::new(),
            send_waiters: Vec::new(),
            recv_waiters: Vec::new(),
        }
    }

    /// Encode serialized channel to binary format
    pub fn encode<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.channel_id.as_u64().to_le_bytes())?;
        writer.write_all(&(self.capacity as u64).to_le_bytes())?;
        writer.write_all(&[self.closed as u8])?;

        writer.write_all(&(self.buffer.len() as u32).to_le_bytes())?;
        for value in &self.buffer {
            value.encode(writer)?;
        }

        writer.write_all(&(self.send_waiters.len() as u32).to_le_bytes())?;
        for task_id in &self.send_waiters {
            writer.write_all(&task_id.as_u64().to_le_bytes())?;
        }

        writer.write_all(&(self.recv_waiters.len() as u32).to_le_bytes())?;
        for task_id in &self.recv_waiters {
            writer.write_all(&task_id.as_u64().to_le_bytes())?;
        }

        Ok(())
    }

    /// Decode serialized channel from binary format
    pub fn decode<R: Read>(reader: &mut R, needs_byte_swap: bool) -> std::io::Result<Self> {
        use crate::snapshot::format::byteswap;

        let mut buf8 = [0u8; 8];
        reader.read_exact(&mut buf8)?;
        let channel_id = ChannelId::from_u64(byteswap::swap_u64(u64::from_le_bytes(buf8), needs_byte_swap));

        reader.read_exact(&mut buf8)?;
        let capacity = byteswap::swap_u64(u64::from_le_bytes(buf8), needs_byte_swap) as usize;

        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        let closed = byte[0] != 0;

        let mut buf4 = [0u8; 4];
        reader.read_exact(&mut buf4)?;
        let buffer_len = byteswap::swap_u32(u32::from_le_bytes(buf4), needs_byte_swap) as usize;
        let mut buffer = Vec::with_capacity(buffer_len);
        for _ in 0..buffer_len {
            buffer.push(Value::decode_with_byteswap(reader, needs_byte_swap)?);
        }

        reader.read_exact(&mut buf4)?;
        let send_len = byteswap::swap_u32(u32::from_le_bytes(buf4), needs_byte_swap) as usize;
        let mut send_waiters = Vec::with_capacity(send_len);
        for _ in 0..send_len {
            reader.read_exact(&mut buf8)?;
            send_waiters.push(TaskId::from_u64(byteswap::swap_u64(u64::from_le_bytes(buf8), needs_byte_swap)));
        }

        reader.read_exact(&mut buf4)?;
        let recv_len = byteswap::swap_u32(u32::from_le_bytes(buf4), needs_byte_swap) as usize;
        let mut recv_waiters = Vec::with_capacity(recv_len);
        for _ in 0..recv_len {
            reader.read_exact(&mut buf8)?;
            recv_waiters.push(TaskId::from_u64(byteswap::swap_u64(u64::from_le_bytes(buf8), needs_byte_swap)));
        }

        Ok(Self {
            channel_id,
            capacity,
            closed,
            buffer,
            send_waiters,
            recv_waiters,
        })
    }
}
