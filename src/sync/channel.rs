//! Task-aware Channel implementation (bounded and unbounded FIFO)
//!
//! Mirrors [`crate::sync::Mutex`]'s blocking model: operations that cannot
//! complete immediately return a block reason instead of parking the OS
//! thread, so the scheduler can suspend the calling Task and resume it later
//! without tying up a worker.

use crate::scheduler::TaskId;
use crate::sync::ChannelId;
use crate::value::Value;
use parking_lot::Mutex as ParkingLotMutex;
use std::collections::VecDeque;

/// Errors that can occur using a Channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Channel not found in registry
    #[error("Channel {0:?} not found")]
    NotFound(ChannelId),

    /// Send attempted on a closed channel
    #[error("Send on closed channel {0:?}")]
    SendOnClosed(ChannelId),
}

/// Reason a channel operation didn't complete immediately
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelBlockReason {
    /// Blocked trying to send (bounded channel is full)
    AwaitingSend(ChannelId),
    /// Blocked trying to receive (channel is empty)
    AwaitingRecv(ChannelId),
    /// Send attempted after the channel was closed; this Task is not parked
    /// and should fail immediately rather than be added to a waiter queue
    Closed,
}

#[derive(Debug)]
struct Inner {
    buffer: VecDeque<Value>,
    capacity: usize,
    closed: bool,
    send_waiters: VecDeque<TaskId>,
    recv_waiters: VecDeque<TaskId>,
}

/// A FIFO channel for Task-to-Task communication
///
/// `capacity == 0` means unbounded: sends never block on capacity, only on
/// direct hand-off bookkeeping used to wake waiting receivers.
pub struct Channel {
    id: ChannelId,
    inner: ParkingLotMutex<Inner>,
}

impl Channel {
    /// Create a new channel with the given capacity (0 = unbounded)
    pub fn new(id: ChannelId, capacity: usize) -> Self {
        Self {
            id,
            inner: ParkingLotMutex::new(Inner {
                buffer: VecDeque::new(),
                capacity,
                closed: false,
                send_waiters: VecDeque::new(),
                recv_waiters: VecDeque::new(),
            }),
        }
    }

    /// Get the channel ID
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Whether this channel has unbounded capacity
    pub fn is_unbounded(&self) -> bool {
        self.inner.lock().capacity == 0
    }

    /// Attempt to send a value (called from the `ChannelSend` opcode)
    ///
    /// Returns `Ok(Some(task_id))` if a waiting receiver should be woken,
    /// `Ok(None)` if the value was buffered with no one waiting, or
    /// `Err(ChannelBlockReason::AwaitingSend)` if the Task must block
    /// (bounded channel at capacity).
    pub fn try_send(
        &self,
        task_id: TaskId,
        value: Value,
    ) -> Result<Option<TaskId>, ChannelBlockReason> {
        let mut inner = self.inner.lock();

        if inner.closed {
            return Err(ChannelBlockReason::Closed);
        }

        if inner.capacity > 0 && inner.buffer.len() >= inner.capacity {
            inner.send_waiters.push_back(task_id);
            return Err(ChannelBlockReason::AwaitingSend(self.id));
        }

        inner.buffer.push_back(value);
        let woken = inner.recv_waiters.pop_front();
        Ok(woken)
    }

    /// Attempt to receive a value (called from the `ChannelRecv` opcode)
    ///
    /// Returns `Ok((value, maybe_woken_sender))` on success, or
    /// `Err(ChannelBlockReason::AwaitingRecv)` if the Task must block. A
    /// closed channel with nothing left buffered yields `Value::null()`
    /// immediately rather than parking the receiver forever.
    pub fn try_recv(
        &self,
        task_id: TaskId,
    ) -> Result<(Value, Option<TaskId>), ChannelBlockReason> {
        let mut inner = self.inner.lock();

        match inner.buffer.pop_front() {
            Some(value) => {
                let woken = inner.send_waiters.pop_front();
                Ok((value, woken))
            }
            None if inner.closed => Ok((Value::null(), None)),
            None => {
                inner.recv_waiters.push_back(task_id);
                Err(ChannelBlockReason::AwaitingRecv(self.id))
            }
        }
    }

    /// Close the channel; no further sends are accepted
    ///
    /// Returns the Tasks that were parked on this channel so the caller can
    /// reschedule them: receivers wake with a null read (drained buffer
    /// still takes priority over the close), senders wake to a
    /// `SendOnClosed` error.
    pub fn close(&self) -> (Vec<TaskId>, Vec<TaskId>) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let recv_waiters = inner.recv_waiters.drain(..).collect();
        let send_waiters = inner.send_waiters.drain(..).collect();
        (recv_waiters, send_waiters)
    }

    /// Whether the channel has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of buffered values
    pub fn len(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    /// Whether the buffer is currently empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().buffer.is_empty()
    }

    /// Serialize the channel state
    pub fn serialize(&self) -> crate::sync::SerializedChannel {
        let inner = self.inner.lock();
        crate::sync::SerializedChannel {
            channel_id: self.id,
            capacity: inner.capacity,
            closed: inner.closed,
            buffer: inner.buffer.iter().copied().collect(),
            send_waiters: inner.send_waiters.iter().copied().collect(),
            recv_waiters: inner.recv_waiters.iter().copied().collect(),
        }
    }

    /// Deserialize and restore channel state
    pub fn deserialize(data: crate::sync::SerializedChannel) -> Self {
        Self {
            id: data.channel_id,
            inner: ParkingLotMutex::new(Inner {
                buffer: data.buffer.into_iter().collect(),
                capacity: data.capacity,
                closed: data.closed,
                send_waiters: data.send_waiters.into_iter().collect(),
                recv_waiters: data.recv_waiters.into_iter().collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_send_recv() {
        let channel = Channel::new(ChannelId::new(), 0);
        let sender = TaskId::new();
        let receiver = TaskId::new();

        assert!(channel.try_send(sender, Value::i32(1)).is_ok());
        let (value, woken) = channel.try_recv(receiver).unwrap();
        assert_eq!(value, Value::i32(1));
        assert_eq!(woken, None);
    }

    #[test]
    fn test_bounded_send_blocks_at_capacity() {
        let channel = Channel::new(ChannelId::new(), 1);
        let sender1 = TaskId::new();
        let sender2 = TaskId::new();

        assert!(channel.try_send(sender1, Value::i32(1)).is_ok());
        let result = channel.try_send(sender2, Value::i32(2));
        assert!(matches!(result, Err(ChannelBlockReason::AwaitingSend(_))));
    }

    #[test]
    fn test_recv_blocks_when_empty() {
        let channel = Channel::new(ChannelId::new(), 0);
        let receiver = TaskId::new();

        let result = channel.try_recv(receiver);
        assert!(matches!(result, Err(ChannelBlockReason::AwaitingRecv(_))));
    }

    #[test]
    fn test_recv_wakes_blocked_sender() {
        let channel = Channel::new(ChannelId::new(), 1);
        let sender1 = TaskId::new();
        let sender2 = TaskId::new();
        let receiver = TaskId::new();

        channel.try_send(sender1, Value::i32(1)).unwrap();
        let blocked = channel.try_send(sender2, Value::i32(2));
        assert!(blocked.is_err());

        let (value, woken) = channel.try_recv(receiver).unwrap();
        assert_eq!(value, Value::i32(1));
        assert_eq!(woken, Some(sender2));
    }

    #[test]
    fn test_close() {
        let channel = Channel::new(ChannelId::new(), 0);
        assert!(!channel.is_closed());
        channel.close();
        assert!(channel.is_closed());
    }

    #[test]
    fn test_close_wakes_parked_waiters() {
        let channel = Channel::new(ChannelId::new(), 1);
        let sender1 = TaskId::new();
        let sender2 = TaskId::new();
        let receiver = TaskId::new();

        // Fill the one slot, park sender2 behind it.
        channel.try_send(sender1, Value::i32(1)).unwrap();
        assert!(matches!(
            channel.try_send(sender2, Value::i32(2)),
            Err(ChannelBlockReason::AwaitingSend(_))
        ));

        // Drain the buffer (this also reports sender2 as woken, since a
        // slot just freed up), then park the receiver with nothing left.
        channel.try_recv(receiver).unwrap();
        assert!(matches!(
            channel.try_recv(receiver),
            Err(ChannelBlockReason::AwaitingRecv(_))
        ));

        let (recv_waiters, send_waiters) = channel.close();
        assert_eq!(recv_waiters, vec![receiver]);
        assert!(send_waiters.is_empty());
    }

    #[test]
    fn test_recv_on_closed_empty_channel_yields_null() {
        let channel = Channel::new(ChannelId::new(), 0);
        channel.close();

        let receiver = TaskId::new();
        let (value, woken) = channel.try_recv(receiver).unwrap();
        assert_eq!(value, Value::null());
        assert_eq!(woken, None);
    }

    #[test]
    fn test_send_on_closed_channel_fails_immediately() {
        let channel = Channel::new(ChannelId::new(), 0);
        channel.close();

        let sender = TaskId::new();
        let result = channel.try_send(sender, Value::i32(1));
        assert!(matches!(result, Err(ChannelBlockReason::Closed)));
    }
}
