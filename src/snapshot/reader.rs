//! Snapshot reader - restores VM state from an encoded snapshot
//!
//! Mirrors `SnapshotWriter` segment-for-segment: header, then five
//! length-prefixed segments (metadata, heap, task, scheduler, sync), then a
//! trailing checksum over the segment bytes. Validation (magic, version,
//! endianness, checksum) all happens before any segment is parsed, so a
//! corrupt snapshot never partially installs state.

use crate::snapshot::format::{SegmentHeader, SegmentType, SnapshotChecksum, SnapshotError, SnapshotHeader};
use crate::snapshot::heap::HeapSnapshot;
use crate::snapshot::task::SerializedTask;
use crate::sync::{SerializedChannel, SerializedMutex};
use std::io::Read;

/// Fully decoded snapshot contents, ready to install into a fresh `VmContext`
#[derive(Debug)]
pub struct SnapshotReader {
    /// Header parsed from the snapshot (version, timestamp, endianness)
    pub header: SnapshotHeader,

    /// Decoded heap segment
    pub heap: HeapSnapshot,

    /// Decoded task states
    pub tasks: Vec<SerializedTask>,

    /// Decoded mutex states
    pub mutexes: Vec<SerializedMutex>,

    /// Decoded channel states
    pub channels: Vec<SerializedChannel>,
}

impl SnapshotReader {
    /// Parse and validate a snapshot from an in-memory byte slice
    pub fn read_snapshot(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let mut cursor = bytes;

        let header = SnapshotHeader::decode(&mut cursor)?;
        header.validate()?;

        let mut count_buf = [0u8; 4];
        cursor.read_exact(&mut count_buf)?;
        let segment_count = u32::from_le_bytes(count_buf);

        // Checksum trails the segment bytes; everything between the segment
        // count and the last 32 bytes is the data the checksum covers.
        if cursor.len() < 32 {
            return Err(SnapshotError::CorruptedData);
        }
        let split = cursor.len() - 32;
        let (segment_bytes, checksum_bytes) = cursor.split_at(split);

        let mut checksum_reader = checksum_bytes;
        let checksum = SnapshotChecksum::decode(&mut checksum_reader)?;
        if !checksum.verify(segment_bytes) {
            return Err(SnapshotError::ChecksumMismatch);
        }

        // Endianness is validated up front via the header; every integer and
        // value in the segments is written little-endian regardless of host,
        // so no further byte-swapping is needed once the header checks out.
        let needs_byte_swap = false;

        let mut reader = segment_bytes;
        let mut heap = HeapSnapshot::empty();
        let mut tasks = Vec::new();
        let mut mutexes = Vec::new();
        let mut channels = Vec::new();

        for _ in 0..segment_count {
            let seg_header = SegmentHeader::decode(&mut reader)?;
            let mut body = vec![0u8; seg_header.length as usize];
            reader.read_exact(&mut body)?;
            let mut body_reader: &[u8] = &body;

            match seg_header.segment_type {
                t if t == SegmentType::Metadata as u8 => {
                    // Module/function counts - no VM state to restore from
                    // these yet, but still consumed so the cursor stays in sync.
                }
                t if t == SegmentType::Heap as u8 => {
                    heap = HeapSnapshot::decode(&mut body_reader)?;
                }
                t if t == SegmentType::Task as u8 => {
                    let mut count_buf = [0u8; 8];
                    body_reader.read_exact(&mut count_buf)?;
                    let task_count = u64::from_le_bytes(count_buf) as usize;
                    for _ in 0..task_count {
                        tasks.push(SerializedTask::decode(&mut body_reader, needs_byte_swap)?);
                    }
                }
                t if t == SegmentType::Scheduler as u8 => {
                    // Ready-queue count; scheduler re-enqueues restored tasks
                    // by state rather than replaying this count directly.
                }
                t if t == SegmentType::Sync as u8 => {
                    let mut count_buf = [0u8; 8];
                    body_reader.read_exact(&mut count_buf)?;
                    let mutex_count = u64::from_le_bytes(count_buf) as usize;
                    for _ in 0..mutex_count {
                        mutexes.push(SerializedMutex::decode(&mut body_reader)?);
                    }

                    body_reader.read_exact(&mut count_buf)?;
                    let channel_count = u64::from_le_bytes(count_buf) as usize;
                    for _ in 0..channel_count {
                        channels.push(SerializedChannel::decode(&mut body_reader, needs_byte_swap)?);
                    }
                }
                _ => return Err(SnapshotError::CorruptedData),
            }
        }

        Ok(Self {
            header,
            heap,
            tasks,
            mutexes,
            channels,
        })
    }
}
