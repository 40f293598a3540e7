//! Splits an unbounded stream of eligible timeouts into numbered batches, and
//! a staged batch into physical write chunks.
//!
//! Batch identity depends only on the order timeouts are encountered and the
//! batch size. Write chunking never changes which batch a timeout belongs to.

use model::records::{batch::BatchInfo, timeout::TimeoutData};
use std::collections::HashSet;

/// Maps a running count of assigned timeouts onto batch numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPartitioner {
    batch_size: usize,
}

impl BatchPartitioner {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// `floor(running_count / batch_size) + 1`
    pub fn batch_number_for(&self, running_count: usize) -> u32 {
        (running_count / self.batch_size) as u32 + 1
    }

    pub fn expected_batches(&self, total: usize) -> u32 {
        total.div_ceil(self.batch_size) as u32
    }
}

/// Accumulates timeout ids page by page and emits each batch once it is full.
///
/// Only the open batch is held in memory. Excluding timeouts that already
/// belong to a committed batch is the store's job: every store hides a timeout
/// in the same write that records its batch, so its next scan skips it. A
/// resumed assembler only needs the highest existing batch number.
#[derive(Debug)]
pub struct BatchAssembler {
    partitioner: BatchPartitioner,
    first_number: u32,
    running_count: usize,
    open_ids: HashSet<String>,
    current: Vec<String>,
}

impl BatchAssembler {
    pub fn new(batch_size: usize) -> Self {
        Self::resume(batch_size, 0)
    }

    /// Continues numbering after `last_number`.
    pub fn resume(batch_size: usize, last_number: u32) -> Self {
        BatchAssembler {
            partitioner: BatchPartitioner::new(batch_size),
            first_number: last_number + 1,
            running_count: 0,
            open_ids: HashSet::new(),
            current: Vec::new(),
        }
    }

    /// Ids held for the batch being filled.
    pub fn open_len(&self) -> usize {
        self.current.len()
    }

    /// Adds one eligible timeout. Returns the batch it closed, if any.
    ///
    /// An id seen twice within the open batch is counted once.
    pub fn push(&mut self, id: String) -> Option<BatchInfo> {
        if !self.open_ids.insert(id.clone()) {
            return None;
        }

        self.current.push(id);
        self.running_count += 1;

        if self.current.len() == self.partitioner.batch_size() {
            return Some(self.close());
        }
        None
    }

    /// Closes the trailing partial batch, if any ids are left.
    pub fn finish(&mut self) -> Option<BatchInfo> {
        if self.current.is_empty() {
            return None;
        }
        Some(self.close())
    }

    fn close(&mut self) -> BatchInfo {
        let number = self.number_of(self.running_count - 1);
        self.open_ids.clear();
        BatchInfo::new(number, std::mem::take(&mut self.current))
    }

    /// Highest batch number handed out so far (including resumed ones).
    pub fn last_number(&self) -> u32 {
        if self.running_count == 0 {
            self.first_number - 1
        } else {
            self.number_of(self.running_count - 1)
        }
    }

    fn number_of(&self, index: usize) -> u32 {
        self.first_number - 1 + self.partitioner.batch_number_for(index)
    }
}

/// Physical write ceilings of a target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteChunker {
    max_operations: usize,
    max_payload_bytes: usize,
}

impl WriteChunker {
    pub fn new(max_operations: usize, max_payload_bytes: usize) -> Self {
        Self {
            max_operations: max_operations.max(1),
            max_payload_bytes: max_payload_bytes.max(1),
        }
    }

    /// Greedy split honouring both ceilings. A single timeout larger than the
    /// payload ceiling still gets a chunk of its own.
    pub fn chunks<'a>(&self, timeouts: &'a [TimeoutData]) -> Vec<&'a [TimeoutData]> {
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut bytes = 0;

        for (idx, timeout) in timeouts.iter().enumerate() {
            let size = timeout.size_bytes();
            let count = idx - start;
            let full = count == self.max_operations || bytes + size > self.max_payload_bytes;

            if count > 0 && full {
                chunks.push(&timeouts[start..idx]);
                start = idx;
                bytes = 0;
            }
            bytes += size;
        }

        if start < timeouts.len() {
            chunks.push(&timeouts[start..]);
        }
        chunks
    }
}

impl Default for WriteChunker {
    /// 100 operations / 4 MiB per transactional group.
    fn default() -> Self {
        Self::new(100, 4 * 1024 * 1024)
    }
}
