//! Size and quota bounded batching
//!
//! Records accumulate in arrival order and are released as a batch when the
//! batch size is reached or when the global record limit would be met.
//! There is no time-based flush: a quiet live capture keeps a partial batch
//! until more records arrive or the stream ends.

use crate::record::NormalizedRecord;
use std::mem;

/// Accumulates records into batches
#[derive(Debug)]
pub struct Batcher {
    batch_size: usize,
    limit: Option<u64>,
    pending: Vec<NormalizedRecord>,
    emitted: u64,
}

impl Batcher {
    /// Create a batcher. A batch size of zero is treated as one.
    pub fn new(batch_size: usize, limit: Option<u64>) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            limit,
            pending: Vec::with_capacity(batch_size),
            emitted: 0,
        }
    }

    /// Add a record, returning a batch when one is ready.
    ///
    /// Once the limit is exhausted further records are dropped.
    pub fn push(&mut self, record: NormalizedRecord) -> Option<Vec<NormalizedRecord>> {
        if self.is_exhausted() {
            return None;
        }

        self.pending.push(record);

        if let Some(remaining) = self.remaining() {
            if self.pending.len() as u64 >= remaining {
                self.pending.truncate(remaining as usize);
                return self.take();
            }
        }

        if self.pending.len() >= self.batch_size {
            return self.take();
        }

        None
    }

    /// Release the final partial batch, if any
    pub fn finish(&mut self) -> Option<Vec<NormalizedRecord>> {
        if self.pending.is_empty() {
            None
        } else {
            self.take()
        }
    }

    /// Records still allowed under the limit (`None` when unlimited)
    pub fn remaining(&self) -> Option<u64> {
        self.limit.map(|limit| limit.saturating_sub(self.emitted))
    }

    /// Whether the limit has been fully handed out
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == Some(0)
    }

    /// Records waiting for the next batch
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Records released in batches so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    fn take(&mut self) -> Option<Vec<NormalizedRecord>> {
        let batch = mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        self.emitted += batch.len() as u64;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordMetadata;
    use chrono::Utc;

    fn record(frame: u64) -> NormalizedRecord {
        NormalizedRecord {
            timestamp: Utc::now(),
            src_ip: "10.0.0.2".to_string(),
            dst_ip: "10.0.0.1".to_string(),
            src_port: None,
            dst_port: None,
            protocol: "TCP".to_string(),
            payload: None,
            payload_size: 0,
            metadata: RecordMetadata {
                source: "test".to_string(),
                frame_number: Some(frame),
            },
        }
    }

    /// Feed `count` records and collect the batches, including the final one
    fn run(batch_size: usize, limit: Option<u64>, count: u64) -> Vec<Vec<u64>> {
        let mut batcher = Batcher::new(batch_size, limit);
        let mut batches = Vec::new();
        for frame in 0..count {
            if batcher.is_exhausted() {
                break;
            }
            if let Some(batch) = batcher.push(record(frame)) {
                batches.push(batch);
            }
        }
        batches.extend(batcher.finish());
        batches
            .into_iter()
            .map(|b| b.iter().map(|r| r.metadata.frame_number.unwrap()).collect())
            .collect()
    }

    #[test]
    fn test_flushes_by_size_in_arrival_order() {
        let batches = run(3, None, 7);
        assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[test]
    fn test_limit_truncates_final_batch() {
        let batches = run(3, Some(5), 7);
        assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_limit_smaller_than_batch_size() {
        let batches = run(10, Some(2), 7);
        assert_eq!(batches, vec![vec![0, 1]]);
    }

    #[test]
    fn test_limit_larger_than_input() {
        let batches = run(4, Some(100), 6);
        assert_eq!(batches, vec![vec![0, 1, 2, 3], vec![4, 5]]);
    }

    #[test]
    fn test_total_never_exceeds_limit() {
        for limit in 1..12u64 {
            for batch_size in 1..6usize {
                for count in 0..15u64 {
                    let total: usize = run(batch_size, Some(limit), count)
                        .iter()
                        .map(Vec::len)
                        .sum();
                    assert_eq!(total as u64, limit.min(count));
                }
            }
        }
    }

    #[test]
    fn test_exhausted_drops_records() {
        let mut batcher = Batcher::new(5, Some(1));
        assert_eq!(batcher.push(record(0)).map(|b| b.len()), Some(1));
        assert!(batcher.is_exhausted());
        assert!(batcher.push(record(1)).is_none());
        assert!(batcher.finish().is_none());
        assert_eq!(batcher.emitted(), 1);
    }

    #[test]
    fn test_zero_limit_never_emits() {
        let mut batcher = Batcher::new(5, Some(0));
        assert!(batcher.is_exhausted());
        assert!(batcher.push(record(0)).is_none());
        assert!(batcher.finish().is_none());
    }

    #[test]
    fn test_finish_on_empty_is_none() {
        let mut batcher = Batcher::new(3, None);
        assert!(batcher.finish().is_none());
        assert_eq!(batcher.remaining(), None);
    }

    #[test]
    fn test_zero_batch_size_flushes_every_record() {
        let mut batcher = Batcher::new(0, None);
        assert_eq!(batcher.push(record(0)).map(|b| b.len()), Some(1));
        assert_eq!(batcher.pending_len(), 0);
    }
}
