// Licensed under the MIT License
// Copyright (c) 2025 Hal <hal.long@outlook.com>

//! Chunk planning
//!
//! Decides between single-stream and parallel strategies and partitions the
//! resource's byte range into worker assignments. The partition is exact:
//! chunk intervals cover `[0, total)` in order with no overlap and no gaps.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{
    MAX_CHUNK_SIZE, MAX_REASONABLE_CONCURRENCY, MIN_CHUNK_SIZE, MIN_PARALLEL_BYTES,
};

/// Download strategy selected for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One worker streams the entire body sequentially
    Single,
    /// Disjoint ranged requests over multiple workers
    Parallel,
}

/// One contiguous byte interval fetched by exactly one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Stable chunk identifier, also its index in the plan
    pub id: u32,
    /// First byte of the interval
    pub start: u64,
    /// Last byte of the interval, inclusive. `None` when the resource size
    /// is unknown and the chunk runs to end of body.
    pub end: Option<u64>,
}

impl Chunk {
    /// Interval length in bytes, if bounded
    pub fn size(&self) -> Option<u64> {
        self.end.map(|end| end - self.start + 1)
    }
}

/// Immutable partition of the resource produced once per job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    /// Strategy the partition was built for
    pub strategy: Strategy,
    /// Ordered chunks covering the resource exactly
    pub chunks: Vec<Chunk>,
    /// Total resource size; -1 when unknown
    pub total_size: i64,
}

impl ChunkPlan {
    /// Build a plan from the probe results and caller preferences.
    ///
    /// `requested_concurrency` of 0 selects worker count automatically from
    /// the resource size; `requested_chunk_size` of 0 selects the chunk
    /// target automatically. `force_single` pins the strategy regardless of
    /// size, used when a byte transform must see the stream in order.
    pub fn plan(
        total_size: i64,
        accepts_ranges: bool,
        requested_concurrency: usize,
        requested_chunk_size: u64,
        force_single: bool,
    ) -> ChunkPlan {
        if total_size < 0 {
            // Unknown length: one open-ended stream, nothing to partition.
            return ChunkPlan {
                strategy: Strategy::Single,
                chunks: vec![Chunk {
                    id: 0,
                    start: 0,
                    end: None,
                }],
                total_size: -1,
            };
        }

        let total = total_size as u64;
        if total == 0 {
            return ChunkPlan {
                strategy: Strategy::Single,
                chunks: Vec::new(),
                total_size: 0,
            };
        }

        let single = || ChunkPlan {
            strategy: Strategy::Single,
            chunks: vec![Chunk {
                id: 0,
                start: 0,
                end: Some(total - 1),
            }],
            total_size,
        };

        if force_single
            || !accepts_ranges
            || requested_concurrency == 1
            || total <= MIN_PARALLEL_BYTES
        {
            return single();
        }

        let requested = if requested_concurrency == 0 {
            MAX_REASONABLE_CONCURRENCY
        } else {
            requested_concurrency
        };
        let cap = requested.min(MAX_REASONABLE_CONCURRENCY) as u64;

        let target = if requested_chunk_size > 0 {
            requested_chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
        } else {
            (total / cap).clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
        };
        let workers = cap.min(total.div_ceil(target)).max(1);

        if workers < 2 {
            return single();
        }

        // Even split; the remainder spreads one extra byte over the leading
        // chunks so the partition stays exact.
        let base = total / workers;
        let remainder = total % workers;
        let mut chunks = Vec::with_capacity(workers as usize);
        let mut start = 0u64;
        for id in 0..workers {
            let size = if id < remainder { base + 1 } else { base };
            chunks.push(Chunk {
                id: id as u32,
                start,
                end: Some(start + size - 1),
            });
            start += size;
        }

        debug!(
            "Planned {} parallel chunks of ~{} KB for {} bytes",
            chunks.len(),
            base / 1024,
            total
        );

        ChunkPlan {
            strategy: Strategy::Parallel,
            chunks,
            total_size,
        }
    }

    /// Number of workers the plan calls for
    pub fn worker_count(&self) -> usize {
        match self.strategy {
            Strategy::Single => 1,
            Strategy::Parallel => self.chunks.len(),
        }
    }

    /// True when the plan contains no bytes to fetch
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_size_is_one_unbounded_chunk() {
        let plan = ChunkPlan::plan(-1, true, 8, 0, false);
        assert_eq!(plan.strategy, Strategy::Single);
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0].end, None);
    }

    #[test]
    fn test_zero_size_has_no_chunks() {
        let plan = ChunkPlan::plan(0, true, 8, 0, false);
        assert!(plan.is_empty());
        assert_eq!(plan.strategy, Strategy::Single);
    }

    #[test]
    fn test_small_file_stays_single() {
        let plan = ChunkPlan::plan(MIN_PARALLEL_BYTES as i64, true, 8, 0, false);
        assert_eq!(plan.strategy, Strategy::Single);
        assert_eq!(plan.chunks.len(), 1);
    }

    #[test]
    fn test_no_range_support_stays_single() {
        let plan = ChunkPlan::plan(100 * 1024 * 1024, false, 8, 0, false);
        assert_eq!(plan.strategy, Strategy::Single);
    }

    #[test]
    fn test_four_workers_ten_mib() {
        let total = 10 * 1024 * 1024;
        let plan = ChunkPlan::plan(total, true, 4, 0, false);
        assert_eq!(plan.strategy, Strategy::Parallel);
        assert_eq!(plan.chunks.len(), 4);
        assert_eq!(plan.chunks[0].size(), Some(2_621_440));
        assert_eq!(plan.chunks[3].end, Some(total as u64 - 1));
    }

    #[test]
    fn test_concurrency_is_capped() {
        let plan = ChunkPlan::plan(1024 * 1024 * 1024, true, 64, 0, false);
        assert!(plan.chunks.len() <= MAX_REASONABLE_CONCURRENCY);
    }

    #[test]
    fn test_force_single_wins() {
        let plan = ChunkPlan::plan(100 * 1024 * 1024, true, 8, 0, true);
        assert_eq!(plan.strategy, Strategy::Single);
    }
}
