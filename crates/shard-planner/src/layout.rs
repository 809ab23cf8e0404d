// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Static batch sharding layout.
//!
//! A batch of `N` samples is split into `K` contiguous shards of
//! `real_batch_size = N / K` samples each. Shard `s` covers global indices
//! `[s × rbs, (s + 1) × rbs)`; every offset the accumulator and the output
//! collator use is derived from [`BatchLayout::locate`].

use std::ops::Range;

use crate::PlannerError;

/// Shard count used when a batch has more than one sample and no explicit
/// override is configured.
pub const DEFAULT_MULTI_SAMPLE_SHARDS: usize = 2;

/// How a batch is divided into equally sized shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BatchLayout {
    batch_size: usize,
    shard_count: usize,
    real_batch_size: usize,
}

impl BatchLayout {
    /// Creates a layout, rejecting zero sizes and uneven splits.
    pub fn new(batch_size: usize, shard_count: usize) -> Result<Self, PlannerError> {
        if batch_size == 0 {
            return Err(PlannerError::ZeroBatch);
        }
        if shard_count == 0 {
            return Err(PlannerError::ZeroShards);
        }
        if batch_size % shard_count != 0 {
            return Err(PlannerError::Indivisible {
                batch_size,
                shard_count,
            });
        }
        Ok(Self {
            batch_size,
            shard_count,
            real_batch_size: batch_size / shard_count,
        })
    }

    /// Picks the shard count for `batch_size` and builds the layout.
    ///
    /// A single-sample batch gets one shard; larger batches get
    /// [`DEFAULT_MULTI_SAMPLE_SHARDS`] unless `shards_override` is given.
    pub fn resolve(batch_size: usize, shards_override: Option<usize>) -> Result<Self, PlannerError> {
        let shards = match shards_override {
            Some(k) => k,
            None if batch_size > 1 => DEFAULT_MULTI_SAMPLE_SHARDS,
            None => 1,
        };
        Self::new(batch_size, shards)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Samples per shard.
    pub fn real_batch_size(&self) -> usize {
        self.real_batch_size
    }

    /// Checks that `index` is a valid global sample index.
    pub fn check_index(&self, index: usize) -> Result<(), PlannerError> {
        if index >= self.batch_size {
            return Err(PlannerError::IndexOutOfRange {
                index,
                batch_size: self.batch_size,
            });
        }
        Ok(())
    }

    /// Maps a global sample index to `(shard, local index)`.
    pub fn locate(&self, index: usize) -> Result<(usize, usize), PlannerError> {
        self.check_index(index)?;
        Ok((
            index / self.real_batch_size,
            index % self.real_batch_size,
        ))
    }

    /// Global indices covered by `shard`.
    pub fn shard_range(&self, shard: usize) -> Range<usize> {
        let start = shard * self.real_batch_size;
        start..start + self.real_batch_size
    }

    /// Returns `true` if `index` is the final sample of its shard.
    pub fn is_shard_tail(&self, index: usize) -> bool {
        index % self.real_batch_size == self.real_batch_size - 1
    }

    /// Returns `true` if `index` is the final sample of the whole batch.
    pub fn is_batch_tail(&self, index: usize) -> bool {
        index + 1 == self.batch_size
    }

    /// Byte offset of a sample inside its shard buffer, for a per-sample
    /// stride of `stride` bytes.
    pub fn byte_offset(&self, index: usize, stride: usize) -> Result<(usize, usize), PlannerError> {
        let (shard, local) = self.locate(index)?;
        Ok((shard, local * stride))
    }

    /// Returns a human-readable summary of the layout.
    pub fn summary(&self) -> String {
        format!(
            "batch {} → {} shard(s) × {} sample(s)",
            self.batch_size, self.shard_count, self.real_batch_size
        )
    }
}
