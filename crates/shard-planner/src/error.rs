// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the shard planner.

/// Errors that can occur while planning a batch layout or slot pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlannerError {
    /// A batch must hold at least one sample.
    #[error("batch size must be non-zero")]
    ZeroBatch,

    /// A batch must be split into at least one shard.
    #[error("shard count must be non-zero")]
    ZeroShards,

    /// Shards must be equally sized.
    #[error("batch size {batch_size} is not divisible by shard count {shard_count}")]
    Indivisible {
        batch_size: usize,
        shard_count: usize,
    },

    /// A global sample index falls outside the batch.
    #[error("sample index {index} out of range for batch of {batch_size}")]
    IndexOutOfRange { index: usize, batch_size: usize },

    /// Pipelined execution needs at least one fast-class slot.
    #[error("slot plan has no fast slots")]
    NoFastSlots,

    /// The admission policy name is not recognised.
    #[error("unknown admission policy '{0}'")]
    UnknownPolicy(String),

    /// Round-robin weights must not both be zero.
    #[error("invalid round-robin weights {fast}:{slow}")]
    InvalidWeights { fast: usize, slow: usize },
}
