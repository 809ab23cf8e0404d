// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the batch execution runtime.

use exec_unit::UnitError;

/// Errors that can occur while creating a backend or running a batch.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The batch layout or slot plan is invalid.
    #[error("planner error: {0}")]
    PlannerError(#[from] shard_planner::PlannerError),

    /// Memory allocation failed.
    #[error("memory error: {0}")]
    MemoryError(#[from] memory_manager::MemoryError),

    /// The unit factory or its signature reported an error.
    #[error("execution unit error: {0}")]
    UnitError(#[from] UnitError),

    /// The worker thread pool could not be started.
    #[error("worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// Another backend is already active in this host context.
    #[error("a backend is already active in this context")]
    BackendActive,

    /// A pool slot could not be built.
    #[error("failed to create execution unit for slot {slot}: {source}")]
    UnitCreation {
        slot: usize,
        #[source]
        source: UnitError,
    },

    /// The tensor index does not name a model input or output.
    #[error("tensor index {index} out of range ({count} tensors)")]
    InvalidTensor { index: i32, count: usize },

    /// A per-sample input has the wrong byte length.
    #[error("input {tensor} expects {expected} bytes per sample, got {actual}")]
    InputSize {
        tensor: usize,
        expected: usize,
        actual: usize,
    },

    /// Resizing or rebinding a shard's tensors failed.
    #[error("finalize failed on shard {shard}: {source}")]
    FinalizeFailed {
        shard: usize,
        #[source]
        source: UnitError,
    },

    /// A shard invocation failed during static dispatch.
    #[error("shard {shard} failed: {source}")]
    ShardFailed {
        shard: usize,
        #[source]
        source: UnitError,
    },

    /// A slot invocation failed during pipelined dispatch.
    #[error("slot {slot} failed on sample {sample}: {source}")]
    SlotFailed {
        slot: usize,
        sample: usize,
        #[source]
        source: UnitError,
    },

    /// Copying data into or out of a slot's bound buffer failed.
    #[error("slot {slot} binding error: {source}")]
    SlotBinding {
        slot: usize,
        #[source]
        source: UnitError,
    },

    /// The completion deadline passed with samples still in flight.
    #[error("poll timeout after {timeout_ms} ms: {completed} completed, {outstanding} outstanding")]
    PollTimeout {
        timeout_ms: u64,
        completed: usize,
        outstanding: usize,
    },

    /// Every slot is still held by an invocation from an earlier batch.
    #[error("no usable slots: all {occupied} slots still occupied")]
    NoUsableSlots { occupied: usize },

    /// A slot transition was attempted from the wrong state.
    #[error("slot {slot}: {detail}")]
    SlotState { slot: usize, detail: String },

    /// A scoreboard entry was marked twice or does not exist.
    #[error("scoreboard: {0}")]
    Scoreboard(String),

    /// An earlier step of this batch failed; the batch cannot be issued.
    #[error("batch aborted: {0}")]
    BatchAborted(String),

    /// Outputs were requested without a successfully completed batch.
    #[error("no completed batch to read outputs from")]
    NoResults,
}
