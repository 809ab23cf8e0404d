// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for memory management.

/// Errors that can occur during buffer allocation and access.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The requested allocation would exceed the memory budget.
    #[error("out of memory: requested {requested_bytes} bytes, but only {available_bytes} available (budget: {budget_bytes})")]
    OutOfMemory {
        requested_bytes: usize,
        available_bytes: usize,
        budget_bytes: usize,
    },

    /// Attempted to allocate a zero-sized buffer.
    #[error("cannot allocate zero-sized buffer")]
    ZeroSizedAllocation,

    /// A write or view fell outside the buffer.
    #[error("range {offset}..{end} is outside a buffer of {len} bytes")]
    OutOfBounds { offset: usize, end: usize, len: usize },

    /// A buffer was asked to shrink through `grow`.
    #[error("cannot grow a {current}-byte buffer down to {requested} bytes")]
    InvalidGrow { current: usize, requested: usize },

    /// The budget string could not be parsed.
    #[error("invalid memory budget '{0}': expected a number with an optional K/M/G suffix")]
    InvalidBudget(String),
}
