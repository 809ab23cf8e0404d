// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for execution units and model signatures.

use crate::TensorId;

/// Errors reported by an execution unit or its factory.
#[derive(Debug, thiserror::Error)]
pub enum UnitError {
    /// Tensor storage could not be allocated.
    #[error("allocation failed: {0}")]
    Allocation(#[from] memory_manager::MemoryError),

    /// A tensor shape or size was inconsistent.
    #[error("tensor error: {0}")]
    Tensor(#[from] tensor_core::TensorError),

    /// The unit refused or failed to execute.
    #[error("invocation failed on '{unit}': {detail}")]
    InvokeFailed { unit: String, detail: String },

    /// The unit does not expose the requested tensor.
    #[error("unit '{unit}' has no tensor {tensor}")]
    NoSuchTensor { unit: String, tensor: TensorId },

    /// `allocate` was given the wrong number of input shapes.
    #[error("unit '{unit}' expects {expected} input shapes, got {actual}")]
    ShapeCount {
        unit: String,
        expected: usize,
        actual: usize,
    },

    /// Storage offered to a binding has the wrong size.
    #[error("cannot bind {actual} bytes to tensor '{tensor}' of {expected} bytes")]
    BindSize {
        tensor: String,
        expected: usize,
        actual: usize,
    },

    /// The unit was invoked before its tensors were allocated.
    #[error("unit '{0}' has unallocated tensors")]
    NotAllocated(String),

    /// The factory could not build a unit for the requested accelerator.
    #[error("cannot create unit for accelerator '{accelerator}': {detail}")]
    Creation { accelerator: String, detail: String },

    /// The signature manifest could not be read.
    #[error("failed to read signature manifest: {0}")]
    ManifestRead(#[from] std::io::Error),

    /// The signature manifest JSON is malformed.
    #[error("failed to parse signature manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),

    /// The signature is structurally invalid.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}
