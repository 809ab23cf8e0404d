// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor metadata.

use crate::Shape;

/// Errors that can occur when describing or reshaping tensors.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The provided buffer size does not match the expected size for the given shape and dtype.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// The shape has no leading (batch) dimension to rewrite.
    #[error("shape {shape} has no batch dimension")]
    MissingBatchDim { shape: Shape },

    /// A batch dimension of zero was requested.
    #[error("batch dimension must be non-zero for tensor '{tensor}'")]
    ZeroBatch { tensor: String },

    /// The dtype string is not one of the supported element types.
    #[error("unsupported dtype '{0}'")]
    UnsupportedDType(String),
}
