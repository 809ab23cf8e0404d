// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Output collation: `(global sample, output tensor)` → byte range.

use std::ops::Range;

use shard_planner::BatchLayout;
use tensor_core::TensorSpec;

use crate::RuntimeError;

/// Locates a sample's output inside the buffer that holds it.
///
/// In sharded mode that buffer is the output tensor of shard
/// `index / real_batch_size`. In pipelined mode the layout has one shard
/// and the buffer is the batch-wide output area.
#[derive(Debug, Clone)]
pub struct OutputCollator {
    layout: BatchLayout,
    strides: Vec<usize>,
}

impl OutputCollator {
    /// `outputs` gives the per-sample byte stride of each output tensor.
    pub fn new(layout: BatchLayout, outputs: &[TensorSpec]) -> Self {
        Self {
            layout,
            strides: outputs.iter().map(TensorSpec::sample_bytes).collect(),
        }
    }

    pub fn layout(&self) -> &BatchLayout {
        &self.layout
    }

    pub fn output_count(&self) -> usize {
        self.strides.len()
    }

    /// Returns `(shard, byte range within that shard's buffer)`.
    pub fn locate(&self, sample: usize, tensor: usize) -> Result<(usize, Range<usize>), RuntimeError> {
        let stride = *self.strides.get(tensor).ok_or(RuntimeError::InvalidTensor {
            index: tensor as i32,
            count: self.strides.len(),
        })?;
        let (shard, offset) = self.layout.byte_offset(sample, stride)?;
        Ok((shard, offset..offset + stride))
    }
}
