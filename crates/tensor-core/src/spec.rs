// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Named tensor slot descriptors.

use crate::{DType, Shape, TensorError};

/// Describes one input or output tensor bound inside an execution unit.
///
/// The scheduler derives every byte offset it uses from a `TensorSpec`:
/// the accumulator stride is [`sample_bytes`](TensorSpec::sample_bytes),
/// and the output collator slices results with the same value.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TensorSpec {
    /// Tensor name as reported by the model.
    pub name: String,
    /// Element type.
    pub dtype: DType,
    /// Current shape, dimension 0 being the batch.
    pub shape: Shape,
}

impl TensorSpec {
    /// Creates a new tensor spec.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::{DType, Shape, TensorSpec};
    /// let t = TensorSpec::new("input", DType::F32, Shape::matrix(2, 8));
    /// assert_eq!(t.size_bytes(), 64);
    /// assert_eq!(t.sample_bytes(), 32);
    /// ```
    pub fn new(name: impl Into<String>, dtype: DType, shape: Shape) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
        }
    }

    /// Total bytes the tensor occupies at its current batch size.
    pub fn size_bytes(&self) -> usize {
        self.shape.size_bytes(self.dtype)
    }

    /// Bytes occupied by a single sample.
    pub fn sample_bytes(&self) -> usize {
        self.sample_elements() * self.dtype.size_bytes()
    }

    /// Elements occupied by a single sample.
    pub fn sample_elements(&self) -> usize {
        let batch = self.shape.batch();
        if batch == 0 {
            return self.shape.sample_elements();
        }
        self.shape.num_elements() / batch
    }

    /// Returns the current batch dimension.
    pub fn batch(&self) -> usize {
        self.shape.batch()
    }

    /// Returns a copy of this spec resized to carry `batch` samples.
    pub fn with_batch(&self, batch: usize) -> Result<TensorSpec, TensorError> {
        if batch == 0 {
            return Err(TensorError::ZeroBatch {
                tensor: self.name.clone(),
            });
        }
        Ok(TensorSpec {
            name: self.name.clone(),
            dtype: self.dtype,
            shape: self.shape.with_batch(batch)?,
        })
    }

    /// Checks that `data` holds exactly one sample of this tensor.
    pub fn check_sample(&self, data: &[u8]) -> Result<(), TensorError> {
        let expected = self.sample_bytes();
        if data.len() != expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} {}", self.name, self.dtype, self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_bytes_independent_of_batch() {
        let t = TensorSpec::new("x", DType::F32, Shape::new(vec![1, 4, 4]));
        let b = t.with_batch(8).unwrap();
        assert_eq!(t.sample_bytes(), 64);
        assert_eq!(b.sample_bytes(), 64);
        assert_eq!(b.size_bytes(), 8 * 64);
        assert_eq!(b.batch(), 8);
    }

    #[test]
    fn test_zero_batch_rejected() {
        let t = TensorSpec::new("x", DType::U8, Shape::matrix(1, 3));
        assert!(matches!(t.with_batch(0), Err(TensorError::ZeroBatch { .. })));
    }

    #[test]
    fn test_check_sample() {
        let t = TensorSpec::new("ids", DType::I32, Shape::matrix(1, 4));
        assert!(t.check_sample(&[0u8; 16]).is_ok());
        assert!(matches!(
            t.check_sample(&[0u8; 15]),
            Err(TensorError::BufferSizeMismatch { expected: 16, actual: 15 })
        ));
    }

    #[test]
    fn test_display() {
        let t = TensorSpec::new("logits", DType::F16, Shape::matrix(2, 10));
        assert_eq!(t.to_string(), "logits: f16 [2, 10]");
    }
}
