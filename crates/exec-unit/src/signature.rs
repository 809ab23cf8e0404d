// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! JSON model signature parsing.
//!
//! A signature (`signature.json`) lists the input and output tensors a model
//! serves, in their native shape. Dimension 0 of every tensor is the batch.
//!
//! # Format
//! ```json
//! {
//!   "name": "mobilenet-v2",
//!   "inputs": [
//!     { "name": "image", "dtype": "u8", "shape": [1, 224, 224, 3] }
//!   ],
//!   "outputs": [
//!     { "name": "logits", "dtype": "f32", "shape": [1, 1001] }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use tensor_core::{DType, Shape, TensorSpec};

use crate::UnitError;

/// Input/output tensor table for a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSignature {
    /// Human-readable model name.
    pub name: String,
    /// Input tensors in index order.
    pub inputs: Vec<TensorSpec>,
    /// Output tensors in index order.
    pub outputs: Vec<TensorSpec>,
}

#[derive(Debug, serde::Deserialize)]
struct RawSignature {
    name: String,
    inputs: Vec<RawTensor>,
    outputs: Vec<RawTensor>,
}

#[derive(Debug, serde::Deserialize)]
struct RawTensor {
    name: String,
    #[serde(default = "default_dtype")]
    dtype: String,
    shape: Vec<usize>,
}

fn default_dtype() -> String {
    "f32".to_string()
}

impl RawTensor {
    fn into_spec(self) -> Result<TensorSpec, UnitError> {
        let dtype = DType::parse(&self.dtype)?;
        Ok(TensorSpec::new(self.name, dtype, Shape::new(self.shape)))
    }
}

impl ModelSignature {
    /// Builds a signature from tensor specs and validates it.
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<TensorSpec>,
        outputs: Vec<TensorSpec>,
    ) -> Result<Self, UnitError> {
        let sig = Self {
            name: name.into(),
            inputs,
            outputs,
        };
        sig.validate()?;
        Ok(sig)
    }

    /// Loads a signature from a JSON file path.
    pub fn from_file(path: &Path) -> Result<Self, UnitError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses a signature from a JSON string and validates it.
    pub fn from_json(json: &str) -> Result<Self, UnitError> {
        let raw: RawSignature = serde_json::from_str(json)?;
        let inputs = raw
            .inputs
            .into_iter()
            .map(RawTensor::into_spec)
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = raw
            .outputs
            .into_iter()
            .map(RawTensor::into_spec)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(raw.name, inputs, outputs)
    }

    /// Validates that the signature is usable for batched execution.
    ///
    /// Checks:
    /// - At least one input and one output.
    /// - Every tensor has a batch dimension and no zero-sized dimension.
    /// - No duplicate tensor names within inputs or within outputs.
    pub fn validate(&self) -> Result<(), UnitError> {
        if self.inputs.is_empty() {
            return Err(UnitError::InvalidSignature(format!(
                "signature '{}' has no inputs",
                self.name
            )));
        }
        if self.outputs.is_empty() {
            return Err(UnitError::InvalidSignature(format!(
                "signature '{}' has no outputs",
                self.name
            )));
        }

        for group in [&self.inputs, &self.outputs] {
            let mut seen = HashSet::new();
            for spec in group.iter() {
                if !seen.insert(spec.name.as_str()) {
                    return Err(UnitError::InvalidSignature(format!(
                        "duplicate tensor name '{}'",
                        spec.name
                    )));
                }
                if spec.shape.rank() == 0 {
                    return Err(UnitError::InvalidSignature(format!(
                        "tensor '{}' has no batch dimension",
                        spec.name
                    )));
                }
                if spec.shape.dims().iter().any(|&d| d == 0) {
                    return Err(UnitError::InvalidSignature(format!(
                        "tensor '{}' has a zero-sized dimension",
                        spec.name
                    )));
                }
            }
        }

        if self.inputs.iter().any(|s| s.batch() != self.inputs[0].batch()) {
            tracing::warn!(
                "signature '{}' declares inputs with differing native batch sizes",
                self.name
            );
        }

        Ok(())
    }

    /// Returns the native input shapes.
    pub fn input_shapes(&self) -> Vec<Shape> {
        self.inputs.iter().map(|s| s.shape.clone()).collect()
    }
}
