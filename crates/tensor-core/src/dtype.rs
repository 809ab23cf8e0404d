// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Supported tensor element data types.

use crate::TensorError;

/// Enumerates the element types a harness may exchange with a backend.
///
/// The set mirrors what benchmark harnesses pass across the entry-point
/// table; anything else is rejected when a model signature is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit IEEE 754 floating point.
    F32,
    /// 8-bit unsigned integer (quantised image inputs).
    U8,
    /// 8-bit signed integer.
    I8,
    /// 16-bit IEEE 754 floating point.
    F16,
    /// 32-bit signed integer (token ids, masks).
    I32,
    /// 64-bit signed integer.
    I64,
}

impl DType {
    /// Returns the size of a single element in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            DType::F32 => 4,
            DType::U8 => 1,
            DType::I8 => 1,
            DType::F16 => 2,
            DType::I32 => 4,
            DType::I64 => 8,
        }
    }

    /// Returns a human-readable label for this data type.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::U8 => "u8",
            DType::I8 => "i8",
            DType::F16 => "f16",
            DType::I32 => "i32",
            DType::I64 => "i64",
        }
    }

    /// Parses a dtype label, accepting both short (`"f32"`) and long
    /// (`"float32"`) spellings. Case-insensitive.
    pub fn parse(s: &str) -> Result<Self, TensorError> {
        match s.trim().to_lowercase().as_str() {
            "f32" | "float32" => Ok(DType::F32),
            "u8" | "uint8" => Ok(DType::U8),
            "i8" | "int8" => Ok(DType::I8),
            "f16" | "float16" => Ok(DType::F16),
            "i32" | "int32" => Ok(DType::I32),
            "i64" | "int64" => Ok(DType::I64),
            other => Err(TensorError::UnsupportedDType(other.to_string())),
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
