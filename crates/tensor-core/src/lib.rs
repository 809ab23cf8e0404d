// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Tensor metadata shared by every execution backend and by the batch
//! scheduler.
//!
//! This crate provides:
//! - [`DType`]: the element types a benchmarking harness can exchange
//!   (f32, u8, i8, f16, i32, i64).
//! - [`Shape`]: dimension descriptors with helpers for the leading
//!   (batch) dimension.
//! - [`TensorSpec`]: a named, typed, shaped tensor slot as bound inside an
//!   execution unit, with per-sample byte sizing.
//!
//! The scheduler never looks at tensor *contents*; it only needs to know how
//! many bytes one sample occupies and how to rewrite the batch dimension.

mod dtype;
mod error;
mod shape;
mod spec;

pub use dtype::DType;
pub use error::TensorError;
pub use shape::Shape;
pub use spec::TensorSpec;
