// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # exec-unit
//!
//! The narrow capability a batch scheduler needs from a model replica or a
//! hardware execution context, and nothing more.
//!
//! - [`ExecutionUnit`]: three operations: [`invoke`](ExecutionUnit::invoke),
//!   [`allocate`](ExecutionUnit::allocate) (resize inputs and allocate every
//!   bound tensor) and [`get_buffer`](ExecutionUnit::get_buffer) (mutable
//!   access to one bound tensor, including rebinding its storage).
//! - [`BoundBuffer`]: a tensor slot inside a unit: its [`TensorSpec`] plus
//!   the owned storage behind it.
//! - [`UnitFactory`]: builds one unit per pool slot at backend creation.
//!   Model loading and accelerator session construction live behind it.
//! - [`ModelSignature`]: the input/output tensor table a factory serves,
//!   loadable from a JSON manifest.
//! - [`synthetic`]: a deterministic reference unit used by the CLI, the
//!   benchmarks and the test suites, with fault injection and an occupancy
//!   probe.
//!
//! [`TensorSpec`]: tensor_core::TensorSpec

mod error;
mod signature;
pub mod synthetic;
mod unit;

pub use error::UnitError;
pub use signature::ModelSignature;
pub use unit::{BoundBuffer, DeviceClass, ExecutionUnit, TensorId, UnitFactory, UnitRequest};
