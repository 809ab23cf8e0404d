// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Streaming batch accumulation for sharded execution.
//!
//! Each `(shard, input tensor)` pair moves through:
//!
//! ```text
//! Empty ──first sample──▶ First ──second sample──▶ Accumulating ──finalize──▶ Bound
//!        one-sample buffer       grown to rbs × stride              rebound into the unit
//! ```
//!
//! A shard is finalized as soon as every one of its samples has been
//! written for every input: the unit is resized to `real_batch_size` if its
//! leading dimension differs, then each accumulated buffer is moved into the
//! unit's input binding. Writing the last sample of the last input of the
//! batch finalizes every remaining shard in parallel. After finalization,
//! writes go straight into the unit's bound buffer.
//!
//! With `real_batch_size == 1` nothing is accumulated; samples are copied
//! directly into the unit.
//!
//! Any allocation or binding failure poisons the batch: later writes and the
//! next `issue_query` fail until a new batch starts.

use std::time::{Duration, Instant};

use exec_unit::{ExecutionUnit, TensorId, UnitError};
use memory_manager::{BufferGuard, MemoryError, MemoryPool};
use shard_planner::BatchLayout;
use tensor_core::{Shape, TensorSpec};

use crate::RuntimeError;

enum Fill {
    Empty,
    First { guard: BufferGuard, local: usize },
    Accumulating(BufferGuard),
    Bound,
}

struct ShardInputs {
    fills: Vec<Fill>,
    /// `[tensor × rbs + local]` → written this batch.
    written: Vec<bool>,
    written_count: usize,
    touched: bool,
    finalized: bool,
}

impl ShardInputs {
    fn new(tensors: usize, rbs: usize) -> Self {
        Self {
            fills: (0..tensors).map(|_| Fill::Empty).collect(),
            written: vec![false; tensors * rbs],
            written_count: 0,
            touched: false,
            finalized: false,
        }
    }

    fn reset(&mut self) {
        self.fills.iter_mut().for_each(|f| *f = Fill::Empty);
        self.written.fill(false);
        self.written_count = 0;
        self.touched = false;
        self.finalized = false;
    }

    fn is_full(&self) -> bool {
        self.written_count == self.written.len()
    }
}

/// Collects per-sample inputs into per-shard contiguous buffers.
pub struct BatchAccumulator {
    layout: BatchLayout,
    strides: Vec<usize>,
    shards: Vec<ShardInputs>,
    memory: MemoryPool,
    poisoned: Option<String>,
    finalize_time: Duration,
}

impl BatchAccumulator {
    pub fn new(layout: BatchLayout, inputs: &[TensorSpec], memory: MemoryPool) -> Self {
        let rbs = layout.real_batch_size();
        Self {
            layout,
            strides: inputs.iter().map(TensorSpec::sample_bytes).collect(),
            shards: (0..layout.shard_count())
                .map(|_| ShardInputs::new(inputs.len(), rbs))
                .collect(),
            memory,
            poisoned: None,
            finalize_time: Duration::ZERO,
        }
    }

    /// Starts a new batch. Accumulated buffers go back to the pool; units
    /// keep their bound buffers until the next finalize replaces them.
    pub fn reset(&mut self) {
        self.shards.iter_mut().for_each(ShardInputs::reset);
        self.poisoned = None;
        self.finalize_time = Duration::ZERO;
    }

    /// Fails if an earlier write of this batch poisoned it.
    pub fn check_poison(&self) -> Result<(), RuntimeError> {
        match &self.poisoned {
            Some(reason) => Err(RuntimeError::BatchAborted(reason.clone())),
            None => Ok(()),
        }
    }

    pub fn is_finalized(&self, shard: usize) -> bool {
        self.shards.get(shard).is_some_and(|s| s.finalized)
    }

    /// Time spent finalizing shards since the last reset.
    pub fn finalize_time(&self) -> Duration {
        self.finalize_time
    }

    /// Writes one sample of one input tensor.
    pub fn write(
        &mut self,
        units: &mut [Box<dyn ExecutionUnit>],
        workers: &rayon::ThreadPool,
        index: usize,
        tensor: usize,
        data: &[u8],
    ) -> Result<(), RuntimeError> {
        self.check_poison()?;
        let stride = *self.strides.get(tensor).ok_or(RuntimeError::InvalidTensor {
            index: tensor as i32,
            count: self.strides.len(),
        })?;
        if data.len() != stride {
            return Err(RuntimeError::InputSize {
                tensor,
                expected: stride,
                actual: data.len(),
            });
        }
        let (shard, local) = self.layout.locate(index)?;

        let mut result = self.store(units, shard, local, tensor, data);
        if let Err(e) = &result {
            self.poison(e);
        } else if self.layout.is_batch_tail(index) && tensor + 1 == self.strides.len() {
            result = self.finalize_all(units, workers);
        }
        result
    }

    fn store(
        &mut self,
        units: &mut [Box<dyn ExecutionUnit>],
        shard: usize,
        local: usize,
        tensor: usize,
        data: &[u8],
    ) -> Result<(), RuntimeError> {
        let rbs = self.layout.real_batch_size();
        let stride = self.strides[tensor];
        let unit = units[shard].as_mut();
        let inputs = &mut self.shards[shard];
        let wrap = |source| RuntimeError::FinalizeFailed { shard, source };

        if !inputs.touched {
            inputs.touched = true;
            if rbs == 1 {
                prepare_direct(unit, rbs).map_err(wrap)?;
                inputs.fills.iter_mut().for_each(|f| *f = Fill::Bound);
            }
        }

        let offset = local * stride;
        let next = match std::mem::replace(&mut inputs.fills[tensor], Fill::Empty) {
            Fill::Empty => {
                let guard = self.memory.allocate_copy(data)?;
                Fill::First { guard, local }
            }
            Fill::First {
                mut guard,
                local: first,
            } if first == local => {
                guard.write_at(0, data)?;
                Fill::First { guard, local }
            }
            Fill::First { guard, local: first } => {
                let mut guard = spread(&self.memory, guard, first, rbs, stride)?;
                guard.write_at(offset, data)?;
                Fill::Accumulating(guard)
            }
            Fill::Accumulating(mut guard) => {
                guard.write_at(offset, data)?;
                Fill::Accumulating(guard)
            }
            Fill::Bound => {
                write_bound(unit, tensor, offset, data).map_err(wrap)?;
                Fill::Bound
            }
        };
        inputs.fills[tensor] = next;

        let cell = tensor * rbs + local;
        if !inputs.written[cell] {
            inputs.written[cell] = true;
            inputs.written_count += 1;
        }

        if inputs.is_full() && !inputs.finalized {
            let start = Instant::now();
            finalize_shard(unit, inputs, &self.memory, rbs, &self.strides).map_err(wrap)?;
            self.finalize_time += start.elapsed();
            tracing::debug!("shard {shard} finalized");
        }
        Ok(())
    }

    /// Finalizes every shard not yet finalized, one task per shard.
    pub fn finalize_all(
        &mut self,
        units: &mut [Box<dyn ExecutionUnit>],
        workers: &rayon::ThreadPool,
    ) -> Result<(), RuntimeError> {
        self.check_poison()?;
        let pending = self.shards.iter().filter(|s| !s.finalized).count();
        if pending == 0 {
            return Ok(());
        }

        let start = Instant::now();
        let rbs = self.layout.real_batch_size();
        let memory = &self.memory;
        let strides = &self.strides;
        let mut results: Vec<Result<(), UnitError>> = (0..units.len()).map(|_| Ok(())).collect();

        workers.in_place_scope(|scope| {
            let jobs = units
                .iter_mut()
                .zip(self.shards.iter_mut())
                .zip(results.iter_mut())
                .filter(|((_, inputs), _)| !inputs.finalized);
            for ((unit, inputs), out) in jobs {
                scope.spawn(move |_| {
                    *out = finalize_shard(unit.as_mut(), inputs, memory, rbs, strides);
                });
            }
        });
        self.finalize_time += start.elapsed();

        let failure = results
            .into_iter()
            .enumerate()
            .find_map(|(shard, r)| r.err().map(|source| RuntimeError::FinalizeFailed { shard, source }));
        match failure {
            Some(e) => {
                self.poison(&e);
                Err(e)
            }
            None => {
                tracing::debug!("finalized {pending} shard(s) in parallel");
                Ok(())
            }
        }
    }

    fn poison(&mut self, error: &RuntimeError) {
        if self.poisoned.is_none() {
            tracing::error!("batch poisoned: {error}");
            self.poisoned = Some(error.to_string());
        }
    }
}

/// Grows a one-sample buffer to the full shard, moving the sample from
/// offset 0 to its local slot.
fn spread(
    memory: &MemoryPool,
    guard: BufferGuard,
    local: usize,
    rbs: usize,
    stride: usize,
) -> Result<BufferGuard, MemoryError> {
    let mut grown = memory.grow(guard, rbs * stride)?;
    if local != 0 {
        let bytes = grown.as_mut_slice();
        bytes.copy_within(0..stride, local * stride);
        bytes[..stride].fill(0);
    }
    Ok(grown)
}

fn input_shapes_at(unit: &dyn ExecutionUnit, rbs: usize) -> Result<Option<Vec<Shape>>, UnitError> {
    if unit.inputs().iter().all(|b| b.spec().batch() == rbs) {
        return Ok(None);
    }
    let shapes = unit
        .inputs()
        .iter()
        .map(|b| b.spec().shape.with_batch(rbs))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(shapes))
}

/// Resizes the unit to one sample if needed and clears its inputs.
fn prepare_direct(unit: &mut dyn ExecutionUnit, rbs: usize) -> Result<(), UnitError> {
    match input_shapes_at(unit, rbs)? {
        Some(shapes) => unit.allocate(&shapes),
        None => {
            for t in 0..unit.inputs().len() {
                unit.get_buffer(TensorId::Input(t))?.as_mut_slice().fill(0);
            }
            Ok(())
        }
    }
}

fn write_bound(
    unit: &mut dyn ExecutionUnit,
    tensor: usize,
    offset: usize,
    data: &[u8],
) -> Result<(), UnitError> {
    let binding = unit.get_buffer(TensorId::Input(tensor))?;
    let name = binding.spec().name.clone();
    let bytes = binding.as_mut_slice();
    let len = bytes.len();
    let dst = bytes
        .get_mut(offset..offset + data.len())
        .ok_or(UnitError::BindSize {
            tensor: name,
            expected: offset + data.len(),
            actual: len,
        })?;
    dst.copy_from_slice(data);
    Ok(())
}

/// Resizes the unit if needed and rebinds every accumulated buffer.
fn finalize_shard(
    unit: &mut dyn ExecutionUnit,
    inputs: &mut ShardInputs,
    memory: &MemoryPool,
    rbs: usize,
    strides: &[usize],
) -> Result<(), UnitError> {
    let mut guards = Vec::with_capacity(inputs.fills.len());
    for (fill, &stride) in inputs.fills.iter_mut().zip(strides) {
        let guard = match std::mem::replace(fill, Fill::Bound) {
            Fill::Empty => Some(memory.allocate(rbs * stride)?),
            Fill::First { guard, local } => Some(spread(memory, guard, local, rbs, stride)?),
            Fill::Accumulating(guard) => Some(guard),
            Fill::Bound => None,
        };
        guards.push(guard);
    }

    if guards.iter().any(Option::is_some) {
        if let Some(shapes) = input_shapes_at(unit, rbs)? {
            tracing::debug!("resizing '{}' to batch {rbs}", unit.label());
            unit.allocate(&shapes)?;
        }
    }
    for (t, guard) in guards.into_iter().enumerate() {
        if let Some(guard) = guard {
            unit.get_buffer(TensorId::Input(t))?.rebind(guard)?;
        }
    }
    inputs.finalized = true;
    Ok(())
}
