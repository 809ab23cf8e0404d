// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Static sharded execution: accumulate, finalize, run every shard once.

use exec_unit::ModelSignature;
use memory_manager::MemoryPool;
use shard_planner::BatchLayout;

use crate::accumulator::BatchAccumulator;
use crate::collator::OutputCollator;
use crate::pool::ResourcePool;
use crate::{BatchMetrics, RuntimeError, Scoreboard};

/// One unit per shard, driven by the streaming accumulator.
pub(crate) struct ShardedEngine {
    pool: ResourcePool,
    accumulator: BatchAccumulator,
    collator: OutputCollator,
}

impl ShardedEngine {
    pub fn new(
        pool: ResourcePool,
        layout: BatchLayout,
        signature: &ModelSignature,
        memory: MemoryPool,
    ) -> Self {
        Self {
            pool,
            accumulator: BatchAccumulator::new(layout, &signature.inputs, memory),
            collator: OutputCollator::new(layout, &signature.outputs),
        }
    }

    pub fn layout(&self) -> &BatchLayout {
        self.collator.layout()
    }

    pub fn reset(&mut self) {
        self.accumulator.reset();
    }

    pub fn set_input(&mut self, index: usize, tensor: usize, data: &[u8]) -> Result<(), RuntimeError> {
        let (units, workers) = self.pool.parts_mut();
        self.accumulator.write(units, workers, index, tensor, data)
    }

    /// Finalizes any shard still pending, then dispatches all shards and
    /// joins. Nothing is invoked if the batch is poisoned or finalize fails.
    pub fn run(
        &mut self,
        metrics: &mut BatchMetrics,
        scoreboard: &mut Scoreboard,
    ) -> Result<(), RuntimeError> {
        self.accumulator.check_poison()?;
        let (units, workers) = self.pool.parts_mut();
        self.accumulator.finalize_all(units, workers)?;
        metrics.add_finalize(self.accumulator.finalize_time());

        let layout = *self.collator.layout();
        self.pool.dispatch_shards(&layout, metrics)?;
        for shard in 0..layout.shard_count() {
            scoreboard.mark_range(layout.shard_range(shard))?;
        }
        Ok(())
    }

    /// View of one sample's output inside its shard's output tensor.
    pub fn output(&self, index: usize, tensor: usize) -> Result<&[u8], RuntimeError> {
        let (shard, range) = self.collator.locate(index, tensor)?;
        let unit = self.pool.unit(shard).ok_or(RuntimeError::NoResults)?;
        unit.outputs()
            .get(tensor)
            .and_then(|b| b.as_slice().get(range))
            .ok_or(RuntimeError::NoResults)
    }
}
