// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The harness-facing backend.
//!
//! A [`Backend`] owns one resource pool and drives exactly one batch at a
//! time. Its lifecycle mirrors the submission API:
//!
//! ```text
//! create ──▶ set_input × (B × inputs) ──▶ issue_query ──▶ get_output × …
//!                 ▲                                           │
//!                 └──────────── next batch ◀──────────────────┘
//! ```
//!
//! Dropping the backend deletes it and frees the [`HostContext`].

use std::time::Instant;

use exec_unit::{DeviceClass, ModelSignature, UnitFactory};
use memory_manager::{AllocationStats, MemoryPool};
use tensor_core::{DType, TensorSpec};

use crate::context::ActiveLease;
use crate::pool::{PoolRequest, ResourcePool};
use crate::scheduler::PipelinedScheduler;
use crate::sharded::ShardedEngine;
use crate::slot::Slot;
use crate::status::Status;
use crate::{BackendConfig, BatchMetrics, ExecutionMode, HostContext, RuntimeError, Scoreboard};

const BACKEND_NAME: &str = "shard-rt";
const BACKEND_VENDOR: &str = "edge-inference-rt";

/// Element type and per-sample element count of one model tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DataInfo {
    pub dtype: DType,
    pub elements: usize,
}

impl From<&TensorSpec> for DataInfo {
    fn from(spec: &TensorSpec) -> Self {
        Self {
            dtype: spec.dtype,
            elements: spec.sample_elements(),
        }
    }
}

/// Where the current batch stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    /// Accepting inputs.
    Collecting,
    /// Every sample copied; outputs readable.
    Completed,
    /// The last `issue_query` failed; outputs withheld.
    Failed,
}

enum Engine {
    Sharded(ShardedEngine),
    Pipelined(PipelinedScheduler),
}

/// One batch-sharded inference backend.
pub struct Backend {
    config: BackendConfig,
    signature: ModelSignature,
    accelerator: String,
    memory: MemoryPool,
    engine: Engine,
    scoreboard: Scoreboard,
    phase: BatchPhase,
    metrics: Option<BatchMetrics>,
    _lease: ActiveLease,
}

impl Backend {
    /// Validates `config`, claims `context` and builds every execution unit.
    ///
    /// Configuration errors are reported before anything is allocated. A
    /// second backend on the same context is rejected with
    /// [`RuntimeError::BackendActive`].
    pub fn create(
        context: &HostContext,
        factory: &dyn UnitFactory,
        config: BackendConfig,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let signature = factory.signature().clone();
        signature.validate()?;
        let lease = context.acquire()?;

        let memory = MemoryPool::new(config.parse_budget()?);
        let num_threads = config.resolve_threads();

        let (engine, accelerator) = match config.mode {
            ExecutionMode::Sharded => {
                let layout = config.layout()?;
                let shards = layout.shard_count();
                let request = PoolRequest {
                    accelerator: &config.accelerator,
                    num_threads,
                    classes: vec![DeviceClass::Fast; shards],
                    worker_threads: shards - 1,
                };
                let pool = ResourcePool::create(factory, &memory, &request)?;
                let accelerator = pool.accelerator().to_string();
                tracing::debug!("sharding: {}", layout.summary());
                let engine = ShardedEngine::new(pool, layout, &signature, memory.clone());
                (Engine::Sharded(engine), accelerator)
            }
            ExecutionMode::Pipelined => {
                let plan = config.slot_plan()?;
                let request = PoolRequest {
                    accelerator: &config.accelerator,
                    num_threads,
                    classes: (0..plan.total()).map(|i| plan.class_of(i)).collect(),
                    worker_threads: plan.total(),
                };
                let pool = ResourcePool::create(factory, &memory, &request)?;
                let accelerator = pool.accelerator().to_string();
                let (slots, workers) = pool.into_slots();
                let scheduler = PipelinedScheduler::new(
                    slots,
                    workers,
                    config.create_policy()?,
                    &signature,
                    config.batch_size,
                    config.poll_timeout(),
                    &memory,
                )?;
                (Engine::Pipelined(scheduler), accelerator)
            }
        };

        tracing::info!(
            "backend created: model '{}', mode {}, batch {}, accelerator '{accelerator}', {} in use",
            signature.name,
            config.mode,
            config.batch_size,
            memory.allocated_bytes(),
        );

        Ok(Self {
            scoreboard: Scoreboard::new(config.batch_size),
            config,
            signature,
            accelerator,
            memory,
            engine,
            phase: BatchPhase::Collecting,
            metrics: None,
            _lease: lease,
        })
    }

    /// Writes one sample of one input tensor. See [`try_set_input`](Self::try_set_input).
    pub fn set_input(&mut self, batch_index: u32, tensor_index: i32, data: &[u8]) -> Status {
        Status::collapse("set_input", self.try_set_input(batch_index, tensor_index, data))
    }

    /// Writes one sample of one input tensor.
    ///
    /// The first write after a finished batch starts a new one. Writing the
    /// same `(batch_index, tensor_index)` twice keeps the second value.
    pub fn try_set_input(
        &mut self,
        batch_index: u32,
        tensor_index: i32,
        data: &[u8],
    ) -> Result<(), RuntimeError> {
        let tensor = checked_tensor(tensor_index, self.signature.inputs.len())?;
        if self.phase != BatchPhase::Collecting {
            self.begin_batch();
        }
        let index = batch_index as usize;
        match &mut self.engine {
            Engine::Sharded(engine) => engine.set_input(index, tensor, data),
            Engine::Pipelined(scheduler) => scheduler.set_input(index, tensor, data),
        }
    }

    /// Runs the batch. See [`try_issue_query`](Self::try_issue_query).
    pub fn issue_query(&mut self) -> Status {
        Status::collapse("issue_query", self.try_issue_query())
    }

    /// Runs the current batch to completion, blocking the caller.
    ///
    /// Succeeds only if every sample's output was produced. On failure no
    /// output of this batch is readable.
    pub fn try_issue_query(&mut self) -> Result<(), RuntimeError> {
        let start = Instant::now();
        let mut metrics = BatchMetrics::new(self.config.mode, self.config.batch_size);
        self.scoreboard.reset();

        let result = match &mut self.engine {
            Engine::Sharded(engine) => engine.run(&mut metrics, &mut self.scoreboard),
            Engine::Pipelined(scheduler) => scheduler.run(&mut metrics, &mut self.scoreboard),
        }
        .and_then(|()| {
            if self.scoreboard.is_complete() {
                Ok(())
            } else {
                Err(RuntimeError::Scoreboard(format!(
                    "{} of {} samples never copied",
                    self.scoreboard.outstanding(),
                    self.scoreboard.len()
                )))
            }
        });

        metrics.finalise(start.elapsed(), self.memory.stats().peak_allocated_bytes);
        match &result {
            Ok(()) => {
                self.phase = BatchPhase::Completed;
                tracing::info!("{}", metrics.summary());
            }
            Err(_) => self.phase = BatchPhase::Failed,
        }
        self.metrics = Some(metrics);
        result
    }

    /// View of one sample's output from the last completed batch.
    pub fn get_output(&self, batch_index: u32, tensor_index: i32) -> Result<&[u8], RuntimeError> {
        if self.phase != BatchPhase::Completed {
            return Err(RuntimeError::NoResults);
        }
        let tensor = checked_tensor(tensor_index, self.signature.outputs.len())?;
        let index = batch_index as usize;
        match &self.engine {
            Engine::Sharded(engine) => engine.output(index, tensor),
            Engine::Pipelined(scheduler) => scheduler.output(index, tensor),
        }
    }

    /// No-op; kept for API parity.
    pub fn flush(&mut self) -> Status {
        Status::Success
    }

    pub fn input_count(&self) -> usize {
        self.signature.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.signature.outputs.len()
    }

    pub fn input_type(&self, index: i32) -> Result<DataInfo, RuntimeError> {
        let i = checked_tensor(index, self.input_count())?;
        Ok(DataInfo::from(&self.signature.inputs[i]))
    }

    pub fn output_type(&self, index: i32) -> Result<DataInfo, RuntimeError> {
        let i = checked_tensor(index, self.output_count())?;
        Ok(DataInfo::from(&self.signature.outputs[i]))
    }

    pub fn name(&self) -> &str {
        BACKEND_NAME
    }

    pub fn vendor(&self) -> &str {
        BACKEND_VENDOR
    }

    /// The accelerator units were created for, after any CPU fallback.
    pub fn accelerator_name(&self) -> &str {
        &self.accelerator
    }

    pub fn model_name(&self) -> &str {
        &self.signature.name
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    /// Metrics of the last `issue_query`, successful or not.
    pub fn metrics(&self) -> Option<&BatchMetrics> {
        self.metrics.as_ref()
    }

    pub fn scoreboard(&self) -> &Scoreboard {
        &self.scoreboard
    }

    /// Pipelined slots, or `None` in sharded mode.
    pub fn slots(&self) -> Option<&[Slot]> {
        match &self.engine {
            Engine::Sharded(_) => None,
            Engine::Pipelined(scheduler) => Some(scheduler.slots()),
        }
    }

    /// Admission policy name, or `None` in sharded mode.
    pub fn admission_policy(&self) -> Option<&str> {
        match &self.engine {
            Engine::Sharded(_) => None,
            Engine::Pipelined(scheduler) => Some(scheduler.policy_name()),
        }
    }

    /// Slots still held by an in-flight invocation.
    pub fn occupied_slots(&self) -> usize {
        match &self.engine {
            Engine::Sharded(_) => 0,
            Engine::Pipelined(scheduler) => scheduler.occupied(),
        }
    }

    pub fn memory_stats(&self) -> AllocationStats {
        self.memory.stats()
    }

    /// Bytes currently drawn from the backend's memory pool.
    pub fn memory_in_use(&self) -> usize {
        self.memory.allocated_bytes()
    }

    fn begin_batch(&mut self) {
        tracing::debug!("starting new batch");
        match &mut self.engine {
            Engine::Sharded(engine) => engine.reset(),
            Engine::Pipelined(scheduler) => scheduler.reset(),
        }
        self.scoreboard.reset();
        self.phase = BatchPhase::Collecting;
    }
}

fn checked_tensor(index: i32, count: usize) -> Result<usize, RuntimeError> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < count)
        .ok_or(RuntimeError::InvalidTensor { index, count })
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let engine = match &self.engine {
            Engine::Sharded(engine) => format!("sharded({})", engine.layout().summary()),
            Engine::Pipelined(scheduler) => format!("{scheduler:?}"),
        };
        f.debug_struct("Backend")
            .field("model", &self.signature.name)
            .field("accelerator", &self.accelerator)
            .field("engine", &engine)
            .field("phase", &self.phase)
            .finish()
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        tracing::debug!(
            "backend '{}' released ({} slot(s) still occupied)",
            self.signature.name,
            self.occupied_slots()
        );
    }
}
