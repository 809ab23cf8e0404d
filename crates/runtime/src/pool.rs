// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The resource pool: execution units created once per backend, plus the
//! worker threads that drive them.
//!
//! In sharded mode the pool holds one unit per shard and
//! [`dispatch_shards`](ResourcePool::dispatch_shards) runs shard 0 on the
//! calling thread while shards `1..K` run on the workers, joining before it
//! returns. In pipelined mode the pool is converted into [`Slot`]s.

use std::time::{Duration, Instant};

use exec_unit::{DeviceClass, ExecutionUnit, UnitError, UnitFactory, UnitRequest};
use memory_manager::MemoryPool;
use shard_planner::BatchLayout;

use crate::config::CPU_ACCELERATOR;
use crate::slot::Slot;
use crate::{BatchMetrics, RuntimeError};

/// What the pool asks the factory for.
#[derive(Debug, Clone)]
pub struct PoolRequest<'a> {
    /// Accelerator requested by the configuration.
    pub accelerator: &'a str,
    /// Intra-op threads per unit.
    pub num_threads: usize,
    /// Class of each unit, in slot order.
    pub classes: Vec<DeviceClass>,
    /// Worker threads for off-caller execution.
    pub worker_threads: usize,
}

/// A fixed set of execution units and their worker threads.
pub struct ResourcePool {
    units: Vec<Box<dyn ExecutionUnit>>,
    workers: rayon::ThreadPool,
    accelerator: String,
}

impl ResourcePool {
    /// Builds every unit up front.
    ///
    /// If the factory cannot serve the requested accelerator, creation is
    /// retried once with the CPU accelerator. Any other failure, or a
    /// failure of the fallback, aborts.
    pub fn create(
        factory: &dyn UnitFactory,
        memory: &MemoryPool,
        request: &PoolRequest<'_>,
    ) -> Result<Self, RuntimeError> {
        let (units, accelerator) = match build_units(factory, memory, request, request.accelerator) {
            Ok(units) => (units, request.accelerator.to_string()),
            Err(RuntimeError::UnitCreation {
                slot,
                source: UnitError::Creation { detail, .. },
            }) if request.accelerator != CPU_ACCELERATOR => {
                tracing::warn!(
                    "accelerator '{}' unavailable on slot {slot} ({detail}); falling back to '{CPU_ACCELERATOR}'",
                    request.accelerator,
                );
                let units = build_units(factory, memory, request, CPU_ACCELERATOR)?;
                (units, CPU_ACCELERATOR.to_string())
            }
            Err(e) => return Err(e),
        };

        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(request.worker_threads.max(1))
            .thread_name(|i| format!("shard-rt-worker-{i}"))
            .build()?;

        tracing::info!(
            "resource pool ready: {} unit(s) on '{accelerator}', {} worker thread(s)",
            units.len(),
            workers.current_num_threads(),
        );

        Ok(Self {
            units,
            workers,
            accelerator,
        })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Accelerator the units were actually created for.
    pub fn accelerator(&self) -> &str {
        &self.accelerator
    }

    pub fn unit(&self, index: usize) -> Option<&dyn ExecutionUnit> {
        self.units.get(index).map(|u| u.as_ref())
    }

    /// Units and workers together, for work split across shards.
    pub(crate) fn parts_mut(&mut self) -> (&mut [Box<dyn ExecutionUnit>], &rayon::ThreadPool) {
        (&mut self.units, &self.workers)
    }

    /// Converts the pool into pipelined slots, one per unit.
    pub(crate) fn into_slots(self) -> (Vec<Slot>, rayon::ThreadPool) {
        let slots = self
            .units
            .into_iter()
            .enumerate()
            .map(|(i, unit)| Slot::new(i, unit))
            .collect();
        (slots, self.workers)
    }

    /// Invokes every shard once: shards `1..K` on the workers, shard 0
    /// inline. Returns after all shards have joined; the first failure (in
    /// shard order) is reported.
    pub fn dispatch_shards(
        &mut self,
        layout: &BatchLayout,
        metrics: &mut BatchMetrics,
    ) -> Result<(), RuntimeError> {
        let count = self.units.len();
        let mut outcomes: Vec<Option<(Result<(), UnitError>, Duration)>> =
            (0..count).map(|_| None).collect();

        for shard in (1..count).chain(std::iter::once(0)) {
            metrics.record_submit(shard, layout.shard_range(shard).start, count);
        }

        let Some((first_unit, rest_units)) = self.units.split_first_mut() else {
            return Ok(());
        };
        let Some((first_out, rest_out)) = outcomes.split_first_mut() else {
            return Ok(());
        };

        self.workers.in_place_scope(|scope| {
            for (unit, out) in rest_units.iter_mut().zip(rest_out.iter_mut()) {
                scope.spawn(move |_| {
                    let start = Instant::now();
                    let result = unit.invoke();
                    *out = Some((result, start.elapsed()));
                });
            }
            let start = Instant::now();
            let result = first_unit.invoke();
            *first_out = Some((result, start.elapsed()));
        });

        let mut failure = None;
        for (shard, outcome) in outcomes.into_iter().enumerate() {
            let (result, elapsed) = outcome.unwrap_or_else(|| {
                (
                    Err(UnitError::InvokeFailed {
                        unit: format!("shard {shard}"),
                        detail: "task did not report".into(),
                    }),
                    Duration::ZERO,
                )
            });
            match result {
                Ok(()) => {
                    tracing::debug!("shard {shard} finished in {elapsed:?}");
                    let class = self.units[shard].device_class();
                    metrics.record_completion(
                        shard,
                        layout.shard_range(shard).start,
                        class,
                        layout.real_batch_size(),
                        elapsed,
                    );
                }
                Err(source) => {
                    tracing::error!("shard {shard} failed: {source}");
                    failure.get_or_insert(RuntimeError::ShardFailed { shard, source });
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

fn build_units(
    factory: &dyn UnitFactory,
    memory: &MemoryPool,
    request: &PoolRequest<'_>,
    accelerator: &str,
) -> Result<Vec<Box<dyn ExecutionUnit>>, RuntimeError> {
    request
        .classes
        .iter()
        .enumerate()
        .map(|(index, &class)| {
            let unit = factory
                .create_unit(&UnitRequest {
                    index,
                    class,
                    accelerator,
                    num_threads: request.num_threads,
                    pool: memory,
                })
                .map_err(|source| RuntimeError::UnitCreation {
                    slot: index,
                    source,
                })?;
            tracing::debug!("created unit '{}' for slot {index}", unit.label());
            Ok(unit)
        })
        .collect()
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("units", &self.units.len())
            .field("accelerator", &self.accelerator)
            .field("workers", &self.workers.current_num_threads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExecutionMode;
    use exec_unit::synthetic::{demo_signature, FaultPlan, Probe, SyntheticFactory};
    use memory_manager::MemoryBudget;

    fn request(accelerator: &str, units: usize) -> PoolRequest<'_> {
        PoolRequest {
            accelerator,
            num_threads: 1,
            classes: vec![DeviceClass::Fast; units],
            worker_threads: units.saturating_sub(1),
        }
    }

    #[test]
    fn test_create_pool() {
        let memory = MemoryPool::new(MemoryBudget::from_mb(4));
        let factory = SyntheticFactory::new(demo_signature());
        let pool = ResourcePool::create(&factory, &memory, &request("cpu", 3)).unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.accelerator(), "cpu");
        assert!(memory.allocated_bytes() > 0);
    }

    #[test]
    fn test_accelerator_fallback() {
        let memory = MemoryPool::new(MemoryBudget::from_mb(4));
        let factory = SyntheticFactory::new(demo_signature()).reject_accelerator("npu");
        let pool = ResourcePool::create(&factory, &memory, &request("npu", 2)).unwrap();
        assert_eq!(pool.accelerator(), "cpu");
        assert!(pool.unit(1).unwrap().label().contains("cpu"));
    }

    #[test]
    fn test_fallback_failure_aborts() {
        let memory = MemoryPool::new(MemoryBudget::from_mb(4));
        let factory = SyntheticFactory::new(demo_signature())
            .with_fault(1, FaultPlan::none().fail_create());
        let err = ResourcePool::create(&factory, &memory, &request("npu", 2)).unwrap_err();
        assert!(matches!(err, RuntimeError::UnitCreation { slot: 1, .. }));
    }

    #[test]
    fn test_dispatch_joins_all_shards() {
        let memory = MemoryPool::new(MemoryBudget::from_mb(4));
        let probe = Probe::new();
        let factory = SyntheticFactory::new(demo_signature()).with_probe(probe.clone());
        let mut pool = ResourcePool::create(&factory, &memory, &request("cpu", 4)).unwrap();
        let layout = BatchLayout::new(4, 4).unwrap();
        let mut metrics = BatchMetrics::new(ExecutionMode::Sharded, 4);

        pool.dispatch_shards(&layout, &mut metrics).unwrap();
        assert_eq!(probe.invocations(), 4);
        assert_eq!(probe.in_flight(), 0);
        assert_eq!(metrics.invocations.len(), 4);
        assert_eq!(metrics.submission_order(), vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_dispatch_reports_failure_after_join() {
        let memory = MemoryPool::new(MemoryBudget::from_mb(4));
        let probe = Probe::new();
        let factory = SyntheticFactory::new(demo_signature())
            .with_probe(probe.clone())
            .with_fault(1, FaultPlan::none().fail_invoke_on(1));
        let mut pool = ResourcePool::create(&factory, &memory, &request("cpu", 2)).unwrap();
        let layout = BatchLayout::new(2, 2).unwrap();
        let mut metrics = BatchMetrics::new(ExecutionMode::Sharded, 2);

        let err = pool.dispatch_shards(&layout, &mut metrics).unwrap_err();
        assert!(matches!(err, RuntimeError::ShardFailed { shard: 1, .. }));
        assert_eq!(probe.invocations(), 2);
        assert_eq!(probe.in_flight(), 0);
    }
}
