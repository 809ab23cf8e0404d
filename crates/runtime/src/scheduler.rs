// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pipelined execution over a bounded fast/slow slot pool.
//!
//! ```text
//!  staging ──admit (FIFO)──▶ Slot::acquire ──spawn invoke──▶ worker
//!                                 ▲                              │
//!                                 │ release + refill        Completion
//!                                 └──── poll (recv_deadline) ◀───┘
//! ```
//!
//! Inputs are staged per sample. Admission pops the next pending sample,
//! copies it into a free slot's bound inputs and moves the slot's unit onto
//! a worker thread. The unit comes back over the completion channel; only
//! then is its output copied out, the scoreboard updated, and the slot
//! refilled with the next pending sample.
//!
//! The whole batch shares one deadline. On timeout the batch fails and slots
//! still in flight stay occupied; their completions are drained and
//! discarded when they arrive, possibly during a later batch.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use exec_unit::{DeviceClass, ExecutionUnit, ModelSignature, TensorId, UnitError};
use memory_manager::{BufferGuard, MemoryPool};
use shard_planner::{AdmissionPolicy, BatchLayout};
use tensor_core::TensorSpec;

use crate::collator::OutputCollator;
use crate::slot::Slot;
use crate::{BatchMetrics, RuntimeError, Scoreboard};

/// A finished invocation, carrying the unit back to its slot.
struct Completion {
    slot: usize,
    sample: usize,
    epoch: u64,
    unit: Box<dyn ExecutionUnit>,
    result: Result<(), UnitError>,
    elapsed: Duration,
}

/// Drives a slot pool for one batch at a time.
pub(crate) struct PipelinedScheduler {
    slots: Vec<Slot>,
    workers: rayon::ThreadPool,
    policy: Box<dyn AdmissionPolicy>,
    batch_size: usize,
    in_strides: Vec<usize>,
    staging: Vec<BufferGuard>,
    results: Vec<BufferGuard>,
    collator: OutputCollator,
    pending: VecDeque<usize>,
    epoch: u64,
    timeout: Duration,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
}

impl PipelinedScheduler {
    pub fn new(
        slots: Vec<Slot>,
        workers: rayon::ThreadPool,
        policy: Box<dyn AdmissionPolicy>,
        signature: &ModelSignature,
        batch_size: usize,
        timeout: Duration,
        memory: &MemoryPool,
    ) -> Result<Self, RuntimeError> {
        let batch_area = |spec: &TensorSpec| memory.allocate(batch_size * spec.sample_bytes());
        let staging = signature
            .inputs
            .iter()
            .map(batch_area)
            .collect::<Result<Vec<_>, _>>()?;
        let results = signature
            .outputs
            .iter()
            .map(batch_area)
            .collect::<Result<Vec<_>, _>>()?;
        let (tx, rx) = crossbeam_channel::unbounded();

        Ok(Self {
            slots,
            workers,
            policy,
            batch_size,
            in_strides: signature.inputs.iter().map(TensorSpec::sample_bytes).collect(),
            staging,
            results,
            collator: OutputCollator::new(BatchLayout::new(batch_size, 1)?, &signature.outputs),
            pending: VecDeque::with_capacity(batch_size),
            epoch: 0,
            timeout,
            tx,
            rx,
        })
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_available()).count()
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    /// Clears staged inputs for a new batch.
    pub fn reset(&mut self) {
        for area in &mut self.staging {
            area.as_mut_slice().fill(0);
        }
    }

    pub fn set_input(&mut self, index: usize, tensor: usize, data: &[u8]) -> Result<(), RuntimeError> {
        let stride = *self.in_strides.get(tensor).ok_or(RuntimeError::InvalidTensor {
            index: tensor as i32,
            count: self.in_strides.len(),
        })?;
        if data.len() != stride {
            return Err(RuntimeError::InputSize {
                tensor,
                expected: stride,
                actual: data.len(),
            });
        }
        self.collator.layout().check_index(index)?;
        self.staging[tensor].write_at(index * stride, data)?;
        Ok(())
    }

    /// View of one sample's output in the batch-wide result area.
    pub fn output(&self, index: usize, tensor: usize) -> Result<&[u8], RuntimeError> {
        let (_, range) = self.collator.locate(index, tensor)?;
        Ok(self.results[tensor].slice(range.start, range.len())?)
    }

    /// Runs every staged sample through the slot pool.
    pub fn run(
        &mut self,
        metrics: &mut BatchMetrics,
        scoreboard: &mut Scoreboard,
    ) -> Result<(), RuntimeError> {
        self.epoch += 1;
        self.drain_stale();
        if self.slots.iter().all(|s| !s.is_available()) {
            return Err(RuntimeError::NoUsableSlots {
                occupied: self.slots.len(),
            });
        }
        if self.occupied() > 0 {
            tracing::warn!(
                "{} slot(s) still held by an earlier batch; running with reduced concurrency",
                self.occupied()
            );
        }

        for area in &mut self.results {
            area.as_mut_slice().fill(0);
        }
        self.policy.reset();
        self.pending.clear();
        self.pending.extend(0..self.batch_size);

        let deadline = Instant::now() + self.timeout;
        let mut failure: Option<RuntimeError> = None;
        self.admit_or_fail(metrics, &mut failure);

        while !scoreboard.is_complete() {
            if let Some(err) = failure.take() {
                if self.in_flight() == 0 {
                    return Err(err);
                }
                failure = Some(err);
            } else if self.occupied() == 0 {
                return Err(RuntimeError::SlotState {
                    slot: 0,
                    detail: format!("scheduler stalled with {} pending", self.pending.len()),
                });
            }
            match self.rx.recv_deadline(deadline) {
                Ok(done) => self.complete(done, metrics, scoreboard, &mut failure),
                Err(RecvTimeoutError::Timeout) => {
                    let err = RuntimeError::PollTimeout {
                        timeout_ms: self.timeout.as_millis() as u64,
                        completed: scoreboard.copied_count(),
                        outstanding: scoreboard.outstanding(),
                    };
                    tracing::error!("{err}; {} slot(s) left occupied", self.in_flight());
                    return Err(failure.unwrap_or(err));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(RuntimeError::SlotState {
                        slot: 0,
                        detail: "completion channel closed".into(),
                    });
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Occupied slots belonging to the current batch.
    fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.occupant().is_some_and(|(_, epoch)| epoch == self.epoch))
            .count()
    }

    /// Reclaims slots whose earlier-batch invocations have finished.
    fn drain_stale(&mut self) {
        while let Ok(done) = self.rx.try_recv() {
            self.reclaim_stale(done);
        }
    }

    fn reclaim_stale(&mut self, done: Completion) {
        tracing::debug!(
            "discarding late completion of sample {} (batch epoch {}) from slot {}",
            done.sample,
            done.epoch,
            done.slot
        );
        if let Some(slot) = self.slots.get_mut(done.slot) {
            if let Err(e) = slot.release(done.sample, done.epoch, done.unit) {
                tracing::warn!("{e}");
            }
        }
    }

    fn complete(
        &mut self,
        done: Completion,
        metrics: &mut BatchMetrics,
        scoreboard: &mut Scoreboard,
        failure: &mut Option<RuntimeError>,
    ) {
        if done.epoch != self.epoch {
            self.reclaim_stale(done);
            if failure.is_none() {
                self.admit_or_fail(metrics, failure);
            }
            return;
        }

        let Completion {
            slot,
            sample,
            epoch,
            unit,
            result,
            elapsed,
        } = done;
        let class = unit.device_class();
        let outcome = match result {
            Ok(()) => self.copy_out(slot, sample, unit.as_ref()),
            Err(source) => Err(RuntimeError::SlotFailed {
                slot,
                sample,
                source,
            }),
        };
        if let Err(e) = self.slots[slot].release(sample, epoch, unit) {
            failure.get_or_insert(e);
        }

        match outcome.and_then(|()| scoreboard.mark_copied(sample)) {
            Ok(()) => {
                tracing::trace!("sample {sample} done on slot {slot} ({class}) in {elapsed:?}");
                metrics.record_completion(slot, sample, class, 1, elapsed);
            }
            Err(e) => {
                tracing::error!("{e}");
                failure.get_or_insert(e);
                self.pending.clear();
            }
        }
        if failure.is_none() {
            self.admit_or_fail(metrics, failure);
        }
    }

    fn copy_out(&mut self, slot: usize, sample: usize, unit: &dyn ExecutionUnit) -> Result<(), RuntimeError> {
        for (t, area) in self.results.iter_mut().enumerate() {
            let (_, range) = self.collator.locate(sample, t)?;
            let src = unit
                .outputs()
                .get(t)
                .and_then(|b| b.as_slice().get(..range.len()))
                .ok_or_else(|| RuntimeError::SlotBinding {
                    slot,
                    source: UnitError::NoSuchTensor {
                        unit: unit.label().to_string(),
                        tensor: TensorId::Output(t),
                    },
                })?;
            area.write_at(range.start, src)?;
        }
        Ok(())
    }

    fn admit_or_fail(&mut self, metrics: &mut BatchMetrics, failure: &mut Option<RuntimeError>) {
        if let Err(e) = self.admit(metrics) {
            tracing::error!("admission failed: {e}");
            failure.get_or_insert(e);
            self.pending.clear();
        }
    }

    /// Fills free slots with pending samples in FIFO order.
    fn admit(&mut self, metrics: &mut BatchMetrics) -> Result<(), RuntimeError> {
        while let Some(&sample) = self.pending.front() {
            let fast = self.free_slot(DeviceClass::Fast);
            let slow = self.free_slot(DeviceClass::Slow);
            let Some(class) = self.policy.choose(fast.is_some(), slow.is_some()) else {
                break;
            };
            let index = match class {
                DeviceClass::Fast => fast,
                DeviceClass::Slow => slow,
            };
            let Some(index) = index else {
                break;
            };
            self.pending.pop_front();
            self.submit(index, sample)?;
            metrics.record_submit(index, sample, self.occupied());
        }
        Ok(())
    }

    fn free_slot(&self, class: DeviceClass) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.class() == class && s.is_available())
    }

    fn submit(&mut self, index: usize, sample: usize) -> Result<(), RuntimeError> {
        let slot = &mut self.slots[index];
        let unit = slot.unit_mut().ok_or_else(|| RuntimeError::SlotState {
            slot: index,
            detail: "submit to an occupied slot".into(),
        })?;
        stage_into(unit, &self.staging, &self.in_strides, sample)
            .map_err(|source| RuntimeError::SlotBinding { slot: index, source })?;

        let mut unit = slot.acquire(sample, self.epoch)?;
        let tx = self.tx.clone();
        let epoch = self.epoch;
        tracing::trace!("sample {sample} → slot {index}");
        self.workers.spawn(move || {
            let start = Instant::now();
            let result = unit.invoke();
            // The receiver outlives every batch; a send error means the
            // backend was dropped and the unit is released with the message.
            let _ = tx.send(Completion {
                slot: index,
                sample,
                epoch,
                unit,
                result,
                elapsed: start.elapsed(),
            });
        });
        Ok(())
    }
}

/// Copies one staged sample into a single-sample unit, resizing it first if
/// its leading dimension is not 1.
fn stage_into(
    unit: &mut dyn ExecutionUnit,
    staging: &[BufferGuard],
    strides: &[usize],
    sample: usize,
) -> Result<(), UnitError> {
    if unit.inputs().iter().any(|b| b.spec().batch() != 1) {
        let shapes = unit
            .inputs()
            .iter()
            .map(|b| b.spec().shape.with_batch(1))
            .collect::<Result<Vec<_>, _>>()?;
        unit.allocate(&shapes)?;
    }
    for (t, (area, &stride)) in staging.iter().zip(strides).enumerate() {
        let src = area.slice(sample * stride, stride)?;
        let binding = unit.get_buffer(TensorId::Input(t))?;
        let expected = binding.spec().size_bytes();
        if expected != stride {
            return Err(UnitError::BindSize {
                tensor: binding.spec().name.clone(),
                expected,
                actual: stride,
            });
        }
        binding.as_mut_slice().copy_from_slice(src);
    }
    Ok(())
}

impl std::fmt::Debug for PipelinedScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelinedScheduler")
            .field("slots", &self.slots)
            .field("policy", &self.policy.name())
            .field("batch_size", &self.batch_size)
            .field("epoch", &self.epoch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolRequest, ResourcePool};
    use crate::ExecutionMode;
    use exec_unit::synthetic::{demo_signature, transform, FaultPlan, Probe, SyntheticFactory};
    use exec_unit::UnitFactory;
    use memory_manager::MemoryBudget;
    use shard_planner::FastFirst;

    fn sample_bytes(sample: usize, tensor: usize, len: usize) -> Vec<u8> {
        (0..len).map(|j| (sample * 31 + tensor * 7 + j) as u8).collect()
    }

    fn build(
        factory: &SyntheticFactory,
        classes: Vec<DeviceClass>,
        batch: usize,
        timeout: Duration,
    ) -> PipelinedScheduler {
        let memory = MemoryPool::new(MemoryBudget::from_mb(8));
        let request = PoolRequest {
            accelerator: "cpu",
            num_threads: 1,
            worker_threads: classes.len(),
            classes,
        };
        let pool = ResourcePool::create(factory, &memory, &request).unwrap();
        let (slots, workers) = pool.into_slots();
        PipelinedScheduler::new(
            slots,
            workers,
            Box::new(FastFirst),
            factory.signature(),
            batch,
            timeout,
            &memory,
        )
        .unwrap()
    }

    fn stage(sched: &mut PipelinedScheduler, batch: usize) {
        let sig = demo_signature();
        for s in 0..batch {
            for (t, spec) in sig.inputs.iter().enumerate() {
                sched
                    .set_input(s, t, &sample_bytes(s, t, spec.sample_bytes()))
                    .unwrap();
            }
        }
    }

    fn check_outputs(sched: &PipelinedScheduler, batch: usize) {
        let sig = demo_signature();
        for s in 0..batch {
            let inputs: Vec<Vec<u8>> = sig
                .inputs
                .iter()
                .enumerate()
                .map(|(t, spec)| sample_bytes(s, t, spec.sample_bytes()))
                .collect();
            let views: Vec<&[u8]> = inputs.iter().map(Vec::as_slice).collect();
            for (t, spec) in sig.outputs.iter().enumerate() {
                let expected = transform(&views, t, spec.sample_bytes());
                assert_eq!(sched.output(s, t).unwrap(), expected.as_slice(), "sample {s} output {t}");
            }
        }
    }

    #[test]
    fn test_pipelined_batch_completes() {
        let probe = Probe::new();
        let factory = SyntheticFactory::new(demo_signature()).with_probe(probe.clone());
        let classes = vec![DeviceClass::Fast, DeviceClass::Fast, DeviceClass::Slow];
        let mut sched = build(&factory, classes, 7, Duration::from_secs(5));
        stage(&mut sched, 7);

        let mut metrics = BatchMetrics::new(ExecutionMode::Pipelined, 7);
        let mut board = Scoreboard::new(7);
        sched.run(&mut metrics, &mut board).unwrap();

        assert!(board.is_complete());
        assert_eq!(probe.invocations(), 7);
        assert!(probe.peak_in_flight() <= 3);
        assert!(metrics.peak_occupancy <= 3);
        assert_eq!(metrics.submission_order(), (0..7).collect::<Vec<_>>());
        assert_eq!(sched.occupied(), 0);
        check_outputs(&sched, 7);
    }

    #[test]
    fn test_fast_first_keeps_slow_idle_when_fast_free() {
        let factory = SyntheticFactory::new(demo_signature());
        let classes = vec![DeviceClass::Fast, DeviceClass::Fast, DeviceClass::Slow];
        let mut sched = build(&factory, classes, 2, Duration::from_secs(5));
        stage(&mut sched, 2);

        let mut metrics = BatchMetrics::new(ExecutionMode::Pipelined, 2);
        let mut board = Scoreboard::new(2);
        sched.run(&mut metrics, &mut board).unwrap();
        assert!(metrics
            .invocations
            .iter()
            .all(|t| t.class == DeviceClass::Fast));
    }

    #[test]
    fn test_timeout_then_late_completion_reclaimed() {
        let factory = SyntheticFactory::new(demo_signature())
            .with_class_delay(DeviceClass::Slow, Duration::from_millis(300));
        let classes = vec![DeviceClass::Fast, DeviceClass::Slow];
        let mut sched = build(&factory, classes, 3, Duration::from_millis(100));
        stage(&mut sched, 3);

        let mut metrics = BatchMetrics::new(ExecutionMode::Pipelined, 3);
        let mut board = Scoreboard::new(3);
        let err = sched.run(&mut metrics, &mut board).unwrap_err();
        assert!(matches!(err, RuntimeError::PollTimeout { .. }), "{err}");
        assert_eq!(sched.occupied(), 1);

        std::thread::sleep(Duration::from_millis(400));
        sched.timeout = Duration::from_secs(5);
        let mut metrics = BatchMetrics::new(ExecutionMode::Pipelined, 3);
        board.reset();
        sched.run(&mut metrics, &mut board).unwrap();
        assert!(board.is_complete());
        check_outputs(&sched, 3);
        assert_eq!(sched.occupied(), 0);
    }

    #[test]
    fn test_all_slots_stale_is_rejected() {
        let factory = SyntheticFactory::new(demo_signature())
            .with_class_delay(DeviceClass::Fast, Duration::from_millis(400));
        let mut sched = build(&factory, vec![DeviceClass::Fast], 2, Duration::from_millis(50));
        stage(&mut sched, 2);

        let mut board = Scoreboard::new(2);
        let mut metrics = BatchMetrics::new(ExecutionMode::Pipelined, 2);
        assert!(sched.run(&mut metrics, &mut board).is_err());
        board.reset();
        let err = sched.run(&mut metrics, &mut board).unwrap_err();
        assert!(matches!(err, RuntimeError::NoUsableSlots { occupied: 1 }));
    }

    #[test]
    fn test_invoke_failure_reports_slot() {
        let factory = SyntheticFactory::new(demo_signature())
            .with_fault(1, FaultPlan::none().fail_invoke_on(1));
        let classes = vec![DeviceClass::Fast, DeviceClass::Fast];
        let mut sched = build(&factory, classes, 4, Duration::from_secs(5));
        stage(&mut sched, 4);

        let mut metrics = BatchMetrics::new(ExecutionMode::Pipelined, 4);
        let mut board = Scoreboard::new(4);
        let err = sched.run(&mut metrics, &mut board).unwrap_err();
        assert!(matches!(err, RuntimeError::SlotFailed { slot: 1, .. }), "{err}");
        assert!(!board.is_complete());
        assert_eq!(sched.occupied(), 0);
    }

    #[test]
    fn test_set_input_validation() {
        let factory = SyntheticFactory::new(demo_signature());
        let mut sched = build(&factory, vec![DeviceClass::Fast], 2, Duration::from_secs(1));
        assert!(matches!(
            sched.set_input(0, 5, &[0; 4]),
            Err(RuntimeError::InvalidTensor { index: 5, count: 2 })
        ));
        assert!(matches!(
            sched.set_input(0, 1, &[0; 3]),
            Err(RuntimeError::InputSize { tensor: 1, expected: 8, actual: 3 })
        ));
        assert!(sched.set_input(2, 1, &[0; 8]).is_err());
    }
}
