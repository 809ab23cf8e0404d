// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Deterministic reference execution unit.
//!
//! [`SyntheticUnit`] computes every output sample from the matching input
//! sample only (see [`transform`]), so a misplaced shard offset or a sample
//! routed to the wrong slot shows up as a byte mismatch. Fault injection
//! ([`FaultPlan`]) and a shared occupancy [`Probe`] make the unit usable as
//! a test double for the scheduler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use memory_manager::{MemoryError, MemoryPool};
use tensor_core::{DType, Shape, TensorSpec};

use crate::{
    BoundBuffer, DeviceClass, ExecutionUnit, ModelSignature, TensorId, UnitError, UnitFactory,
    UnitRequest,
};

/// Computes output `output_index` for one sample.
///
/// Byte `j` is the wrapping sum of byte `j mod len` of every input sample,
/// plus `output_index + 1`.
pub fn transform(inputs: &[&[u8]], output_index: usize, out_len: usize) -> Vec<u8> {
    let bias = (output_index as u8).wrapping_add(1);
    (0..out_len)
        .map(|j| {
            inputs
                .iter()
                .filter(|s| !s.is_empty())
                .fold(bias, |acc, s| acc.wrapping_add(s[j % s.len()]))
        })
        .collect()
}

/// A small two-input, two-output signature for demos and benchmarks.
pub fn demo_signature() -> ModelSignature {
    ModelSignature {
        name: "synthetic-demo".into(),
        inputs: vec![
            TensorSpec::new("image", DType::U8, Shape::new(vec![1, 8, 8, 3])),
            TensorSpec::new("scale", DType::F32, Shape::matrix(1, 2)),
        ],
        outputs: vec![
            TensorSpec::new("scores", DType::F32, Shape::matrix(1, 10)),
            TensorSpec::new("label", DType::I32, Shape::matrix(1, 1)),
        ],
    }
}

// ── Faults ─────────────────────────────────────────────────────────────────

/// Failures and latency injected into one unit.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// The factory refuses to build this unit.
    pub fail_create: bool,
    /// Fail the n-th call to `allocate` (1-based, creation not counted).
    pub fail_allocate_on: Option<usize>,
    /// Fail the n-th call to `invoke` (1-based).
    pub fail_invoke_on: Option<usize>,
    /// Sleep this long inside every `invoke`.
    pub invoke_delay: Duration,
}

impl FaultPlan {
    /// A plan that injects nothing.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fail_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn fail_allocate_on(mut self, call: usize) -> Self {
        self.fail_allocate_on = Some(call);
        self
    }

    pub fn fail_invoke_on(mut self, call: usize) -> Self {
        self.fail_invoke_on = Some(call);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.invoke_delay = delay;
        self
    }
}

// ── Probe ──────────────────────────────────────────────────────────────────

/// What a unit reported to the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeEventKind {
    Started,
    Finished,
}

/// One probe record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeEvent {
    /// Slot index of the reporting unit.
    pub unit: usize,
    pub kind: ProbeEventKind,
}

/// Shared observer of unit activity across a pool.
#[derive(Debug, Default)]
pub struct Probe {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    invocations: AtomicUsize,
    events: Mutex<Vec<ProbeEvent>>,
}

impl Probe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn enter(&self, unit: usize) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.record(unit, ProbeEventKind::Started);
    }

    fn exit(&self, unit: usize) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.record(unit, ProbeEventKind::Finished);
    }

    fn record(&self, unit: usize, kind: ProbeEventKind) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ProbeEvent { unit, kind });
    }

    /// Invocations currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running invocations observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Total invocations started.
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Snapshot of every event so far, in report order.
    pub fn events(&self) -> Vec<ProbeEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clears counters and events, keeping the peak reset too.
    pub fn reset(&self) {
        self.peak.store(self.in_flight(), Ordering::SeqCst);
        self.invocations.store(0, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// ── Unit ───────────────────────────────────────────────────────────────────

/// Reference unit applying [`transform`] sample by sample.
pub struct SyntheticUnit {
    label: String,
    index: usize,
    class: DeviceClass,
    signature: Arc<ModelSignature>,
    pool: MemoryPool,
    inputs: Vec<BoundBuffer>,
    outputs: Vec<BoundBuffer>,
    faults: FaultPlan,
    allocate_calls: usize,
    invoke_calls: usize,
    probe: Option<Arc<Probe>>,
}

impl SyntheticUnit {
    fn build(
        request: &UnitRequest<'_>,
        signature: Arc<ModelSignature>,
        faults: FaultPlan,
        probe: Option<Arc<Probe>>,
    ) -> Result<Self, UnitError> {
        let mut unit = Self {
            label: format!("synthetic-{}-{}#{}", request.accelerator, request.class, request.index),
            index: request.index,
            class: request.class,
            inputs: signature.inputs.iter().cloned().map(BoundBuffer::new).collect(),
            outputs: signature.outputs.iter().cloned().map(BoundBuffer::new).collect(),
            signature,
            pool: request.pool.clone(),
            faults,
            allocate_calls: 0,
            invoke_calls: 0,
            probe,
        };
        let native = unit.signature.input_shapes();
        unit.bind_all(&native)?;
        Ok(unit)
    }

    fn bind_all(&mut self, input_shapes: &[Shape]) -> Result<(), UnitError> {
        if input_shapes.len() != self.inputs.len() {
            return Err(UnitError::ShapeCount {
                unit: self.label.clone(),
                expected: self.inputs.len(),
                actual: input_shapes.len(),
            });
        }
        let batch = input_shapes[0].batch();
        for (i, shape) in input_shapes.iter().enumerate() {
            let native = &self.signature.inputs[i];
            let spec = TensorSpec::new(native.name.clone(), native.dtype, shape.clone());
            self.inputs[i].allocate(&self.pool, spec)?;
        }
        for (o, native) in self.signature.outputs.iter().enumerate() {
            self.outputs[o].allocate(&self.pool, native.with_batch(batch)?)?;
        }
        Ok(())
    }

    fn run(&mut self) -> Result<(), UnitError> {
        if self.faults.fail_invoke_on == Some(self.invoke_calls) {
            return Err(UnitError::InvokeFailed {
                unit: self.label.clone(),
                detail: format!("injected failure on invocation {}", self.invoke_calls),
            });
        }
        if self.inputs.iter().chain(&self.outputs).any(|b| !b.is_allocated()) {
            return Err(UnitError::NotAllocated(self.label.clone()));
        }

        let batch = self.inputs[0].spec().batch();
        let in_strides: Vec<usize> = self.inputs.iter().map(|b| b.spec().sample_bytes()).collect();
        for s in 0..batch {
            let samples: Vec<&[u8]> = self
                .inputs
                .iter()
                .zip(&in_strides)
                .map(|(b, &stride)| &b.as_slice()[s * stride..(s + 1) * stride])
                .collect();
            for (o, out) in self.outputs.iter_mut().enumerate() {
                let stride = out.spec().sample_bytes();
                let bytes = transform(&samples, o, stride);
                out.as_mut_slice()[s * stride..(s + 1) * stride].copy_from_slice(&bytes);
            }
        }
        Ok(())
    }
}

impl ExecutionUnit for SyntheticUnit {
    fn label(&self) -> &str {
        &self.label
    }

    fn device_class(&self) -> DeviceClass {
        self.class
    }

    fn inputs(&self) -> &[BoundBuffer] {
        &self.inputs
    }

    fn outputs(&self) -> &[BoundBuffer] {
        &self.outputs
    }

    fn allocate(&mut self, input_shapes: &[Shape]) -> Result<(), UnitError> {
        self.allocate_calls += 1;
        if self.faults.fail_allocate_on == Some(self.allocate_calls) {
            return Err(UnitError::Allocation(MemoryError::OutOfMemory {
                requested_bytes: input_shapes
                    .iter()
                    .zip(&self.signature.inputs)
                    .map(|(s, spec)| s.size_bytes(spec.dtype))
                    .sum(),
                available_bytes: 0,
                budget_bytes: self.pool.budget().as_bytes(),
            }));
        }
        tracing::trace!(unit = %self.label, ?input_shapes, "allocating tensors");
        self.bind_all(input_shapes)
    }

    fn get_buffer(&mut self, tensor: TensorId) -> Result<&mut BoundBuffer, UnitError> {
        let slot = match tensor {
            TensorId::Input(i) => self.inputs.get_mut(i),
            TensorId::Output(i) => self.outputs.get_mut(i),
        };
        slot.ok_or_else(|| UnitError::NoSuchTensor {
            unit: self.label.clone(),
            tensor,
        })
    }

    fn invoke(&mut self) -> Result<(), UnitError> {
        self.invoke_calls += 1;
        if let Some(probe) = &self.probe {
            probe.enter(self.index);
        }
        if !self.faults.invoke_delay.is_zero() {
            std::thread::sleep(self.faults.invoke_delay);
        }
        let result = self.run();
        if let Some(probe) = &self.probe {
            probe.exit(self.index);
        }
        result
    }
}

// ── Factory ────────────────────────────────────────────────────────────────

/// Builds [`SyntheticUnit`]s for every pool slot.
pub struct SyntheticFactory {
    signature: Arc<ModelSignature>,
    faults: HashMap<usize, FaultPlan>,
    class_delay: HashMap<DeviceClass, Duration>,
    rejected: Vec<String>,
    probe: Option<Arc<Probe>>,
}

impl SyntheticFactory {
    pub fn new(signature: ModelSignature) -> Self {
        Self {
            signature: Arc::new(signature),
            faults: HashMap::new(),
            class_delay: HashMap::new(),
            rejected: Vec::new(),
            probe: None,
        }
    }

    /// Injects `plan` into the unit built for slot `index`.
    pub fn with_fault(mut self, index: usize, plan: FaultPlan) -> Self {
        self.faults.insert(index, plan);
        self
    }

    /// Applies an invoke delay to every slot of `class` without its own plan.
    pub fn with_class_delay(mut self, class: DeviceClass, delay: Duration) -> Self {
        self.class_delay.insert(class, delay);
        self
    }

    /// Makes unit creation fail for `accelerator`, as an unavailable
    /// hardware delegate would.
    pub fn reject_accelerator(mut self, accelerator: impl Into<String>) -> Self {
        self.rejected.push(accelerator.into());
        self
    }

    pub fn with_probe(mut self, probe: Arc<Probe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

impl UnitFactory for SyntheticFactory {
    fn signature(&self) -> &ModelSignature {
        &self.signature
    }

    fn create_unit(&self, request: &UnitRequest<'_>) -> Result<Box<dyn ExecutionUnit>, UnitError> {
        if self.rejected.iter().any(|a| a == request.accelerator) {
            return Err(UnitError::Creation {
                accelerator: request.accelerator.to_string(),
                detail: "accelerator not available".into(),
            });
        }
        let plan = match self.faults.get(&request.index) {
            Some(plan) => plan.clone(),
            None => FaultPlan::none()
                .with_delay(self.class_delay.get(&request.class).copied().unwrap_or_default()),
        };
        if plan.fail_create {
            return Err(UnitError::Creation {
                accelerator: request.accelerator.to_string(),
                detail: format!("injected creation failure for slot {}", request.index),
            });
        }
        let unit = SyntheticUnit::build(
            request,
            Arc::clone(&self.signature),
            plan,
            self.probe.clone(),
        )?;
        Ok(Box::new(unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_manager::MemoryBudget;

    fn request(pool: &MemoryPool, index: usize) -> UnitRequest<'_> {
        UnitRequest {
            index,
            class: DeviceClass::Fast,
            accelerator: "cpu",
            num_threads: 1,
            pool,
        }
    }

    fn single_io() -> ModelSignature {
        ModelSignature::new(
            "single",
            vec![TensorSpec::new("x", DType::U8, Shape::matrix(1, 4))],
            vec![TensorSpec::new("y", DType::U8, Shape::matrix(1, 6))],
        )
        .unwrap()
    }

    #[test]
    fn test_transform_is_per_sample() {
        let a = transform(&[&[1, 2, 3, 4]], 0, 6);
        assert_eq!(a, vec![2, 3, 4, 5, 2, 3]);
        let b = transform(&[&[1, 2, 3, 4]], 1, 2);
        assert_eq!(b, vec![3, 4]);
        let c = transform(&[&[250], &[10, 20]], 0, 2);
        assert_eq!(c, vec![250u8.wrapping_add(10).wrapping_add(1), 250u8.wrapping_add(20).wrapping_add(1)]);
    }

    #[test]
    fn test_unit_created_at_native_shape() {
        let pool = MemoryPool::new(MemoryBudget::from_mb(1));
        let factory = SyntheticFactory::new(single_io());
        let unit = factory.create_unit(&request(&pool, 0)).unwrap();
        assert_eq!(unit.inputs()[0].spec().batch(), 1);
        assert_eq!(unit.outputs()[0].as_slice().len(), 6);
        assert_eq!(pool.allocated_bytes(), 10);
    }

    #[test]
    fn test_invoke_batched() {
        let pool = MemoryPool::new(MemoryBudget::from_mb(1));
        let factory = SyntheticFactory::new(single_io());
        let mut unit = factory.create_unit(&request(&pool, 0)).unwrap();
        unit.allocate(&[Shape::matrix(2, 4)]).unwrap();
        unit.get_buffer(TensorId::Input(0))
            .unwrap()
            .as_mut_slice()
            .copy_from_slice(&[1, 1, 1, 1, 9, 9, 9, 9]);
        unit.invoke().unwrap();
        let out = unit.outputs()[0].as_slice();
        assert_eq!(&out[..6], &[2; 6]);
        assert_eq!(&out[6..], &[10; 6]);
    }

    #[test]
    fn test_injected_allocate_failure() {
        let pool = MemoryPool::new(MemoryBudget::from_mb(1));
        let factory =
            SyntheticFactory::new(single_io()).with_fault(0, FaultPlan::none().fail_allocate_on(1));
        let mut unit = factory.create_unit(&request(&pool, 0)).unwrap();
        let err = unit.allocate(&[Shape::matrix(2, 4)]).unwrap_err();
        assert!(matches!(err, UnitError::Allocation(_)));
        unit.allocate(&[Shape::matrix(2, 4)]).unwrap();
    }

    #[test]
    fn test_injected_invoke_failure() {
        let pool = MemoryPool::new(MemoryBudget::from_mb(1));
        let factory =
            SyntheticFactory::new(single_io()).with_fault(0, FaultPlan::none().fail_invoke_on(2));
        let mut unit = factory.create_unit(&request(&pool, 0)).unwrap();
        unit.invoke().unwrap();
        assert!(matches!(unit.invoke(), Err(UnitError::InvokeFailed { .. })));
        unit.invoke().unwrap();
    }

    #[test]
    fn test_rejected_accelerator() {
        let pool = MemoryPool::new(MemoryBudget::from_mb(1));
        let factory = SyntheticFactory::new(single_io()).reject_accelerator("npu");
        let mut req = request(&pool, 0);
        req.accelerator = "npu";
        assert!(matches!(
            factory.create_unit(&req),
            Err(UnitError::Creation { .. })
        ));
    }

    #[test]
    fn test_shape_count_checked() {
        let pool = MemoryPool::new(MemoryBudget::from_mb(1));
        let factory = SyntheticFactory::new(single_io());
        let mut unit = factory.create_unit(&request(&pool, 0)).unwrap();
        let err = unit.allocate(&[]).unwrap_err();
        assert!(matches!(err, UnitError::ShapeCount { expected: 1, actual: 0, .. }));
    }

    #[test]
    fn test_unknown_tensor() {
        let pool = MemoryPool::new(MemoryBudget::from_mb(1));
        let factory = SyntheticFactory::new(single_io());
        let mut unit = factory.create_unit(&request(&pool, 0)).unwrap();
        assert!(unit.get_buffer(TensorId::Output(3)).is_err());
    }

    #[test]
    fn test_probe_counts() {
        let pool = MemoryPool::new(MemoryBudget::from_mb(1));
        let probe = Probe::new();
        let factory = SyntheticFactory::new(single_io()).with_probe(Arc::clone(&probe));
        let mut unit = factory.create_unit(&request(&pool, 3)).unwrap();
        unit.invoke().unwrap();
        assert_eq!(probe.invocations(), 1);
        assert_eq!(probe.peak_in_flight(), 1);
        assert_eq!(probe.in_flight(), 0);
        assert_eq!(
            probe.events(),
            vec![
                ProbeEvent { unit: 3, kind: ProbeEventKind::Started },
                ProbeEvent { unit: 3, kind: ProbeEventKind::Finished },
            ]
        );
    }

    #[test]
    fn test_demo_signature_valid() {
        demo_signature().validate().unwrap();
    }
}
