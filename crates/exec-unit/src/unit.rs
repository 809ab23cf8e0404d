// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The execution-unit capability and its supporting types.

use std::fmt;

use memory_manager::{BufferGuard, MemoryPool};
use tensor_core::{Shape, TensorSpec};

use crate::{ModelSignature, UnitError};

/// Addresses one tensor bound inside an execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorId {
    /// The n-th model input.
    Input(usize),
    /// The n-th model output.
    Output(usize),
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorId::Input(i) => write!(f, "input#{i}"),
            TensorId::Output(i) => write!(f, "output#{i}"),
        }
    }
}

/// Speed class of a pool slot.
///
/// Pipelined mode partitions the pool into a fast class (accelerator
/// contexts) and a slow class (e.g. DSP contexts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Fast,
    Slow,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Fast => write!(f, "fast"),
            DeviceClass::Slow => write!(f, "slow"),
        }
    }
}

/// A tensor slot inside an execution unit.
///
/// Holds the tensor's current [`TensorSpec`] and the storage the unit reads
/// from (inputs) or writes to (outputs). Storage can be swapped with
/// [`rebind`](BoundBuffer::rebind) so a fully accumulated shard buffer is
/// handed to the unit without a copy.
#[derive(Debug)]
pub struct BoundBuffer {
    spec: TensorSpec,
    storage: Option<BufferGuard>,
}

impl BoundBuffer {
    /// Creates an unallocated binding.
    pub fn new(spec: TensorSpec) -> Self {
        Self {
            spec,
            storage: None,
        }
    }

    /// Replaces the spec and allocates fresh zeroed storage for it.
    ///
    /// The previous storage, if any, returns to its pool first so a resize
    /// does not hold both buffers against the budget.
    pub fn allocate(&mut self, pool: &MemoryPool, spec: TensorSpec) -> Result<(), UnitError> {
        self.storage = None;
        let size = spec.size_bytes();
        self.spec = spec;
        self.storage = Some(pool.allocate(size)?);
        Ok(())
    }

    /// Swaps in caller-owned storage, returning the previous storage.
    ///
    /// Fails without touching the binding if `storage` does not match the
    /// spec's byte size.
    pub fn rebind(&mut self, storage: BufferGuard) -> Result<Option<BufferGuard>, UnitError> {
        let expected = self.spec.size_bytes();
        if storage.len() != expected {
            return Err(UnitError::BindSize {
                tensor: self.spec.name.clone(),
                expected,
                actual: storage.len(),
            });
        }
        Ok(self.storage.replace(storage))
    }

    /// Returns the tensor's current spec.
    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    /// Returns `true` once storage is bound.
    pub fn is_allocated(&self) -> bool {
        self.storage.is_some()
    }

    /// Returns the bound bytes, or an empty slice if unallocated.
    pub fn as_slice(&self) -> &[u8] {
        match self.storage.as_ref() {
            Some(g) => g.as_slice(),
            None => &[],
        }
    }

    /// Returns the bound bytes mutably, or an empty slice if unallocated.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self.storage.as_mut() {
            Some(g) => g.as_mut_slice(),
            None => &mut [],
        }
    }
}

/// The capability a batch scheduler needs from one model replica or
/// hardware execution context.
///
/// Implementations must be [`Send`]: the scheduler moves units onto worker
/// threads for each invocation. A unit is only ever driven by one thread at
/// a time.
pub trait ExecutionUnit: Send {
    /// Human-readable identifier used in logs and errors.
    fn label(&self) -> &str;

    /// Speed class this unit was created for.
    fn device_class(&self) -> DeviceClass;

    /// Input bindings in index order.
    fn inputs(&self) -> &[BoundBuffer];

    /// Output bindings in index order.
    fn outputs(&self) -> &[BoundBuffer];

    /// Resizes inputs to `input_shapes` and (re)allocates every bound tensor.
    ///
    /// Output shapes are derived by the unit. Any previously bound storage is
    /// released.
    fn allocate(&mut self, input_shapes: &[Shape]) -> Result<(), UnitError>;

    /// Mutable access to one binding.
    fn get_buffer(&mut self, tensor: TensorId) -> Result<&mut BoundBuffer, UnitError>;

    /// Runs the model over the currently bound inputs, filling the outputs.
    fn invoke(&mut self) -> Result<(), UnitError>;
}

/// Everything a factory is told when asked for one pool slot.
#[derive(Debug, Clone, Copy)]
pub struct UnitRequest<'a> {
    /// Slot index within the pool.
    pub index: usize,
    /// Speed class of the slot.
    pub class: DeviceClass,
    /// Accelerator name requested by the configuration.
    pub accelerator: &'a str,
    /// Intra-op thread count hint.
    pub num_threads: usize,
    /// Pool every tensor buffer must be drawn from.
    pub pool: &'a MemoryPool,
}

/// Builds execution units for a resource pool.
///
/// Returning [`UnitError::Creation`] for an accelerator lets the caller fall
/// back to `"cpu"`.
pub trait UnitFactory: Send + Sync {
    /// The signature every unit produced by this factory serves.
    fn signature(&self) -> &ModelSignature;

    /// Builds one unit with its tensors allocated at their native shapes.
    fn create_unit(&self, request: &UnitRequest<'_>) -> Result<Box<dyn ExecutionUnit>, UnitError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use memory_manager::MemoryBudget;
    use tensor_core::DType;

    fn pool() -> MemoryPool {
        MemoryPool::new(MemoryBudget::from_mb(1))
    }

    #[test]
    fn test_tensor_id_display() {
        assert_eq!(TensorId::Input(2).to_string(), "input#2");
        assert_eq!(TensorId::Output(0).to_string(), "output#0");
    }

    #[test]
    fn test_unallocated_binding() {
        let mut b = BoundBuffer::new(TensorSpec::new("x", DType::U8, Shape::matrix(2, 4)));
        assert!(!b.is_allocated());
        assert!(b.as_slice().is_empty());
        assert!(b.as_mut_slice().is_empty());
    }

    #[test]
    fn test_allocate_resizes() {
        let pool = pool();
        let spec = TensorSpec::new("x", DType::F32, Shape::matrix(1, 4));
        let mut b = BoundBuffer::new(spec.clone());
        b.allocate(&pool, spec.clone()).unwrap();
        assert_eq!(b.as_slice().len(), 16);

        b.allocate(&pool, spec.with_batch(3).unwrap()).unwrap();
        assert_eq!(b.as_slice().len(), 48);
        assert_eq!(b.spec().batch(), 3);
        assert_eq!(pool.allocated_bytes(), 48);
    }

    #[test]
    fn test_rebind_swaps_storage() {
        let pool = pool();
        let spec = TensorSpec::new("x", DType::U8, Shape::matrix(2, 3));
        let mut b = BoundBuffer::new(spec.clone());
        b.allocate(&pool, spec).unwrap();

        let mut fresh = pool.allocate(6).unwrap();
        fresh.write_at(0, &[1, 2, 3, 4, 5, 6]).unwrap();
        let old = b.rebind(fresh).unwrap();
        assert!(old.is_some());
        assert_eq!(b.as_slice(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_rebind_wrong_size_rejected() {
        let pool = pool();
        let spec = TensorSpec::new("x", DType::U8, Shape::matrix(2, 3));
        let mut b = BoundBuffer::new(spec.clone());
        b.allocate(&pool, spec).unwrap();

        let wrong = pool.allocate(5).unwrap();
        let err = b.rebind(wrong).unwrap_err();
        assert!(matches!(err, UnitError::BindSize { expected: 6, actual: 5, .. }));
        assert_eq!(b.as_slice().len(), 6);
    }

    #[test]
    fn test_device_class_serde() {
        let json = serde_json::to_string(&DeviceClass::Slow).unwrap();
        assert_eq!(json, "\"slow\"");
    }
}
