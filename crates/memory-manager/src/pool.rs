// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Budgeted buffer pool.
//!
//! The [`MemoryPool`] hands out every byte region a backend touches during a
//! batch. It:
//!
//! 1. Enforces a hard ceiling: allocations that would exceed the budget
//!    return `Err(OutOfMemory)`, which the runtime treats as fatal for the
//!    whole batch.
//! 2. Keeps returned buffers in a free list binned by size class, so the
//!    per-batch shard buffers are recycled instead of re-allocated.
//! 3. Hands back zeroed memory, including on reuse, so no bytes from a
//!    previous batch can leak into the next one.
//!
//! # Thread Safety
//! `MemoryPool` is `Send + Sync` and cheap to clone: clones share the same
//! budget and free list. Shard finalization tasks running on worker threads
//! allocate through their own clone.

use crate::{AllocationStats, BufferGuard, MemoryBudget, MemoryError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Minimum size class: 4 KB. Anything smaller is rounded up.
const MIN_SIZE_CLASS: usize = 4096;

/// Shared pool state. Buffer guards hold an `Arc` to it so they can return
/// memory without a reference to the [`MemoryPool`] handle.
pub struct PoolInner {
    budget: MemoryBudget,
    /// Live bytes (handed out, not yet returned).
    allocated_bytes: AtomicUsize,
    /// size_class → recycled buffers.
    free_buffers: Mutex<HashMap<usize, Vec<Vec<u8>>>>,
    free_list_bytes: AtomicUsize,
    stats: Mutex<AllocationStats>,
}

impl PoolInner {
    /// Called by `BufferGuard::drop` to return a buffer to the free list.
    pub(crate) fn return_buffer(&self, buffer: Vec<u8>, size_bytes: usize) {
        self.allocated_bytes.fetch_sub(size_bytes, Ordering::AcqRel);

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_return();
        }

        let size_class = size_class_for(size_bytes);
        self.free_list_bytes.fetch_add(buffer.capacity(), Ordering::AcqRel);
        if let Ok(mut free) = self.free_buffers.lock() {
            free.entry(size_class).or_default().push(buffer);
        }
    }

    /// Pops a recycled buffer for `size_bytes`, zeroed and truncated to size.
    fn take_recycled(&self, size_bytes: usize) -> Option<Vec<u8>> {
        let size_class = size_class_for(size_bytes);
        let mut free = self.free_buffers.lock().ok()?;
        let mut buf = free.get_mut(&size_class)?.pop()?;
        self.free_list_bytes
            .fetch_sub(buf.capacity(), Ordering::AcqRel);
        buf.clear();
        buf.resize(size_bytes, 0);
        Some(buf)
    }
}

/// The allocator for shard, binding and output buffers.
///
/// # Example
/// ```
/// use memory_manager::{MemoryPool, MemoryBudget};
///
/// let pool = MemoryPool::new(MemoryBudget::from_mb(1));
/// let guard = pool.allocate(1024).unwrap();
/// assert_eq!(pool.allocated_bytes(), 1024);
///
/// drop(guard);
/// assert_eq!(pool.allocated_bytes(), 0);
/// ```
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    /// Creates a new memory pool with the given budget.
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                budget,
                allocated_bytes: AtomicUsize::new(0),
                free_buffers: Mutex::new(HashMap::new()),
                free_list_bytes: AtomicUsize::new(0),
                stats: Mutex::new(AllocationStats::default()),
            }),
        }
    }

    /// Allocates a zeroed buffer of `size_bytes`.
    ///
    /// Returns `Err(OutOfMemory)` if the allocation would exceed the budget.
    /// A recycled buffer of the same size class is reused when available.
    pub fn allocate(&self, size_bytes: usize) -> Result<BufferGuard, MemoryError> {
        if size_bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        self.reserve(size_bytes)?;

        let recycled = self.inner.take_recycled(size_bytes);
        let is_hit = recycled.is_some();
        let data = recycled.unwrap_or_else(|| vec![0u8; size_bytes]);

        if let Ok(mut stats) = self.inner.stats.lock() {
            stats.record_grant(is_hit, self.inner.allocated_bytes.load(Ordering::Acquire));
        }

        Ok(BufferGuard::new(data, Arc::clone(&self.inner), size_bytes))
    }

    /// Allocates a buffer holding a copy of `bytes`.
    pub fn allocate_copy(&self, bytes: &[u8]) -> Result<BufferGuard, MemoryError> {
        let mut guard = self.allocate(bytes.len())?;
        guard.as_mut_slice().copy_from_slice(bytes);
        Ok(guard)
    }

    /// Grows `guard` to `new_size` bytes, preserving its current contents as
    /// a prefix. The tail is zeroed.
    ///
    /// The replacement is allocated before the old buffer is released, so
    /// for a moment both count against the budget. On failure the old
    /// buffer is dropped with the error; callers treat that as fatal.
    pub fn grow(&self, guard: BufferGuard, new_size: usize) -> Result<BufferGuard, MemoryError> {
        let current = guard.len();
        if new_size < current {
            return Err(MemoryError::InvalidGrow {
                current,
                requested: new_size,
            });
        }
        if new_size == current {
            return Ok(guard);
        }

        let mut grown = self.allocate(new_size)?;
        grown.as_mut_slice()[..current].copy_from_slice(guard.as_slice());
        drop(guard);

        if let Ok(mut stats) = self.inner.stats.lock() {
            stats.record_grow();
        }
        Ok(grown)
    }

    /// Returns the number of bytes currently allocated (live, not yet returned).
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated_bytes.load(Ordering::Acquire)
    }

    /// Returns the number of bytes remaining before hitting the budget.
    pub fn available_bytes(&self) -> usize {
        self.inner
            .budget
            .as_bytes()
            .saturating_sub(self.allocated_bytes())
    }

    /// Returns the memory budget.
    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    /// Returns a snapshot of allocation statistics.
    pub fn stats(&self) -> AllocationStats {
        self.inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Drops every recycled buffer in the free list. Live buffers are
    /// unaffected.
    pub fn shrink(&self) {
        if let Ok(mut free) = self.inner.free_buffers.lock() {
            free.clear();
            self.inner.free_list_bytes.store(0, Ordering::Release);
        }
    }

    /// Returns the approximate number of bytes held in the free list.
    pub fn free_list_bytes(&self) -> usize {
        self.inner.free_list_bytes.load(Ordering::Acquire)
    }

    /// Atomically claims `size_bytes` of budget or reports OOM.
    fn reserve(&self, size_bytes: usize) -> Result<(), MemoryError> {
        let budget = self.inner.budget.as_bytes();
        let claimed = self.inner.allocated_bytes.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |current| {
                current
                    .checked_add(size_bytes)
                    .filter(|&next| next <= budget)
            },
        );

        claimed.map(|_| ()).map_err(|current| {
            if let Ok(mut stats) = self.inner.stats.lock() {
                stats.record_rejected();
            }
            MemoryError::OutOfMemory {
                requested_bytes: size_bytes,
                available_bytes: budget.saturating_sub(current),
                budget_bytes: budget,
            }
        })
    }
}

/// Computes the size class for a given allocation size: the smallest power
/// of 2 that is ≥ `size` and ≥ `MIN_SIZE_CLASS`.
fn size_class_for(size: usize) -> usize {
    size.max(MIN_SIZE_CLASS).next_power_of_two()
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("budget", &self.inner.budget)
            .field("allocated_bytes", &self.allocated_bytes())
            .field("available_bytes", &self.available_bytes())
            .finish()
    }
}
