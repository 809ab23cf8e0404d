// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Owned buffer handle that returns memory to the pool on drop.
//!
//! A [`BufferGuard`] is the unit of ownership transfer in the scheduler: an
//! accumulated shard buffer is *moved* into an execution unit's binding, and
//! an execution unit is moved into an in-flight invocation together with its
//! bindings. Whoever holds the guard is the only party that can touch the
//! bytes.

use crate::pool::PoolInner;
use crate::MemoryError;
use std::sync::Arc;

/// An owned, pool-accounted byte buffer.
///
/// # Example
/// ```ignore
/// let mut guard = pool.allocate(1024)?;
/// guard.write_at(0, &sample)?;   // fill
/// unit_binding.rebind(guard);    // ownership moves; no copy
/// ```
pub struct BufferGuard {
    /// Wrapped in `Option` so `drop()` can take it.
    data: Option<Vec<u8>>,
    pool: Arc<PoolInner>,
    size_bytes: usize,
}

impl BufferGuard {
    pub(crate) fn new(data: Vec<u8>, pool: Arc<PoolInner>, size_bytes: usize) -> Self {
        Self {
            data: Some(data),
            pool,
            size_bytes,
        }
    }

    /// Returns an immutable view of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Returns a mutable view of the buffer.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or(&mut [])
    }

    /// Returns the size of this allocation in bytes.
    pub fn len(&self) -> usize {
        self.size_bytes
    }

    /// Returns `true` for an empty buffer. Pools never hand these out.
    pub fn is_empty(&self) -> bool {
        self.size_bytes == 0
    }

    /// Copies `bytes` into the buffer starting at `offset`.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<(), MemoryError> {
        let range = self.checked_range(offset, bytes.len())?;
        self.as_mut_slice()[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Returns the `len` bytes starting at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8], MemoryError> {
        let range = self.checked_range(offset, len)?;
        Ok(&self.as_slice()[range])
    }

    fn checked_range(&self, offset: usize, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let end = offset.saturating_add(len);
        if end > self.size_bytes {
            return Err(MemoryError::OutOfBounds {
                offset,
                end,
                len: self.size_bytes,
            });
        }
        Ok(offset..end)
    }
}

impl Drop for BufferGuard {
    fn drop(&mut self) {
        if let Some(buffer) = self.data.take() {
            self.pool.return_buffer(buffer, self.size_bytes);
        }
    }
}

impl std::fmt::Debug for BufferGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferGuard")
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::{MemoryBudget, MemoryError, MemoryPool};

    #[test]
    fn test_write_and_slice() {
        let pool = MemoryPool::new(MemoryBudget::from_mb(1));
        let mut g = pool.allocate(8).unwrap();

        g.write_at(4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(g.slice(4, 4).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(g.slice(0, 4).unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_out_of_bounds() {
        let pool = MemoryPool::new(MemoryBudget::from_mb(1));
        let mut g = pool.allocate(8).unwrap();

        assert!(matches!(
            g.write_at(6, &[0; 4]),
            Err(MemoryError::OutOfBounds { offset: 6, end: 10, len: 8 })
        ));
        assert!(g.slice(9, 0).is_err());
        assert!(g.slice(8, 0).unwrap().is_empty());
    }

    #[test]
    fn test_guard_moves_across_threads() {
        let pool = MemoryPool::new(MemoryBudget::from_mb(1));
        let mut g = pool.allocate(16).unwrap();
        g.write_at(0, &[5; 16]).unwrap();

        let handle = std::thread::spawn(move || g.as_slice().iter().map(|&b| b as u32).sum::<u32>());
        assert_eq!(handle.join().unwrap(), 80);
        assert_eq!(pool.allocated_bytes(), 0);
    }
}
