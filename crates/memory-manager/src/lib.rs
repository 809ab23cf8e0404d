// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! A budget-enforced buffer pool for the byte regions a batch scheduler
//! moves around: per-shard accumulation buffers, tensors bound inside
//! execution units, and collated output areas.
//!
//! # Key Components
//!
//! - [`MemoryBudget`]: a hard memory ceiling with human-readable parsing
//!   (`"256M"`, `"1G"`, etc.).
//! - [`MemoryPool`]: the allocator: enforces the budget, keeps a free list
//!   binned by size class, and tracks statistics. Cloning a pool yields
//!   another handle to the same budget.
//! - [`BufferGuard`]: an owned, movable buffer. Moving a guard is how a
//!   buffer changes hands (accumulator → execution unit → back to the pool);
//!   dropping it returns the memory.
//! - [`AllocationStats`]: buffer accounting (reuse ratio, grows, budget
//!   rejections, outstanding guards, peak bytes).
//!
//! # Ownership Model
//!
//! ```text
//! MemoryPool::allocate(size) ──► BufferGuard ──move──► ExecutionUnit binding
//!                                     │
//!                     MemoryPool::grow(guard, n)  (copy prefix, drop old)
//!                                     │
//!                                  drop()
//!                                     ▼
//!                         PoolInner::return_buffer() ──► free list
//! ```
//!
//! # Example
//! ```
//! use memory_manager::{MemoryPool, MemoryBudget};
//!
//! let pool = MemoryPool::new(MemoryBudget::from_mb(4));
//!
//! // One sample arrives: size the buffer for one sample.
//! let mut shard = pool.allocate(64).unwrap();
//! shard.write_at(0, &[7u8; 64]).unwrap();
//!
//! // A second sample arrives: grow to the full shard.
//! let shard = pool.grow(shard, 4 * 64).unwrap();
//! assert_eq!(shard.len(), 256);
//! assert_eq!(shard.as_slice()[0], 7);
//! assert_eq!(pool.allocated_bytes(), 256);
//! ```

mod budget;
mod error;
mod guard;
pub mod pool;
mod stats;

pub use budget::MemoryBudget;
pub use error::MemoryError;
pub use guard::BufferGuard;
pub use pool::MemoryPool;
pub use stats::AllocationStats;
