// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # shard-planner
//!
//! Pure planning for batched execution: no threads, no buffers.
//!
//! - [`BatchLayout`] splits a batch of `N` samples into `K` equal shards of
//!   `real_batch_size = N / K` and maps global sample indices to
//!   `(shard, local index)`.
//! - [`SlotPlan`] describes a heterogeneous slot pool: `P` fast-class slots
//!   followed by `Q` slow-class slots.
//! - [`AdmissionPolicy`] decides which class of free slot the next pending
//!   sample goes to. The pending queue itself is always drained in FIFO
//!   order; a policy only picks the slot class.
//!
//! # Policies
//!
//! | Policy | Behaviour |
//! |---|---|
//! | [`FastFirst`] | Fill free fast slots first, slow slots only when no fast slot is free |
//! | [`WeightedRoundRobin`] | Alternate classes in a `fast:slow` ratio, falling back to the other class when the preferred one is full |
//!
//! # Example
//! ```
//! use shard_planner::BatchLayout;
//!
//! let layout = BatchLayout::resolve(8, None).unwrap();
//! assert_eq!(layout.shard_count(), 2);
//! assert_eq!(layout.real_batch_size(), 4);
//! assert_eq!(layout.locate(5).unwrap(), (1, 1));
//! ```

pub mod admission;
mod error;
mod layout;
mod slots;

pub use admission::fast_first::FastFirst;
pub use admission::weighted::WeightedRoundRobin;
pub use admission::AdmissionPolicy;
pub use error::PlannerError;
pub use layout::BatchLayout;
pub use slots::SlotPlan;
