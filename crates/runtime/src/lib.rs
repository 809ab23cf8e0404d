// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! The batch-sharded execution engine behind the `shard-rt` backend.
//!
//! The runtime takes:
//! - A [`UnitFactory`](exec_unit::UnitFactory) that builds execution units
//!   for one model signature.
//! - A [`BackendConfig`] (batch size, shard override, slot plan, mode).
//! - A [`HostContext`] that admits one active backend at a time.
//!
//! And accepts per-sample inputs, runs the batch across a fixed pool of
//! units, and hands back per-sample outputs keyed by batch index.
//!
//! # Execution modes
//! ```text
//! Sharded:   set_input ─▶ BatchAccumulator ─▶ finalize ─▶ shard 0 inline ┐
//!                                                         shards 1..K ───┴▶ join
//! Pipelined: set_input ─▶ staging ─▶ admit ─▶ slots ─▶ completion ─▶ refill
//! ```
//! Both modes report through the same [`Scoreboard`]; a batch succeeds only
//! when every entry is copied.
//!
//! # Example
//! ```
//! use exec_unit::synthetic::{demo_signature, SyntheticFactory};
//! use runtime::{Backend, BackendConfig, HostContext};
//!
//! let ctx = HostContext::new();
//! let factory = SyntheticFactory::new(demo_signature());
//! let config = BackendConfig { batch_size: 2, ..BackendConfig::default() };
//! let mut backend = Backend::create(&ctx, &factory, config).unwrap();
//!
//! for i in 0..2 {
//!     assert!(backend.set_input(i, 0, &[1u8; 192]).is_success());
//!     assert!(backend.set_input(i, 1, &[0u8; 8]).is_success());
//! }
//! assert!(backend.issue_query().is_success());
//! assert_eq!(backend.get_output(1, 0).unwrap().len(), 40);
//! ```

mod accumulator;
mod backend;
mod collator;
mod config;
mod context;
mod error;
mod metrics;
mod pool;
mod scheduler;
mod scoreboard;
mod sharded;
mod slot;
mod status;

pub use accumulator::BatchAccumulator;
pub use backend::{Backend, BatchPhase, DataInfo};
pub use collator::OutputCollator;
pub use config::{BackendConfig, ExecutionMode, CPU_ACCELERATOR};
pub use context::{ActiveLease, HostContext};
pub use error::RuntimeError;
pub use metrics::{BatchMetrics, DispatchEvent, UnitTiming};
pub use pool::{PoolRequest, ResourcePool};
pub use scoreboard::{Entry, Scoreboard};
pub use slot::{Slot, SlotState};
pub use status::Status;
