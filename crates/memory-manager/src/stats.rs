// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Buffer accounting for a [`MemoryPool`](crate::MemoryPool).
//!
//! Shard and staging buffers are recycled batch after batch, so a warm
//! backend reuses nearly every request and grows each shard input once per
//! batch.

/// Counters sampled by [`MemoryPool::stats`](crate::MemoryPool::stats).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct AllocationStats {
    /// Requests served from the free list.
    pub reused: u64,
    /// Requests that needed a fresh buffer.
    pub fresh: u64,
    /// Requests refused by the budget.
    pub rejected: u64,
    /// Buffers grown by [`MemoryPool::grow`](crate::MemoryPool::grow).
    pub grows: u64,
    /// Buffers handed back by a dropped guard.
    pub returned: u64,
    /// High-water mark of live bytes.
    pub peak_allocated_bytes: usize,
}

impl AllocationStats {
    /// Requests that were granted.
    pub fn granted(&self) -> u64 {
        self.reused + self.fresh
    }

    /// Fraction of granted requests served from the free list.
    pub fn reuse_ratio(&self) -> f64 {
        match self.granted() {
            0 => 0.0,
            n => self.reused as f64 / n as f64,
        }
    }

    /// Guards still alive, assuming every return came from a granted request.
    pub fn outstanding(&self) -> u64 {
        self.granted().saturating_sub(self.returned)
    }

    pub(crate) fn record_grant(&mut self, reused: bool, live_bytes: usize) {
        if reused {
            self.reused += 1;
        } else {
            self.fresh += 1;
        }
        self.peak_allocated_bytes = self.peak_allocated_bytes.max(live_bytes);
    }

    pub(crate) fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    pub(crate) fn record_return(&mut self) {
        self.returned += 1;
    }

    pub(crate) fn record_grow(&mut self) {
        self.grows += 1;
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{} buffers ({:.0}% reused), {} grown, {} rejected, {} outstanding, peak {:.2} MB",
            self.granted(),
            self.reuse_ratio() * 100.0,
            self.grows,
            self.rejected,
            self.outstanding(),
            self.peak_allocated_bytes as f64 / (1024.0 * 1024.0),
        )
    }
}
