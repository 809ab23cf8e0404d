// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Batch profiling metrics.
//!
//! [`BatchMetrics`] records timing, throughput, slot occupancy and the
//! dispatch trace of the last batch. The trace is the primary tool for
//! checking refill order in pipelined mode.

use std::time::Duration;

use exec_unit::DeviceClass;

use crate::ExecutionMode;

/// One dispatch event, in the order the scheduler observed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum DispatchEvent {
    /// Work starting at `sample` was handed to `slot` (a shard in sharded
    /// mode).
    Submitted { slot: usize, sample: usize },
    /// The output of `sample` was copied out of `slot`.
    Completed { slot: usize, sample: usize },
}

/// Timing of a single invocation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UnitTiming {
    pub slot: usize,
    pub class: DeviceClass,
    /// Samples carried by the invocation.
    pub samples: usize,
    pub invoke_duration: Duration,
}

/// Metrics for one batch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchMetrics {
    pub mode: ExecutionMode,
    pub batch_size: usize,
    /// Wall-clock time of `issue_query`.
    pub total_duration: Duration,
    /// Time spent resizing and rebinding shard tensors.
    pub finalize_duration: Duration,
    /// Highest pool allocation seen by the end of the batch.
    pub peak_memory_bytes: usize,
    /// Highest number of simultaneously occupied slots.
    pub peak_occupancy: usize,
    pub invocations: Vec<UnitTiming>,
    pub trace: Vec<DispatchEvent>,
}

impl BatchMetrics {
    pub fn new(mode: ExecutionMode, batch_size: usize) -> Self {
        Self {
            mode,
            batch_size,
            total_duration: Duration::ZERO,
            finalize_duration: Duration::ZERO,
            peak_memory_bytes: 0,
            peak_occupancy: 0,
            invocations: Vec::new(),
            trace: Vec::new(),
        }
    }

    /// Records a submission while `occupied` slots (including this one) are busy.
    pub fn record_submit(&mut self, slot: usize, sample: usize, occupied: usize) {
        self.peak_occupancy = self.peak_occupancy.max(occupied);
        self.trace.push(DispatchEvent::Submitted { slot, sample });
    }

    pub fn record_completion(
        &mut self,
        slot: usize,
        sample: usize,
        class: DeviceClass,
        samples: usize,
        invoke_duration: Duration,
    ) {
        self.trace.push(DispatchEvent::Completed { slot, sample });
        self.invocations.push(UnitTiming {
            slot,
            class,
            samples,
            invoke_duration,
        });
    }

    pub fn add_finalize(&mut self, d: Duration) {
        self.finalize_duration += d;
    }

    /// Finalises metrics with the total wall-clock time and peak memory.
    pub fn finalise(&mut self, total: Duration, peak_memory_bytes: usize) {
        self.total_duration = total;
        self.peak_memory_bytes = peak_memory_bytes;
    }

    /// Samples in submission order.
    pub fn submission_order(&self) -> Vec<usize> {
        self.trace
            .iter()
            .filter_map(|e| match e {
                DispatchEvent::Submitted { sample, .. } => Some(*sample),
                DispatchEvent::Completed { .. } => None,
            })
            .collect()
    }

    /// Samples in completion order.
    pub fn completion_order(&self) -> Vec<usize> {
        self.trace
            .iter()
            .filter_map(|e| match e {
                DispatchEvent::Completed { sample, .. } => Some(*sample),
                DispatchEvent::Submitted { .. } => None,
            })
            .collect()
    }

    /// Total time spent inside invocations, summed across slots.
    pub fn total_invoke_duration(&self) -> Duration {
        self.invocations.iter().map(|t| t.invoke_duration).sum()
    }

    /// Returns samples per second throughput.
    pub fn samples_per_second(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs <= 0.0 || self.batch_size == 0 {
            return 0.0;
        }
        self.batch_size as f64 / secs
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        let peak_mb = self.peak_memory_bytes as f64 / (1024.0 * 1024.0);
        let by_class = |class| {
            self.invocations
                .iter()
                .filter(|t| t.class == class)
                .map(|t| t.samples)
                .sum::<usize>()
        };
        format!(
            "Batch ({}): {} samples in {:.2}ms ({:.1} samples/s), \
             {} invocations, {:.2}ms invoke, {:.2}ms finalize, \
             fast/slow samples {}/{}, peak occupancy {}, peak {:.2} MB",
            self.mode,
            self.batch_size,
            self.total_duration.as_secs_f64() * 1000.0,
            self.samples_per_second(),
            self.invocations.len(),
            self.total_invoke_duration().as_secs_f64() * 1000.0,
            self.finalize_duration.as_secs_f64() * 1000.0,
            by_class(DeviceClass::Fast),
            by_class(DeviceClass::Slow),
            self.peak_occupancy,
            peak_mb,
        )
    }
}
