// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`AdmissionPolicy`] trait and policy implementations.

pub mod fast_first;
pub mod weighted;

use exec_unit::DeviceClass;

use crate::{FastFirst, PlannerError, SlotPlan, WeightedRoundRobin};

/// Chooses the slot class for the next pending sample.
///
/// The scheduler calls [`choose`](AdmissionPolicy::choose) once per
/// admission with the free-slot state of each class. Returning `None` means
/// nothing may be admitted right now. Policies may keep state across calls
/// within a batch; [`reset`](AdmissionPolicy::reset) is called at the start
/// of every batch.
pub trait AdmissionPolicy: Send {
    /// Human-readable name of this policy.
    fn name(&self) -> &str;

    /// Picks a class among those with a free slot.
    fn choose(&mut self, fast_free: bool, slow_free: bool) -> Option<DeviceClass>;

    /// Clears per-batch state.
    fn reset(&mut self) {}
}

/// Builds a policy from its configuration name.
///
/// `"weighted-round-robin"` uses the slot counts of `plan` as its weights.
pub fn from_name(name: &str, plan: &SlotPlan) -> Result<Box<dyn AdmissionPolicy>, PlannerError> {
    match name {
        "fast-first" => Ok(Box::new(FastFirst)),
        "weighted-round-robin" | "wrr" => Ok(Box::new(WeightedRoundRobin::new(
            plan.fast_slots,
            plan.slow_slots,
        )?)),
        other => Err(PlannerError::UnknownPolicy(other.to_string())),
    }
}

/// Names accepted by [`from_name`].
pub const POLICY_NAMES: &[&str] = &["fast-first", "weighted-round-robin"];
