// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Heterogeneous slot pool description.

use exec_unit::DeviceClass;

use crate::PlannerError;

/// `fast_slots` fast-class slots at indices `0..P`, followed by
/// `slow_slots` slow-class slots at `P..P+Q`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SlotPlan {
    pub fast_slots: usize,
    pub slow_slots: usize,
}

impl SlotPlan {
    pub fn new(fast_slots: usize, slow_slots: usize) -> Result<Self, PlannerError> {
        let plan = Self {
            fast_slots,
            slow_slots,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.fast_slots == 0 {
            return Err(PlannerError::NoFastSlots);
        }
        Ok(())
    }

    /// Total slot count.
    pub fn total(&self) -> usize {
        self.fast_slots + self.slow_slots
    }

    /// Class of slot `index`.
    pub fn class_of(&self, index: usize) -> DeviceClass {
        if index < self.fast_slots {
            DeviceClass::Fast
        } else {
            DeviceClass::Slow
        }
    }

    /// Slot count of one class.
    pub fn count(&self, class: DeviceClass) -> usize {
        match class {
            DeviceClass::Fast => self.fast_slots,
            DeviceClass::Slow => self.slow_slots,
        }
    }
}
