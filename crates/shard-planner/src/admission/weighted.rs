// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Weighted round-robin admission.
//!
//! Admissions cycle through `fast` fast-class turns followed by `slow`
//! slow-class turns. When the class whose turn it is has no free slot, the
//! other class is used and the turn is kept, so the policy never idles a
//! free slot while work is pending.

use exec_unit::DeviceClass;

use crate::{AdmissionPolicy, PlannerError};

/// Interleave classes in a fixed `fast:slow` ratio.
#[derive(Debug, Clone)]
pub struct WeightedRoundRobin {
    fast: usize,
    slow: usize,
    position: usize,
}

impl WeightedRoundRobin {
    pub fn new(fast: usize, slow: usize) -> Result<Self, PlannerError> {
        if fast + slow == 0 {
            return Err(PlannerError::InvalidWeights { fast, slow });
        }
        Ok(Self {
            fast,
            slow,
            position: 0,
        })
    }

    fn turn(&self) -> DeviceClass {
        if self.position < self.fast {
            DeviceClass::Fast
        } else {
            DeviceClass::Slow
        }
    }

    fn advance(&mut self) {
        self.position = (self.position + 1) % (self.fast + self.slow);
    }
}

impl AdmissionPolicy for WeightedRoundRobin {
    fn name(&self) -> &str {
        "weighted-round-robin"
    }

    fn choose(&mut self, fast_free: bool, slow_free: bool) -> Option<DeviceClass> {
        let free = |class| match class {
            DeviceClass::Fast => fast_free,
            DeviceClass::Slow => slow_free,
        };
        let preferred = self.turn();
        if free(preferred) {
            self.advance();
            return Some(preferred);
        }
        let other = match preferred {
            DeviceClass::Fast => DeviceClass::Slow,
            DeviceClass::Slow => DeviceClass::Fast,
        };
        free(other).then_some(other)
    }

    fn reset(&mut self) {
        self.position = 0;
    }
}
