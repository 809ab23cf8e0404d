// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fast-first admission.
//!
//! Every pending sample goes to a fast-class slot if one is free. Slow
//! slots only pick up work while all fast slots are busy, so a slow
//! coprocessor never delays a sample a fast core could have taken.

use exec_unit::DeviceClass;

use crate::AdmissionPolicy;

/// Prefer fast slots; spill to slow slots.
#[derive(Debug, Clone, Copy, Default)]
pub struct FastFirst;

impl AdmissionPolicy for FastFirst {
    fn name(&self) -> &str {
        "fast-first"
    }

    fn choose(&mut self, fast_free: bool, slow_free: bool) -> Option<DeviceClass> {
        if fast_free {
            Some(DeviceClass::Fast)
        } else if slow_free {
            Some(DeviceClass::Slow)
        } else {
            None
        }
    }
}
