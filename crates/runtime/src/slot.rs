// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Execution slots with checked ownership transitions.
//!
//! ```text
//!            acquire(sample)               release(sample, unit)
//! Available ────────────────▶ Occupied ─────────────────────────▶ Available
//!  (owns unit)               (unit is in flight)   (unit handed back)
//! ```
//!
//! `acquire` moves the unit out of the slot; it comes back only through
//! `release`, with the completion that carried it. A slot therefore cannot
//! be resubmitted, or its buffers written, while an invocation holds it.

use std::time::Instant;

use exec_unit::{DeviceClass, ExecutionUnit};

use crate::RuntimeError;

/// Occupancy of one slot.
pub enum SlotState {
    /// Idle; the slot owns its unit.
    Available(Box<dyn ExecutionUnit>),
    /// A sample is in flight; the unit is owned by the invocation.
    Occupied {
        sample: usize,
        epoch: u64,
        since: Instant,
    },
}

/// One reusable execution context of the pipelined pool.
pub struct Slot {
    index: usize,
    class: DeviceClass,
    state: SlotState,
}

impl Slot {
    pub fn new(index: usize, unit: Box<dyn ExecutionUnit>) -> Self {
        Self {
            index,
            class: unit.device_class(),
            state: SlotState::Available(unit),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn class(&self) -> DeviceClass {
        self.class
    }

    pub fn is_available(&self) -> bool {
        matches!(self.state, SlotState::Available(_))
    }

    /// The in-flight sample and its batch epoch, if occupied.
    pub fn occupant(&self) -> Option<(usize, u64)> {
        match self.state {
            SlotState::Occupied { sample, epoch, .. } => Some((sample, epoch)),
            SlotState::Available(_) => None,
        }
    }

    /// When the current occupant was submitted.
    pub fn occupied_since(&self) -> Option<Instant> {
        match self.state {
            SlotState::Occupied { since, .. } => Some(since),
            SlotState::Available(_) => None,
        }
    }

    /// The idle unit, for copying inputs in before submission.
    pub fn unit_mut(&mut self) -> Option<&mut (dyn ExecutionUnit + 'static)> {
        match &mut self.state {
            SlotState::Available(unit) => Some(unit.as_mut()),
            SlotState::Occupied { .. } => None,
        }
    }

    /// Marks the slot occupied by `sample` and hands out its unit.
    pub fn acquire(
        &mut self,
        sample: usize,
        epoch: u64,
    ) -> Result<Box<dyn ExecutionUnit>, RuntimeError> {
        let occupied = SlotState::Occupied {
            sample,
            epoch,
            since: Instant::now(),
        };
        match std::mem::replace(&mut self.state, occupied) {
            SlotState::Available(unit) => Ok(unit),
            SlotState::Occupied {
                sample: held,
                epoch: held_epoch,
                since,
            } => {
                self.state = SlotState::Occupied {
                    sample: held,
                    epoch: held_epoch,
                    since,
                };
                Err(RuntimeError::SlotState {
                    slot: self.index,
                    detail: format!("acquire for sample {sample} while sample {held} in flight"),
                })
            }
        }
    }

    /// Returns the unit to the slot once its invocation has completed.
    ///
    /// On a sample or epoch mismatch the unit is dropped and the slot keeps
    /// its current occupant.
    pub fn release(
        &mut self,
        sample: usize,
        epoch: u64,
        unit: Box<dyn ExecutionUnit>,
    ) -> Result<(), RuntimeError> {
        match self.state {
            SlotState::Occupied {
                sample: held,
                epoch: held_epoch,
                ..
            } if held == sample && held_epoch == epoch => {
                self.state = SlotState::Available(unit);
                Ok(())
            }
            SlotState::Occupied { sample: held, .. } => Err(RuntimeError::SlotState {
                slot: self.index,
                detail: format!("release for sample {sample} but sample {held} in flight"),
            }),
            SlotState::Available(_) => Err(RuntimeError::SlotState {
                slot: self.index,
                detail: format!("release for sample {sample} on an available slot"),
            }),
        }
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot")
            .field("index", &self.index)
            .field("class", &self.class)
            .field("occupant", &self.occupant())
            .finish()
    }
}
