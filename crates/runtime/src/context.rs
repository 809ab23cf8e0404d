// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host context enforcing a single active backend.
//!
//! A [`HostContext`] is created once by the embedding application and
//! passed to every [`Backend::create`](crate::Backend::create). Creating a
//! backend takes an [`ActiveLease`]; a second create against the same
//! context fails with [`RuntimeError::BackendActive`] until the first
//! backend is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::RuntimeError;

/// Shared handle to the "backend active" guard.
#[derive(Debug, Clone, Default)]
pub struct HostContext {
    active: Arc<AtomicBool>,
}

impl HostContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` while a backend holds the lease.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn acquire(&self) -> Result<ActiveLease, RuntimeError> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RuntimeError::BackendActive)?;
        Ok(ActiveLease {
            active: Arc::clone(&self.active),
        })
    }
}

/// Proof that the holder is the single active backend. Dropping it frees
/// the context.
#[derive(Debug)]
pub struct ActiveLease {
    active: Arc<AtomicBool>,
}

impl Drop for ActiveLease {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}
