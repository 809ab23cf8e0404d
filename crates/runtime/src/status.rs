// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Coarse result codes for harness callers.

use crate::RuntimeError;

/// Success or failure, with nothing else crossing the harness boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// Collapses a result into a status, logging the error.
    pub(crate) fn collapse(op: &str, result: Result<(), RuntimeError>) -> Self {
        match result {
            Ok(()) => Status::Success,
            Err(e) => {
                tracing::error!(op, "{e}");
                Status::Failure
            }
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Success => write!(f, "SUCCESS"),
            Status::Failure => write!(f, "FAILURE"),
        }
    }
}
