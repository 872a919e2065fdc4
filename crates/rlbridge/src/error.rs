// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Embedded runtime failed to initialise: {0}")]
    RuntimeInit(String),
    #[error("Policy module not found: {name}")]
    ModuleNotFound { name: String },
    #[error("Policy module '{name}' is invalid: {reason}")]
    ModuleInvalid { name: String, reason: String },
    #[error("Policy module '{module}' does not export required function '{function}'")]
    RequiredFunctionMissing { module: String, function: String },
    #[error("Invalid agent dimensions: {0}")]
    InvalidDimensions(String),
    #[error("State shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Action {index} outside of [0, {num_actions})")]
    ActionRange { index: i64, num_actions: u32 },
    #[error("Checkpoint I/O failed for '{path}': {detail}")]
    CheckpointIo { path: String, detail: String },
    #[error("Runtime error in '{function}': {detail}")]
    RuntimeInternal { function: String, detail: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Agent worker is no longer running")]
    WorkerUnavailable,
}

impl BridgeError {
    /// Per-step failures leave the agent usable; everything else ends construction.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::ShapeMismatch { .. }
                | BridgeError::ActionRange { .. }
                | BridgeError::CheckpointIo { .. }
                | BridgeError::RuntimeInternal { .. }
        )
    }

    pub(crate) fn internal(function: &str, err: impl std::fmt::Display) -> Self {
        BridgeError::RuntimeInternal {
            function: function.to_string(),
            detail: err.to_string(),
        }
    }

    pub(crate) fn invalid_module(name: &str, reason: impl std::fmt::Display) -> Self {
        BridgeError::ModuleInvalid {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
