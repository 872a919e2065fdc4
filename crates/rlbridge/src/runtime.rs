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

//! Process-wide embedded runtime.
//!
//! The Wasmtime engine is brought up at most once per process and is shared by
//! every agent. A failed bring-up is remembered: later calls report the same
//! error instead of retrying.

use crate::error::{BridgeError, BridgeResult};
use crate::logging::log_runtime_event;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use wasmtime::{Config, Engine};

static RUNTIME: OnceCell<Result<Runtime, String>> = OnceCell::new();

/// Per-agent execution limits applied on top of the shared engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Fuel granted to each policy call. `None` never runs out.
    pub fuel_per_call: Option<u64>,
}

impl RuntimeConfig {
    pub fn fuel(&self) -> u64 {
        self.fuel_per_call.unwrap_or(u64::MAX)
    }
}

pub struct Runtime {
    engine: Engine,
    loaded_at: chrono::DateTime<chrono::Utc>,
}

impl Runtime {
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
    pub fn loaded_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.loaded_at
    }
}

/// Brings the embedded runtime up if this is the first call, otherwise returns
/// the already loaded instance.
pub fn ensure_loaded() -> BridgeResult<&'static Runtime> {
    let slot = RUNTIME.get_or_init(|| {
        let start = Instant::now();
        let result = bring_up();
        match &result {
            Ok(_) => log_runtime_event(
                "engine_loaded",
                json!({ "elapsed_us": start.elapsed().as_micros() as u64 }),
            ),
            Err(e) => tracing::error!(error = %e, "Embedded runtime failed to load"),
        }
        result
    });
    slot.as_ref()
        .map_err(|e| BridgeError::RuntimeInit(e.clone()))
}

pub fn is_loaded() -> bool {
    matches!(RUNTIME.get(), Some(Ok(_)))
}

fn bring_up() -> Result<Runtime, String> {
    let mut config = Config::new();
    config.consume_fuel(true);
    let engine =
        Engine::new(&config).map_err(|e| format!("Failed to create Wasmtime engine: {e}"))?;
    Ok(Runtime {
        engine,
        loaded_at: chrono::Utc::now(),
    })
}
