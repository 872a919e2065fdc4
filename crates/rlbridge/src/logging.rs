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

use serde_json::Value;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;

pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
pub fn log_runtime_event(event: &str, payload: Value) {
    info!(
        event = event,
        payload = %serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string()),
        "Runtime event"
    );
}
pub fn log_binding_event(event: &str, payload: Value) {
    debug!(
        event = event,
        payload = %serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string()),
        "Binding event"
    );
}
pub fn log_agent_event(event: &str, payload: Value) {
    info!(
        event = event,
        payload = %serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string()),
        "Agent event"
    );
}
pub fn log_step(slot: &str, module: &str, elapsed_us: u64) {
    debug!(
        slot = slot,
        module = module,
        elapsed_us = elapsed_us,
        "Policy step"
    );
}
pub fn log_error(context: &str, error: &dyn std::error::Error) {
    error!(
        context = context,
        error = %error,
        "Bridge error"
    );
}
pub fn log_policy_message(module: &str, level: i32, message: &str) {
    match level {
        i32::MIN..=0 => trace!(module = module, "{message}"),
        1 => debug!(module = module, "{message}"),
        2 => info!(module = module, "{message}"),
        3 => warn!(module = module, "{message}"),
        _ => error!(module = module, "{message}"),
    }
}
