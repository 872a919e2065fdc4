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

pub mod agent;
pub mod binding;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod metrics;
pub mod resolver;
pub mod runtime;
pub mod tensor;
pub mod worker;
pub use agent::{Agent, AgentBuilder, AgentKind, AgentState, PolicyAgent};
pub use binding::{
    ArgumentAdapter, BindingTable, CheckpointStatus, FunctionNames, Slot, SlotBinding,
    DEFAULT_MODULE,
};
pub use config::{AgentConfigSection, BridgeConfig, ModuleConfigSection};
pub use error::{BridgeError, BridgeResult};
pub use logging::init_tracing;
pub use metrics::SlotMetrics;
pub use resolver::{ModuleOrigin, ModuleResolver, MODULE_PATH_ENV};
pub use runtime::{ensure_loaded, Runtime, RuntimeConfig};
pub use tensor::{argmax, HostTensor, InputShape};
pub use worker::AgentWorker;
