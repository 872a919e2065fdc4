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

//! Module binding table: one instantiated policy module plus the four
//! callables resolved from it by export name.
//!
//! Each slot's argument adapter is picked by trying the accepted typed
//! signatures in order. A table is only ever returned with both mandatory
//! slots bound.

use crate::error::{BridgeError, BridgeResult};
use crate::host::{build_linker, HostState};
use crate::logging::{log_binding_event, log_step};
use crate::metrics::SlotMetrics;
use crate::resolver::{ModuleOrigin, ModuleResolver};
use crate::runtime::{Runtime, RuntimeConfig};
use crate::tensor::{ActionTensor, GuestRegion, HostTensor, RewardTensor};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::time::Instant;
use wasmtime::{Func, Instance, Memory, Store, TypedFunc};

pub const DEFAULT_MODULE: &str = "DQN";
pub const DEFAULT_NEXT_ACTION: &str = "next_action";
pub const DEFAULT_NEXT_REWARD: &str = "next_reward";
pub const DEFAULT_LOAD_MODEL: &str = "load_model";
pub const DEFAULT_SAVE_MODEL: &str = "save_model";

pub const PATH_SCRATCH_BYTES: usize = 4096;
const WASM_PAGE_BYTES: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    Action,
    Reward,
    Load,
    Save,
}

impl Slot {
    pub const ALL: [Slot; 4] = [Slot::Action, Slot::Reward, Slot::Load, Slot::Save];

    pub fn is_required(self) -> bool {
        matches!(self, Slot::Action | Slot::Reward)
    }
    pub fn default_name(self) -> &'static str {
        match self {
            Slot::Action => DEFAULT_NEXT_ACTION,
            Slot::Reward => DEFAULT_NEXT_REWARD,
            Slot::Load => DEFAULT_LOAD_MODEL,
            Slot::Save => DEFAULT_SAVE_MODEL,
        }
    }
    pub fn label(self) -> &'static str {
        match self {
            Slot::Action => "ACTION",
            Slot::Reward => "REWARD",
            Slot::Load => "LOAD",
            Slot::Save => "SAVE",
        }
    }
    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionNames {
    pub next_action: String,
    pub next_reward: String,
    pub load_model: String,
    pub save_model: String,
}

impl Default for FunctionNames {
    fn default() -> Self {
        Self {
            next_action: DEFAULT_NEXT_ACTION.to_string(),
            next_reward: DEFAULT_NEXT_REWARD.to_string(),
            load_model: DEFAULT_LOAD_MODEL.to_string(),
            save_model: DEFAULT_SAVE_MODEL.to_string(),
        }
    }
}

impl FunctionNames {
    pub fn get(&self, slot: Slot) -> &str {
        match slot {
            Slot::Action => &self.next_action,
            Slot::Reward => &self.next_reward,
            Slot::Load => &self.load_model,
            Slot::Save => &self.save_model,
        }
    }
    pub fn set(&mut self, slot: Slot, name: impl Into<String>) {
        let name = name.into();
        match slot {
            Slot::Action => self.next_action = name,
            Slot::Reward => self.next_reward = name,
            Slot::Load => self.load_model = name,
            Slot::Save => self.save_model = name,
        }
    }
}

/// Calling convention resolved for a bound slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArgumentAdapter {
    /// `(state_ptr, state_len) -> action`
    ActionIndex,
    /// `(state_ptr, state_len, out_ptr, num_actions)`, argmax taken by the host
    ActionDistribution,
    /// `(state_ptr, state_len, reward_ptr) -> action`
    RewardWithAction,
    /// `(state_ptr, state_len, reward_ptr)`
    Reward,
    /// `(path_ptr, path_len) -> success`
    Checkpoint,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotBinding {
    pub slot: Slot,
    pub name: String,
    pub bound: bool,
    pub adapter: Option<ArgumentAdapter>,
    pub metrics: SlotMetrics,
}

impl SlotBinding {
    fn new(slot: Slot, name: &str, adapter: Option<ArgumentAdapter>) -> Self {
        Self {
            slot,
            name: name.to_string(),
            bound: adapter.is_some(),
            adapter,
            metrics: SlotMetrics::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointStatus {
    Completed,
    /// The module does not export the checkpoint function.
    Unsupported,
}

impl CheckpointStatus {
    pub fn is_completed(self) -> bool {
        self == CheckpointStatus::Completed
    }
}

enum ActionFn {
    Index(TypedFunc<(i32, i32), i32>),
    Distribution(TypedFunc<(i32, i32, i32, i32), ()>),
}

enum RewardFn {
    WithAction(TypedFunc<(i32, i32, i32), i32>),
    Plain(TypedFunc<(i32, i32, i32), ()>),
}

type CheckpointFn = TypedFunc<(i32, i32), i32>;

pub struct BindingTable {
    module_name: String,
    origin: ModuleOrigin,
    store: Store<HostState>,
    memory: Memory,
    alloc: Option<TypedFunc<i32, i32>>,
    action: ActionFn,
    reward: RewardFn,
    load: Option<CheckpointFn>,
    save: Option<CheckpointFn>,
    slots: [SlotBinding; 4],
    path_scratch: GuestRegion,
    limits: RuntimeConfig,
}

impl BindingTable {
    pub fn load(
        runtime: &Runtime,
        resolver: &ModuleResolver,
        module_name: &str,
        args: &[String],
        names: &FunctionNames,
        limits: &RuntimeConfig,
    ) -> BridgeResult<Self> {
        let engine = runtime.engine();
        let (module, origin) = resolver.compile(engine, module_name)?;
        let linker = build_linker(engine)
            .map_err(|e| BridgeError::invalid_module(module_name, format!("linker: {e}")))?;
        let mut store = Store::new(engine, HostState::new(module_name, args.to_vec()));
        store
            .set_fuel(limits.fuel())
            .map_err(|e| BridgeError::invalid_module(module_name, format!("fuel: {e}")))?;
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| BridgeError::invalid_module(module_name, format!("instantiate: {e}")))?;
        let memory = instance.get_memory(&mut store, "memory").ok_or_else(|| {
            BridgeError::invalid_module(module_name, "module does not export 'memory'")
        })?;
        if let Ok(init) = instance.get_typed_func::<(), ()>(&mut store, "_initialize") {
            init.call(&mut store, ()).map_err(|e| {
                BridgeError::invalid_module(module_name, format!("_initialize trapped: {e}"))
            })?;
        }
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .ok();

        let action = resolve_action(&instance, &mut store, names.get(Slot::Action));
        let reward = resolve_reward(&instance, &mut store, names.get(Slot::Reward));
        let load = resolve_checkpoint(&instance, &mut store, names.get(Slot::Load));
        let save = resolve_checkpoint(&instance, &mut store, names.get(Slot::Save));

        let slots = [
            SlotBinding::new(
                Slot::Action,
                names.get(Slot::Action),
                action.as_ref().map(|f| match f {
                    ActionFn::Index(_) => ArgumentAdapter::ActionIndex,
                    ActionFn::Distribution(_) => ArgumentAdapter::ActionDistribution,
                }),
            ),
            SlotBinding::new(
                Slot::Reward,
                names.get(Slot::Reward),
                reward.as_ref().map(|f| match f {
                    RewardFn::WithAction(_) => ArgumentAdapter::RewardWithAction,
                    RewardFn::Plain(_) => ArgumentAdapter::Reward,
                }),
            ),
            SlotBinding::new(
                Slot::Load,
                names.get(Slot::Load),
                load.as_ref().map(|_| ArgumentAdapter::Checkpoint),
            ),
            SlotBinding::new(
                Slot::Save,
                names.get(Slot::Save),
                save.as_ref().map(|_| ArgumentAdapter::Checkpoint),
            ),
        ];
        for binding in &slots {
            log_binding_event(
                "slot_resolved",
                json!({
                    "module": module_name,
                    "slot": binding.slot.label(),
                    "name": binding.name,
                    "bound": binding.bound,
                }),
            );
        }

        let (Some(action), Some(reward)) = (action, reward) else {
            let missing = slots
                .iter()
                .find(|b| b.slot.is_required() && !b.bound)
                .map(|b| b.name.clone())
                .unwrap_or_default();
            return Err(BridgeError::RequiredFunctionMissing {
                module: module_name.to_string(),
                function: missing,
            });
        };

        let mut table = Self {
            module_name: module_name.to_string(),
            origin,
            store,
            memory,
            alloc,
            action,
            reward,
            load,
            save,
            slots,
            path_scratch: GuestRegion {
                offset: 0,
                bytes: 0,
            },
            limits: limits.clone(),
        };
        table.path_scratch = table.reserve(PATH_SCRATCH_BYTES)?;
        Ok(table)
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }
    pub fn origin(&self) -> &ModuleOrigin {
        &self.origin
    }
    pub fn args(&self) -> &[String] {
        self.store.data().args()
    }
    pub fn slot(&self, slot: Slot) -> &SlotBinding {
        &self.slots[slot.index()]
    }
    pub fn slots(&self) -> &[SlotBinding] {
        &self.slots
    }
    pub fn is_bound(&self, slot: Slot) -> bool {
        self.slots[slot.index()].bound
    }
    pub fn memory_bytes(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    /// Reserves guest memory through the module's `alloc` export, or by
    /// growing linear memory when the module has none.
    pub(crate) fn reserve(&mut self, bytes: usize) -> BridgeResult<GuestRegion> {
        let size = i32::try_from(bytes).map_err(|_| {
            BridgeError::invalid_module(&self.module_name, format!("{bytes} bytes is too large"))
        })?;
        if let Some(alloc) = &self.alloc {
            self.store
                .set_fuel(self.limits.fuel())
                .map_err(|e| BridgeError::invalid_module(&self.module_name, e))?;
            let ptr = alloc.call(&mut self.store, size).map_err(|e| {
                BridgeError::invalid_module(&self.module_name, format!("alloc trapped: {e}"))
            })?;
            let offset = usize::try_from(ptr).map_err(|_| {
                BridgeError::invalid_module(&self.module_name, format!("alloc returned {ptr}"))
            })?;
            if offset + bytes > self.memory.data_size(&self.store) {
                return Err(BridgeError::invalid_module(
                    &self.module_name,
                    format!("alloc returned {offset}, outside guest memory"),
                ));
            }
            return Ok(GuestRegion { offset, bytes });
        }
        let pages = bytes.div_ceil(WASM_PAGE_BYTES).max(1) as u64;
        let previous = self.memory.grow(&mut self.store, pages).map_err(|e| {
            BridgeError::invalid_module(&self.module_name, format!("memory grow: {e}"))
        })?;
        Ok(GuestRegion {
            offset: previous as usize * WASM_PAGE_BYTES,
            bytes,
        })
    }

    pub(crate) fn write_state(
        &mut self,
        tensor: &ActionTensor,
        state: HostTensor<'_>,
    ) -> BridgeResult<()> {
        tensor.to_runtime(&self.memory, &mut self.store, state)
    }

    pub(crate) fn write_reward(
        &mut self,
        tensor: &RewardTensor,
        reward: f32,
        end_episode: bool,
    ) -> BridgeResult<()> {
        tensor.pack(&self.memory, &mut self.store, reward, end_episode)
    }

    pub(crate) fn call_action(&mut self, tensor: &mut ActionTensor) -> BridgeResult<usize> {
        self.refuel(Slot::Action)?;
        let start = Instant::now();
        let state = tensor.state_region();
        let state_len = state.f32_len() as i32;
        let result = match &self.action {
            ActionFn::Index(func) => match func.call(&mut self.store, (state.ptr(), state_len)) {
                Ok(index) => tensor.action_from_index(index),
                Err(e) => Err(BridgeError::internal(&self.slots[0].name, e)),
            },
            ActionFn::Distribution(func) => {
                let out = tensor.output_region();
                let args = (state.ptr(), state_len, out.ptr(), tensor.num_actions() as i32);
                match func.call(&mut self.store, args) {
                    Ok(()) => tensor.action_from_distribution(&self.memory, &self.store),
                    Err(e) => Err(BridgeError::internal(&self.slots[0].name, e)),
                }
            }
        };
        self.finish(Slot::Action, start, result.is_ok());
        result
    }

    pub(crate) fn call_reward(
        &mut self,
        state: &ActionTensor,
        reward: &RewardTensor,
    ) -> BridgeResult<()> {
        self.refuel(Slot::Reward)?;
        let start = Instant::now();
        let region = state.state_region();
        let args = (
            region.ptr(),
            region.f32_len() as i32,
            reward.region().ptr(),
        );
        let result = match &self.reward {
            RewardFn::WithAction(func) => func.call(&mut self.store, args).map(|_| ()),
            RewardFn::Plain(func) => func.call(&mut self.store, args),
        }
        .map_err(|e| BridgeError::internal(&self.slots[1].name, e));
        self.finish(Slot::Reward, start, result.is_ok());
        result
    }

    pub(crate) fn call_checkpoint(
        &mut self,
        slot: Slot,
        path: &Path,
    ) -> BridgeResult<CheckpointStatus> {
        let func = match slot {
            Slot::Load => self.load.clone(),
            Slot::Save => self.save.clone(),
            Slot::Action | Slot::Reward => None,
        };
        let Some(func) = func else {
            return Ok(CheckpointStatus::Unsupported);
        };
        let display = path.display().to_string();
        let bytes = path.to_str().map(str::as_bytes).ok_or_else(|| BridgeError::CheckpointIo {
            path: display.clone(),
            detail: "path is not valid UTF-8".to_string(),
        })?;
        if bytes.len() > self.path_scratch.bytes {
            return Err(BridgeError::CheckpointIo {
                path: display,
                detail: format!("path longer than {} bytes", self.path_scratch.bytes),
            });
        }
        let name = self.slots[slot.index()].name.clone();
        self.memory
            .write(&mut self.store, self.path_scratch.offset, bytes)
            .map_err(|e| BridgeError::internal(&name, e))?;
        self.store.data_mut().take_io_error();
        self.refuel(slot)?;
        let start = Instant::now();
        let result = match func.call(
            &mut self.store,
            (self.path_scratch.ptr(), bytes.len() as i32),
        ) {
            Ok(0) => Err(BridgeError::CheckpointIo {
                path: display,
                detail: self
                    .store
                    .data_mut()
                    .take_io_error()
                    .unwrap_or_else(|| format!("{name} reported failure")),
            }),
            Ok(_) => match self.store.data_mut().take_io_error() {
                Some(detail) => Err(BridgeError::CheckpointIo {
                    path: display,
                    detail,
                }),
                None => Ok(CheckpointStatus::Completed),
            },
            Err(e) => Err(BridgeError::internal(&name, e)),
        };
        self.finish(slot, start, result.is_ok());
        result
    }

    fn refuel(&mut self, slot: Slot) -> BridgeResult<()> {
        self.store
            .set_fuel(self.limits.fuel())
            .map_err(|e| BridgeError::internal(&self.slots[slot.index()].name, e))
    }

    fn finish(&mut self, slot: Slot, start: Instant, success: bool) {
        let elapsed = start.elapsed();
        self.slots[slot.index()]
            .metrics
            .record_call(elapsed, success);
        log_step(slot.label(), &self.module_name, elapsed.as_micros() as u64);
    }
}

impl Drop for BindingTable {
    fn drop(&mut self) {
        log_binding_event(
            "module_released",
            json!({ "module": self.module_name }),
        );
    }
}

fn lookup(instance: &Instance, store: &mut Store<HostState>, name: &str) -> Option<Func> {
    let func = instance.get_func(&mut *store, name);
    if func.is_none() {
        tracing::debug!(function = name, "Export not found or not a function");
    }
    func
}

fn signature_mismatch(name: &str, accepted: &str) {
    tracing::warn!(
        function = name,
        accepted = accepted,
        "Export has an unsupported signature, slot left unbound"
    );
}

fn resolve_action(instance: &Instance, store: &mut Store<HostState>, name: &str) -> Option<ActionFn> {
    let func = lookup(instance, store, name)?;
    if let Ok(typed) = func.typed::<(i32, i32), i32>(&*store) {
        return Some(ActionFn::Index(typed));
    }
    if let Ok(typed) = func.typed::<(i32, i32, i32, i32), ()>(&*store) {
        return Some(ActionFn::Distribution(typed));
    }
    signature_mismatch(name, "(i32, i32) -> i32 | (i32, i32, i32, i32)");
    None
}

fn resolve_reward(instance: &Instance, store: &mut Store<HostState>, name: &str) -> Option<RewardFn> {
    let func = lookup(instance, store, name)?;
    if let Ok(typed) = func.typed::<(i32, i32, i32), i32>(&*store) {
        return Some(RewardFn::WithAction(typed));
    }
    if let Ok(typed) = func.typed::<(i32, i32, i32), ()>(&*store) {
        return Some(RewardFn::Plain(typed));
    }
    signature_mismatch(name, "(i32, i32, i32) -> i32 | (i32, i32, i32)");
    None
}

fn resolve_checkpoint(
    instance: &Instance,
    store: &mut Store<HostState>,
    name: &str,
) -> Option<CheckpointFn> {
    let func = lookup(instance, store, name)?;
    match func.typed::<(i32, i32), i32>(&*store) {
        Ok(typed) => Some(typed),
        Err(_) => {
            signature_mismatch(name, "(i32, i32) -> i32");
            None
        }
    }
}
