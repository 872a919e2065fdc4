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

//! The agent couples a host control loop to one policy module.
//!
//! All policy calls take `&mut self`: an agent serves a single caller at a
//! time and must not be shared across threads. Hosts running several agents,
//! or calling from async code, go through [`crate::worker::AgentWorker`].

use crate::binding::{
    BindingTable, CheckpointStatus, FunctionNames, Slot, DEFAULT_MODULE,
};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::logging::{log_agent_event, log_error};
use crate::metrics::SlotMetrics;
use crate::resolver::ModuleResolver;
use crate::runtime::{self, Runtime, RuntimeConfig};
use crate::tensor::{ActionTensor, HostTensor, InputShape, RewardTensor, F32_BYTES};
use serde_json::json;
use std::path::{Path, PathBuf};

const AI_TYPE_BIT: u32 = 1 << 0;
const RL_TYPE_BIT: u32 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Ai,
    Reinforcement,
}

impl AgentKind {
    pub const fn type_id(self) -> u32 {
        match self {
            AgentKind::Ai => AI_TYPE_BIT,
            AgentKind::Reinforcement => AI_TYPE_BIT | RL_TYPE_BIT,
        }
    }
    pub const fn is(self, other: AgentKind) -> bool {
        self.type_id() & other.type_id() == other.type_id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Uninitialized,
    Constructed,
    Bound,
    Ready,
    Destroyed,
}

/// Host-facing surface of a policy-driven agent.
pub trait PolicyAgent {
    fn kind(&self) -> AgentKind;
    fn next_action(&mut self, state: &[f32]) -> BridgeResult<usize>;
    fn next_reward(&mut self, reward: f32, end_episode: bool) -> BridgeResult<()>;
    fn load_checkpoint(&mut self, path: &Path) -> BridgeResult<CheckpointStatus>;
    fn save_checkpoint(&mut self, path: &Path) -> BridgeResult<CheckpointStatus>;
}

#[derive(Debug, Clone)]
pub struct AgentBuilder {
    input: InputShape,
    num_actions: u32,
    module: String,
    args: Vec<String>,
    names: FunctionNames,
    resolver: ModuleResolver,
    limits: RuntimeConfig,
}

impl AgentBuilder {
    pub fn new(input: InputShape, num_actions: u32) -> Self {
        Self {
            input,
            num_actions,
            module: DEFAULT_MODULE.to_string(),
            args: Vec::new(),
            names: FunctionNames::default(),
            resolver: ModuleResolver::new(),
            limits: RuntimeConfig::default(),
        }
    }
    pub fn flat(num_inputs: u32, num_actions: u32) -> Self {
        Self::new(InputShape::flat(num_inputs), num_actions)
    }
    pub fn image(width: u32, height: u32, channels: u32, num_actions: u32) -> Self {
        Self::new(InputShape::image(width, height, channels), num_actions)
    }
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        let agent = config
            .agent
            .as_ref()
            .ok_or_else(|| BridgeError::Config("missing [agent] section".to_string()))?;
        let mut builder = Self::new(agent.input, agent.num_actions)
            .module(&config.module.name)
            .args(config.module.args.iter().cloned())
            .functions(config.module.functions.clone())
            .limits(config.runtime.clone());
        for path in &config.module.search_paths {
            builder = builder.search_path(path.clone());
        }
        Ok(builder)
    }

    pub fn module(mut self, name: &str) -> Self {
        self.module = name.to_string();
        self
    }
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
    pub fn function(mut self, slot: Slot, name: &str) -> Self {
        self.names.set(slot, name);
        self
    }
    pub fn functions(mut self, names: FunctionNames) -> Self {
        self.names = names;
        self
    }
    pub fn resolver(mut self, resolver: ModuleResolver) -> Self {
        self.resolver = resolver;
        self
    }
    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.resolver.add_search_path(path);
        self
    }
    pub fn register_source(mut self, name: &str, source: impl Into<Vec<u8>>) -> Self {
        self.resolver.register_source(name, source);
        self
    }
    pub fn limits(mut self, limits: RuntimeConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn build(self) -> BridgeResult<Agent> {
        self.input.validate()?;
        if self.num_actions == 0 || i32::try_from(self.num_actions).is_err() {
            return Err(BridgeError::InvalidDimensions(format!(
                "num_actions must be in 1..={}, got {}",
                i32::MAX,
                self.num_actions
            )));
        }
        let runtime = runtime::ensure_loaded()?;
        let mut state = AgentState::Uninitialized;
        advance(&mut state, AgentState::Constructed, &self.module);
        let bound = bind(
            runtime,
            &self.resolver,
            &self.module,
            &self.args,
            &self.names,
            &self.limits,
            self.input,
            self.num_actions,
        )
        .inspect_err(|e| log_error("agent_construction", e))?;
        advance(&mut state, AgentState::Bound, &self.module);
        advance(&mut state, AgentState::Ready, &self.module);
        log_agent_event(
            "agent_ready",
            json!({
                "module": self.module,
                "input": self.input.dims(),
                "num_actions": self.num_actions,
                "checkpoints": bound.0.is_bound(Slot::Load) || bound.0.is_bound(Slot::Save),
            }),
        );
        let (bindings, action_tensor, reward_tensor) = bound;
        Ok(Agent {
            input: self.input,
            num_actions: self.num_actions,
            names: self.names,
            resolver: self.resolver,
            limits: self.limits,
            bindings,
            action_tensor,
            reward_tensor,
            state,
            steps: 0,
            episodes: 0,
        })
    }
}

pub struct Agent {
    input: InputShape,
    num_actions: u32,
    names: FunctionNames,
    resolver: ModuleResolver,
    limits: RuntimeConfig,
    bindings: BindingTable,
    action_tensor: ActionTensor,
    reward_tensor: RewardTensor,
    state: AgentState,
    steps: u64,
    episodes: u64,
}

impl Agent {
    pub fn input_shape(&self) -> InputShape {
        self.input
    }
    pub fn num_inputs(&self) -> usize {
        self.input.len()
    }
    pub fn num_actions(&self) -> u32 {
        self.num_actions
    }
    pub fn module_name(&self) -> &str {
        self.bindings.module_name()
    }
    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }
    pub fn function_names(&self) -> &FunctionNames {
        &self.names
    }
    pub fn state(&self) -> AgentState {
        self.state
    }
    pub fn is_ready(&self) -> bool {
        self.state == AgentState::Ready
    }
    pub fn runtime_ready(&self) -> bool {
        runtime::is_loaded()
    }
    pub fn steps(&self) -> u64 {
        self.steps
    }
    pub fn episodes(&self) -> u64 {
        self.episodes
    }
    pub fn slot_metrics(&self, slot: Slot) -> SlotMetrics {
        self.bindings.slot(slot).metrics.clone()
    }
    pub fn supports_checkpoints(&self) -> bool {
        self.bindings.is_bound(Slot::Load) && self.bindings.is_bound(Slot::Save)
    }
    /// Raw output of the last successful action call.
    pub fn last_action_values(&self) -> &[f32] {
        self.action_tensor.values()
    }
    pub fn last_reward(&self) -> (f32, bool) {
        (self.reward_tensor.reward(), self.reward_tensor.end_episode())
    }

    /// Infers the next action for a flat state buffer. Training only happens
    /// through [`Agent::next_reward`].
    pub fn next_action(&mut self, state: &[f32]) -> BridgeResult<usize> {
        self.next_action_tensor(HostTensor::flat(state))
    }

    pub fn next_action_tensor(&mut self, state: HostTensor<'_>) -> BridgeResult<usize> {
        self.bindings.write_state(&self.action_tensor, state)?;
        let action = self.bindings.call_action(&mut self.action_tensor)?;
        self.steps += 1;
        Ok(action)
    }

    /// Like [`Agent::next_action`], substituting `fallback` when the step fails.
    pub fn next_action_or(&mut self, state: &[f32], fallback: usize) -> usize {
        match self.next_action(state) {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(
                    module = %self.module_name(),
                    error = %e,
                    fallback = fallback,
                    "Action step failed, using fallback action"
                );
                fallback
            }
        }
    }

    /// Delivers the reward for the last action. `end_episode` is forwarded
    /// unchanged to the policy.
    pub fn next_reward(&mut self, reward: f32, end_episode: bool) -> BridgeResult<()> {
        self.bindings
            .write_reward(&self.reward_tensor, reward, end_episode)?;
        self.bindings
            .call_reward(&self.action_tensor, &self.reward_tensor)?;
        self.reward_tensor.commit(reward, end_episode);
        if end_episode {
            self.episodes += 1;
            tracing::debug!(
                module = %self.module_name(),
                episode = self.episodes,
                steps = self.steps,
                "Episode finished"
            );
        }
        Ok(())
    }

    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>) -> BridgeResult<CheckpointStatus> {
        self.checkpoint(Slot::Load, path.as_ref())
    }

    pub fn save_checkpoint(&mut self, path: impl AsRef<Path>) -> BridgeResult<CheckpointStatus> {
        self.checkpoint(Slot::Save, path.as_ref())
    }

    fn checkpoint(&mut self, slot: Slot, path: &Path) -> BridgeResult<CheckpointStatus> {
        let result = self.bindings.call_checkpoint(slot, path);
        match &result {
            Ok(CheckpointStatus::Completed) => log_agent_event(
                "checkpoint",
                json!({
                    "module": self.module_name(),
                    "slot": slot.label(),
                    "path": path.display().to_string(),
                }),
            ),
            Ok(CheckpointStatus::Unsupported) => tracing::debug!(
                module = %self.module_name(),
                slot = slot.label(),
                "Checkpoint function not bound"
            ),
            Err(e) => log_error("checkpoint", e),
        }
        result
    }

    pub fn load_module(&mut self, name: &str) -> BridgeResult<()> {
        self.load_module_with_args(name, std::iter::empty::<String>())
    }

    /// Replaces every binding with ones resolved from `name`. On failure the
    /// current module, bindings and tensors stay in place.
    pub fn load_module_with_args<I, S>(&mut self, name: &str, args: I) -> BridgeResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let runtime = runtime::ensure_loaded()?;
        let (bindings, action_tensor, reward_tensor) = bind(
            runtime,
            &self.resolver,
            name,
            &args,
            &self.names,
            &self.limits,
            self.input,
            self.num_actions,
        )
        .inspect_err(|e| log_error("load_module", e))?;
        let previous = std::mem::replace(&mut self.bindings, bindings);
        self.action_tensor = action_tensor;
        self.reward_tensor = reward_tensor;
        log_agent_event(
            "module_rebound",
            json!({ "from": previous.module_name(), "to": name, "args": args }),
        );
        Ok(())
    }
}

impl PolicyAgent for Agent {
    fn kind(&self) -> AgentKind {
        AgentKind::Reinforcement
    }
    fn next_action(&mut self, state: &[f32]) -> BridgeResult<usize> {
        Agent::next_action(self, state)
    }
    fn next_reward(&mut self, reward: f32, end_episode: bool) -> BridgeResult<()> {
        Agent::next_reward(self, reward, end_episode)
    }
    fn load_checkpoint(&mut self, path: &Path) -> BridgeResult<CheckpointStatus> {
        Agent::load_checkpoint(self, path)
    }
    fn save_checkpoint(&mut self, path: &Path) -> BridgeResult<CheckpointStatus> {
        Agent::save_checkpoint(self, path)
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        let module = self.bindings.module_name().to_string();
        advance(&mut self.state, AgentState::Destroyed, &module);
        log_agent_event(
            "agent_destroyed",
            json!({ "module": module, "steps": self.steps, "episodes": self.episodes }),
        );
    }
}

fn advance(state: &mut AgentState, next: AgentState, module: &str) {
    tracing::trace!(module = module, from = ?*state, to = ?next, "Agent state transition");
    *state = next;
}

#[allow(clippy::too_many_arguments)]
fn bind(
    runtime: &Runtime,
    resolver: &ModuleResolver,
    module: &str,
    args: &[String],
    names: &FunctionNames,
    limits: &RuntimeConfig,
    input: InputShape,
    num_actions: u32,
) -> BridgeResult<(BindingTable, ActionTensor, RewardTensor)> {
    let mut table = BindingTable::load(runtime, resolver, module, args, names, limits)?;
    let state = table.reserve(input.len() * F32_BYTES)?;
    let output = table.reserve(num_actions as usize * F32_BYTES)?;
    let reward = table.reserve(2 * F32_BYTES)?;
    Ok((
        table,
        ActionTensor::new(input, num_actions, state, output),
        RewardTensor::new(reward),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinforcement_agents_are_ai_agents() {
        assert!(AgentKind::Reinforcement.is(AgentKind::Ai));
        assert!(!AgentKind::Ai.is(AgentKind::Reinforcement));
    }

    #[test]
    fn zero_actions_fail_before_runtime_work() {
        let err = AgentBuilder::flat(4, 0).build().err().unwrap();
        assert!(matches!(err, BridgeError::InvalidDimensions(_)));
        let err = AgentBuilder::image(0, 4, 3, 2).build().err().unwrap();
        assert!(matches!(err, BridgeError::InvalidDimensions(_)));
    }

    #[test]
    fn builder_from_config_requires_agent_section() {
        let config = BridgeConfig::default();
        assert!(matches!(
            AgentBuilder::from_config(&config),
            Err(BridgeError::Config(_))
        ));
    }
}
