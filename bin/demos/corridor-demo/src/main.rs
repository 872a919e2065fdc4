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

mod args;
mod corridor;

use anyhow::{Context, Result};
use args::Args;
use clap::Parser;
use corridor::{Corridor, LEFT, NUM_ACTIONS};
use rlbridge::{
    init_tracing, AgentBuilder, AgentConfigSection, AgentWorker, BridgeConfig, BridgeError,
    BridgeResult, InputShape, PolicyAgent, Slot,
};
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct EpisodeStats {
    episodes: u32,
    goals: u32,
    total_steps: u64,
    total_reward: f64,
}

impl EpisodeStats {
    fn record(&mut self, steps: u32, reward: f32, reached_goal: bool) {
        self.episodes += 1;
        self.total_steps += u64::from(steps);
        self.total_reward += f64::from(reward);
        if reached_goal {
            self.goals += 1;
        }
    }
    fn summary(&self) -> serde_json::Value {
        let episodes = f64::from(self.episodes.max(1));
        json!({
            "episodes": self.episodes,
            "goal_rate": f64::from(self.goals) / episodes,
            "avg_steps": self.total_steps as f64 / episodes,
            "avg_reward": self.total_reward / episodes,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(if args.debug { "debug" } else { "info" });

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(BridgeConfig::default_config_path);
    let mut config = if config_path.exists() {
        BridgeConfig::load_from_file(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?
    } else {
        warn!(path = %config_path.display(), "Configuration not found, using defaults");
        BridgeConfig::default()
    };
    if let Some(module) = &args.module {
        config.module.name = module.clone();
    }
    let length = match (args.length, config.agent) {
        (Some(length), _) => length,
        (None, Some(AgentConfigSection { input, .. })) if !input.is_image() => input.len() as u32,
        _ => 8,
    };
    config.agent = Some(AgentConfigSection {
        input: InputShape::flat(length),
        num_actions: NUM_ACTIONS,
    });

    let builder = AgentBuilder::from_config(&config)?;
    let max_steps = args.max_steps.unwrap_or(length * 4);
    let mut env = Corridor::new(length as usize, max_steps);
    info!(
        module = %config.module.name,
        length = length,
        episodes = args.episodes,
        worker = args.worker,
        "Starting corridor training"
    );

    let stats = if args.worker {
        train_with_worker(builder, &mut env, &args).await?
    } else {
        train_in_place(builder, &mut env, &args)?
    };
    info!(summary = %stats.summary(), "Training finished");
    Ok(())
}

fn train_in_place(builder: AgentBuilder, env: &mut Corridor, args: &Args) -> Result<EpisodeStats> {
    let mut agent = builder.build()?;
    if let Some(path) = &args.load {
        let status = agent.load_checkpoint(path)?;
        info!(path = %path.display(), completed = status.is_completed(), "Checkpoint load");
    }
    let mut stats = EpisodeStats::default();
    for _ in 0..args.episodes {
        let (steps, reward, goal) = run_episode(&mut agent, env)?;
        stats.record(steps, reward, goal);
    }
    if let Some(path) = &args.save {
        let status = agent.save_checkpoint(path)?;
        info!(path = %path.display(), completed = status.is_completed(), "Checkpoint save");
    }
    let metrics = agent.slot_metrics(Slot::Action);
    info!(
        calls = metrics.total_calls,
        avg_call_us = metrics.avg_call_time.as_micros() as u64,
        success_rate = metrics.success_rate(),
        "Action slot metrics"
    );
    Ok(stats)
}

fn run_episode<A: PolicyAgent>(agent: &mut A, env: &mut Corridor) -> Result<(u32, f32, bool)> {
    let mut state = env.reset();
    let mut episode_reward = 0.0;
    loop {
        let action = action_or_left(agent.next_action(&state))?;
        let transition = env.step(action);
        episode_reward += transition.reward;
        agent.next_reward(transition.reward, transition.done)?;
        if transition.done {
            return Ok((env.steps(), episode_reward, transition.reached_goal));
        }
        state = env.observe();
    }
}

/// Per-step failures fall back to stepping left; anything else ends training.
fn action_or_left(result: BridgeResult<usize>) -> Result<usize> {
    match result {
        Ok(action) => Ok(action),
        Err(e) if e.is_recoverable() => {
            warn!(error = %e, "Action step failed, stepping left");
            Ok(LEFT)
        }
        Err(e) => Err(e.into()),
    }
}

async fn train_with_worker(
    builder: AgentBuilder,
    env: &mut Corridor,
    args: &Args,
) -> Result<EpisodeStats> {
    let worker = AgentWorker::spawn(builder).await?;
    if let Some(path) = &args.load {
        worker.load_checkpoint(path.clone()).await?;
    }
    let mut stats = EpisodeStats::default();
    for _ in 0..args.episodes {
        let mut state = env.reset();
        let mut episode_reward = 0.0;
        loop {
            let action = action_or_left(worker.next_action(state).await)?;
            let transition = env.step(action);
            episode_reward += transition.reward;
            worker
                .next_reward(transition.reward, transition.done)
                .await?;
            if transition.done {
                stats.record(env.steps(), episode_reward, transition.reached_goal);
                break;
            }
            state = env.observe();
        }
    }
    if let Some(path) = &args.save {
        worker.save_checkpoint(path.clone()).await?;
    }
    worker.shutdown().await?;
    Ok(stats)
}
