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

//! Runs an [`Agent`] on a dedicated thread and serialises every policy call
//! through a command channel, so async callers never block the executor and
//! never touch the agent concurrently.

use crate::agent::{Agent, AgentBuilder};
use crate::binding::CheckpointStatus;
use crate::error::{BridgeError, BridgeResult};
use std::path::PathBuf;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

const COMMAND_QUEUE_DEPTH: usize = 64;

type Reply<T> = oneshot::Sender<BridgeResult<T>>;

enum AgentCommand {
    NextAction {
        state: Vec<f32>,
        response_sender: Reply<usize>,
    },
    NextReward {
        reward: f32,
        end_episode: bool,
        response_sender: Reply<()>,
    },
    LoadCheckpoint {
        path: PathBuf,
        response_sender: Reply<CheckpointStatus>,
    },
    SaveCheckpoint {
        path: PathBuf,
        response_sender: Reply<CheckpointStatus>,
    },
    LoadModule {
        name: String,
        args: Vec<String>,
        response_sender: Reply<()>,
    },
    LastActionValues {
        response_sender: Reply<Vec<f32>>,
    },
}

pub struct AgentWorker {
    command_tx: mpsc::Sender<AgentCommand>,
    thread: Option<JoinHandle<()>>,
}

impl AgentWorker {
    /// Builds the agent on the worker thread and waits until it is ready.
    pub async fn spawn(builder: AgentBuilder) -> BridgeResult<Self> {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();
        let thread = std::thread::Builder::new()
            .name("rlbridge-agent".to_string())
            .spawn(move || match builder.build() {
                Ok(agent) => {
                    let _ = ready_tx.send(Ok(()));
                    run(agent, command_rx);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to spawn agent worker thread");
                BridgeError::WorkerUnavailable
            })?;
        ready_rx.await.map_err(|_| BridgeError::WorkerUnavailable)??;
        Ok(Self {
            command_tx,
            thread: Some(thread),
        })
    }

    pub async fn next_action(&self, state: Vec<f32>) -> BridgeResult<usize> {
        self.request(|response_sender| AgentCommand::NextAction {
            state,
            response_sender,
        })
        .await
    }

    pub async fn next_reward(&self, reward: f32, end_episode: bool) -> BridgeResult<()> {
        self.request(|response_sender| AgentCommand::NextReward {
            reward,
            end_episode,
            response_sender,
        })
        .await
    }

    pub async fn load_checkpoint(&self, path: impl Into<PathBuf>) -> BridgeResult<CheckpointStatus> {
        let path = path.into();
        self.request(|response_sender| AgentCommand::LoadCheckpoint {
            path,
            response_sender,
        })
        .await
    }

    pub async fn save_checkpoint(&self, path: impl Into<PathBuf>) -> BridgeResult<CheckpointStatus> {
        let path = path.into();
        self.request(|response_sender| AgentCommand::SaveCheckpoint {
            path,
            response_sender,
        })
        .await
    }

    pub async fn load_module(&self, name: &str, args: Vec<String>) -> BridgeResult<()> {
        let name = name.to_string();
        self.request(|response_sender| AgentCommand::LoadModule {
            name,
            args,
            response_sender,
        })
        .await
    }

    pub async fn last_action_values(&self) -> BridgeResult<Vec<f32>> {
        self.request(|response_sender| AgentCommand::LastActionValues { response_sender })
            .await
    }

    pub fn is_alive(&self) -> bool {
        !self.command_tx.is_closed()
            && self
                .thread
                .as_ref()
                .is_some_and(|thread| !thread.is_finished())
    }

    /// Closes the command channel and waits for queued commands to drain and
    /// the agent to be released.
    pub async fn shutdown(mut self) -> BridgeResult<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        drop(self.command_tx);
        tokio::task::spawn_blocking(move || thread.join())
            .await
            .map_err(|_| BridgeError::WorkerUnavailable)?
            .map_err(|_| BridgeError::WorkerUnavailable)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> AgentCommand,
    ) -> BridgeResult<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(command(response_tx))
            .await
            .map_err(|_| BridgeError::WorkerUnavailable)?;
        response_rx
            .await
            .map_err(|_| BridgeError::WorkerUnavailable)?
    }
}

fn run(mut agent: Agent, mut command_rx: mpsc::Receiver<AgentCommand>) {
    tracing::debug!(module = %agent.module_name(), "Agent worker started");
    while let Some(command) = command_rx.blocking_recv() {
        match command {
            AgentCommand::NextAction {
                state,
                response_sender,
            } => {
                let _ = response_sender.send(agent.next_action(&state));
            }
            AgentCommand::NextReward {
                reward,
                end_episode,
                response_sender,
            } => {
                let _ = response_sender.send(agent.next_reward(reward, end_episode));
            }
            AgentCommand::LoadCheckpoint {
                path,
                response_sender,
            } => {
                let _ = response_sender.send(agent.load_checkpoint(&path));
            }
            AgentCommand::SaveCheckpoint {
                path,
                response_sender,
            } => {
                let _ = response_sender.send(agent.save_checkpoint(&path));
            }
            AgentCommand::LoadModule {
                name,
                args,
                response_sender,
            } => {
                let _ = response_sender.send(agent.load_module_with_args(&name, args));
            }
            AgentCommand::LastActionValues { response_sender } => {
                let _ = response_sender.send(Ok(agent.last_action_values().to_vec()));
            }
        }
    }
    tracing::debug!(module = %agent.module_name(), "Agent worker stopped");
}
