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

pub const LEFT: usize = 0;
pub const RIGHT: usize = 1;
pub const NUM_ACTIONS: u32 = 2;

const GOAL_REWARD: f32 = 1.0;
const STEP_PENALTY: f32 = -0.01;

/// Agent starts at cell 0 and is rewarded for reaching the last cell.
/// The state is a one-hot encoding of the current cell.
#[derive(Debug, Clone)]
pub struct Corridor {
    length: usize,
    max_steps: u32,
    position: usize,
    steps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub reward: f32,
    pub done: bool,
    pub reached_goal: bool,
}

impl Corridor {
    pub fn new(length: usize, max_steps: u32) -> Self {
        Self {
            length: length.max(2),
            max_steps,
            position: 0,
            steps: 0,
        }
    }
    pub fn reset(&mut self) -> Vec<f32> {
        self.position = 0;
        self.steps = 0;
        self.observe()
    }
    pub fn observe(&self) -> Vec<f32> {
        let mut state = vec![0.0; self.length];
        state[self.position] = 1.0;
        state
    }
    pub fn steps(&self) -> u32 {
        self.steps
    }
    pub fn step(&mut self, action: usize) -> Transition {
        self.steps += 1;
        match action {
            LEFT => self.position = self.position.saturating_sub(1),
            RIGHT => self.position = (self.position + 1).min(self.length - 1),
            _ => {}
        }
        let reached_goal = self.position == self.length - 1;
        Transition {
            reward: if reached_goal { GOAL_REWARD } else { STEP_PENALTY },
            done: reached_goal || self.steps >= self.max_steps,
            reached_goal,
        }
    }
}
