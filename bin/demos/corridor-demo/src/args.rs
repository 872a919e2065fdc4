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

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "corridor-demo",
    version,
    about = "Trains a policy module on a one-dimensional corridor through the agent bridge"
)]
pub struct Args {
    #[arg(long, help = "Bridge configuration file (defaults to config/rlbridge.toml)")]
    pub config: Option<PathBuf>,
    #[arg(long, help = "Policy module name, overriding the configuration")]
    pub module: Option<String>,
    #[arg(long, help = "Corridor length; overrides the configured input size")]
    pub length: Option<u32>,
    #[arg(long, default_value_t = 200)]
    pub episodes: u32,
    #[arg(long = "max-steps", help = "Step limit per episode (default: 4 x length)")]
    pub max_steps: Option<u32>,
    #[arg(long, help = "Checkpoint to load before training")]
    pub load: Option<PathBuf>,
    #[arg(long, help = "Checkpoint to write after training")]
    pub save: Option<PathBuf>,
    #[arg(
        long,
        default_value_t = false,
        help = "Drive the agent through a dedicated worker thread"
    )]
    pub worker: bool,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}
