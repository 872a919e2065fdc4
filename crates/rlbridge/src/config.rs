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

use crate::binding::{FunctionNames, DEFAULT_MODULE};
use crate::error::{BridgeError, BridgeResult};
use crate::runtime::RuntimeConfig;
use crate::tensor::InputShape;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    pub runtime: RuntimeConfig,
    pub module: ModuleConfigSection,
    pub agent: Option<AgentConfigSection>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ModuleConfigSection {
    pub name: String,
    pub search_paths: Vec<PathBuf>,
    pub args: Vec<String>,
    pub functions: FunctionNames,
}

impl Default for ModuleConfigSection {
    fn default() -> Self {
        Self {
            name: DEFAULT_MODULE.to_string(),
            search_paths: vec![PathBuf::from("policies")],
            args: Vec::new(),
            functions: FunctionNames::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct AgentConfigSection {
    pub input: InputShape,
    pub num_actions: u32,
}

impl BridgeConfig {
    pub fn load_from_file(config_path: &Path) -> BridgeResult<Self> {
        let content = fs::read_to_string(config_path).map_err(|e| {
            BridgeError::Config(format!("{}: {e}", config_path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", config_path.display())))
    }

    pub fn from_toml_str(content: &str) -> BridgeResult<Self> {
        toml::from_str(content).map_err(|e| BridgeError::Config(e.to_string()))
    }

    pub fn default_config_path() -> PathBuf {
        PathBuf::from("config/rlbridge.toml")
    }

    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();
        Self::load_from_file(&config_path).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Using default bridge configuration");
            Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.module.name, DEFAULT_MODULE);
        assert_eq!(config.runtime.fuel_per_call, None);
    }

    #[test]
    fn parses_image_agent_and_renamed_functions() {
        let config = BridgeConfig::from_toml_str(
            r#"
            [runtime]
            fuel_per_call = 1000000

            [module]
            name = "conv_policy"
            search_paths = ["/opt/policies"]
            args = ["--epsilon", "0.05"]

            [module.functions]
            next_action = "act"

            [agent]
            num_actions = 6

            [agent.input]
            mode = "image"
            width = 84
            height = 84
            channels = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.runtime.fuel_per_call, Some(1_000_000));
        assert_eq!(config.module.functions.next_action, "act");
        assert_eq!(config.module.functions.next_reward, "next_reward");
        let agent = config.agent.unwrap();
        assert_eq!(agent.input, InputShape::image(84, 84, 4));
        assert_eq!(agent.num_actions, 6);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rlbridge.toml");
        fs::write(&path, "[agent]\nnum_actions = \"four\"").unwrap();
        assert!(matches!(
            BridgeConfig::load_from_file(&path),
            Err(BridgeError::Config(_))
        ));
        assert!(matches!(
            BridgeConfig::load_from_file(&dir.path().join("missing.toml")),
            Err(BridgeError::Config(_))
        ));
    }
}
