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

use crate::error::{BridgeError, BridgeResult};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use wasmtime::{Engine, Module};

pub const MODULE_PATH_ENV: &str = "RLBRIDGE_MODULE_PATH";
const EXTENSIONS: [&str; 2] = ["wasm", "wat"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOrigin {
    Registered,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ModuleSource {
    pub name: String,
    pub origin: ModuleOrigin,
    pub bytes: Vec<u8>,
}

/// Finds policy modules by name: in-memory sources first, then
/// `<dir>/<name>.wasm` and `<dir>/<name>.wat` along the search path.
#[derive(Debug, Clone, Default)]
pub struct ModuleResolver {
    search_paths: Vec<PathBuf>,
    sources: HashMap<String, Vec<u8>>,
}

impl ModuleResolver {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_search_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            search_paths: paths.into_iter().collect(),
            sources: HashMap::new(),
        }
    }
    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.search_paths.contains(&path) {
            self.search_paths.push(path);
        }
    }
    /// Registers WAT text or a wasm binary under `name`, shadowing files.
    pub fn register_source(&mut self, name: &str, source: impl Into<Vec<u8>>) {
        self.sources.insert(name.to_string(), source.into());
    }
    pub fn has_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Configured directories followed by those in `RLBRIDGE_MODULE_PATH`.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.search_paths.clone();
        if let Some(env_paths) = std::env::var_os(MODULE_PATH_ENV) {
            for path in std::env::split_paths(&env_paths) {
                if !path.as_os_str().is_empty() && !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }
        paths
    }

    pub fn locate(&self, name: &str) -> BridgeResult<ModuleSource> {
        if !is_valid_name(name) {
            return Err(BridgeError::ModuleNotFound {
                name: name.to_string(),
            });
        }
        if let Some(bytes) = self.sources.get(name) {
            return Ok(ModuleSource {
                name: name.to_string(),
                origin: ModuleOrigin::Registered,
                bytes: bytes.clone(),
            });
        }
        for dir in self.search_paths() {
            for ext in EXTENSIONS {
                let candidate = dir.join(format!("{name}.{ext}"));
                if !candidate.is_file() {
                    continue;
                }
                let bytes = fs::read(&candidate).map_err(|e| {
                    BridgeError::invalid_module(name, format!("{}: {e}", candidate.display()))
                })?;
                return Ok(ModuleSource {
                    name: name.to_string(),
                    origin: ModuleOrigin::File(candidate),
                    bytes,
                });
            }
        }
        Err(BridgeError::ModuleNotFound {
            name: name.to_string(),
        })
    }

    pub fn compile(&self, engine: &Engine, name: &str) -> BridgeResult<(Module, ModuleOrigin)> {
        let source = self.locate(name)?;
        let wasm = wat::parse_bytes(&source.bytes)
            .map_err(|e| BridgeError::invalid_module(name, format!("parse: {e}")))?;
        let module = Module::new(engine, &*wasm)
            .map_err(|e| BridgeError::invalid_module(name, format!("compile: {e}")))?;
        Ok((module, source.origin))
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && Path::new(name).components().count() == 1
        && !name.contains(['/', '\\'])
}
