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

//! Host functions importable by policy modules under the `bridge` namespace.
//!
//! File imports return `-1` on failure and keep the error text in
//! [`HostState`] so checkpoint calls can report it.

use crate::logging::log_policy_message;
use std::fs;
use std::path::PathBuf;
use wasmtime::{Caller, Engine, Linker, Memory};

pub const HOST_MODULE: &str = "bridge";

#[derive(Debug, Clone, Default)]
pub struct HostState {
    module: String,
    args: Vec<String>,
    last_io_error: Option<String>,
}

impl HostState {
    pub fn new(module: &str, args: Vec<String>) -> Self {
        Self {
            module: module.to_string(),
            args,
            last_io_error: None,
        }
    }
    pub fn module(&self) -> &str {
        &self.module
    }
    pub fn args(&self) -> &[String] {
        &self.args
    }
    pub fn take_io_error(&mut self) -> Option<String> {
        self.last_io_error.take()
    }
    fn record_io_error(&mut self, path: &str, detail: impl std::fmt::Display) {
        tracing::warn!(module = %self.module, path = path, error = %detail, "Policy file access failed");
        self.last_io_error = Some(detail.to_string());
    }
}

pub(crate) fn build_linker(engine: &Engine) -> anyhow::Result<Linker<HostState>> {
    let mut linker = Linker::new(engine);
    linker.func_wrap(HOST_MODULE, "argc", |caller: Caller<'_, HostState>| -> i32 {
        caller.data().args.len() as i32
    })?;
    linker.func_wrap(
        HOST_MODULE,
        "arg_len",
        |caller: Caller<'_, HostState>, index: i32| -> i32 {
            arg_at(&caller, index).map_or(-1, |arg| arg.len() as i32)
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "arg_read",
        |mut caller: Caller<'_, HostState>, index: i32, ptr: i32, cap: i32| -> i32 {
            let Some(arg) = arg_at(&caller, index).map(str::to_owned) else {
                return -1;
            };
            let n = arg.len().min(usize::try_from(cap).unwrap_or(0));
            match write_guest(&mut caller, ptr, &arg.as_bytes()[..n]) {
                Ok(()) => n as i32,
                Err(_) => -1,
            }
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "log",
        |mut caller: Caller<'_, HostState>, level: i32, ptr: i32, len: i32| {
            if let Ok(bytes) = read_guest(&mut caller, ptr, len) {
                let message = String::from_utf8_lossy(&bytes);
                log_policy_message(&caller.data().module, level, &message);
            }
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "file_size",
        |mut caller: Caller<'_, HostState>, path_ptr: i32, path_len: i32| -> i64 {
            let path = match guest_path(&mut caller, path_ptr, path_len) {
                Ok(path) => path,
                Err(e) => {
                    caller.data_mut().record_io_error("<invalid>", e);
                    return -1;
                }
            };
            match fs::metadata(&path) {
                Ok(meta) => i64::try_from(meta.len()).unwrap_or(-1),
                Err(e) => {
                    caller.data_mut().record_io_error(&path.to_string_lossy(), e);
                    -1
                }
            }
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "file_read",
        |mut caller: Caller<'_, HostState>,
         path_ptr: i32,
         path_len: i32,
         buf_ptr: i32,
         cap: i32|
         -> i64 {
            let path = match guest_path(&mut caller, path_ptr, path_len) {
                Ok(path) => path,
                Err(e) => {
                    caller.data_mut().record_io_error("<invalid>", e);
                    return -1;
                }
            };
            let display = path.to_string_lossy().into_owned();
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    caller.data_mut().record_io_error(&display, e);
                    return -1;
                }
            };
            if bytes.len() > usize::try_from(cap).unwrap_or(0) {
                caller.data_mut().record_io_error(
                    &display,
                    format!("file is {} bytes, buffer holds {cap}", bytes.len()),
                );
                return -1;
            }
            match write_guest(&mut caller, buf_ptr, &bytes) {
                Ok(()) => bytes.len() as i64,
                Err(e) => {
                    caller.data_mut().record_io_error(&display, e);
                    -1
                }
            }
        },
    )?;
    linker.func_wrap(
        HOST_MODULE,
        "file_write",
        |mut caller: Caller<'_, HostState>,
         path_ptr: i32,
         path_len: i32,
         buf_ptr: i32,
         len: i32|
         -> i32 {
            let path = match guest_path(&mut caller, path_ptr, path_len) {
                Ok(path) => path,
                Err(e) => {
                    caller.data_mut().record_io_error("<invalid>", e);
                    return -1;
                }
            };
            let display = path.to_string_lossy().into_owned();
            let result = read_guest(&mut caller, buf_ptr, len)
                .and_then(|bytes| fs::write(&path, bytes).map_err(|e| e.to_string()));
            match result {
                Ok(()) => 0,
                Err(e) => {
                    caller.data_mut().record_io_error(&display, e);
                    -1
                }
            }
        },
    )?;
    Ok(linker)
}

fn arg_at<'a>(caller: &'a Caller<'_, HostState>, index: i32) -> Option<&'a str> {
    let index = usize::try_from(index).ok()?;
    caller.data().args.get(index).map(String::as_str)
}

fn guest_memory(caller: &mut Caller<'_, HostState>) -> Result<Memory, String> {
    caller
        .get_export("memory")
        .and_then(|export| export.into_memory())
        .ok_or_else(|| "module exports no memory".to_string())
}

fn read_guest(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> Result<Vec<u8>, String> {
    let memory = guest_memory(caller)?;
    let ptr = usize::try_from(ptr).map_err(|_| format!("negative pointer {ptr}"))?;
    let len = usize::try_from(len).map_err(|_| format!("negative length {len}"))?;
    let mut buf = vec![0u8; len];
    memory
        .read(&*caller, ptr, &mut buf)
        .map_err(|e| e.to_string())?;
    Ok(buf)
}

fn write_guest(caller: &mut Caller<'_, HostState>, ptr: i32, bytes: &[u8]) -> Result<(), String> {
    let memory = guest_memory(caller)?;
    let ptr = usize::try_from(ptr).map_err(|_| format!("negative pointer {ptr}"))?;
    memory
        .write(&mut *caller, ptr, bytes)
        .map_err(|e| e.to_string())
}

fn guest_path(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> Result<PathBuf, String> {
    let bytes = read_guest(caller, ptr, len)?;
    String::from_utf8(bytes)
        .map(PathBuf::from)
        .map_err(|_| "path is not valid UTF-8".to_string())
}
