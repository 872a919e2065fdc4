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

#![allow(dead_code)]

use rlbridge::AgentBuilder;
use std::path::PathBuf;

/// Deterministic: action is `state[0] > 0.5`, flipped after every odd number
/// of terminal rewards. Checkpoints hold the terminal count followed by the
/// last reward the module received.
pub const LOOKUP_POLICY: &str = r#"
(module
  (import "bridge" "file_read" (func $file_read (param i32 i32 i32 i32) (result i64)))
  (import "bridge" "file_write" (func $file_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (global $terminals (mut i32) (i32.const 0))
  (global $last_reward (mut f32) (f32.const 0))
  (func (export "next_action") (param $s i32) (param $n i32) (result i32)
    (i32.xor
      (f32.gt (f32.load (local.get $s)) (f32.const 0.5))
      (i32.and (global.get $terminals) (i32.const 1))))
  (func (export "next_reward") (param $s i32) (param $n i32) (param $r i32)
    (global.set $last_reward (f32.load (local.get $r)))
    (if (f32.ne (f32.load offset=4 (local.get $r)) (f32.const 0))
      (then (global.set $terminals (i32.add (global.get $terminals) (i32.const 1))))))
  (func (export "save_model") (param $p i32) (param $len i32) (result i32)
    (i32.store (i32.const 0) (global.get $terminals))
    (f32.store (i32.const 4) (global.get $last_reward))
    (i32.eqz (call $file_write (local.get $p) (local.get $len) (i32.const 0) (i32.const 8))))
  (func (export "load_model") (param $p i32) (param $len i32) (result i32)
    (if (i64.ne (call $file_read (local.get $p) (local.get $len) (i32.const 0) (i32.const 8))
                (i64.const 8))
      (then (return (i32.const 0))))
    (global.set $terminals (i32.load (i32.const 0)))
    (global.set $last_reward (f32.load (i32.const 4)))
    (i32.const 1)))
"#;

/// Picks the number of module arguments as its action.
pub const ARGC_POLICY: &str = r#"
(module
  (import "bridge" "argc" (func $argc (result i32)))
  (memory (export "memory") 1)
  (func (export "next_action") (param i32 i32) (result i32) (call $argc))
  (func (export "next_reward") (param i32 i32 i32)))
"#;

/// Writes the state back as the action distribution.
pub const ECHO_DISTRIBUTION_POLICY: &str = r#"
(module
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))
  (func (export "alloc") (param $bytes i32) (result i32)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (global.get $heap) (local.get $bytes)))
    (local.get $ptr))
  (func (export "next_action") (param $s i32) (param $n i32) (param $out i32) (param $k i32)
    (memory.copy (local.get $out) (local.get $s) (i32.shl (local.get $k) (i32.const 2))))
  (func (export "next_reward") (param i32 i32 i32) (result i32) (i32.const 0)))
"#;

pub const OUT_OF_RANGE_POLICY: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "next_action") (param i32 i32) (result i32) (i32.const 7))
  (func (export "next_reward") (param i32 i32 i32)))
"#;

pub const MISSING_REWARD_POLICY: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "next_action") (param i32 i32) (result i32) (i32.const 0)))
"#;

pub const WRONG_SIGNATURE_POLICY: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "next_action") (param f32) (result f32) (local.get 0))
  (func (export "next_reward") (param i32 i32 i32)))
"#;

pub const NO_MEMORY_POLICY: &str = r#"
(module
  (func (export "next_action") (param i32 i32) (result i32) (i32.const 0))
  (func (export "next_reward") (param i32 i32 i32)))
"#;

pub const TRAPPING_POLICY: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "next_action") (param i32 i32) (result i32) (unreachable))
  (func (export "next_reward") (param i32 i32 i32)))
"#;

/// Acts normally, but its reward and checkpoint exports trap.
pub const FAULTING_POLICY: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "next_action") (param i32 i32) (result i32) (i32.const 1))
  (func (export "next_reward") (param i32 i32 i32) (unreachable))
  (func (export "save_model") (param i32 i32) (result i32) (unreachable))
  (func (export "load_model") (param i32 i32) (result i32) (unreachable)))
"#;

/// Reports success from `save_model` whatever `file_write` returned.
pub const CARELESS_SAVE_POLICY: &str = r#"
(module
  (import "bridge" "file_write" (func $file_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (func (export "next_action") (param i32 i32) (result i32) (i32.const 0))
  (func (export "next_reward") (param i32 i32 i32))
  (func (export "save_model") (param $p i32) (param $len i32) (result i32)
    (drop (call $file_write (local.get $p) (local.get $len) (i32.const 0) (i32.const 4)))
    (i32.const 1)))
"#;

pub const TRAPPING_INIT_POLICY: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "_initialize") (unreachable))
  (func (export "next_action") (param i32 i32) (result i32) (i32.const 0))
  (func (export "next_reward") (param i32 i32 i32)))
"#;

pub const SPINNING_POLICY: &str = r#"
(module
  (memory (export "memory") 1)
  (func (export "next_action") (param i32 i32) (result i32)
    (loop $forever (br $forever))
    (i32.const 0))
  (func (export "next_reward") (param i32 i32 i32)))
"#;

/// Flat 4-input, 2-action builder with every test policy registered.
pub fn lookup_builder() -> AgentBuilder {
    with_test_policies(AgentBuilder::flat(4, 2).module("lookup"))
}

pub fn with_test_policies(builder: AgentBuilder) -> AgentBuilder {
    builder
        .register_source("lookup", LOOKUP_POLICY)
        .register_source("argc", ARGC_POLICY)
        .register_source("echo", ECHO_DISTRIBUTION_POLICY)
        .register_source("out_of_range", OUT_OF_RANGE_POLICY)
        .register_source("missing_reward", MISSING_REWARD_POLICY)
        .register_source("wrong_signature", WRONG_SIGNATURE_POLICY)
        .register_source("no_memory", NO_MEMORY_POLICY)
        .register_source("trapping", TRAPPING_POLICY)
        .register_source("faulting", FAULTING_POLICY)
        .register_source("careless_save", CARELESS_SAVE_POLICY)
        .register_source("trapping_init", TRAPPING_INIT_POLICY)
        .register_source("spinning", SPINNING_POLICY)
}

pub fn policies_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../policies")
}

pub fn config_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/rlbridge.toml")
}
