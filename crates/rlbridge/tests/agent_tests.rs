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

mod common;

use common::{lookup_builder, with_test_policies};
use rlbridge::{
    runtime, AgentBuilder, AgentState, ArgumentAdapter, BridgeError, HostTensor, ModuleOrigin,
    RuntimeConfig, Slot,
};

#[test]
fn construction_yields_ready_agent() -> anyhow::Result<()> {
    let agent = lookup_builder().build()?;
    assert_eq!(agent.state(), AgentState::Ready);
    assert!(agent.runtime_ready());
    assert_eq!(agent.module_name(), "lookup");
    assert_eq!(agent.num_inputs(), 4);
    assert_eq!(agent.num_actions(), 2);
    assert_eq!(agent.bindings().origin(), &ModuleOrigin::Registered);
    assert_eq!(
        agent.bindings().slot(Slot::Action).adapter,
        Some(ArgumentAdapter::ActionIndex)
    );
    assert!(agent.supports_checkpoints());
    Ok(())
}

#[test]
fn ensure_loaded_is_idempotent() -> anyhow::Result<()> {
    let first = runtime::ensure_loaded()?;
    let second = runtime::ensure_loaded()?;
    assert!(std::ptr::eq(first, second));
    assert_eq!(first.loaded_at(), second.loaded_at());
    assert!(runtime::is_loaded());
    Ok(())
}

#[test]
fn missing_required_function_fails_construction() {
    let err = lookup_builder()
        .module("missing_reward")
        .build()
        .err()
        .expect("construction should fail");
    assert_eq!(
        err,
        BridgeError::RequiredFunctionMissing {
            module: "missing_reward".to_string(),
            function: "next_reward".to_string(),
        }
    );

    let err = lookup_builder()
        .module("wrong_signature")
        .build()
        .err()
        .expect("construction should fail");
    assert!(matches!(
        err,
        BridgeError::RequiredFunctionMissing { ref function, .. } if function == "next_action"
    ));
}

#[test]
fn renamed_function_must_exist() {
    let err = lookup_builder()
        .function(Slot::Reward, "learn")
        .build()
        .err()
        .expect("construction should fail");
    assert!(matches!(
        err,
        BridgeError::RequiredFunctionMissing { ref function, .. } if function == "learn"
    ));
}

#[test]
fn unknown_and_invalid_modules_are_rejected() {
    assert!(matches!(
        lookup_builder().module("no_such_policy").build(),
        Err(BridgeError::ModuleNotFound { .. })
    ));
    assert!(matches!(
        lookup_builder().module("no_memory").build(),
        Err(BridgeError::ModuleInvalid { .. })
    ));
    let broken = lookup_builder()
        .register_source("broken", "(module (func")
        .module("broken")
        .build();
    assert!(matches!(broken, Err(BridgeError::ModuleInvalid { .. })));
}

#[test]
fn trapping_initializer_rejects_module() {
    match lookup_builder().module("trapping_init").build() {
        Err(BridgeError::ModuleInvalid { name, reason }) => {
            assert_eq!(name, "trapping_init");
            assert!(reason.contains("_initialize"), "{reason}");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("trapping initializer was accepted"),
    }
}

#[test]
fn lookup_policy_scenario() -> anyhow::Result<()> {
    let mut agent = lookup_builder().build()?;
    assert_eq!(agent.next_action(&[0.0, 0.0, 0.0, 0.0])?, 0);
    agent.next_reward(1.0, false)?;
    assert_eq!(agent.next_action(&[0.0, 0.0, 0.0, 0.0])?, 0);
    agent.next_reward(-1.0, true)?;
    assert_eq!(agent.last_reward(), (-1.0, true));
    assert_eq!(agent.next_action(&[0.0, 0.0, 0.0, 0.0])?, 1);
    assert_eq!(agent.next_action(&[1.0, 0.0, 0.0, 0.0])?, 0);
    assert_eq!(agent.episodes(), 1);
    assert_eq!(agent.steps(), 4);

    // The module's own record of the last reward, read back through its checkpoint.
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("scenario.ckpt");
    agent.save_checkpoint(&path)?;
    let bytes = std::fs::read(&path)?;
    assert_eq!(bytes[4..8], (-1.0f32).to_le_bytes());
    Ok(())
}

#[test]
fn shape_mismatch_leaves_agent_usable() -> anyhow::Result<()> {
    let mut agent = lookup_builder().build()?;
    assert_eq!(agent.next_action(&[1.0, 0.0, 0.0, 0.0])?, 1);
    let err = agent.next_action(&[1.0, 0.0, 0.0]).unwrap_err();
    assert_eq!(
        err,
        BridgeError::ShapeMismatch {
            expected: vec![4],
            actual: vec![3],
        }
    );
    assert!(err.is_recoverable());
    assert_eq!(agent.state(), AgentState::Ready);
    assert_eq!(agent.last_action_values(), &[0.0, 1.0]);
    assert_eq!(agent.next_action(&[0.0, 0.0, 0.0, 0.0])?, 0);
    Ok(())
}

#[test]
fn out_of_range_action_is_reported() -> anyhow::Result<()> {
    let mut agent = lookup_builder().module("out_of_range").build()?;
    let err = agent.next_action(&[0.0; 4]).unwrap_err();
    assert_eq!(
        err,
        BridgeError::ActionRange {
            index: 7,
            num_actions: 2,
        }
    );
    assert_eq!(agent.next_action_or(&[0.0; 4], 1), 1);
    let metrics = agent.slot_metrics(Slot::Action);
    assert_eq!(metrics.total_calls, 2);
    assert_eq!(metrics.error_count, 2);
    Ok(())
}

#[test]
fn distribution_policy_uses_argmax_over_image_state() -> anyhow::Result<()> {
    let mut agent = with_test_policies(AgentBuilder::image(2, 1, 1, 2))
        .module("echo")
        .build()?;
    assert_eq!(
        agent.bindings().slot(Slot::Action).adapter,
        Some(ArgumentAdapter::ActionDistribution)
    );
    assert_eq!(
        agent.bindings().slot(Slot::Reward).adapter,
        Some(ArgumentAdapter::RewardWithAction)
    );
    assert_eq!(
        agent.next_action_tensor(HostTensor::shaped(&[1, 1, 2], &[0.2, 0.9]))?,
        1
    );
    assert_eq!(agent.last_action_values(), &[0.2, 0.9]);

    let err = agent
        .next_action_tensor(HostTensor::shaped(&[2, 1, 1], &[0.9, 0.2]))
        .unwrap_err();
    assert!(matches!(err, BridgeError::ShapeMismatch { .. }));
    assert_eq!(agent.last_action_values(), &[0.2, 0.9]);

    let err = agent.next_action(&[f32::NAN, 0.0]).unwrap_err();
    assert!(matches!(err, BridgeError::RuntimeInternal { .. }));
    assert_eq!(agent.last_action_values(), &[0.2, 0.9]);

    agent.next_reward(0.5, false)?;
    assert!(!agent.supports_checkpoints());
    Ok(())
}

#[test]
fn traps_become_per_call_failures() -> anyhow::Result<()> {
    let mut agent = lookup_builder().module("trapping").build()?;
    let err = agent.next_action(&[0.0; 4]).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::RuntimeInternal { ref function, .. } if function == "next_action"
    ));
    agent.next_reward(1.0, true)?;
    assert_eq!(agent.state(), AgentState::Ready);
    Ok(())
}

#[test]
fn reward_and_checkpoint_traps_leave_agent_ready() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut agent = lookup_builder().module("faulting").build()?;
    assert_eq!(agent.next_action(&[0.0; 4])?, 1);

    let err = agent.next_reward(2.5, true).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::RuntimeInternal { ref function, .. } if function == "next_reward"
    ));
    assert!(err.is_recoverable());
    assert_eq!(agent.last_reward(), (0.0, false));
    assert_eq!(agent.episodes(), 0);
    assert_eq!(agent.state(), AgentState::Ready);

    let err = agent
        .save_checkpoint(dir.path().join("faulting.ckpt"))
        .unwrap_err();
    assert!(matches!(
        err,
        BridgeError::RuntimeInternal { ref function, .. } if function == "save_model"
    ));
    assert!(matches!(
        agent.load_checkpoint(dir.path().join("faulting.ckpt")),
        Err(BridgeError::RuntimeInternal { .. })
    ));
    assert_eq!(agent.state(), AgentState::Ready);
    assert_eq!(agent.slot_metrics(Slot::Reward).error_count, 1);
    assert_eq!(agent.slot_metrics(Slot::Save).error_count, 1);
    assert_eq!(agent.next_action(&[0.0; 4])?, 1);
    Ok(())
}

#[test]
fn fuel_limit_stops_runaway_policy() -> anyhow::Result<()> {
    let mut agent = lookup_builder()
        .module("spinning")
        .limits(RuntimeConfig {
            fuel_per_call: Some(10_000),
        })
        .build()?;
    assert!(matches!(
        agent.next_action(&[0.0; 4]),
        Err(BridgeError::RuntimeInternal { .. })
    ));
    Ok(())
}

#[test]
fn failed_module_swap_keeps_previous_bindings() -> anyhow::Result<()> {
    let mut agent = lookup_builder().build()?;
    agent.next_reward(0.0, true)?;

    let err = agent.load_module("does_not_exist").unwrap_err();
    assert!(matches!(err, BridgeError::ModuleNotFound { .. }));
    assert_eq!(agent.module_name(), "lookup");

    let err = agent.load_module("missing_reward").unwrap_err();
    assert!(matches!(err, BridgeError::RequiredFunctionMissing { .. }));
    assert_eq!(agent.module_name(), "lookup");

    // policy state survived: one terminal observed
    assert_eq!(agent.next_action(&[0.0; 4])?, 1);
    Ok(())
}

#[test]
fn module_swap_passes_arguments() -> anyhow::Result<()> {
    let mut agent = lookup_builder().build()?;
    agent.load_module_with_args("argc", ["--mode"])?;
    assert_eq!(agent.module_name(), "argc");
    assert_eq!(agent.bindings().args(), &["--mode".to_string()]);
    assert_eq!(agent.next_action(&[0.0; 4])?, 1);
    assert!(!agent.supports_checkpoints());

    agent.load_module("argc")?;
    assert_eq!(agent.next_action(&[0.0; 4])?, 0);
    Ok(())
}

#[test]
fn constructor_arguments_reach_the_module() -> anyhow::Result<()> {
    let mut agent = lookup_builder().module("argc").args(["a"]).build()?;
    assert_eq!(agent.next_action(&[0.0; 4])?, 1);
    Ok(())
}
