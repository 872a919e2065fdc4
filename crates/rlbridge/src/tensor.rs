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

//! Marshalling between host `f32` buffers and tensors living in the policy
//! module's linear memory.
//!
//! Tensors are row-major, contiguous, little-endian `f32`. Every write is a
//! copy, so the host buffer can be reused as soon as a call returns.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use wasmtime::{AsContext, AsContextMut, Memory};

pub const F32_BYTES: usize = std::mem::size_of::<f32>();
const MAX_TENSOR_BYTES: usize = i32::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InputShape {
    Flat {
        num_inputs: u32,
    },
    Image {
        width: u32,
        height: u32,
        channels: u32,
    },
}

impl InputShape {
    pub fn flat(num_inputs: u32) -> Self {
        InputShape::Flat { num_inputs }
    }
    pub fn image(width: u32, height: u32, channels: u32) -> Self {
        InputShape::Image {
            width,
            height,
            channels,
        }
    }
    pub fn validate(&self) -> BridgeResult<()> {
        if self.dims().iter().any(|d| *d == 0) {
            return Err(BridgeError::InvalidDimensions(format!(
                "input dimensions must be > 0, got {:?}",
                self.dims()
            )));
        }
        let bytes = self
            .dims()
            .iter()
            .try_fold(F32_BYTES, |acc, d| acc.checked_mul(*d))
            .filter(|b| *b <= MAX_TENSOR_BYTES);
        if bytes.is_none() {
            return Err(BridgeError::InvalidDimensions(format!(
                "input tensor {:?} does not fit in guest memory",
                self.dims()
            )));
        }
        Ok(())
    }
    /// Number of `f32` elements in one state.
    pub fn len(&self) -> usize {
        self.dims().iter().product()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// `[num_inputs]` or `[channels, height, width]`.
    pub fn dims(&self) -> Vec<usize> {
        match *self {
            InputShape::Flat { num_inputs } => vec![num_inputs as usize],
            InputShape::Image {
                width,
                height,
                channels,
            } => vec![channels as usize, height as usize, width as usize],
        }
    }
    pub fn is_image(&self) -> bool {
        matches!(self, InputShape::Image { .. })
    }
}

/// A host-owned state buffer with an optional shape descriptor.
#[derive(Debug, Clone, Copy)]
pub struct HostTensor<'a> {
    pub dims: Option<&'a [usize]>,
    pub data: &'a [f32],
}

impl<'a> HostTensor<'a> {
    pub fn flat(data: &'a [f32]) -> Self {
        Self { dims: None, data }
    }
    pub fn shaped(dims: &'a [usize], data: &'a [f32]) -> Self {
        Self {
            dims: Some(dims),
            data,
        }
    }
}

/// Byte range reserved inside the policy module's linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestRegion {
    pub offset: usize,
    pub bytes: usize,
}

impl GuestRegion {
    pub fn for_f32s(offset: usize, count: usize) -> Self {
        Self {
            offset,
            bytes: count * F32_BYTES,
        }
    }
    pub fn ptr(&self) -> i32 {
        self.offset as i32
    }
    pub fn f32_len(&self) -> usize {
        self.bytes / F32_BYTES
    }
}

pub(crate) fn write_f32s(
    memory: &Memory,
    mut store: impl AsContextMut,
    region: GuestRegion,
    values: &[f32],
) -> Result<(), String> {
    let end = region.offset + values.len() * F32_BYTES;
    if values.len() > region.f32_len() {
        return Err(format!(
            "{} values do not fit in a {}-byte region",
            values.len(),
            region.bytes
        ));
    }
    let data = memory.data_mut(&mut store);
    let target = data
        .get_mut(region.offset..end)
        .ok_or_else(|| format!("region {}..{end} outside guest memory", region.offset))?;
    for (chunk, value) in target.chunks_exact_mut(F32_BYTES).zip(values) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    Ok(())
}

pub(crate) fn read_f32s(
    memory: &Memory,
    store: impl AsContext,
    region: GuestRegion,
    out: &mut [f32],
) -> Result<(), String> {
    let end = region.offset + out.len() * F32_BYTES;
    let data = memory.data(&store);
    let source = data
        .get(region.offset..end)
        .ok_or_else(|| format!("region {}..{end} outside guest memory", region.offset))?;
    for (value, chunk) in out.iter_mut().zip(source.chunks_exact(F32_BYTES)) {
        *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(())
}

/// Reusable state/action buffer. The state region is overwritten before each
/// call and the output region holds the last action distribution.
#[derive(Debug, Clone)]
pub struct ActionTensor {
    shape: InputShape,
    num_actions: u32,
    state: GuestRegion,
    output: GuestRegion,
    values: Vec<f32>,
    scratch: Vec<f32>,
}

impl ActionTensor {
    pub(crate) fn new(
        shape: InputShape,
        num_actions: u32,
        state: GuestRegion,
        output: GuestRegion,
    ) -> Self {
        Self {
            shape,
            num_actions,
            state,
            output,
            values: vec![0.0; num_actions as usize],
            scratch: vec![0.0; num_actions as usize],
        }
    }
    pub fn shape(&self) -> InputShape {
        self.shape
    }
    pub fn num_actions(&self) -> u32 {
        self.num_actions
    }
    pub fn state_region(&self) -> GuestRegion {
        self.state
    }
    pub fn output_region(&self) -> GuestRegion {
        self.output
    }
    /// Raw values of the last action result.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn check_shape(&self, state: HostTensor<'_>) -> BridgeResult<()> {
        let expected = self.shape.dims();
        if let Some(dims) = state.dims {
            if dims != expected.as_slice() {
                return Err(BridgeError::ShapeMismatch {
                    expected,
                    actual: dims.to_vec(),
                });
            }
        }
        if state.data.len() != self.shape.len() {
            return Err(BridgeError::ShapeMismatch {
                expected: vec![self.shape.len()],
                actual: vec![state.data.len()],
            });
        }
        Ok(())
    }

    /// Copies a validated host state into the guest state region.
    pub(crate) fn to_runtime(
        &self,
        memory: &Memory,
        store: impl AsContextMut,
        state: HostTensor<'_>,
    ) -> BridgeResult<()> {
        self.check_shape(state)?;
        write_f32s(memory, store, self.state, state.data)
            .map_err(|e| BridgeError::internal("marshal_state", e))
    }

    pub(crate) fn action_from_index(&mut self, index: i32) -> BridgeResult<usize> {
        if index < 0 || index as u32 >= self.num_actions {
            return Err(BridgeError::ActionRange {
                index: i64::from(index),
                num_actions: self.num_actions,
            });
        }
        self.values.fill(0.0);
        self.values[index as usize] = 1.0;
        Ok(index as usize)
    }

    pub(crate) fn action_from_distribution(
        &mut self,
        memory: &Memory,
        store: impl AsContext,
    ) -> BridgeResult<usize> {
        read_f32s(memory, store, self.output, &mut self.scratch)
            .map_err(|e| BridgeError::internal("unmarshal_action", e))?;
        let index = argmax(&self.scratch).ok_or_else(|| {
            BridgeError::internal("unmarshal_action", "action distribution is not finite")
        })?;
        std::mem::swap(&mut self.values, &mut self.scratch);
        Ok(index)
    }
}

/// First index of the largest value, `None` if any value is not finite.
pub fn argmax(values: &[f32]) -> Option<usize> {
    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    Some(best)
}

/// `[reward, end_episode]` packed into one guest tensor.
#[derive(Debug, Clone)]
pub struct RewardTensor {
    region: GuestRegion,
    packed: [f32; 2],
}

impl RewardTensor {
    pub(crate) fn new(region: GuestRegion) -> Self {
        Self {
            region,
            packed: [0.0; 2],
        }
    }
    pub fn region(&self) -> GuestRegion {
        self.region
    }
    pub fn reward(&self) -> f32 {
        self.packed[0]
    }
    pub fn end_episode(&self) -> bool {
        self.packed[1] != 0.0
    }
    pub(crate) fn pack(
        &self,
        memory: &Memory,
        store: impl AsContextMut,
        reward: f32,
        end_episode: bool,
    ) -> BridgeResult<()> {
        let packed = [reward, if end_episode { 1.0 } else { 0.0 }];
        write_f32s(memory, store, self.region, &packed)
            .map_err(|e| BridgeError::internal("marshal_reward", e))
    }

    /// Records the reward once the policy has accepted it.
    pub(crate) fn commit(&mut self, reward: f32, end_episode: bool) {
        self.packed = [reward, if end_episode { 1.0 } else { 0.0 }];
    }
}
