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

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

const EWMA_WEIGHT: f64 = 0.1;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SlotMetrics {
    pub total_calls: u64,
    pub error_count: u64,
    pub avg_call_time: Duration,
    pub last_called: Option<DateTime<Utc>>,
}

impl SlotMetrics {
    pub fn record_call(&mut self, duration: Duration, success: bool) {
        let calls_before = self.total_calls;
        self.total_calls += 1;
        if !success {
            self.error_count += 1;
        } else if calls_before == 0 || self.avg_call_time.is_zero() {
            self.avg_call_time = duration;
        } else {
            let old = self.avg_call_time.as_secs_f64();
            let new = (1.0 - EWMA_WEIGHT) * old + EWMA_WEIGHT * duration.as_secs_f64();
            self.avg_call_time = Duration::from_secs_f64(new);
        }
        self.last_called = Some(Utc::now());
    }
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        (self.total_calls - self.error_count) as f64 / self.total_calls as f64
    }
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
