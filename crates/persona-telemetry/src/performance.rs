// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Mode switch latency tracking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use persona_core::config::PerformanceConfig;
use persona_core::utils::RingBuffer;
use persona_core::{Clock, ModeId, SystemClock};
use serde::{Deserialize, Serialize};

/// One completed switch.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchTiming {
    /// The mode switched to.
    pub mode_id: ModeId,
    /// When the switch started.
    pub started_at: Instant,
    /// How long the switch took.
    pub elapsed_ms: f64,
}

/// Rolling statistics over the recent switch window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// Mean latency of the window.
    pub average_ms: f64,
    /// Worst latency of the window.
    pub max_ms: f64,
    /// 95th percentile latency of the window.
    pub p95_ms: f64,
    /// Latency of the most recent switch.
    pub last_ms: Option<f64>,
    /// Samples in the window.
    pub sample_count: usize,
    /// The latency goal.
    pub target_ms: f64,
    /// Switches over the target since creation or the last reset.
    pub over_target_count: u64,
}

struct PerfState {
    started: HashMap<ModeId, Instant>,
    window: RingBuffer<SwitchTiming>,
    over_target_count: u64,
}

/// Measures switch latency against a target.
///
/// Timers are keyed by mode, so overlapping switches of different modes are
/// timed independently.
pub struct PerformanceMonitor {
    state: Mutex<PerfState>,
    target_ms: f64,
    clock: Arc<dyn Clock>,
}

impl PerformanceMonitor {
    /// Creates a monitor from its configuration.
    pub fn new(config: &PerformanceConfig) -> Self {
        Self {
            state: Mutex::new(PerfState {
                started: HashMap::new(),
                window: RingBuffer::new(config.window_size),
                over_target_count: 0,
            }),
            target_ms: config.target_switch_ms,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock timers are measured with.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self) -> MutexGuard<'_, PerfState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts (or restarts) the timer for a mode.
    pub fn start_timer(&self, mode_id: &ModeId) {
        let now = self.clock.now();
        self.lock().started.insert(mode_id.clone(), now);
    }

    /// Stops the timer for a mode and records the sample.
    ///
    /// Returns `0.0` and records nothing if no timer was started.
    pub fn end_timer(&self, mode_id: &ModeId) -> f64 {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(started_at) = state.started.remove(mode_id) else {
            log::warn!(
                "PerformanceMonitor: end_timer('{}') without a matching start_timer",
                mode_id
            );
            return 0.0;
        };

        let elapsed_ms = now.saturating_duration_since(started_at).as_nanos() as f64 / 1_000_000.0;
        state.window.push(SwitchTiming {
            mode_id: mode_id.clone(),
            started_at,
            elapsed_ms,
        });
        if elapsed_ms > self.target_ms {
            state.over_target_count += 1;
            log::warn!(
                "PerformanceMonitor: switch to '{}' took {:.1}ms (target {:.0}ms)",
                mode_id,
                elapsed_ms,
                self.target_ms
            );
        } else {
            log::debug!(
                "PerformanceMonitor: switch to '{}' took {:.1}ms",
                mode_id,
                elapsed_ms
            );
        }
        elapsed_ms
    }

    /// Discards a pending timer without recording a sample.
    pub fn cancel_timer(&self, mode_id: &ModeId) -> bool {
        self.lock().started.remove(mode_id).is_some()
    }

    /// Starts a timer that is cancelled if dropped before [`SwitchTimer::finish`].
    pub fn scoped(&self, mode_id: &ModeId) -> SwitchTimer<'_> {
        self.start_timer(mode_id);
        SwitchTimer {
            monitor: self,
            mode_id: mode_id.clone(),
            finished: false,
        }
    }

    /// The latency goal.
    pub fn target_ms(&self) -> f64 {
        self.target_ms
    }

    /// The recorded window, oldest first.
    pub fn samples(&self) -> Vec<SwitchTiming> {
        self.lock().window.iter().cloned().collect()
    }

    /// Returns rolling statistics over the window.
    pub fn stats(&self) -> PerformanceStats {
        let state = self.lock();
        let window = &state.window;

        let mut sorted: Vec<f64> = window.iter().map(|t| t.elapsed_ms).collect();
        sorted.sort_by(f64::total_cmp);
        let p95_ms = if sorted.is_empty() {
            0.0
        } else {
            let rank = (sorted.len() as f64 * 0.95).ceil() as usize;
            sorted[rank.clamp(1, sorted.len()) - 1]
        };

        PerformanceStats {
            average_ms: window.average_by(|t| t.elapsed_ms),
            max_ms: window.max_by(|t| t.elapsed_ms),
            p95_ms,
            last_ms: window.latest().map(|t| t.elapsed_ms),
            sample_count: window.len(),
            target_ms: self.target_ms,
            over_target_count: state.over_target_count,
        }
    }

    /// Drops every sample, pending timer and counter.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.started.clear();
        state.window.clear();
        state.over_target_count = 0;
    }
}

/// RAII switch timer returned by [`PerformanceMonitor::scoped`].
///
/// Dropping it without calling [`finish`](Self::finish) (for instance when
/// the switching future is cancelled) discards the pending start, so
/// abandoned switches never pollute the window.
pub struct SwitchTimer<'a> {
    monitor: &'a PerformanceMonitor,
    mode_id: ModeId,
    finished: bool,
}

impl SwitchTimer<'_> {
    /// Records the sample and returns the elapsed milliseconds.
    pub fn finish(mut self) -> f64 {
        self.finished = true;
        self.monitor.end_timer(&self.mode_id)
    }
}

impl Drop for SwitchTimer<'_> {
    fn drop(&mut self) {
        if !self.finished && self.monitor.cancel_timer(&self.mode_id) {
            log::debug!(
                "PerformanceMonitor: switch to '{}' abandoned before completion",
                self.mode_id
            );
        }
    }
}
