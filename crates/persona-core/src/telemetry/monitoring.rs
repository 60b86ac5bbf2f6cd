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

//! Provides the memory provider contract and the pressure classification.
//!
//! A provider actively polls the host for its memory figures; the memory
//! monitor in `persona-telemetry` samples one periodically and the resource
//! registry consults one for its pressure check.

use std::borrow::Cow;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};

/// A source of host memory figures.
pub trait MemoryProvider: Send + Sync + Debug + 'static {
    /// Returns a unique, human-readable identifier for this provider.
    fn provider_id(&self) -> Cow<'static, str>;

    /// Polls the host. Returns `None` when the host exposes no memory API.
    fn read(&self) -> Option<MemoryReading>;
}

/// A snapshot of memory usage reported by a [`MemoryProvider`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryReading {
    /// Bytes currently in use.
    pub used_bytes: u64,
    /// Total bytes known to the host.
    pub total_bytes: u64,
    /// The ceiling usage is measured against (a cgroup limit, or the total).
    pub limit_bytes: u64,
}

impl MemoryReading {
    /// Usage as a percentage of the limit, or `0.0` when the limit is unknown.
    pub fn pressure_percent(&self) -> f64 {
        if self.limit_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.limit_bytes as f64 * 100.0
        }
    }

    /// Returns the used memory in megabytes (MB).
    pub fn used_mb(&self) -> f64 {
        self.used_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// The memory pressure level of the host.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum MemoryStatus {
    /// Below the warning threshold.
    #[default]
    Normal,
    /// At or above the warning threshold.
    Warning,
    /// At or above the critical threshold.
    Critical,
}

impl MemoryStatus {
    /// Every status, in increasing severity.
    pub const ALL: [MemoryStatus; 3] = [
        MemoryStatus::Normal,
        MemoryStatus::Warning,
        MemoryStatus::Critical,
    ];

    /// Classifies a pressure percentage against the given thresholds.
    pub fn classify(pressure_percent: f64, warning_percent: f64, critical_percent: f64) -> Self {
        if pressure_percent >= critical_percent {
            MemoryStatus::Critical
        } else if pressure_percent >= warning_percent {
            MemoryStatus::Warning
        } else {
            MemoryStatus::Normal
        }
    }
}
