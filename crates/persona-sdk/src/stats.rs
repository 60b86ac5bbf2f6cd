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

use persona_data::{CacheStats, RegistryStats};
use persona_telemetry::{MemoryMonitorStats, PerformanceStats};
use serde::{Deserialize, Serialize};

/// A snapshot of every runtime component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeStats {
    /// Component cache occupancy and hit rate.
    pub cache: CacheStats,
    /// Tracked graphics resources.
    pub registry: RegistryStats,
    /// Switch latency.
    pub performance: PerformanceStats,
    /// Host memory pressure.
    pub memory: MemoryMonitorStats,
}

impl RuntimeStats {
    /// Renders the snapshot as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
