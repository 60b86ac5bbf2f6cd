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

//! Runtime configuration.
//!
//! Every section is optional in the JSON source; missing fields take the
//! defaults below. Durations are expressed in milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::mode::ModeId;

const MB: u64 = 1024 * 1024;

/// Top-level configuration of the mode runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Component cache budget and staleness policy.
    pub cache: CacheConfig,
    /// Resource registry pressure heuristics.
    pub registry: RegistryConfig,
    /// Switch latency monitoring.
    pub performance: PerformanceConfig,
    /// Host memory sampling.
    pub memory: MemoryMonitorConfig,
    /// Background preloading.
    pub preload: PreloadConfig,
    /// Periodic stats reporting.
    pub telemetry: TelemetryConfig,
}

impl RuntimeConfig {
    /// Parses and validates a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&json)?;
        log::info!("Loaded runtime configuration from '{}'", path.display());
        Ok(config)
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_memory_bytes == 0 {
            return Err(invalid("cache.max_memory_bytes", "must be greater than zero"));
        }
        if self.performance.window_size == 0 {
            return Err(invalid("performance.window_size", "must be greater than zero"));
        }
        if self.performance.target_switch_ms <= 0.0 {
            return Err(invalid("performance.target_switch_ms", "must be positive"));
        }
        if self.memory.sample_interval_ms == 0 {
            return Err(invalid("memory.sample_interval_ms", "must be greater than zero"));
        }
        if self.memory.history_size == 0 {
            return Err(invalid("memory.history_size", "must be greater than zero"));
        }
        let warning = self.memory.warning_percent;
        let critical = self.memory.critical_percent;
        if !(0.0..=100.0).contains(&warning) || !(0.0..=100.0).contains(&critical) {
            return Err(invalid(
                "memory.warning_percent",
                format!("thresholds must lie in 0..=100 (got {warning} / {critical})"),
            ));
        }
        if warning >= critical {
            return Err(invalid(
                "memory.critical_percent",
                format!("must be above the warning threshold ({critical} <= {warning})"),
            ));
        }
        if !(0.0..=100.0).contains(&self.registry.pressure_threshold_percent) {
            return Err(invalid(
                "registry.pressure_threshold_percent",
                "must lie in 0..=100",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Component cache configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Memory budget for all cached component sets.
    pub max_memory_bytes: u64,
    /// Entries not accessed for this long are considered stale.
    pub max_age_ms: u64,
    /// How often stale entries are swept. `0` disables the sweep.
    pub cleanup_interval_ms: u64,
}

impl CacheConfig {
    /// The staleness threshold.
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }

    /// The sweep period, if enabled.
    pub fn cleanup_interval(&self) -> Option<Duration> {
        (self.cleanup_interval_ms > 0).then(|| Duration::from_millis(self.cleanup_interval_ms))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 50 * MB,
            max_age_ms: 10 * 60 * 1000,
            cleanup_interval_ms: 5 * 60 * 1000,
        }
    }
}

/// Resource registry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Host pressure above which the registry reports high pressure.
    pub pressure_threshold_percent: f64,
    /// Fallback ceiling on tracked resources when the host reports nothing.
    pub max_tracked_resources: usize,
    /// Fallback ceiling on the aggregate estimate when the host reports nothing.
    pub max_tracked_bytes: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            pressure_threshold_percent: 80.0,
            max_tracked_resources: 1000,
            max_tracked_bytes: 512 * MB,
        }
    }
}

/// Switch latency monitoring configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Latency goal for a mode switch.
    pub target_switch_ms: f64,
    /// Number of recent switches kept for statistics.
    pub window_size: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            target_switch_ms: 500.0,
            window_size: 50,
        }
    }
}

/// Memory monitor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryMonitorConfig {
    /// Sampling period.
    pub sample_interval_ms: u64,
    /// Pressure at or above which the status is `Warning`.
    pub warning_percent: f64,
    /// Pressure at or above which the status is `Critical`.
    pub critical_percent: f64,
    /// Number of samples kept for trend queries.
    pub history_size: usize,
    /// Consecutive `Critical` samples after which the runtime flushes everything.
    pub sustained_critical_ticks: u32,
}

impl MemoryMonitorConfig {
    /// The sampling period.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

impl Default for MemoryMonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 30_000,
            warning_percent: 70.0,
            critical_percent: 85.0,
            history_size: 100,
            sustained_critical_ticks: 2,
        }
    }
}

/// Background preloading configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Whether the runtime preloads popular modes on start.
    pub enabled: bool,
    /// Modes to preload, most popular first.
    pub popular_mode_ids: Vec<ModeId>,
    /// Back-off while a foreground switch is pending.
    pub defer_delay_ms: u64,
    /// Delay between runtime start and the first preload.
    pub start_delay_ms: u64,
}

impl PreloadConfig {
    /// The back-off while a foreground switch is pending.
    pub fn defer_delay(&self) -> Duration {
        Duration::from_millis(self.defer_delay_ms)
    }

    /// The delay before preloading starts.
    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            popular_mode_ids: Vec::new(),
            defer_delay_ms: 100,
            start_delay_ms: 2000,
        }
    }
}

/// Stats reporting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// How often the runtime logs its stats. `0` disables reporting.
    pub stats_interval_ms: u64,
}

impl TelemetryConfig {
    /// The reporting period, if enabled.
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_ms > 0).then(|| Duration::from_millis(self.stats_interval_ms))
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            stats_interval_ms: 60_000,
        }
    }
}
