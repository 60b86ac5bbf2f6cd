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

//! Host memory providers.

use std::borrow::Cow;
use std::sync::{Mutex, PoisonError};

use persona_core::telemetry::{MemoryProvider, MemoryReading};
use sysinfo::System;

/// Reads process-visible memory through `sysinfo`.
///
/// Inside a cgroup (containers, systemd slices) usage is measured against
/// the cgroup limit rather than the machine's physical memory.
#[derive(Debug)]
pub struct SysinfoMemoryProvider {
    system: Mutex<System>,
}

impl SysinfoMemoryProvider {
    /// Creates a provider.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider for SysinfoMemoryProvider {
    fn provider_id(&self) -> Cow<'static, str> {
        Cow::Borrowed("sysinfo")
    }

    fn read(&self) -> Option<MemoryReading> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return None;
        }

        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_memory();

        let total_bytes = system.total_memory();
        if total_bytes == 0 {
            return None;
        }

        let reading = match system.cgroup_limits() {
            Some(limits) if limits.total_memory > 0 => MemoryReading {
                used_bytes: limits.total_memory.saturating_sub(limits.free_memory),
                total_bytes,
                limit_bytes: limits.total_memory,
            },
            _ => MemoryReading {
                used_bytes: system.used_memory(),
                total_bytes,
                limit_bytes: total_bytes,
            },
        };
        Some(reading)
    }
}

/// A provider for hosts without a memory API. Always reports nothing, which
/// the monitor treats as `Normal` pressure.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableMemoryProvider;

impl MemoryProvider for UnavailableMemoryProvider {
    fn provider_id(&self) -> Cow<'static, str> {
        Cow::Borrowed("unavailable")
    }

    fn read(&self) -> Option<MemoryReading> {
        None
    }
}
