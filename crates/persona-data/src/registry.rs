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

//! The resource registry: single owner of every tracked graphics handle.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use persona_core::config::RegistryConfig;
use persona_core::telemetry::MemoryProvider;
use persona_core::{Clock, GraphicsHandle, ResourceKind, SystemClock};
use serde::{Deserialize, Serialize};

use crate::estimate::{HeuristicEstimator, MemoryEstimator};

type CollectHook = Arc<dyn Fn() + Send + Sync>;

struct ResourceRecord {
    kind: ResourceKind,
    handle: Box<dyn GraphicsHandle>,
    created_at: Instant,
    memory_estimate_bytes: u64,
}

/// Public view of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceInfo {
    /// The resource kind.
    pub kind: ResourceKind,
    /// The estimate computed when the resource was tracked.
    pub memory_estimate_bytes: u64,
    /// Time since the resource was tracked.
    pub age: Duration,
}

/// A snapshot of the registry's contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Tracked geometries.
    pub geometry_count: usize,
    /// Tracked materials.
    pub material_count: usize,
    /// Tracked textures.
    pub texture_count: usize,
    /// Tracked render contexts.
    pub render_context_count: usize,
    /// All tracked resources.
    pub tracked_count: usize,
    /// Sum of the estimates of every tracked resource.
    pub total_memory_estimate_bytes: u64,
    /// Resources disposed since the registry was created.
    pub disposed_total: u64,
    /// Disposals whose release reported an error or panicked.
    pub release_failures: u64,
}

impl RegistryStats {
    /// Number of tracked resources of the given kind.
    pub fn count(&self, kind: ResourceKind) -> usize {
        match kind {
            ResourceKind::Geometry => self.geometry_count,
            ResourceKind::Material => self.material_count,
            ResourceKind::Texture => self.texture_count,
            ResourceKind::RenderContext => self.render_context_count,
        }
    }
}

/// Tracks graphics handles by id and releases them on disposal.
///
/// Handles are released outside the internal lock, so a slow or misbehaving
/// backend never blocks other registry users.
pub struct ResourceRegistry {
    records: Mutex<HashMap<String, ResourceRecord>>,
    config: RegistryConfig,
    estimator: Box<dyn MemoryEstimator>,
    memory_provider: Option<Arc<dyn MemoryProvider>>,
    clock: Arc<dyn Clock>,
    collect_hook: Option<CollectHook>,
    disposed_total: AtomicU64,
    release_failures: AtomicU64,
}

impl ResourceRegistry {
    /// Creates an empty registry using the heuristic estimator.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            config,
            estimator: Box::new(HeuristicEstimator::default()),
            memory_provider: None,
            clock: Arc::new(SystemClock),
            collect_hook: None,
            disposed_total: AtomicU64::new(0),
            release_failures: AtomicU64::new(0),
        }
    }

    /// Replaces the per-kind memory estimator.
    pub fn with_estimator(mut self, estimator: impl MemoryEstimator) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    /// Attaches a host memory provider used by [`Self::is_memory_pressure_high`].
    pub fn with_memory_provider(mut self, provider: Arc<dyn MemoryProvider>) -> Self {
        self.memory_provider = Some(provider);
        self
    }

    /// Replaces the clock used to timestamp records.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Installs a best-effort hook run after bulk disposals, typically to
    /// ask the backend to reclaim freed memory.
    pub fn with_collect_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.collect_hook = Some(Arc::new(hook));
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ResourceRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts tracking a handle and returns its memory estimate.
    ///
    /// If `id` is already tracked, the previous handle is disposed first.
    pub fn track(
        &self,
        id: impl Into<String>,
        handle: Box<dyn GraphicsHandle>,
        kind: ResourceKind,
    ) -> u64 {
        let id = id.into();
        let memory_estimate_bytes = self.estimate(&id, kind, handle.as_ref());
        let record = ResourceRecord {
            kind,
            handle,
            created_at: self.clock.now(),
            memory_estimate_bytes,
        };

        let previous = self.lock().insert(id.clone(), record);
        if let Some(previous) = previous {
            log::warn!(
                "ResourceRegistry: '{}' was already tracked, disposing the previous handle",
                id
            );
            self.release_record(&id, previous);
        }

        log::debug!(
            "ResourceRegistry: tracked {} '{}' (~{} bytes)",
            kind,
            id,
            memory_estimate_bytes
        );
        memory_estimate_bytes
    }

    /// Releases and forgets a resource. Returns `false` for unknown ids.
    ///
    /// The record is removed even if the release fails or panics.
    pub fn dispose(&self, id: &str) -> bool {
        let record = self.lock().remove(id);
        match record {
            Some(record) => {
                self.release_record(id, record);
                true
            }
            None => false,
        }
    }

    /// Disposes every resource whose id starts with `prefix`. Returns the count.
    pub fn dispose_by_prefix(&self, prefix: &str) -> usize {
        let removed: Vec<(String, ResourceRecord)> = {
            let mut records = self.lock();
            let ids: Vec<String> = records
                .keys()
                .filter(|id| id.starts_with(prefix))
                .cloned()
                .collect();
            ids.into_iter()
                .filter_map(|id| records.remove(&id).map(|record| (id, record)))
                .collect()
        };

        let count = removed.len();
        for (id, record) in removed {
            self.release_record(&id, record);
        }
        if count > 0 {
            log::debug!(
                "ResourceRegistry: disposed {} resource(s) under '{}'",
                count,
                prefix
            );
            self.run_collect_hook();
        }
        count
    }

    /// Disposes every tracked resource. Returns the count.
    pub fn dispose_all(&self) -> usize {
        let removed: Vec<(String, ResourceRecord)> = self.lock().drain().collect();
        let count = removed.len();
        for (id, record) in removed {
            self.release_record(&id, record);
        }
        log::info!("ResourceRegistry: disposed all {} resource(s)", count);
        self.run_collect_hook();
        count
    }

    /// Returns `true` if `id` is currently tracked.
    pub fn is_tracked(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Lists the tracked ids starting with `prefix`, sorted.
    pub fn ids_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .keys()
            .filter(|id| id.starts_with(prefix))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Describes a tracked resource.
    pub fn resource_info(&self, id: &str) -> Option<ResourceInfo> {
        let now = self.clock.now();
        self.lock().get(id).map(|record| ResourceInfo {
            kind: record.kind,
            memory_estimate_bytes: record.memory_estimate_bytes,
            age: now.saturating_duration_since(record.created_at),
        })
    }

    /// Returns a snapshot of the registry.
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            disposed_total: self.disposed_total.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
            ..Default::default()
        };
        for record in self.lock().values() {
            match record.kind {
                ResourceKind::Geometry => stats.geometry_count += 1,
                ResourceKind::Material => stats.material_count += 1,
                ResourceKind::Texture => stats.texture_count += 1,
                ResourceKind::RenderContext => stats.render_context_count += 1,
            }
            stats.tracked_count += 1;
            stats.total_memory_estimate_bytes = stats
                .total_memory_estimate_bytes
                .saturating_add(record.memory_estimate_bytes);
        }
        stats
    }

    /// Returns `true` when memory is considered scarce.
    ///
    /// Uses host pressure when a provider is attached and reports a limit,
    /// otherwise falls back to the tracked count and aggregate estimate.
    pub fn is_memory_pressure_high(&self) -> bool {
        if let Some(reading) = self
            .memory_provider
            .as_ref()
            .and_then(|provider| provider.read())
            .filter(|reading| reading.limit_bytes > 0)
        {
            return reading.pressure_percent() > self.config.pressure_threshold_percent;
        }

        let stats = self.stats();
        stats.tracked_count > self.config.max_tracked_resources
            || stats.total_memory_estimate_bytes > self.config.max_tracked_bytes
    }

    /// Never panics: a panicking estimator falls back to the per-kind default.
    fn estimate(&self, id: &str, kind: ResourceKind, handle: &dyn GraphicsHandle) -> u64 {
        panic::catch_unwind(AssertUnwindSafe(|| self.estimator.estimate(kind, handle)))
            .unwrap_or_else(|_| {
                log::warn!(
                    "ResourceRegistry: estimating {} '{}' panicked, using fallback",
                    kind,
                    id
                );
                HeuristicEstimator::default().fallback(kind)
            })
    }

    fn release_record(&self, id: &str, mut record: ResourceRecord) {
        let kind = record.kind;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut errors = Vec::new();
            if kind.is_composite() {
                for mut owned in record.handle.take_owned() {
                    errors.extend(release_tree(owned.as_mut()));
                }
            }
            if let Err(e) = record.handle.release() {
                errors.push(e);
            }
            if kind == ResourceKind::RenderContext {
                if let Err(e) = record.handle.lose_context() {
                    errors.push(e);
                }
            }
            errors
        }));

        self.disposed_total.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(errors) if errors.is_empty() => {
                log::trace!("ResourceRegistry: released {} '{}'", kind, id);
            }
            Ok(errors) => {
                self.release_failures.fetch_add(1, Ordering::Relaxed);
                for e in errors {
                    log::warn!(
                        "ResourceRegistry: failed to release {} '{}': {:#}",
                        kind,
                        id,
                        e
                    );
                }
            }
            Err(_) => {
                self.release_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "ResourceRegistry: release of {} '{}' panicked, record dropped",
                    kind,
                    id
                );
            }
        }
    }

    fn run_collect_hook(&self) {
        if let Some(hook) = &self.collect_hook {
            if panic::catch_unwind(AssertUnwindSafe(|| hook())).is_err() {
                log::warn!("ResourceRegistry: collect hook panicked");
            }
        }
    }
}

/// Releases a sub-resource, its own sub-resources first.
fn release_tree(handle: &mut dyn GraphicsHandle) -> Vec<anyhow::Error> {
    let mut errors = Vec::new();
    for mut owned in handle.take_owned() {
        errors.extend(release_tree(owned.as_mut()));
    }
    if let Err(e) = handle.release() {
        errors.push(e);
    }
    errors
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        let records = self.records.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !records.is_empty() {
            log::debug!(
                "ResourceRegistry: dropped with {} tracked resource(s) still alive",
                records.len()
            );
        }
    }
}
