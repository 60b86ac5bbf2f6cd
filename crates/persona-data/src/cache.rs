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

//! The component cache: constructed component sets under a memory budget.
//!
//! Entries are evicted least-recently-used first. Every eviction disposes the
//! evicted mode's resources in the [`ResourceRegistry`] before the entry
//! leaves the map, so a set is never observable after its resources are gone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use persona_core::{Clock, ComponentSet, ModeId, SystemClock};
use serde::{Deserialize, Serialize};

use crate::estimate::{DefaultSetEstimator, SetEstimator};
use crate::registry::ResourceRegistry;

struct CacheEntry {
    set: Arc<ComponentSet>,
    memory_estimate_bytes: u64,
    last_access_at: Instant,
    /// Monotonic access stamp. The smallest stamp is the LRU victim, which
    /// also orders never-accessed entries by insertion.
    access_tick: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<ModeId, CacheEntry>,
    total_memory_bytes: u64,
    max_memory_bytes: u64,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn lru_victim(&self) -> Option<ModeId> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.access_tick)
            .map(|(mode_id, _)| mode_id.clone())
    }
}

/// Result of [`ComponentCache::set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    /// `false` when the set alone exceeds the whole budget.
    pub stored: bool,
    /// The estimate computed for the set.
    pub memory_estimate_bytes: u64,
    /// Modes evicted to make room, in eviction order.
    pub evicted: Vec<ModeId>,
}

/// Public view of a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntryInfo {
    /// The estimate computed when the set was stored.
    pub memory_estimate_bytes: u64,
    /// Time since the entry was last stored or hit.
    pub idle: Duration,
}

/// A snapshot of the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of cached sets.
    pub size: usize,
    /// Sum of the cached sets' estimates.
    pub total_memory_bytes: u64,
    /// The budget.
    pub max_memory_bytes: u64,
    /// `total / max * 100`.
    pub usage_percent: f64,
    /// Cached modes, least recently used first.
    pub keys: Vec<ModeId>,
    /// Lookups that found a set.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries removed for budget or staleness.
    pub evictions: u64,
    /// `hits / (hits + misses)`, or `0.0` before any lookup.
    pub hit_rate: f64,
}

/// LRU cache of component sets keyed by mode.
pub struct ComponentCache {
    state: Mutex<CacheState>,
    registry: Arc<ResourceRegistry>,
    estimator: Box<dyn SetEstimator>,
    clock: Arc<dyn Clock>,
}

impl ComponentCache {
    /// Creates an empty cache with the given budget.
    pub fn new(max_memory_bytes: u64, registry: Arc<ResourceRegistry>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                max_memory_bytes,
                ..Default::default()
            }),
            registry,
            estimator: Box::new(DefaultSetEstimator::default()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the component set estimator.
    pub fn with_estimator(self, estimator: impl SetEstimator) -> Self {
        self.with_boxed_estimator(Box::new(estimator))
    }

    /// Replaces the component set estimator with an already boxed one.
    pub fn with_boxed_estimator(mut self, estimator: Box<dyn SetEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Replaces the clock used for access times.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The registry evicted resources are disposed through.
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up a cached set and marks it as most recently used.
    ///
    /// Never constructs anything.
    pub fn get(&self, mode_id: &ModeId) -> Option<Arc<ComponentSet>> {
        let now = self.clock.now();
        let mut state = self.lock();
        let tick = state.next_tick();
        match state.entries.get_mut(mode_id) {
            Some(entry) => {
                entry.last_access_at = now;
                entry.access_tick = tick;
                let set = entry.set.clone();
                state.hits += 1;
                log::trace!("ComponentCache: hit '{}'", mode_id);
                Some(set)
            }
            None => {
                state.misses += 1;
                log::trace!("ComponentCache: miss '{}'", mode_id);
                None
            }
        }
    }

    /// Returns `true` if the mode is cached, without touching its LRU position.
    pub fn contains(&self, mode_id: &ModeId) -> bool {
        self.lock().entries.contains_key(mode_id)
    }

    /// Stores a set, evicting least-recently-used entries until it fits.
    ///
    /// A set larger than the whole budget is rejected and nothing is evicted.
    /// Storing a mode that is already cached replaces the previous set
    /// without disposing resources, since both share the mode's namespace.
    pub fn set(&self, set: impl Into<Arc<ComponentSet>>) -> SetOutcome {
        let set = set.into();
        let size = self.estimator.estimate_set(&set);
        let mode_id = set.mode_id().clone();
        let now = self.clock.now();

        let mut state = self.lock();
        if size > state.max_memory_bytes {
            log::warn!(
                "ComponentCache: '{}' ({} bytes) exceeds the whole budget of {} bytes, not cached",
                mode_id,
                size,
                state.max_memory_bytes
            );
            return SetOutcome {
                stored: false,
                memory_estimate_bytes: size,
                evicted: Vec::new(),
            };
        }

        if let Some(previous) = state.entries.remove(&mode_id) {
            state.total_memory_bytes -= previous.memory_estimate_bytes;
            log::debug!("ComponentCache: replacing cached set for '{}'", mode_id);
        }

        let mut evicted = Vec::new();
        while state.total_memory_bytes + size > state.max_memory_bytes {
            let Some(victim) = state.lru_victim() else {
                break;
            };
            self.evict_locked(&mut state, &victim, "over budget");
            evicted.push(victim);
        }

        let tick = state.next_tick();
        state.entries.insert(
            mode_id.clone(),
            CacheEntry {
                set,
                memory_estimate_bytes: size,
                last_access_at: now,
                access_tick: tick,
            },
        );
        state.total_memory_bytes += size;
        log::debug!(
            "ComponentCache: stored '{}' ({:.1} MB, {}/{} bytes used)",
            mode_id,
            size as f64 / (1024.0 * 1024.0),
            state.total_memory_bytes,
            state.max_memory_bytes
        );

        SetOutcome {
            stored: true,
            memory_estimate_bytes: size,
            evicted,
        }
    }

    /// Removes a mode, disposing its resources first.
    ///
    /// The mode's resources are disposed even when no entry is cached, which
    /// releases sets that were loaded but rejected as too large. Returns
    /// `false` if there was neither an entry nor a tracked resource.
    pub fn delete(&self, mode_id: &ModeId) -> bool {
        let mut state = self.lock();
        if self.remove_locked(&mut state, mode_id) {
            log::debug!("ComponentCache: deleted '{}'", mode_id);
            return true;
        }
        let disposed = self.registry.dispose_by_prefix(&mode_id.resource_prefix());
        if disposed > 0 {
            log::debug!(
                "ComponentCache: '{}' was not cached, disposed {} resource(s)",
                mode_id,
                disposed
            );
        }
        disposed > 0
    }

    /// Evicts every entry not accessed within `max_age`. Returns the count.
    pub fn cleanup_older_than(&self, max_age: Duration) -> usize {
        let Some(cutoff) = self.clock.now().checked_sub(max_age) else {
            return 0;
        };

        let mut state = self.lock();
        let mut stale: Vec<(u64, ModeId)> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.last_access_at < cutoff)
            .map(|(mode_id, entry)| (entry.access_tick, mode_id.clone()))
            .collect();
        stale.sort();

        for (_, mode_id) in &stale {
            self.evict_locked(&mut state, mode_id, "stale");
        }
        if !stale.is_empty() {
            log::info!(
                "ComponentCache: cleaned up {} entr{} idle for more than {:?}",
                stale.len(),
                if stale.len() == 1 { "y" } else { "ies" },
                max_age
            );
        }
        stale.len()
    }

    /// Removes every entry, disposing their resources. Returns the count.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let mut modes: Vec<(u64, ModeId)> = state
            .entries
            .iter()
            .map(|(mode_id, entry)| (entry.access_tick, mode_id.clone()))
            .collect();
        modes.sort();

        for (_, mode_id) in &modes {
            self.remove_locked(&mut state, mode_id);
        }
        log::info!("ComponentCache: cleared {} entries", modes.len());
        modes.len()
    }

    /// Changes the budget, evicting LRU entries until the cache fits.
    pub fn set_max_memory(&self, max_memory_bytes: u64) -> Vec<ModeId> {
        let mut state = self.lock();
        state.max_memory_bytes = max_memory_bytes;
        let mut evicted = Vec::new();
        while state.total_memory_bytes > state.max_memory_bytes {
            let Some(victim) = state.lru_victim() else {
                break;
            };
            self.evict_locked(&mut state, &victim, "budget reduced");
            evicted.push(victim);
        }
        log::info!(
            "ComponentCache: budget set to {} bytes ({} eviction(s))",
            max_memory_bytes,
            evicted.len()
        );
        evicted
    }

    /// Describes a cached entry without touching it.
    pub fn entry_info(&self, mode_id: &ModeId) -> Option<CacheEntryInfo> {
        let now = self.clock.now();
        self.lock().entries.get(mode_id).map(|entry| CacheEntryInfo {
            memory_estimate_bytes: entry.memory_estimate_bytes,
            idle: now.saturating_duration_since(entry.last_access_at),
        })
    }

    /// Number of cached sets.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Returns a snapshot of the cache.
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let mut keys: Vec<(u64, ModeId)> = state
            .entries
            .iter()
            .map(|(mode_id, entry)| (entry.access_tick, mode_id.clone()))
            .collect();
        keys.sort();

        let lookups = state.hits + state.misses;
        CacheStats {
            size: state.entries.len(),
            total_memory_bytes: state.total_memory_bytes,
            max_memory_bytes: state.max_memory_bytes,
            usage_percent: if state.max_memory_bytes == 0 {
                0.0
            } else {
                state.total_memory_bytes as f64 / state.max_memory_bytes as f64 * 100.0
            },
            keys: keys.into_iter().map(|(_, mode_id)| mode_id).collect(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }

    fn evict_locked(&self, state: &mut CacheState, mode_id: &ModeId, reason: &str) {
        if self.remove_locked(state, mode_id) {
            state.evictions += 1;
            log::info!("ComponentCache: evicted '{}' ({})", mode_id, reason);
        }
    }

    /// Disposes the mode's resources, then drops the entry.
    fn remove_locked(&self, state: &mut CacheState, mode_id: &ModeId) -> bool {
        if !state.entries.contains_key(mode_id) {
            return false;
        }
        let disposed = self.registry.dispose_by_prefix(&mode_id.resource_prefix());
        if let Some(entry) = state.entries.remove(mode_id) {
            state.total_memory_bytes -= entry.memory_estimate_bytes;
        }
        log::debug!(
            "ComponentCache: released '{}' ({} resource(s) disposed)",
            mode_id,
            disposed
        );
        true
    }
}
