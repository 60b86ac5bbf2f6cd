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

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use persona_agents::{FnConstructor, ModeConstructor, ModeLoader};
use persona_core::config::RegistryConfig;
use persona_core::{ComponentSet, ModeId, ResourceKind};
use persona_data::{ComponentCache, ResourceRegistry};
use persona_infra::{SimulatedHandle, SimulatedProbe};

pub const SET_BYTES: u64 = 10_000;

/// A constructor that counts calls, can be slowed down, and fails for the
/// configured modes (optionally only on their first attempt).
///
/// It tracks the mode's geometry before doing anything else, so failing and
/// slow constructions own resources while they run.
pub struct TestConstructor {
    pub probe: Arc<SimulatedProbe>,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub failing: Mutex<HashSet<String>>,
    pub fail_once: bool,
}

impl TestConstructor {
    pub fn new(delay: Duration) -> Self {
        Self {
            probe: SimulatedProbe::new(),
            delay,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            fail_once: false,
        }
    }

    pub fn failing_for(self, modes: &[&str], fail_once: bool) -> Self {
        {
            let mut failing = self.failing.lock().unwrap();
            failing.extend(modes.iter().map(|m| m.to_string()));
        }
        Self { fail_once, ..self }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModeConstructor for TestConstructor {
    async fn construct(
        &self,
        mode_id: ModeId,
        registry: Arc<ResourceRegistry>,
    ) -> anyhow::Result<ComponentSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        let geometry_id = mode_id.resource_id(ResourceKind::Geometry, 0);
        let handle = SimulatedHandle::geometry(geometry_id.clone(), vec![1024], &self.probe);
        registry.track(geometry_id, Box::new(handle), ResourceKind::Geometry);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let should_fail = {
            let mut failing = self.failing.lock().unwrap();
            if self.fail_once {
                failing.remove(mode_id.as_str())
            } else {
                failing.contains(mode_id.as_str())
            }
        };
        if should_fail {
            bail!("scene assets for '{}' are missing", mode_id);
        }

        Ok(ComponentSet::new(mode_id, "scene", "character"))
    }
}

/// A constructor that only tracks its texture after `delay`, right before
/// returning the set.
pub fn late_tracking(delay: Duration, probe: &Arc<SimulatedProbe>) -> Arc<dyn ModeConstructor> {
    let probe = probe.clone();
    Arc::new(FnConstructor(move |mode: ModeId, registry: Arc<ResourceRegistry>| {
        let probe = probe.clone();
        async move {
            tokio::time::sleep(delay).await;
            let texture_id = mode.resource_id(ResourceKind::Texture, 0);
            let handle = SimulatedHandle::texture(texture_id.clone(), 64, 64, &probe);
            registry.track(texture_id, Box::new(handle), ResourceKind::Texture);
            Ok::<_, anyhow::Error>(ComponentSet::new(mode, "scene", "character"))
        }
    }))
}

pub fn fixed_size(_: &ComponentSet) -> u64 {
    SET_BYTES
}

/// A loader over a fresh cache holding at most `capacity` sets.
pub fn loader(capacity: u64) -> (Arc<ModeLoader>, Arc<ResourceRegistry>) {
    let registry = Arc::new(ResourceRegistry::new(RegistryConfig::default()));
    let cache =
        ComponentCache::new(capacity * SET_BYTES, registry.clone()).with_estimator(fixed_size);
    (Arc::new(ModeLoader::new(Arc::new(cache))), registry)
}
