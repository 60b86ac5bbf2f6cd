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

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use persona_core::telemetry::{MemoryProvider, MemoryReading, MemoryStatus};
use persona_core::ManualClock;
use persona_infra::{SimulatedHandle, SimulatedProbe};
use persona_sdk::prelude::*;

const SET_BYTES: u64 = 1_000;

/// Reports a configurable pressure percentage against a 100 byte limit.
#[derive(Debug, Default)]
struct AdjustableProvider(AtomicU64);

impl AdjustableProvider {
    fn at(percent: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(percent)))
    }
}

impl MemoryProvider for AdjustableProvider {
    fn provider_id(&self) -> Cow<'static, str> {
        Cow::Borrowed("adjustable")
    }

    fn read(&self) -> Option<MemoryReading> {
        Some(MemoryReading {
            used_bytes: self.0.load(Ordering::SeqCst),
            total_bytes: 100,
            limit_bytes: 100,
        })
    }
}

struct Harness {
    runtime: Arc<ModeRuntime>,
    clock: Arc<ManualClock>,
    probe: Arc<SimulatedProbe>,
    calls: Arc<AtomicUsize>,
}

fn harness(config: RuntimeConfig, provider: Arc<AdjustableProvider>) -> Harness {
    slow_harness(config, provider, Duration::ZERO)
}

/// Constructions wait `delay` before tracking their geometry.
fn slow_harness(
    config: RuntimeConfig,
    provider: Arc<AdjustableProvider>,
    delay: Duration,
) -> Harness {
    let probe = SimulatedProbe::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let clock = Arc::new(ManualClock::new());

    let constructor = {
        let probe = probe.clone();
        let calls = calls.clone();
        FnConstructor(move |mode: ModeId, registry: Arc<ResourceRegistry>| {
            let probe = probe.clone();
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let id = mode.resource_id(ResourceKind::Geometry, 0);
                let handle = SimulatedHandle::geometry(id.clone(), vec![4096], &probe);
                registry.track(id, Box::new(handle), ResourceKind::Geometry);
                Ok::<_, anyhow::Error>(ComponentSet::new(mode, "scene", "character"))
            }
        })
    };

    let runtime = ModeRuntime::builder(Arc::new(constructor))
        .config(config)
        .memory_provider(provider)
        .clock(clock.clone())
        .set_estimator(|_: &ComponentSet| SET_BYTES)
        .build()
        .expect("valid configuration");

    Harness {
        runtime,
        clock,
        probe,
        calls,
    }
}

fn quiet_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.cache.max_memory_bytes = 4 * SET_BYTES;
    config.preload.enabled = false;
    config
}

#[tokio::test]
async fn test_switch_constructs_then_hits() -> Result<()> {
    let h = harness(quiet_config(), AdjustableProvider::at(10));

    let first = h.runtime.switch_mode("zen").await?;
    assert!(!first.from_cache);
    let second = h.runtime.switch_mode("zen").await?;
    assert!(second.from_cache);
    assert!(Arc::ptr_eq(&first.set, &second.set));
    assert_eq!(first.set.scene::<&str>(), Some(&"scene"));

    let stats = h.runtime.stats();
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.performance.sample_count, 2);
    assert_eq!(stats.cache.size, 1);
    assert_eq!(stats.registry.tracked_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_budget_evicts_and_disposes() -> Result<()> {
    let h = harness(quiet_config(), AdjustableProvider::at(10));
    for mode in ["a", "b", "c", "d", "e"] {
        h.runtime.switch_mode(mode).await?;
    }

    let stats = h.runtime.stats();
    assert_eq!(stats.cache.size, 4);
    assert_eq!(stats.cache.total_memory_bytes, 4 * SET_BYTES);
    assert_eq!(stats.cache.evictions, 1);
    assert!(!h.runtime.registry().is_tracked("a-geometry-0"));
    assert_eq!(h.probe.released_labels(), vec!["a-geometry-0".to_string()]);
    Ok(())
}

#[tokio::test]
async fn test_release_mode() -> Result<()> {
    let h = harness(quiet_config(), AdjustableProvider::at(10));
    h.runtime.switch_mode("zen").await?;

    assert!(h.runtime.release_mode(&ModeId::new("zen")));
    assert!(!h.runtime.release_mode(&ModeId::new("zen")));
    assert_eq!(h.runtime.stats().registry.tracked_count, 0);
    assert_eq!(h.probe.release_count(), 1);

    let again = h.runtime.switch_mode("zen").await?;
    assert!(!again.from_cache);
    Ok(())
}

#[tokio::test]
async fn test_preload_popular_in_background() -> Result<()> {
    let h = harness(quiet_config(), AdjustableProvider::at(10));
    let report = h
        .runtime
        .preload_popular(vec![ModeId::new("zen"), ModeId::new("hacker")])
        .expect("inside a runtime")
        .await?;

    assert_eq!(report.loaded.len(), 2);
    let hit = h.runtime.switch_mode("hacker").await?;
    assert!(hit.from_cache);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_start_preloads_configured_modes_after_delay() -> Result<()> {
    let mut config = quiet_config();
    config.preload.enabled = true;
    config.preload.popular_mode_ids = vec![ModeId::new("zen"), ModeId::new("retro")];
    config.preload.start_delay_ms = 2_000;
    let h = harness(config, AdjustableProvider::at(10));

    assert!(h.runtime.start());
    assert!(!h.runtime.start());
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(h.runtime.cache().contains(&ModeId::new("zen")));
    assert!(h.runtime.cache().contains(&ModeId::new("retro")));

    h.runtime.shutdown();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_warning_drops_idle_sets() -> Result<()> {
    let h = harness(quiet_config(), AdjustableProvider::at(75));
    h.runtime.switch_mode("old").await?;
    h.clock.advance(Duration::from_secs(11 * 60));
    h.runtime.switch_mode("fresh").await?;

    assert!(h.runtime.start());
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.runtime.memory_monitor().status(), MemoryStatus::Warning);
    assert!(!h.runtime.cache().contains(&ModeId::new("old")));
    assert!(h.runtime.cache().contains(&ModeId::new("fresh")));
    assert!(!h.runtime.registry().is_tracked("old-geometry-0"));

    h.runtime.shutdown();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_sustained_critical_flushes_everything() -> Result<()> {
    let provider = AdjustableProvider::at(10);
    let h = harness(quiet_config(), provider.clone());
    h.runtime.switch_mode("zen").await?;
    h.runtime.switch_mode("hacker").await?;

    provider.0.store(95, Ordering::SeqCst);
    assert!(h.runtime.start());

    // First critical tick only drops idle sets; these are fresh.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.runtime.memory_monitor().status(), MemoryStatus::Critical);
    assert_eq!(h.runtime.stats().cache.size, 2);

    // The second consecutive critical tick flushes.
    tokio::time::sleep(Duration::from_secs(30)).await;
    let stats = h.runtime.stats();
    assert_eq!(stats.cache.size, 0);
    assert_eq!(stats.registry.tracked_count, 0);
    assert_eq!(h.probe.release_count(), 2);

    h.runtime.shutdown();
    Ok(())
}

#[tokio::test]
async fn test_shutdown_releases_everything_and_rejects_switches() -> Result<()> {
    let h = harness(quiet_config(), AdjustableProvider::at(10));
    h.runtime.switch_mode("zen").await?;
    assert!(h.runtime.start());

    h.runtime.shutdown();
    h.runtime.shutdown();
    assert!(!h.runtime.is_running());
    assert!(!h.runtime.memory_monitor().is_running());
    assert_eq!(h.runtime.stats().registry.tracked_count, 0);

    let result = h.runtime.switch_mode("zen").await;
    assert!(matches!(result, Err(LoadError::ShutDown)));
    Ok(())
}

#[tokio::test]
async fn test_release_mode_frees_a_set_too_large_to_cache() -> Result<()> {
    let mut config = quiet_config();
    config.cache.max_memory_bytes = SET_BYTES / 2;
    let h = harness(config, AdjustableProvider::at(10));

    let outcome = h.runtime.switch_mode("big").await?;
    assert!(!outcome.from_cache);
    assert!(h.runtime.cache().is_empty());
    assert_eq!(
        h.runtime.registry().ids_with_prefix("big-"),
        vec!["big-geometry-0".to_string()]
    );

    assert!(h.runtime.release_mode(&ModeId::new("big")));
    assert!(h.runtime.registry().ids_with_prefix("big-").is_empty());
    assert_eq!(h.probe.release_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_critical_flush_discards_a_switch_in_progress() -> Result<()> {
    let provider = AdjustableProvider::at(95);
    let h = slow_harness(quiet_config(), provider, Duration::from_secs(40));
    assert!(h.runtime.start());

    // The second critical tick lands at 30s, while "zen" is still constructing.
    let result = h.runtime.switch_mode("zen").await;
    assert!(matches!(result, Err(LoadError::Discarded { .. })));
    assert!(h.runtime.cache().is_empty());
    assert!(h.runtime.registry().ids_with_prefix("zen-").is_empty());
    assert_eq!(h.probe.release_count(), 1);
    assert_eq!(h.runtime.stats().performance.sample_count, 0);

    h.runtime.shutdown();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_discards_a_switch_in_progress() -> Result<()> {
    let h = slow_harness(
        quiet_config(),
        AdjustableProvider::at(10),
        Duration::from_millis(100),
    );

    let switch = {
        let runtime = h.runtime.clone();
        tokio::spawn(async move { runtime.switch_mode("zen").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    h.runtime.shutdown();

    assert!(matches!(switch.await?, Err(LoadError::ShutDown)));
    assert!(h.runtime.cache().is_empty());
    assert!(h.runtime.registry().ids_with_prefix("zen-").is_empty());
    assert_eq!(h.runtime.stats().registry.tracked_count, 0);
    Ok(())
}

#[test]
fn test_start_outside_tokio_is_rejected() {
    let h = harness(quiet_config(), AdjustableProvider::at(10));
    assert!(!h.runtime.start());
    assert!(h.runtime.preload_popular(vec![ModeId::new("zen")]).is_none());
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut config = RuntimeConfig::default();
    config.memory.warning_percent = 90.0;
    config.memory.critical_percent = 80.0;

    let constructor = FnConstructor(|mode: ModeId, _registry: Arc<ResourceRegistry>| async move {
        Ok::<_, anyhow::Error>(ComponentSet::new(mode, (), ()))
    });
    let result = ModeRuntime::builder(Arc::new(constructor))
        .config(config)
        .build();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_stats_serialize_to_json() -> Result<()> {
    let h = harness(quiet_config(), AdjustableProvider::at(10));
    h.runtime.switch_mode("zen").await?;

    let json: serde_json::Value = serde_json::from_str(&h.runtime.stats().to_json_pretty()?)?;
    assert_eq!(json["cache"]["keys"], serde_json::json!(["zen"]));
    assert_eq!(json["registry"]["geometry_count"], 1);
    assert_eq!(json["performance"]["sample_count"], 1);
    assert_eq!(json["memory"]["status"], "Normal");
    Ok(())
}
