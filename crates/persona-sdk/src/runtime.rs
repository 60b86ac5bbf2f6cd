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

//! The mode runtime facade.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use persona_agents::{ForegroundGate, ModeConstructor, ModeLoader, PreloadReport, Preloader};
use persona_core::telemetry::{MemoryProvider, MemoryStatus};
use persona_core::{
    Clock, ComponentSet, ConfigError, LoadError, ModeId, ResourceKind, RuntimeConfig, SystemClock,
};
use persona_data::{ComponentCache, ResourceRegistry, SetEstimator};
use persona_infra::SysinfoMemoryProvider;
use persona_telemetry::{CallbackId, MemoryMonitor, PerformanceMonitor};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::stats::RuntimeStats;

/// Result of a successful [`ModeRuntime::switch_mode`].
#[derive(Debug, Clone)]
pub struct SwitchOutcome {
    /// The set to render.
    pub set: Arc<ComponentSet>,
    /// `true` if the set came from the cache.
    pub from_cache: bool,
    /// Measured switch latency.
    pub elapsed_ms: f64,
}

/// Builds a [`ModeRuntime`].
pub struct ModeRuntimeBuilder {
    config: RuntimeConfig,
    constructor: Arc<dyn ModeConstructor>,
    memory_provider: Option<Arc<dyn MemoryProvider>>,
    clock: Option<Arc<dyn Clock>>,
    set_estimator: Option<Box<dyn SetEstimator>>,
    collect_hook: Option<Box<dyn Fn() + Send + Sync>>,
}

impl ModeRuntimeBuilder {
    /// Replaces the default configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default `sysinfo` memory provider.
    pub fn memory_provider(mut self, provider: Arc<dyn MemoryProvider>) -> Self {
        self.memory_provider = Some(provider);
        self
    }

    /// Replaces the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the component set estimator.
    pub fn set_estimator(mut self, estimator: impl SetEstimator) -> Self {
        self.set_estimator = Some(Box::new(estimator));
        self
    }

    /// Installs a hook run after bulk resource disposals.
    pub fn collect_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.collect_hook = Some(Box::new(hook));
        self
    }

    /// Validates the configuration and wires every component.
    pub fn build(self) -> Result<Arc<ModeRuntime>, ConfigError> {
        self.config.validate()?;
        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let provider = self
            .memory_provider
            .unwrap_or_else(|| Arc::new(SysinfoMemoryProvider::new()));

        let mut registry = ResourceRegistry::new(config.registry.clone())
            .with_memory_provider(provider.clone())
            .with_clock(clock.clone());
        if let Some(hook) = self.collect_hook {
            registry = registry.with_collect_hook(hook);
        }
        let registry = Arc::new(registry);

        let mut cache = ComponentCache::new(config.cache.max_memory_bytes, registry.clone())
            .with_clock(clock.clone());
        if let Some(estimator) = self.set_estimator {
            cache = cache.with_boxed_estimator(estimator);
        }
        let cache = Arc::new(cache);

        let loader = Arc::new(ModeLoader::new(cache.clone()));
        let gate = ForegroundGate::new();
        let preloader = Arc::new(Preloader::new(
            loader.clone(),
            gate.clone(),
            config.preload.defer_delay(),
        ));
        let performance =
            Arc::new(PerformanceMonitor::new(&config.performance).with_clock(clock.clone()));
        let memory =
            Arc::new(MemoryMonitor::new(provider, config.memory.clone()).with_clock(clock));

        log::info!(
            "ModeRuntime: created (budget {} bytes, target {}ms)",
            config.cache.max_memory_bytes,
            config.performance.target_switch_ms
        );

        Ok(Arc::new(ModeRuntime {
            config,
            registry,
            cache,
            loader,
            preloader,
            gate,
            performance,
            memory,
            constructor: self.constructor,
            tasks: Mutex::new(Vec::new()),
            memory_callbacks: Mutex::new(Vec::new()),
            critical_streak: Arc::new(AtomicU32::new(0)),
            running: AtomicBool::new(false),
        }))
    }
}

/// Owns every component of the mode runtime.
///
/// Foreground switches go through [`Self::switch_mode`]. After
/// [`Self::start`], the runtime samples memory pressure and mitigates it,
/// sweeps stale cache entries, logs its stats periodically and preloads the
/// configured popular modes.
pub struct ModeRuntime {
    config: RuntimeConfig,
    registry: Arc<ResourceRegistry>,
    cache: Arc<ComponentCache>,
    loader: Arc<ModeLoader>,
    preloader: Arc<Preloader>,
    gate: ForegroundGate,
    performance: Arc<PerformanceMonitor>,
    memory: Arc<MemoryMonitor>,
    constructor: Arc<dyn ModeConstructor>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    memory_callbacks: Mutex<Vec<(MemoryStatus, CallbackId)>>,
    critical_streak: Arc<AtomicU32>,
    running: AtomicBool,
}

impl ModeRuntime {
    /// Starts building a runtime around `constructor`.
    pub fn builder(constructor: Arc<dyn ModeConstructor>) -> ModeRuntimeBuilder {
        ModeRuntimeBuilder {
            config: RuntimeConfig::default(),
            constructor,
            memory_provider: None,
            clock: None,
            set_estimator: None,
            collect_hook: None,
        }
    }

    /// Switches to `mode_id`, serving it from the cache when possible.
    pub async fn switch_mode(
        &self,
        mode_id: impl Into<ModeId>,
    ) -> Result<SwitchOutcome, LoadError> {
        let mode_id = mode_id.into();
        let _foreground = self.gate.enter();
        let timer = self.performance.scoped(&mode_id);

        let outcome = self.loader.load(&mode_id, &self.constructor).await?;
        let elapsed_ms = timer.finish();

        if !outcome.from_cache && self.registry.is_memory_pressure_high() {
            let max_age = self.config.cache.max_age() / 2;
            let removed = self.cache.cleanup_older_than(max_age);
            log::warn!(
                "ModeRuntime: memory pressure high after loading '{}', dropped {} stale entr{}",
                mode_id,
                removed,
                if removed == 1 { "y" } else { "ies" }
            );
        }

        log::info!(
            "ModeRuntime: switched to '{}' in {:.1}ms ({})",
            mode_id,
            elapsed_ms,
            if outcome.from_cache { "cached" } else { "constructed" }
        );
        Ok(SwitchOutcome {
            set: outcome.set,
            from_cache: outcome.from_cache,
            elapsed_ms,
        })
    }

    /// Drops a mode from the cache and disposes its resources.
    ///
    /// Also releases a set that was loaded but was too large to cache, and
    /// discards a construction of the mode that is still pending.
    pub fn release_mode(&self, mode_id: &ModeId) -> bool {
        self.loader.release(mode_id)
    }

    /// Preloads `mode_ids` in the background, in priority order.
    ///
    /// Returns `None` when called outside a tokio runtime.
    pub fn preload_popular(&self, mode_ids: Vec<ModeId>) -> Option<JoinHandle<PreloadReport>> {
        let Ok(runtime) = Handle::try_current() else {
            log::warn!("ModeRuntime: preload requested outside a tokio runtime");
            return None;
        };
        let preloader = self.preloader.clone();
        let constructor = self.constructor.clone();
        Some(runtime.spawn(async move {
            preloader.preload_popular(&mode_ids, &constructor).await
        }))
    }

    /// Starts background work on the current tokio runtime.
    ///
    /// Returns `false` if already running or called outside a runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        let Ok(runtime) = Handle::try_current() else {
            log::warn!("ModeRuntime: start() called outside a tokio runtime");
            return false;
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.install_memory_mitigation();
        self.memory.start();

        let mut tasks = Vec::new();
        if let Some(period) = self.config.cache.cleanup_interval() {
            let cache = self.cache.clone();
            let max_age = self.config.cache.max_age();
            tasks.push(runtime.spawn(async move {
                let mut ticker = delayed_interval(period);
                loop {
                    ticker.tick().await;
                    cache.cleanup_older_than(max_age);
                }
            }));
        }

        if let Some(period) = self.config.telemetry.stats_interval() {
            let runtime_ref = Arc::downgrade(self);
            tasks.push(runtime.spawn(log_stats_periodically(runtime_ref, period)));
        }

        let preload = &self.config.preload;
        if preload.enabled && !preload.popular_mode_ids.is_empty() {
            let preloader = self.preloader.clone();
            let constructor = self.constructor.clone();
            let mode_ids = preload.popular_mode_ids.clone();
            let delay = preload.start_delay();
            tasks.push(runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                preloader.preload_popular(&mode_ids, &constructor).await;
            }));
        }

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tasks);
        log::info!("ModeRuntime: started");
        true
    }

    /// Wires the tiered response to memory pressure:
    /// `Warning` drops entries idle longer than the max age, `Critical`
    /// drops entries idle for half of it, and a sustained `Critical` flushes
    /// the cache and every tracked resource.
    fn install_memory_mitigation(&self) {
        let max_age = self.config.cache.max_age();
        let sustained = self.config.memory.sustained_critical_ticks.max(1);
        let mut callbacks = Vec::new();

        let streak = self.critical_streak.clone();
        callbacks.push((
            MemoryStatus::Normal,
            self.memory.on_status(MemoryStatus::Normal, move |_| {
                streak.store(0, Ordering::SeqCst);
            }),
        ));

        let streak = self.critical_streak.clone();
        let cache = self.cache.clone();
        callbacks.push((
            MemoryStatus::Warning,
            self.memory.on_status(MemoryStatus::Warning, move |sample| {
                streak.store(0, Ordering::SeqCst);
                let removed = cache.cleanup_older_than(max_age);
                if removed > 0 {
                    log::info!(
                        "ModeRuntime: memory at {:.1}%, dropped {} idle set(s)",
                        sample.pressure_percent,
                        removed
                    );
                }
            }),
        ));

        let streak = self.critical_streak.clone();
        let cache = self.cache.clone();
        let loader = self.loader.clone();
        callbacks.push((
            MemoryStatus::Critical,
            self.memory.on_status(MemoryStatus::Critical, move |sample| {
                let ticks = streak.fetch_add(1, Ordering::SeqCst) + 1;
                if ticks >= sustained {
                    streak.store(0, Ordering::SeqCst);
                    let flushed = loader.flush();
                    log::warn!(
                        "ModeRuntime: memory critical ({:.1}%) for {} tick(s), flushed {} set(s) and {} resource(s)",
                        sample.pressure_percent,
                        ticks,
                        flushed.sets,
                        flushed.resources
                    );
                } else {
                    let removed = cache.cleanup_older_than(max_age / 2);
                    log::warn!(
                        "ModeRuntime: memory critical ({:.1}%), dropped {} idle set(s)",
                        sample.pressure_percent,
                        removed
                    );
                }
            }),
        ));

        *self
            .memory_callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = callbacks;
    }

    /// Stops background work, rejects further switches and releases every
    /// cached set and tracked resource. Idempotent.
    pub fn shutdown(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.preloader.shutdown();
        self.loader.shutdown();
        self.memory.stop();
        self.stop_background_work();

        let released = self.loader.flush();
        if was_running || released.sets > 0 || released.resources > 0 {
            log::info!(
                "ModeRuntime: shut down ({} set(s), {} resource(s) released)",
                released.sets,
                released.resources
            );
        }
    }

    fn stop_background_work(&self) {
        for (status, id) in self
            .memory_callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            self.memory.remove_callback(status, id);
        }
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }

    /// Returns `true` between [`Self::start`] and [`Self::shutdown`].
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns a snapshot of every component.
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            cache: self.cache.stats(),
            registry: self.registry.stats(),
            performance: self.performance.stats(),
            memory: self.memory.stats(),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The resource registry constructors track their handles in.
    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// The component cache.
    pub fn cache(&self) -> &Arc<ComponentCache> {
        &self.cache
    }

    /// The mode loader.
    pub fn loader(&self) -> &Arc<ModeLoader> {
        &self.loader
    }

    /// The switch latency monitor.
    pub fn performance(&self) -> &Arc<PerformanceMonitor> {
        &self.performance
    }

    /// The memory pressure monitor.
    pub fn memory_monitor(&self) -> &Arc<MemoryMonitor> {
        &self.memory
    }

    /// The gate background work checks for pending foreground switches.
    pub fn foreground_gate(&self) -> &ForegroundGate {
        &self.gate
    }
}

impl Drop for ModeRuntime {
    fn drop(&mut self) {
        self.memory.stop();
        self.stop_background_work();
    }
}

/// An interval whose first tick is one period away.
fn delayed_interval(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker
}

async fn log_stats_periodically(runtime: Weak<ModeRuntime>, period: Duration) {
    let mut ticker = delayed_interval(period);
    loop {
        ticker.tick().await;
        let Some(runtime) = runtime.upgrade() else {
            break;
        };
        let stats = runtime.stats();
        log::info!(
            "ModeRuntime: {} cached ({:.0}% of budget, hit rate {:.0}%), {} resource(s), avg switch {:.1}ms, memory {:?}",
            stats.cache.size,
            stats.cache.usage_percent,
            stats.cache.hit_rate * 100.0,
            stats.registry.tracked_count,
            stats.performance.average_ms,
            stats.memory.status
        );
        let by_kind: Vec<String> = ResourceKind::ALL
            .iter()
            .map(|kind| format!("{}={}", kind, stats.registry.count(*kind)))
            .collect();
        log::debug!("ModeRuntime: resources by kind: {}", by_kind.join(", "));
        match serde_json::to_string(&stats) {
            Ok(json) => log::debug!("ModeRuntime stats: {}", json),
            Err(e) => log::warn!("ModeRuntime: failed to serialize stats: {}", e),
        }
    }
}
