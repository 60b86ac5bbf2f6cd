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

//! Periodic host memory sampling with level-triggered status callbacks.
//!
//! Every tick reads the host through a [`MemoryProvider`], classifies the
//! pressure and invokes the callbacks registered for the resulting status.
//! Callbacks fire on every matching tick, not only on transitions. The
//! monitor never evicts anything itself.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use persona_core::config::MemoryMonitorConfig;
use persona_core::telemetry::{MemoryProvider, MemoryReading, MemoryStatus};
use persona_core::utils::RingBuffer;
use persona_core::{Clock, SystemClock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

type StatusCallback = Arc<dyn Fn(&MemorySample) + Send + Sync>;

/// Identifies a registered callback for [`MemoryMonitor::remove_callback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// One memory reading and its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySample {
    /// When the sample was taken.
    pub timestamp: Instant,
    /// The raw reading. All zeros when the host exposes no memory API.
    pub reading: MemoryReading,
    /// Usage relative to the limit.
    pub pressure_percent: f64,
    /// The classified status.
    pub status: MemoryStatus,
}

/// A serializable summary of the monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMonitorStats {
    /// Whether periodic sampling is active.
    pub running: bool,
    /// Status of the latest sample (`Normal` before any sample).
    pub status: MemoryStatus,
    /// The latest reading, if any.
    pub latest: Option<MemoryReading>,
    /// Pressure of the latest sample.
    pub pressure_percent: f64,
    /// Pressure change between the older and newer half of the history,
    /// in percentage points.
    pub trend_percent: f64,
    /// Samples in the history.
    pub sample_count: usize,
}

struct MonitorState {
    status: MemoryStatus,
    history: RingBuffer<MemorySample>,
    callbacks: HashMap<MemoryStatus, Vec<(CallbackId, StatusCallback)>>,
}

/// Samples host memory pressure on a fixed interval.
pub struct MemoryMonitor {
    provider: Arc<dyn MemoryProvider>,
    config: MemoryMonitorConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<MonitorState>,
    next_callback_id: AtomicU64,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryMonitor {
    /// Creates a stopped monitor.
    pub fn new(provider: Arc<dyn MemoryProvider>, config: MemoryMonitorConfig) -> Self {
        let history = RingBuffer::new(config.history_size);
        Self {
            provider,
            config,
            clock: Arc::new(SystemClock),
            state: Mutex::new(MonitorState {
                status: MemoryStatus::Normal,
                history,
                callbacks: MemoryStatus::ALL
                    .into_iter()
                    .map(|status| (status, Vec::new()))
                    .collect(),
            }),
            next_callback_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Replaces the clock used to timestamp samples.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a callback invoked on every tick whose status is `status`.
    pub fn on_status(
        &self,
        status: MemoryStatus,
        callback: impl Fn(&MemorySample) + Send + Sync + 'static,
    ) -> CallbackId {
        let id = CallbackId(self.next_callback_id.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .callbacks
            .entry(status)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Unregisters a callback. Returns `false` if it was not registered for `status`.
    pub fn remove_callback(&self, status: MemoryStatus, id: CallbackId) -> bool {
        let mut state = self.lock();
        let Some(callbacks) = state.callbacks.get_mut(&status) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(registered, _)| *registered != id);
        before != callbacks.len()
    }

    /// Takes one sample immediately, records it and fires the matching callbacks.
    pub fn sample_now(&self) -> MemorySample {
        let reading = self.provider.read();
        let pressure_percent = reading.map_or(0.0, |r| r.pressure_percent());
        let status = MemoryStatus::classify(
            pressure_percent,
            self.config.warning_percent,
            self.config.critical_percent,
        );
        let sample = MemorySample {
            timestamp: self.clock.now(),
            reading: reading.unwrap_or_default(),
            pressure_percent,
            status,
        };

        let callbacks: Vec<StatusCallback> = {
            let mut state = self.lock();
            let previous = std::mem::replace(&mut state.status, status);
            state.history.push(sample.clone());
            if previous != status {
                log_transition(previous, &sample);
            }
            state
                .callbacks
                .get(&status)
                .map(|registered| registered.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };

        log::debug!(
            "MemoryMonitor: {:.1}% ({:.1} MB used, {:?})",
            pressure_percent,
            sample.reading.used_mb(),
            status
        );

        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(&sample))).is_err() {
                log::warn!("MemoryMonitor: a {:?} callback panicked", status);
            }
        }
        sample
    }

    /// Starts periodic sampling on the current tokio runtime.
    ///
    /// Returns `false` if already running or if called outside a runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("MemoryMonitor: start() called outside a tokio runtime, not sampling");
            return false;
        };
        if self.running.swap(true, Ordering::SeqCst) {
            log::debug!("MemoryMonitor: already running");
            return false;
        }

        let interval = self.config.sample_interval();
        let monitor = Arc::downgrade(self);
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                if !monitor.running.load(Ordering::SeqCst) {
                    break;
                }
                monitor.sample_now();
            }
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

        log::info!(
            "MemoryMonitor: sampling '{}' every {:?}",
            self.provider.provider_id(),
            interval
        );
        true
    }

    /// Stops periodic sampling. Idempotent and safe if never started.
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
        if was_running {
            log::info!("MemoryMonitor: stopped");
        }
    }

    /// Returns `true` while periodic sampling is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The status of the latest sample.
    pub fn status(&self) -> MemoryStatus {
        self.lock().status
    }

    /// The latest sample, if any.
    pub fn latest(&self) -> Option<MemorySample> {
        self.lock().history.latest().cloned()
    }

    /// The recorded history, oldest first.
    pub fn history(&self) -> Vec<MemorySample> {
        self.lock().history.iter().cloned().collect()
    }

    /// Pressure change across the history in percentage points. Positive
    /// when pressure is rising.
    pub fn trend_percent(&self) -> f64 {
        self.lock().history.trend_by(|s| s.pressure_percent)
    }

    /// Returns a serializable summary.
    pub fn stats(&self) -> MemoryMonitorStats {
        let state = self.lock();
        let latest = state.history.latest();
        MemoryMonitorStats {
            running: self.is_running(),
            status: state.status,
            latest: latest.map(|s| s.reading),
            pressure_percent: latest.map_or(0.0, |s| s.pressure_percent),
            trend_percent: state.history.trend_by(|s| s.pressure_percent),
            sample_count: state.history.len(),
        }
    }
}

fn log_transition(previous: MemoryStatus, sample: &MemorySample) {
    match sample.status {
        MemoryStatus::Critical => log::warn!(
            "MemoryMonitor: {:?} -> Critical at {:.1}%",
            previous,
            sample.pressure_percent
        ),
        status => log::info!(
            "MemoryMonitor: {:?} -> {:?} at {:.1}%",
            previous,
            status,
            sample.pressure_percent
        ),
    }
}

impl Drop for MemoryMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Replays scripted pressure percentages against a limit of 100 bytes,
    /// repeating the last one when the script runs out.
    #[derive(Debug)]
    struct ScriptedProvider {
        script: Mutex<VecDeque<u64>>,
        last: Mutex<Option<u64>>,
    }

    impl ScriptedProvider {
        fn new(script: &[u64]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                last: Mutex::new(None),
            })
        }
    }

    impl MemoryProvider for ScriptedProvider {
        fn provider_id(&self) -> Cow<'static, str> {
            Cow::Borrowed("scripted")
        }

        fn read(&self) -> Option<MemoryReading> {
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.script.lock().unwrap().pop_front() {
                *last = Some(next);
            }
            last.map(|used| MemoryReading {
                used_bytes: used,
                total_bytes: 100,
                limit_bytes: 100,
            })
        }
    }

    #[derive(Debug)]
    struct NoHostApi;

    impl MemoryProvider for NoHostApi {
        fn provider_id(&self) -> Cow<'static, str> {
            Cow::Borrowed("none")
        }

        fn read(&self) -> Option<MemoryReading> {
            None
        }
    }

    fn counter(monitor: &MemoryMonitor, status: MemoryStatus) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        monitor.on_status(status, move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_classification_and_level_callbacks() {
        let monitor = MemoryMonitor::new(
            ScriptedProvider::new(&[60, 75, 90, 50]),
            MemoryMonitorConfig::default(),
        );
        let normal = counter(&monitor, MemoryStatus::Normal);
        let warning = counter(&monitor, MemoryStatus::Warning);
        let critical = counter(&monitor, MemoryStatus::Critical);

        let statuses: Vec<MemoryStatus> = (0..4).map(|_| monitor.sample_now().status).collect();
        assert_eq!(
            statuses,
            vec![
                MemoryStatus::Normal,
                MemoryStatus::Warning,
                MemoryStatus::Critical,
                MemoryStatus::Normal
            ]
        );
        assert_eq!(normal.load(Ordering::SeqCst), 2);
        assert_eq!(warning.load(Ordering::SeqCst), 1);
        assert_eq!(critical.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callbacks_fire_on_every_matching_tick() {
        let monitor =
            MemoryMonitor::new(ScriptedProvider::new(&[90]), MemoryMonitorConfig::default());
        let critical = counter(&monitor, MemoryStatus::Critical);
        for _ in 0..3 {
            monitor.sample_now();
        }
        assert_eq!(critical.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_remove_callback() {
        let monitor =
            MemoryMonitor::new(ScriptedProvider::new(&[90]), MemoryMonitorConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        let id = monitor.on_status(MemoryStatus::Critical, move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!monitor.remove_callback(MemoryStatus::Warning, id));
        assert!(monitor.remove_callback(MemoryStatus::Critical, id));
        assert!(!monitor.remove_callback(MemoryStatus::Critical, id));
        monitor.sample_now();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_host_api_is_normal() {
        let monitor = MemoryMonitor::new(Arc::new(NoHostApi), MemoryMonitorConfig::default());
        let sample = monitor.sample_now();
        assert_eq!(sample.status, MemoryStatus::Normal);
        assert_eq!(sample.pressure_percent, 0.0);
        assert_eq!(sample.reading, MemoryReading::default());
    }

    #[test]
    fn test_history_and_trend() {
        let config = MemoryMonitorConfig {
            history_size: 4,
            ..MemoryMonitorConfig::default()
        };
        let monitor = MemoryMonitor::new(ScriptedProvider::new(&[10, 10, 20, 30, 40, 50]), config);
        for _ in 0..6 {
            monitor.sample_now();
        }

        let history = monitor.history();
        assert_eq!(history.len(), 4);
        assert_eq!(monitor.latest().map(|s| s.reading.used_bytes), Some(50));
        // Older half [20, 30], newer half [40, 50].
        assert!((monitor.trend_percent() - 20.0).abs() < 1e-9);
        assert_eq!(monitor.stats().sample_count, 4);
    }

    #[test]
    fn test_panicking_callback_does_not_stop_others() {
        let monitor =
            MemoryMonitor::new(ScriptedProvider::new(&[90]), MemoryMonitorConfig::default());
        monitor.on_status(MemoryStatus::Critical, |_| panic!("callback failure"));
        let critical = counter(&monitor, MemoryStatus::Critical);
        monitor.sample_now();
        assert_eq!(critical.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_without_start_is_safe() {
        let monitor = MemoryMonitor::new(Arc::new(NoHostApi), MemoryMonitorConfig::default());
        monitor.stop();
        monitor.stop();
        assert!(!monitor.is_running());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let monitor = Arc::new(MemoryMonitor::new(
            Arc::new(NoHostApi),
            MemoryMonitorConfig::default(),
        ));
        assert!(!monitor.start());
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sampling_until_stopped() {
        let monitor = Arc::new(MemoryMonitor::new(
            ScriptedProvider::new(&[50]),
            MemoryMonitorConfig::default(),
        ));
        let normal = counter(&monitor, MemoryStatus::Normal);

        assert!(monitor.start());
        assert!(!monitor.start());
        // Ticks at 0s, 30s and 60s.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(normal.load(Ordering::SeqCst), 3);

        monitor.stop();
        monitor.stop();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(normal.load(Ordering::SeqCst), 3);
        assert!(!monitor.is_running());
    }
}
