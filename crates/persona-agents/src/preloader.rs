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

//! Background preloading of popular modes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use persona_core::ModeId;
use tokio::sync::Semaphore;

use crate::constructor::ModeConstructor;
use crate::gate::ForegroundGate;
use crate::loader::ModeLoader;

/// What a preload pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
    /// Modes constructed by this pass.
    pub loaded: Vec<ModeId>,
    /// Modes that were already cached.
    pub skipped: Vec<ModeId>,
    /// Modes whose construction failed.
    pub failed: Vec<ModeId>,
    /// Times the pass backed off for a foreground switch.
    pub deferrals: u32,
}

/// Warms the cache with popular modes without competing with foreground
/// switches.
///
/// Only one preload construction runs at a time, across every call.
pub struct Preloader {
    loader: Arc<ModeLoader>,
    gate: ForegroundGate,
    permit: Semaphore,
    defer_delay: Duration,
    shut_down: AtomicBool,
}

impl Preloader {
    /// Creates a preloader sharing `loader` with foreground switches.
    pub fn new(loader: Arc<ModeLoader>, gate: ForegroundGate, defer_delay: Duration) -> Self {
        Self {
            loader,
            gate,
            permit: Semaphore::new(1),
            defer_delay,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Loads each mode in priority order unless it is already cached.
    ///
    /// Before each construction the pass yields to the scheduler, then waits
    /// in `defer_delay` steps while a foreground switch is pending. Failures
    /// are logged and skipped.
    pub async fn preload_popular(
        &self,
        mode_ids: &[ModeId],
        constructor: &Arc<dyn ModeConstructor>,
    ) -> PreloadReport {
        let mut report = PreloadReport::default();
        log::info!("Preloader: preloading {} mode(s)", mode_ids.len());

        'modes: for mode_id in mode_ids {
            let Ok(_permit) = self.permit.acquire().await else {
                break;
            };
            tokio::task::yield_now().await;

            while self.gate.is_pending() {
                if self.is_shut_down() {
                    break 'modes;
                }
                report.deferrals += 1;
                log::trace!("Preloader: deferring '{}' for a foreground switch", mode_id);
                tokio::time::sleep(self.defer_delay).await;
            }
            if self.is_shut_down() {
                break;
            }

            if self.loader.cache().contains(mode_id) {
                report.skipped.push(mode_id.clone());
                continue;
            }

            match self.loader.load(mode_id, constructor).await {
                Ok(outcome) if outcome.from_cache => report.skipped.push(mode_id.clone()),
                Ok(_) => {
                    log::debug!("Preloader: preloaded '{}'", mode_id);
                    report.loaded.push(mode_id.clone());
                }
                Err(e) => {
                    log::warn!("Preloader: skipping '{}': {}", mode_id, e);
                    report.failed.push(mode_id.clone());
                }
            }
        }

        log::info!(
            "Preloader: done ({} loaded, {} already cached, {} failed, {} deferral(s))",
            report.loaded.len(),
            report.skipped.len(),
            report.failed.len(),
            report.deferrals
        );
        report
    }

    /// Stops scheduling further preloads. A construction already running
    /// completes.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`Self::shutdown`] was called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
