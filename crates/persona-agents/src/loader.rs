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

//! Serves mode switch requests from the cache or by construction.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use persona_core::{ComponentSet, LoadError, ModeId};
use persona_data::ComponentCache;

use crate::constructor::ModeConstructor;

type LoadResult = Result<Arc<ComponentSet>, LoadError>;
type PendingLoad = Shared<BoxFuture<'static, LoadResult>>;
type InFlight = Arc<Mutex<HashMap<ModeId, InFlightEntry>>>;

struct InFlightEntry {
    pending: PendingLoad,
    discarded: bool,
}

/// What a [`ModeLoader::flush`] released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Cached sets removed.
    pub sets: usize,
    /// Tracked resources disposed.
    pub resources: usize,
}

/// A successfully loaded set.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// The loaded set.
    pub set: Arc<ComponentSet>,
    /// `true` if the set came straight from the cache.
    pub from_cache: bool,
}

/// Loads component sets, deduplicating concurrent constructions per mode.
///
/// Each construction runs on its own tokio task, so it completes (and its
/// in-flight marker is cleared) even if every waiter is cancelled. The set
/// is inserted into the cache and the marker removed under the in-flight
/// lock, so a request can never observe "not cached and not loading" for a
/// mode that has just finished.
///
/// A construction that fails, or that finishes after a [`Self::release`],
/// [`Self::flush`] or [`Self::shutdown`], disposes every resource under the
/// mode's prefix before its marker is removed. Only sets whose resources
/// are still registered ever reach the cache.
pub struct ModeLoader {
    cache: Arc<ComponentCache>,
    in_flight: InFlight,
    constructions: Arc<AtomicU64>,
    shut_down: Arc<AtomicBool>,
}

fn lock_in_flight(in_flight: &InFlight) -> MutexGuard<'_, HashMap<ModeId, InFlightEntry>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ModeLoader {
    /// Creates a loader backed by `cache`.
    pub fn new(cache: Arc<ComponentCache>) -> Self {
        Self {
            cache,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            constructions: Arc::new(AtomicU64::new(0)),
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The cache this loader fills.
    pub fn cache(&self) -> &Arc<ComponentCache> {
        &self.cache
    }

    /// Returns the cached set for `mode_id`, or constructs it.
    ///
    /// Concurrent calls for the same mode share one construction and receive
    /// the same set. A failed construction clears its marker so a later call
    /// retries. Must be called from within a tokio runtime.
    pub async fn load(
        &self,
        mode_id: &ModeId,
        constructor: &Arc<dyn ModeConstructor>,
    ) -> Result<LoadOutcome, LoadError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(LoadError::ShutDown);
        }

        let pending = {
            let mut in_flight = lock_in_flight(&self.in_flight);
            if let Some(set) = self.cache.get(mode_id) {
                return Ok(LoadOutcome {
                    set,
                    from_cache: true,
                });
            }
            match in_flight.get(mode_id) {
                Some(entry) => {
                    log::debug!("ModeLoader: joining in-flight construction of '{}'", mode_id);
                    entry.pending.clone()
                }
                None => {
                    let pending = self.spawn_construction(mode_id.clone(), constructor.clone());
                    in_flight.insert(
                        mode_id.clone(),
                        InFlightEntry {
                            pending: pending.clone(),
                            discarded: false,
                        },
                    );
                    pending
                }
            }
        };

        pending.await.map(|set| LoadOutcome {
            set,
            from_cache: false,
        })
    }

    fn spawn_construction(
        &self,
        mode_id: ModeId,
        constructor: Arc<dyn ModeConstructor>,
    ) -> PendingLoad {
        self.constructions.fetch_add(1, Ordering::Relaxed);
        log::debug!("ModeLoader: constructing '{}'", mode_id);

        let cache = self.cache.clone();
        let in_flight = self.in_flight.clone();
        let shut_down = self.shut_down.clone();
        let task_mode = mode_id.clone();
        let task = tokio::spawn(async move {
            let mode_id = task_mode;
            let registry = cache.registry().clone();
            let constructed = AssertUnwindSafe(constructor.construct(mode_id.clone(), registry))
                .catch_unwind()
                .await;
            let result = match constructed {
                Ok(Ok(set)) if set.mode_id() == &mode_id => Ok(Arc::new(set)),
                Ok(Ok(set)) => Err(LoadError::ModeMismatch {
                    requested: mode_id.clone(),
                    returned: set.mode_id().clone(),
                }),
                Ok(Err(e)) => Err(LoadError::construction(&mode_id, &e)),
                Err(_) => Err(LoadError::Construction {
                    mode_id: mode_id.clone(),
                    message: "constructor panicked".to_string(),
                }),
            };

            let result = {
                let mut in_flight = lock_in_flight(&in_flight);
                let discarded = in_flight.get(&mode_id).is_some_and(|e| e.discarded);
                let result = if shut_down.load(Ordering::SeqCst) {
                    Err(LoadError::ShutDown)
                } else if discarded {
                    Err(LoadError::Discarded {
                        mode_id: mode_id.clone(),
                    })
                } else {
                    result
                };
                match &result {
                    Ok(set) => {
                        if !cache.set(set.clone()).stored {
                            log::warn!(
                                "ModeLoader: '{}' loaded but too large to cache, release it explicitly",
                                mode_id
                            );
                        }
                    }
                    Err(_) => {
                        let disposed = cache
                            .registry()
                            .dispose_by_prefix(&mode_id.resource_prefix());
                        if disposed > 0 {
                            log::debug!(
                                "ModeLoader: released {} resource(s) of discarded '{}'",
                                disposed,
                                mode_id
                            );
                        }
                    }
                }
                in_flight.remove(&mode_id);
                result
            };

            match &result {
                Ok(_) => log::debug!("ModeLoader: '{}' constructed", mode_id),
                Err(e) => log::warn!("ModeLoader: {}", e),
            }
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(LoadError::Construction {
                    mode_id,
                    message: format!("construction task failed: {e}"),
                })
            })
        }
        .boxed()
        .shared()
    }

    /// Returns `true` while a construction of `mode_id` is pending.
    pub fn is_loading(&self, mode_id: &ModeId) -> bool {
        lock_in_flight(&self.in_flight).contains_key(mode_id)
    }

    /// Number of pending constructions.
    pub fn in_flight_count(&self) -> usize {
        lock_in_flight(&self.in_flight).len()
    }

    /// Constructions started since creation.
    pub fn construction_count(&self) -> u64 {
        self.constructions.load(Ordering::Relaxed)
    }

    /// Drops `mode_id` from the cache and disposes its resources.
    ///
    /// A pending construction of the mode is discarded when it finishes:
    /// its resources are disposed and its waiters receive
    /// [`LoadError::Discarded`]. Returns `true` if anything was released or
    /// a construction was discarded.
    pub fn release(&self, mode_id: &ModeId) -> bool {
        let mut in_flight = lock_in_flight(&self.in_flight);
        let pending = match in_flight.get_mut(mode_id) {
            Some(entry) => {
                entry.discarded = true;
                true
            }
            None => false,
        };
        self.cache.delete(mode_id) || pending
    }

    /// Empties the cache and disposes every tracked resource.
    ///
    /// Constructions pending at the time of the flush are discarded when
    /// they finish, as with [`Self::release`].
    pub fn flush(&self) -> FlushOutcome {
        let mut in_flight = lock_in_flight(&self.in_flight);
        for entry in in_flight.values_mut() {
            entry.discarded = true;
        }
        FlushOutcome {
            sets: self.cache.clear(),
            resources: self.cache.registry().dispose_all(),
        }
    }

    /// Rejects further loads. Pending constructions still run to completion
    /// but their sets are discarded and their waiters receive
    /// [`LoadError::ShutDown`].
    pub fn shutdown(&self) {
        let _in_flight = lock_in_flight(&self.in_flight);
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            log::info!("ModeLoader: shut down");
        }
    }

    /// Returns `true` once [`Self::shutdown`] was called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
