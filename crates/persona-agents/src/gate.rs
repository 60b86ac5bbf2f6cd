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

//! Signals pending foreground switches to background work.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts foreground switches in progress. Cloning shares the counter.
#[derive(Debug, Clone, Default)]
pub struct ForegroundGate {
    pending: Arc<AtomicUsize>,
}

impl ForegroundGate {
    /// Creates a gate with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a foreground switch as pending until the guard is dropped.
    pub fn enter(&self) -> ForegroundGuard {
        self.pending.fetch_add(1, Ordering::SeqCst);
        ForegroundGuard {
            pending: self.pending.clone(),
        }
    }

    /// Returns `true` while at least one foreground switch is pending.
    pub fn is_pending(&self) -> bool {
        self.pending_count() > 0
    }

    /// Number of pending foreground switches.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// RAII marker of a pending foreground switch.
#[derive(Debug)]
pub struct ForegroundGuard {
    pending: Arc<AtomicUsize>,
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}
