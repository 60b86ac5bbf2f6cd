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

//! Agents that populate the component cache.
//!
//! The [`ModeLoader`] serves switch requests and guarantees at most one
//! construction per mode at a time. The [`Preloader`] warms the cache in the
//! background through the same loader, stepping aside whenever a foreground
//! switch is pending on the [`ForegroundGate`].

pub mod constructor;
pub mod gate;
pub mod loader;
pub mod preloader;

pub use constructor::{FnConstructor, ModeConstructor};
pub use gate::{ForegroundGate, ForegroundGuard};
pub use loader::{FlushOutcome, LoadOutcome, ModeLoader};
pub use preloader::{PreloadReport, Preloader};
