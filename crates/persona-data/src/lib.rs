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

//! Data layer of the mode runtime.
//!
//! The [`ResourceRegistry`] is the single owner of graphics handles; the
//! [`ComponentCache`] holds constructed component sets under a memory budget
//! and disposes evicted sets' resources through the registry.

pub mod cache;
pub mod estimate;
pub mod registry;

pub use cache::{CacheEntryInfo, CacheStats, ComponentCache, SetOutcome};
pub use estimate::{DefaultSetEstimator, HeuristicEstimator, MemoryEstimator, SetEstimator};
pub use registry::{RegistryStats, ResourceRegistry};
