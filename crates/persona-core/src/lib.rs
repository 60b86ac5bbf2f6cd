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

//! # Persona Core
//!
//! Foundational crate containing the shared types and contracts of the mode
//! resource cache: mode identifiers and component sets, graphics resource
//! handles, host memory providers, runtime configuration and errors.
//!
//! Nothing in this crate owns state beyond plain values; the registry, cache,
//! monitors and loaders that operate on these types live in the higher-level
//! crates.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod mode;
pub mod resource;
pub mod telemetry;
pub mod utils;

pub use config::RuntimeConfig;
pub use error::{ConfigError, LoadError};
pub use mode::{ComponentSet, ModeId};
pub use resource::{GraphicsHandle, ResourceKind, ResourceShape};
pub use utils::clock::{Clock, ManualClock, SystemClock};
