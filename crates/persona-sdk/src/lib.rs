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

//! The public-facing API of the mode runtime.
//!
//! [`ModeRuntime`] wires the resource registry, component cache, loader,
//! preloader and monitors together from a single [`RuntimeConfig`].

mod runtime;
mod stats;

pub use runtime::{ModeRuntime, ModeRuntimeBuilder, SwitchOutcome};
pub use stats::RuntimeStats;

pub use persona_agents::{FnConstructor, ModeConstructor, PreloadReport};
pub use persona_core::{ComponentSet, LoadError, ModeId, ResourceKind, RuntimeConfig};

/// Commonly used types.
pub mod prelude {
    pub use crate::{ModeRuntime, RuntimeStats, SwitchOutcome};
    pub use persona_agents::{FnConstructor, ModeConstructor};
    pub use persona_core::{
        ComponentSet, GraphicsHandle, LoadError, ModeId, ResourceKind, RuntimeConfig,
    };
    pub use persona_data::ResourceRegistry;
}
