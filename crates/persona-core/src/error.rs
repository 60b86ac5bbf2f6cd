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

//! Error types shared across the workspace.

use std::path::PathBuf;

use thiserror::Error;

use crate::mode::ModeId;

/// An error produced while loading a mode's component set.
///
/// Cloneable so that one construction result can be handed to every request
/// attached to the same in-flight load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The mode constructor failed.
    #[error("failed to construct mode '{mode_id}': {message}")]
    Construction {
        /// The mode that failed to construct.
        mode_id: ModeId,
        /// The constructor's error, rendered with its cause chain.
        message: String,
    },
    /// The constructor produced a set for a different mode than requested.
    #[error("constructor for mode '{requested}' returned a set for '{returned}'")]
    ModeMismatch {
        /// The requested mode.
        requested: ModeId,
        /// The mode of the returned set.
        returned: ModeId,
    },
    /// The mode was released or flushed while it was being constructed. The
    /// constructed set was discarded along with its resources.
    #[error("construction of mode '{mode_id}' was discarded before it completed")]
    Discarded {
        /// The mode whose construction was discarded.
        mode_id: ModeId,
    },
    /// The runtime is shutting down and no longer accepts loads.
    #[error("mode loading is shut down")]
    ShutDown,
}

impl LoadError {
    /// Wraps a constructor failure.
    pub fn construction(mode_id: &ModeId, error: &anyhow::Error) -> Self {
        LoadError::Construction {
            mode_id: mode_id.clone(),
            message: format!("{error:#}"),
        }
    }
}

/// An error raised while reading or validating the runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration from '{path}'")]
    Io {
        /// The path that failed to load.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration is not valid JSON for the expected schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value is outside its allowed range.
    #[error("invalid configuration value for '{field}': {reason}")]
    Invalid {
        /// The offending field, as a dotted path.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
