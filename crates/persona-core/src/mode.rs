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

//! Mode identifiers and the component sets constructed for them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::resource::ResourceKind;

/// The identifier of a personality mode (e.g. `"zen"`, `"hacker"`).
///
/// Every graphics resource created for a mode is registered under an id
/// namespaced by the mode (see [`ModeId::resource_id`]), which is what lets a
/// whole mode be disposed with a single prefix sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModeId(String);

impl ModeId {
    /// Creates a new mode identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the prefix shared by every resource id owned by this mode.
    ///
    /// The trailing separator keeps `"zen"` from matching the resources of a
    /// mode called `"zenith"`.
    pub fn resource_prefix(&self) -> String {
        format!("{}-", self.0)
    }

    /// Builds the registry id of the `index`-th resource of `kind` owned by this mode.
    pub fn resource_id(&self, kind: ResourceKind, index: usize) -> String {
        format!("{}-{}-{}", self.0, kind.as_str(), index)
    }

    /// Returns `true` if the given resource id belongs to this mode.
    pub fn owns_resource(&self, resource_id: &str) -> bool {
        resource_id
            .strip_prefix(self.0.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }
}

impl fmt::Display for ModeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ModeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque, shareable payload of a component set (a scene graph, a character rig).
pub type Payload = Arc<dyn Any + Send + Sync>;

/// The fully constructed, cacheable artifact of one mode.
///
/// The scene and character are opaque to the cache: they only hold resource
/// ids, never raw graphics handles, which stay owned by the resource registry.
#[derive(Clone)]
pub struct ComponentSet {
    mode_id: ModeId,
    scene: Payload,
    character: Payload,
    config: serde_json::Value,
    messages: serde_json::Value,
}

impl ComponentSet {
    /// Creates a component set with an empty configuration and message set.
    pub fn new<S, C>(mode_id: ModeId, scene: S, character: C) -> Self
    where
        S: Any + Send + Sync,
        C: Any + Send + Sync,
    {
        Self {
            mode_id,
            scene: Arc::new(scene),
            character: Arc::new(character),
            config: serde_json::Value::Null,
            messages: serde_json::Value::Null,
        }
    }

    /// Attaches the mode's configuration object.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Attaches the mode's message set.
    pub fn with_messages(mut self, messages: serde_json::Value) -> Self {
        self.messages = messages;
        self
    }

    /// The mode this set was constructed for.
    pub fn mode_id(&self) -> &ModeId {
        &self.mode_id
    }

    /// Downcasts the scene payload to a concrete type.
    pub fn scene<T: Any>(&self) -> Option<&T> {
        self.scene.downcast_ref::<T>()
    }

    /// Downcasts the character payload to a concrete type.
    pub fn character<T: Any>(&self) -> Option<&T> {
        self.character.downcast_ref::<T>()
    }

    /// The mode's configuration object.
    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    /// The mode's message set.
    pub fn messages(&self) -> &serde_json::Value {
        &self.messages
    }

    /// Serialized size of the configuration and message set, in bytes.
    pub fn serialized_payload_bytes(&self) -> u64 {
        let size_of = |value: &serde_json::Value| -> u64 {
            serde_json::to_vec(value)
                .map(|bytes| bytes.len() as u64)
                .unwrap_or(0)
        };
        size_of(&self.config) + size_of(&self.messages)
    }
}

impl fmt::Debug for ComponentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentSet")
            .field("mode_id", &self.mode_id)
            .field("config", &self.config)
            .field("messages", &self.messages)
            .finish_non_exhaustive()
    }
}
