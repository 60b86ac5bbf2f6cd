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

//! The pluggable mode constructor.

use std::future::Future;

use std::sync::Arc;

use async_trait::async_trait;
use persona_core::{ComponentSet, ModeId};
use persona_data::ResourceRegistry;

/// Builds the component set of a mode.
///
/// Implementations must register every graphics resource they allocate in
/// `registry` under the mode's namespace ([`ModeId::resource_id`]), so that
/// evicting the mode releases them.
#[async_trait]
pub trait ModeConstructor: Send + Sync + 'static {
    /// Constructs the set for `mode_id`.
    async fn construct(
        &self,
        mode_id: ModeId,
        registry: Arc<ResourceRegistry>,
    ) -> anyhow::Result<ComponentSet>;
}

/// Adapts an async closure into a [`ModeConstructor`].
pub struct FnConstructor<F>(pub F);

#[async_trait]
impl<F, Fut> ModeConstructor for FnConstructor<F>
where
    F: Fn(ModeId, Arc<ResourceRegistry>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<ComponentSet>> + Send + 'static,
{
    async fn construct(
        &self,
        mode_id: ModeId,
        registry: Arc<ResourceRegistry>,
    ) -> anyhow::Result<ComponentSet> {
        (self.0)(mode_id, registry).await
    }
}
