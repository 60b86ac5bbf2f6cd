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

//! Heuristic memory estimators for graphics resources and component sets.
//!
//! Estimates are deliberately approximate. They only need to be stable and
//! roughly proportional so the cache budget and the pressure heuristics make
//! sensible decisions.

use persona_core::{ComponentSet, GraphicsHandle, ResourceKind, ResourceShape};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Estimates the footprint of a single graphics resource.
pub trait MemoryEstimator: Send + Sync + 'static {
    /// Returns the estimated size in bytes. Must not fail.
    fn estimate(&self, kind: ResourceKind, handle: &dyn GraphicsHandle) -> u64;
}

/// The default per-kind estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct HeuristicEstimator {
    /// Used for geometry that reports no buffers.
    pub geometry_fallback_bytes: u64,
    /// Fixed cost of a material.
    pub material_base_bytes: u64,
    /// Added per texture attached to a material.
    pub material_texture_bytes: u64,
    /// Dimensions assumed for textures that do not report theirs.
    pub default_texture_dimensions: (u32, u32),
    /// Bytes per pixel assumed when a texture reports zero.
    pub default_bytes_per_pixel: u32,
    /// Fixed cost of a render context.
    pub render_context_bytes: u64,
}

impl Default for HeuristicEstimator {
    fn default() -> Self {
        Self {
            geometry_fallback_bytes: 64 * KIB,
            material_base_bytes: KIB,
            material_texture_bytes: 256 * KIB,
            default_texture_dimensions: (512, 512),
            default_bytes_per_pixel: 4,
            render_context_bytes: 32 * MIB,
        }
    }
}

impl HeuristicEstimator {
    /// The estimate used when a handle cannot describe itself.
    pub fn fallback(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Geometry => self.geometry_fallback_bytes,
            ResourceKind::Material => self.material_base_bytes,
            ResourceKind::Texture => {
                self.texture_bytes(self.default_texture_dimensions, self.default_bytes_per_pixel)
            }
            ResourceKind::RenderContext => self.render_context_bytes,
        }
    }

    fn texture_bytes(&self, (width, height): (u32, u32), bytes_per_pixel: u32) -> u64 {
        let bpp = if bytes_per_pixel == 0 {
            self.default_bytes_per_pixel
        } else {
            bytes_per_pixel
        };
        u64::from(width)
            .saturating_mul(u64::from(height))
            .saturating_mul(u64::from(bpp))
    }

    fn from_shape(&self, kind: ResourceKind, shape: ResourceShape) -> u64 {
        match (kind, shape) {
            (ResourceKind::Geometry, ResourceShape::Geometry { buffer_bytes })
                if !buffer_bytes.is_empty() =>
            {
                buffer_bytes
                    .iter()
                    .fold(0u64, |total, bytes| total.saturating_add(*bytes))
            }
            (ResourceKind::Material, ResourceShape::Material { texture_count }) => self
                .material_base_bytes
                .saturating_add(self.material_texture_bytes.saturating_mul(texture_count as u64)),
            (
                ResourceKind::Texture,
                ResourceShape::Texture {
                    dimensions,
                    bytes_per_pixel,
                },
            ) => self.texture_bytes(
                dimensions.unwrap_or(self.default_texture_dimensions),
                bytes_per_pixel,
            ),
            (kind, _) => self.fallback(kind),
        }
    }
}

impl MemoryEstimator for HeuristicEstimator {
    fn estimate(&self, kind: ResourceKind, handle: &dyn GraphicsHandle) -> u64 {
        match handle.shape() {
            Ok(shape) => self.from_shape(kind, shape),
            Err(e) => {
                log::debug!(
                    "HeuristicEstimator: shape query failed for {} ({:#}), using fallback",
                    kind,
                    e
                );
                self.fallback(kind)
            }
        }
    }
}

/// Estimates the footprint of a whole component set.
pub trait SetEstimator: Send + Sync + 'static {
    /// Returns the estimated size in bytes. Must not fail.
    fn estimate_set(&self, set: &ComponentSet) -> u64;
}

impl<F> SetEstimator for F
where
    F: Fn(&ComponentSet) -> u64 + Send + Sync + 'static,
{
    fn estimate_set(&self, set: &ComponentSet) -> u64 {
        self(set)
    }
}

/// Per-field constants plus the serialized size of config and messages.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultSetEstimator {
    /// Cost attributed to a scene.
    pub scene_bytes: u64,
    /// Cost attributed to an animated character.
    pub character_bytes: u64,
}

impl Default for DefaultSetEstimator {
    fn default() -> Self {
        Self {
            scene_bytes: 5 * MIB,
            character_bytes: 2 * MIB,
        }
    }
}

impl SetEstimator for DefaultSetEstimator {
    fn estimate_set(&self, set: &ComponentSet) -> u64 {
        self.scene_bytes
            .saturating_add(self.character_bytes)
            .saturating_add(set.serialized_payload_bytes())
    }
}
