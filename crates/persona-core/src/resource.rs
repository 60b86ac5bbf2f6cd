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

//! Graphics resource kinds and the handle contract the registry tracks.
//!
//! A handle is an opaque reference to a graphics engine object that must be
//! released explicitly; dropping it is never assumed to free GPU memory.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The category of a tracked graphics resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Vertex/index buffer geometry.
    Geometry,
    /// A material, possibly owning textures.
    Material,
    /// A sampled image.
    Texture,
    /// A renderer and its drawing surface.
    RenderContext,
}

impl ResourceKind {
    /// Every resource kind, in a stable order.
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Geometry,
        ResourceKind::Material,
        ResourceKind::Texture,
        ResourceKind::RenderContext,
    ];

    /// The short name used inside resource ids (`"{mode}-{kind}-{n}"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Geometry => "geometry",
            ResourceKind::Material => "material",
            ResourceKind::Texture => "texture",
            ResourceKind::RenderContext => "context",
        }
    }

    /// Returns `true` for kinds that own sub-resources released along with them.
    pub fn is_composite(&self) -> bool {
        matches!(self, ResourceKind::Material | ResourceKind::RenderContext)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handle reports about itself for memory estimation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceShape {
    /// Geometry with the byte lengths of its attached buffers.
    Geometry {
        /// Byte length of each attribute/index buffer.
        buffer_bytes: Vec<u64>,
    },
    /// A material and the number of textures attached to it.
    Material {
        /// Number of attached texture maps.
        texture_count: usize,
    },
    /// A texture with optional known dimensions.
    Texture {
        /// `(width, height)` in pixels, if known.
        dimensions: Option<(u32, u32)>,
        /// Bytes per pixel of the texture format.
        bytes_per_pixel: u32,
    },
    /// A renderer context; its footprint is driver-defined.
    RenderContext,
    /// The handle cannot describe itself.
    Unknown,
}

/// An opaque graphics object that requires manual release.
///
/// Implementations live with the graphics backend (see `persona-infra` for a
/// headless one). The registry is the only caller of the release methods.
pub trait GraphicsHandle: Send + 'static {
    /// Describes the handle for memory estimation. Errors are tolerated by the
    /// registry, which substitutes the kind's fallback estimate.
    fn shape(&self) -> anyhow::Result<ResourceShape>;

    /// Releases the underlying graphics object.
    fn release(&mut self) -> anyhow::Result<()>;

    /// Hands over the sub-resources owned by this handle (a material's
    /// textures, a context's surface) so they are released with it.
    fn take_owned(&mut self) -> Vec<Box<dyn GraphicsHandle>> {
        Vec::new()
    }

    /// Forces the backend to drop the context so the driver does not retain
    /// its memory. Only meaningful for render contexts.
    fn lose_context(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}
